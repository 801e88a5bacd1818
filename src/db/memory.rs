//! In-process document store for tests and offline use

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::{Document, DocumentStore, Fields, Query};
use crate::error::Error;
use crate::realtime::{SnapshotStream, SNAPSHOT_BUFFER};

#[derive(Debug, Clone)]
enum Change {
    Updated(String),
    Failed { collection: String, message: String },
}

impl Change {
    fn collection(&self) -> &str {
        match self {
            Change::Updated(c) => c,
            Change::Failed { collection, .. } => collection,
        }
    }
}

struct Inner {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    changes: broadcast::Sender<Change>,
    fail_next_write: Mutex<Option<String>>,
}

impl Inner {
    fn run_query(&self, collection: &str, query: &Query) -> Vec<Document> {
        let collections = self.collections.read();
        let docs = collections.get(collection).cloned().unwrap_or_default();
        query.apply(docs)
    }

    fn find(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }

    fn take_write_failure(&self) -> Result<(), Error> {
        match self.fail_next_write.lock().take() {
            Some(message) => Err(Error::database(message)),
            None => Ok(()),
        }
    }

    fn notify(&self, collection: &str) {
        // No receivers just means nobody is watching
        let _ = self.changes.send(Change::Updated(collection.to_string()));
    }
}

/// Document store that keeps collections in memory and pushes changes to
/// watchers over a broadcast channel
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                changes,
                fail_next_write: Mutex::new(None),
            }),
        }
    }

    /// All documents of a collection in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next insert, update or delete fail with `message`
    pub fn fail_next_write(&self, message: &str) {
        *self.inner.fail_next_write.lock() = Some(message.to_string());
    }

    /// Deliver a stream error to every watcher of `collection`
    pub fn break_streams(&self, collection: &str, message: &str) {
        let _ = self.inner.changes.send(Change::Failed {
            collection: collection.to_string(),
            message: message.to_string(),
        });
    }

    fn watch<T, F>(&self, collection: &str, snapshot: F) -> SnapshotStream<T>
    where
        T: PartialEq + Clone + Send + 'static,
        F: Fn(&Inner) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let inner = self.inner.clone();
        // Subscribe before taking the first snapshot so no change slips between
        let mut changes = inner.changes.subscribe();
        let collection = collection.to_string();

        tokio::spawn(async move {
            let mut last = snapshot(&inner);
            if tx.send(Ok(last.clone())).await.is_err() {
                return;
            }

            loop {
                let change = tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => change,
                };

                let item = match change {
                    Ok(change) if change.collection() != collection => continue,
                    Ok(Change::Failed { message, .. }) => Err(Error::realtime(message)),
                    Ok(Change::Updated(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let current = snapshot(&inner);
                        if current == last {
                            continue;
                        }
                        last = current.clone();
                        Ok(current)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if tx.send(item).await.is_err() {
                    break;
                }
            }
            debug!(%collection, "Memory watcher stopped");
        });

        rx
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, Error> {
        Ok(self.inner.run_query(collection, query))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, Error> {
        Ok(self.inner.find(collection, id))
    }

    async fn insert(&self, collection: &str, mut fields: Fields) -> Result<Document, Error> {
        self.inner.take_write_failure()?;

        fields.remove("id");
        let doc = Document::new(Uuid::new_v4().to_string(), fields);
        self.inner
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        self.inner.notify(collection);
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), Error> {
        self.inner.take_write_failure()?;

        {
            let mut collections = self.inner.collections.write();
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
                .ok_or_else(|| {
                    Error::database(format!("No document {} in {}", id, collection))
                })?;
            for (key, value) in patch {
                if key != "id" {
                    doc.fields.insert(key, value);
                }
            }
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), Error> {
        self.inner.take_write_failure()?;

        let removed = {
            let mut collections = self.inner.collections.write();
            match collections.get_mut(collection) {
                Some(docs) => {
                    let before = docs.len();
                    docs.retain(|d| d.id != id);
                    docs.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.inner.notify(collection);
        }
        Ok(())
    }

    fn watch_query(&self, collection: &str, query: Query) -> SnapshotStream<Vec<Document>> {
        let name = collection.to_string();
        self.watch(collection, move |inner| inner.run_query(&name, &query))
    }

    fn watch_document(&self, collection: &str, id: &str) -> SnapshotStream<Option<Document>> {
        let (name, id) = (collection.to_string(), id.to_string());
        self.watch(collection, move |inner| inner.find(&name, &id))
    }
}
