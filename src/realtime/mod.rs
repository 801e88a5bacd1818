//! Real-time snapshot streams and subscription handles

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Error;

/// Snapshots buffered per stream before the producer waits
pub const SNAPSHOT_BUFFER: usize = 16;

/// A stream of snapshots; errors arrive in-band and do not end the stream
pub type SnapshotStream<T> = mpsc::Receiver<Result<T, Error>>;

/// Topic name used in logs: `realtime:{schema}:{collection}[:{key}]`
pub fn topic(schema: &str, collection: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("realtime:{}:{}:{}", schema, collection, key),
        None => format!("realtime:{}:{}", schema, collection),
    }
}

/// Handle for a running subscription
///
/// Dropping the handle stops the subscription as well.
#[must_use = "dropping a Subscription stops it"]
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(topic: String, task: JoinHandle<()>) -> Self {
        Self { topic, task }
    }

    /// The topic this subscription listens to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether updates are still being delivered
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop receiving updates
    pub fn unsubscribe(self) {
        debug!(topic = %self.topic, "Unsubscribing");
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Turn a fetch function into a snapshot stream by polling it
///
/// The first result is always delivered; afterwards a snapshot is only sent
/// when it differs from the previous one. A failure is reported once per
/// failing streak. Polling stops when the receiver is dropped.
pub fn poll_snapshots<T, F, Fut>(topic: String, interval: Duration, fetch: F) -> SnapshotStream<T>
where
    T: PartialEq + Clone + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Error>> + Send,
{
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<T> = None;
        let mut failing = false;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let item = match fetch().await {
                Ok(snapshot) => {
                    failing = false;
                    if last.as_ref() == Some(&snapshot) {
                        continue;
                    }
                    last = Some(snapshot.clone());
                    Ok(snapshot)
                }
                Err(e) if failing => {
                    debug!(%topic, "Poll still failing: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!(%topic, "Poll failed: {}", e);
                    failing = true;
                    Err(e)
                }
            };

            if tx.send(item).await.is_err() {
                break;
            }
        }
        debug!(%topic, "Poller stopped");
    });

    rx
}
