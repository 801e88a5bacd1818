//! Document database access

mod memory;
mod query;
mod rest;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::realtime::SnapshotStream;

pub use memory::MemoryDocumentStore;
pub use query::*;
pub use rest::RestDocumentStore;

/// Field map of a stored document
pub type Fields = serde_json::Map<String, Value>;

/// A stored document: generated id plus its fields
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Deserialize the document, exposing its id as an `id` field
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Split a row carrying its own `id` column into a document
    pub(crate) fn from_row(row: Value) -> Result<Self, Error> {
        let Value::Object(mut fields) = row else {
            return Err(Error::database("expected a row object"));
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) => id,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(Error::database("row has no id")),
        };
        Ok(Self { id, fields })
    }
}

/// Serialize a value into a document field map
///
/// `None` options are skipped by the types' serde attributes, so the result
/// doubles as a partial update.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, Error> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(Error::database(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Decode every document of a snapshot
pub fn decode_all<T: DeserializeOwned>(docs: Vec<Document>) -> Result<Vec<T>, Error> {
    docs.iter().map(Document::decode).collect()
}

/// A collection-oriented document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run a filtered, ordered query against a collection
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, Error>;

    /// Read a single document
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, Error>;

    /// Insert a document under a newly generated id
    async fn insert(&self, collection: &str, fields: Fields) -> Result<Document, Error>;

    /// Merge fields into an existing document
    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), Error>;

    /// Delete a document; deleting a missing document is not an error
    async fn delete(&self, collection: &str, id: &str) -> Result<(), Error>;

    /// Stream the query result: once immediately, then on every change
    fn watch_query(&self, collection: &str, query: Query) -> SnapshotStream<Vec<Document>>;

    /// Stream one document: once immediately, then on every change
    fn watch_document(&self, collection: &str, id: &str) -> SnapshotStream<Option<Document>>;
}
