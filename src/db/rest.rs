//! Document store backed by a PostgREST endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::{Document, DocumentStore, Fields, Query};
use crate::auth::AccessTokenSource;
use crate::config::ClientOptions;
use crate::error::Error;
use crate::fetch::{Fetch, FetchBuilder};
use crate::realtime::{poll_snapshots, topic, SnapshotStream};

/// Client for collection access over `/rest/v1`
#[derive(Clone)]
pub struct RestDocumentStore {
    /// The base URL for the project
    url: String,

    /// The anonymous API key for the project
    key: String,

    /// HTTP client
    client: Client,

    /// Signed-in user's token, used instead of the anon key when present
    tokens: Option<Arc<dyn AccessTokenSource>>,

    /// Client options
    options: ClientOptions,
}

impl RestDocumentStore {
    pub fn new(url: &str, key: &str, client: Client, options: ClientOptions) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            client,
            tokens: None,
            options,
        }
    }

    /// Authorize requests as the signed-in user
    pub fn with_token_source(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn get_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.url, collection)
    }

    fn authorize<'a>(&self, fetch: FetchBuilder<'a>) -> FetchBuilder<'a> {
        let token = self
            .tokens
            .as_ref()
            .and_then(|t| t.access_token())
            .unwrap_or_else(|| self.key.clone());

        fetch
            .header("apikey", &self.key)
            .header("Accept-Profile", &self.options.db_schema)
            .header("Content-Profile", &self.options.db_schema)
            .bearer_auth(&token)
            .timeout(self.options.request_timeout)
    }

    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Document>, Error> {
        let url = self.get_url(collection);
        let rows = self
            .authorize(Fetch::get(&self.client, &url))
            .query([("select", "*")])
            .query(query.to_params())
            .execute::<Vec<Value>>()
            .await
            .map_err(into_database_error)?;

        rows.into_iter().map(Document::from_row).collect()
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, Error> {
        self.select(collection, query).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, Error> {
        let query = Query::new().eq("id", id).limit(1);
        Ok(self.select(collection, &query).await?.into_iter().next())
    }

    async fn insert(&self, collection: &str, mut fields: Fields) -> Result<Document, Error> {
        fields.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));

        let url = self.get_url(collection);
        let rows = self
            .authorize(Fetch::post(&self.client, &url))
            .header("Prefer", "return=representation")
            .json(&fields)?
            .execute::<Vec<Value>>()
            .await
            .map_err(into_database_error)?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::database(format!("Insert into {} returned no row", collection)))?;
        Document::from_row(row)
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), Error> {
        let url = self.get_url(collection);
        let rows = self
            .authorize(Fetch::patch(&self.client, &url))
            .header("Prefer", "return=representation")
            .query([("id", format!("eq.{}", id))])
            .json(&patch)?
            .execute::<Vec<Value>>()
            .await
            .map_err(into_database_error)?;

        if rows.is_empty() {
            return Err(Error::database(format!("No document {} in {}", id, collection)));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), Error> {
        let url = self.get_url(collection);
        self.authorize(Fetch::delete(&self.client, &url))
            .header("Prefer", "return=minimal")
            .query([("id", format!("eq.{}", id))])
            .execute_empty()
            .await
            .map_err(into_database_error)
    }

    fn watch_query(&self, collection: &str, query: Query) -> SnapshotStream<Vec<Document>> {
        let store = self.clone();
        let collection = collection.to_string();
        let name = topic(&self.options.db_schema, &collection, None);

        poll_snapshots(name, self.options.realtime_poll_interval, move || {
            let store = store.clone();
            let collection = collection.clone();
            let query = query.clone();
            async move { store.select(&collection, &query).await }
        })
    }

    fn watch_document(&self, collection: &str, id: &str) -> SnapshotStream<Option<Document>> {
        let store = self.clone();
        let (collection, id) = (collection.to_string(), id.to_string());
        let name = topic(&self.options.db_schema, &collection, Some(&id));

        poll_snapshots(name, self.options.realtime_poll_interval, move || {
            let store = store.clone();
            let collection = collection.clone();
            let id = id.clone();
            async move { store.get(&collection, &id).await }
        })
    }
}

fn into_database_error(err: Error) -> Error {
    match err {
        Error::Api { status, message } => Error::Database(format!("{} ({})", message, status)),
        other => other,
    }
}
