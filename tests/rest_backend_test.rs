use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use togetherly::auth::{
    AccessTokenSource, AuthState, Identity, IdentityProvider, RestIdentityProvider, Session,
};
use togetherly::config::ClientOptions;
use togetherly::db::{DocumentStore, Query, RestDocumentStore};
use togetherly::error::Error;

const KEY: &str = "anon-key";

fn auth_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "id": "user-1",
            "email": "alex@example.com",
            "user_metadata": { "full_name": "Alex" }
        }
    })
}

fn memory_only() -> ClientOptions {
    ClientOptions::default().with_persist_session(false)
}

fn session_file(dir: &TempDir) -> PathBuf {
    dir.path().join("session.json")
}

fn access_token(sub: &str, exp: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": sub, "exp": exp, "email": "alex@example.com" }),
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::test]
async fn test_sign_in_with_password() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", KEY))
        .and(body_json(json!({ "email": "alex@example.com", "password": "secret1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("token-1", "refresh-1")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), memory_only());
    let feed = provider.auth_state();

    let identity = provider
        .sign_in_with_password("alex@example.com", "secret1")
        .await
        .unwrap();
    assert_eq!(identity.id, "user-1");
    assert_eq!(identity.display_name.as_deref(), Some("Alex"));
    assert_eq!(provider.access_token().as_deref(), Some("token-1"));
    assert_eq!(*feed.borrow(), AuthState::Resolved(Some(identity)));
}

#[tokio::test]
async fn test_sign_in_failure_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), memory_only());
    let err = provider
        .sign_in_with_password("alex@example.com", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(ref msg) if msg == "Invalid login credentials"));
    assert!(provider.get_session().is_none());
}

#[tokio::test]
async fn test_sign_up_without_tokens_requires_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user-9",
            "email": "new@example.com"
        })))
        .mount(&server)
        .await;

    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), memory_only());
    let err = provider
        .sign_up_with_password("new@example.com", "secret1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn test_sign_out_with_stale_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("token-1", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "msg": "invalid JWT" })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), memory_only());
    provider
        .sign_in_with_password("alex@example.com", "secret1")
        .await
        .unwrap();

    provider.sign_out().await.unwrap();
    assert!(provider.get_session().is_none());
    assert_eq!(*provider.auth_state().borrow(), AuthState::Resolved(None));
}

#[tokio::test]
async fn test_restore_valid_session_offline() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let file = session_file(&dir);
    let session = Session {
        access_token: access_token("user-1", now() + 3600),
        refresh_token: "refresh-1".to_string(),
        token_type: "bearer".to_string(),
        expires_at: now() + 3600,
        user: Identity::new("user-1", Some("alex@example.com".to_string())),
    };
    std::fs::write(&file, serde_json::to_vec(&session).unwrap()).unwrap();

    let options = ClientOptions::default().with_session_file(&file);
    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), options);
    assert_eq!(*provider.auth_state().borrow(), AuthState::Unknown);

    let restored = provider.restore_session().await;
    assert_eq!(restored, Some(session.user.clone()));
    assert_eq!(provider.get_session(), Some(session));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_expired_session_refreshes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_json(json!({ "refresh_token": "refresh-old" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("token-new", "refresh-new")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let file = session_file(&dir);
    let stale = Session {
        access_token: access_token("user-1", now() - 60),
        refresh_token: "refresh-old".to_string(),
        token_type: "bearer".to_string(),
        expires_at: now() - 60,
        user: Identity::new("user-1", None),
    };
    std::fs::write(&file, serde_json::to_vec(&stale).unwrap()).unwrap();

    let options = ClientOptions::default().with_session_file(&file);
    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), options);

    let restored = provider.restore_session().await.unwrap();
    assert_eq!(restored.id, "user-1");
    assert_eq!(provider.access_token().as_deref(), Some("token-new"));

    let persisted: Session = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
    assert_eq!(persisted.refresh_token, "refresh-new");
}

#[tokio::test]
async fn test_restore_discards_foreign_token() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let file = session_file(&dir);
    let session = Session {
        access_token: access_token("someone-else", now() + 3600),
        refresh_token: "refresh-1".to_string(),
        token_type: "bearer".to_string(),
        expires_at: now() + 3600,
        user: Identity::new("user-1", None),
    };
    std::fs::write(&file, serde_json::to_vec(&session).unwrap()).unwrap();

    let options = ClientOptions::default().with_session_file(&file);
    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), options);

    assert_eq!(provider.restore_session().await, None);
    assert_eq!(*provider.auth_state().borrow(), AuthState::Resolved(None));
}

#[tokio::test]
async fn test_query_renders_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/events"))
        .and(query_param("select", "*"))
        .and(query_param("coupleId", "eq.couple-1"))
        .and(query_param("order", "date.asc"))
        .and(header("apikey", KEY))
        .and(header("authorization", "Bearer anon-key"))
        .and(header("accept-profile", "public"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "e1", "coupleId": "couple-1", "title": "Trip", "date": "2024-05-01T00:00:00Z" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = RestDocumentStore::new(&server.uri(), KEY, Client::new(), ClientOptions::default());
    let query = Query::new().eq("coupleId", "couple-1").order("date", true);
    let docs = store.query("events", &query).await.unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "e1");
    assert_eq!(docs[0].fields["title"], "Trip");
    assert!(!docs[0].fields.contains_key("id"));
}

#[tokio::test]
async fn test_insert_returns_stored_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/events"))
        .and(header("prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            { "id": "generated", "coupleId": "couple-1", "title": "Trip" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = RestDocumentStore::new(&server.uri(), KEY, Client::new(), ClientOptions::default());
    let mut fields = serde_json::Map::new();
    fields.insert("coupleId".to_string(), json!("couple-1"));
    fields.insert("title".to_string(), json!("Trip"));

    let doc = store.insert("events", fields).await.unwrap();
    assert_eq!(doc.id, "generated");

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(sent["id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn test_update_missing_row_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/couples"))
        .and(query_param("id", "eq.missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/events"))
        .and(query_param("id", "eq.e1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/events"))
        .and(query_param("id", "eq.locked"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "permission denied for table events"
        })))
        .mount(&server)
        .await;

    let store = RestDocumentStore::new(&server.uri(), KEY, Client::new(), ClientOptions::default());

    let mut patch = serde_json::Map::new();
    patch.insert("partner1Name".to_string(), json!("Alex"));
    assert!(matches!(
        store.update("couples", "missing", patch).await,
        Err(Error::Database(_))
    ));

    store.delete("events", "e1").await.unwrap();

    let err = store.delete("events", "locked").await.unwrap_err();
    assert_eq!(
        err.user_message(),
        "permission denied for table events (403)"
    );
}

#[tokio::test]
async fn test_requests_use_signed_in_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("user-token", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/couples"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new();
    let provider = Arc::new(RestIdentityProvider::new(
        &server.uri(),
        KEY,
        client.clone(),
        memory_only(),
    ));
    let store = RestDocumentStore::new(&server.uri(), KEY, client, ClientOptions::default())
        .with_token_source(provider.clone());

    provider
        .sign_in_with_password("alex@example.com", "secret1")
        .await
        .unwrap();
    let docs = store
        .query("couples", &Query::new().eq("userId1", "user-1").limit(1))
        .await
        .unwrap();
    assert!(docs.is_empty());
}

#[tokio::test]
async fn test_refresh_session_replaces_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("token-1", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body("token-2", "refresh-2")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = RestIdentityProvider::new(&server.uri(), KEY, Client::new(), memory_only());
    assert!(matches!(
        provider.refresh_session().await,
        Err(Error::Auth(ref msg)) if msg == "Not logged in"
    ));

    provider
        .sign_in_with_password("alex@example.com", "secret1")
        .await
        .unwrap();
    let identity = provider.refresh_session().await.unwrap();

    assert_eq!(identity.id, "user-1");
    assert_eq!(provider.access_token().as_deref(), Some("token-2"));
    assert_eq!(
        provider.get_session().map(|s| s.refresh_token).as_deref(),
        Some("refresh-2")
    );
}
