//! Identity provider backed by a GoTrue-style HTTP auth server

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::session::Session;
use super::types::{AuthResponse, Identity};
use super::{AccessTokenSource, AuthState, IdentityProvider, OAuthPopup, OAuthProvider};
use crate::config::ClientOptions;
use crate::error::Error;
use crate::fetch::Fetch;

/// Client for the HTTP auth endpoints
pub struct RestIdentityProvider {
    /// The base URL for the project
    url: String,

    /// The anonymous API key for the project
    key: String,

    /// HTTP client used for requests
    client: Client,

    /// The current session
    session: Mutex<Option<Session>>,

    /// Published auth state
    state: watch::Sender<AuthState>,

    /// Interactive OAuth step, if the host application provides one
    popup: Option<Arc<dyn OAuthPopup>>,

    /// Client options
    options: ClientOptions,
}

impl RestIdentityProvider {
    /// Create a new provider; call [`restore_session`](Self::restore_session)
    /// once to resolve the initial auth state.
    pub fn new(url: &str, key: &str, client: Client, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(AuthState::Unknown);
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            client,
            session: Mutex::new(None),
            state,
            popup: None,
            options,
        }
    }

    /// Attach the interactive OAuth step
    pub fn with_popup(mut self, popup: Arc<dyn OAuthPopup>) -> Self {
        self.popup = Some(popup);
        self
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// Get the current session
    pub fn get_session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    /// Load the persisted session, refresh it if needed and publish the
    /// resolved auth state
    pub async fn restore_session(&self) -> Option<Identity> {
        let restored = match self.load_persisted().await {
            Ok(Some(session)) => self.revalidate(session).await,
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read persisted session: {}", e);
                None
            }
        };

        let identity = restored.as_ref().map(|s| s.user.clone());
        *self.session.lock() = restored;
        info!(signed_in = identity.is_some(), "Session restore finished");
        self.state.send_replace(AuthState::Resolved(identity.clone()));
        identity
    }

    /// Exchange the current refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Identity, Error> {
        let refresh_token = self
            .get_session()
            .map(|s| s.refresh_token)
            .ok_or_else(|| Error::auth("Not logged in"))?;

        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        self.establish(session).await
    }

    async fn revalidate(&self, session: Session) -> Option<Session> {
        match session.claims() {
            Ok(claims) if claims.sub == session.user.id => {}
            Ok(claims) => {
                warn!(token_sub = %claims.sub, "Stored session does not match its user, discarding");
                return None;
            }
            Err(e) => {
                warn!("Stored access token is unreadable: {}", e);
                return None;
            }
        }

        if !session.is_expired() {
            return Some(session);
        }

        debug!("Stored session expired, refreshing");
        match self
            .token_grant(
                "refresh_token",
                json!({ "refresh_token": session.refresh_token }),
            )
            .await
        {
            Ok(fresh) => {
                if let Err(e) = self.persist(Some(&fresh)).await {
                    warn!("Could not persist refreshed session: {}", e);
                }
                Some(fresh)
            }
            Err(e) => {
                warn!("Session refresh failed: {}", e);
                None
            }
        }
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, Error> {
        let url = self.get_auth_url("/token");

        let response = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .query([("grant_type", grant_type)])
            .timeout(self.options.request_timeout)
            .json(&body)?
            .execute::<AuthResponse>()
            .await
            .map_err(into_auth_error)?;

        Ok(Session::from_response(response))
    }

    async fn establish(&self, session: Session) -> Result<Identity, Error> {
        let identity = session.user.clone();

        if let Err(e) = self.persist(Some(&session)).await {
            warn!("Could not persist session: {}", e);
        }
        *self.session.lock() = Some(session);
        self.state.send_replace(AuthState::Resolved(Some(identity.clone())));

        Ok(identity)
    }

    async fn clear(&self) {
        if let Err(e) = self.persist(None).await {
            warn!("Could not remove persisted session: {}", e);
        }
        *self.session.lock() = None;
        self.state.send_replace(AuthState::Resolved(None));
    }

    async fn load_persisted(&self) -> Result<Option<Session>, Error> {
        if !self.options.persist_session {
            return Ok(None);
        }

        match tokio::fs::read(&self.options.session_file).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, session: Option<&Session>) -> Result<(), Error> {
        if !self.options.persist_session {
            return Ok(());
        }

        let path = &self.options.session_file;
        match session {
            Some(session) => {
                tokio::fs::write(path, serde_json::to_vec_pretty(session)?).await?;
            }
            None => match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        self.establish(session).await
    }

    async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let url = self.get_auth_url("/signup");

        let body = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .timeout(self.options.request_timeout)
            .json(&json!({ "email": email, "password": password }))?
            .execute::<serde_json::Value>()
            .await
            .map_err(into_auth_error)?;

        // Without auto-confirm the server answers with a bare user and no tokens
        if body.get("access_token").is_none() {
            return Err(Error::auth(
                "Account created; confirm the email address before signing in",
            ));
        }

        let response: AuthResponse = serde_json::from_value(body)?;
        self.establish(Session::from_response(response)).await
    }

    async fn sign_in_with_popup(&self, provider: OAuthProvider) -> Result<Identity, Error> {
        let popup = self
            .popup
            .as_ref()
            .ok_or_else(|| Error::auth("No OAuth popup is configured"))?;

        let authorize_url = format!(
            "{}?provider={}",
            self.get_auth_url("/authorize"),
            provider.as_str()
        );
        let id_token = popup.authorize(provider, &authorize_url).await?;

        let session = self
            .token_grant(
                "id_token",
                json!({ "provider": provider.as_str(), "id_token": id_token }),
            )
            .await?;
        self.establish(session).await
    }

    async fn sign_out(&self) -> Result<(), Error> {
        let token = match self.get_session() {
            Some(session) => session.access_token,
            None => {
                self.clear().await;
                return Ok(());
            }
        };

        let url = self.get_auth_url("/logout");
        let result = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .bearer_auth(&token)
            .timeout(self.options.request_timeout)
            .execute_empty()
            .await;

        match result {
            Ok(()) => {}
            // The server already forgot this token
            Err(Error::Api { status: 401 | 403 | 404, .. }) => {
                debug!("Logout token was already invalid");
            }
            Err(e) => return Err(into_auth_error(e)),
        }

        self.clear().await;
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}

impl AccessTokenSource for RestIdentityProvider {
    fn access_token(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.access_token.clone())
    }
}

fn into_auth_error(err: Error) -> Error {
    match err {
        Error::Api { message, .. } => Error::Auth(message),
        other => other,
    }
}
