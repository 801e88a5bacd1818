//! Session store: the signed-in identity as the application sees it

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::Identity;
use super::{AuthState, IdentityProvider, OAuthProvider};
use crate::error::Error;

#[derive(Debug, Clone)]
struct SessionState {
    user: Option<Identity>,
    loading: bool,
    error: Option<String>,
}

/// Holds the current identity and forwards sign-in/sign-out to the provider
///
/// The provider's auth-state feed is attached once in [`SessionStore::start`]
/// and is the only writer of the identity besides the explicit
/// login/logout operations.
pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    state: RwLock<SessionState>,
    resolved: watch::Sender<bool>,
}

impl SessionStore {
    /// Create the store and attach it to the provider's auth-state feed
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(provider: Arc<dyn IdentityProvider>) -> Arc<Self> {
        let (resolved, _) = watch::channel(false);
        let mut feed = provider.auth_state();

        let store = Arc::new(Self {
            provider,
            state: RwLock::new(SessionState {
                user: None,
                loading: true,
                error: None,
            }),
            resolved,
        });

        let initial = feed.borrow_and_update().clone();
        store.apply_auth_state(initial);
        tokio::spawn(follow_auth_state(Arc::downgrade(&store), feed));

        store
    }

    /// Wait until the provider has restored (or failed to restore) the
    /// previous session, then return the current identity
    ///
    /// Resolves immediately on every call after the first restore.
    pub async fn verify_auth(&self) -> Option<Identity> {
        let mut rx = self.resolved.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|done| *done).await;
        self.user()
    }

    /// Whether the initial restore has completed
    pub fn is_resolved(&self) -> bool {
        *self.resolved.borrow()
    }

    /// The signed-in identity
    pub fn user(&self) -> Option<Identity> {
        self.state.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().user.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Message of the last failed operation, cleared when a new one starts
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, Error> {
        self.begin(true);
        let result = self.provider.sign_in_with_password(email, password).await;
        self.finish("login", result)
    }

    /// Create an account with email and password
    pub async fn register(&self, email: &str, password: &str) -> Result<Identity, Error> {
        self.begin(true);
        let result = self.provider.sign_up_with_password(email, password).await;
        self.finish("register", result)
    }

    /// Sign in with a Google account
    pub async fn login_with_google(&self) -> Result<Identity, Error> {
        self.begin(true);
        let result = self.provider.sign_in_with_popup(OAuthProvider::Google).await;
        self.finish("login_with_google", result)
    }

    /// Sign out
    pub async fn logout(&self) -> Result<(), Error> {
        self.begin(false);
        match self.provider.sign_out().await {
            Ok(()) => {
                self.state.write().user = None;
                info!("Signed out");
                Ok(())
            }
            Err(e) => {
                warn!("logout failed: {}", e);
                self.state.write().error = Some(e.user_message());
                Err(e)
            }
        }
    }

    fn begin(&self, loading: bool) {
        let mut state = self.state.write();
        state.error = None;
        if loading {
            state.loading = true;
        }
    }

    fn finish(&self, op: &str, result: Result<Identity, Error>) -> Result<Identity, Error> {
        let mut state = self.state.write();
        state.loading = false;
        match result {
            Ok(identity) => {
                info!(user_id = %identity.id, "{} succeeded", op);
                state.user = Some(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                warn!("{} failed: {}", op, e);
                state.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    fn apply_auth_state(&self, auth: AuthState) {
        let AuthState::Resolved(identity) = auth else {
            return;
        };

        debug!(signed_in = identity.is_some(), "Auth state changed");
        {
            let mut state = self.state.write();
            state.user = identity;
            state.loading = false;
        }
        self.resolved.send_if_modified(|done| !std::mem::replace(done, true));
    }
}

async fn follow_auth_state(store: Weak<SessionStore>, mut feed: watch::Receiver<AuthState>) {
    while feed.changed().await.is_ok() {
        let auth = feed.borrow_and_update().clone();
        match store.upgrade() {
            Some(store) => store.apply_auth_state(auth),
            None => break,
        }
    }
    debug!("Auth state feed closed");
}
