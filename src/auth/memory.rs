//! In-process identity provider for tests and offline use

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::types::Identity;
use super::{AuthState, IdentityProvider, OAuthProvider};
use crate::error::Error;

#[derive(Default)]
struct Accounts {
    by_email: HashMap<String, (String, Identity)>,
    oauth: HashMap<OAuthProvider, Identity>,
    current: Option<Identity>,
}

/// Identity provider that keeps accounts in memory
///
/// Starts in [`AuthState::Unknown`] until [`restore`](Self::restore) is
/// called, the same way a real provider resolves asynchronously.
pub struct MemoryIdentityProvider {
    accounts: Mutex<Accounts>,
    state: watch::Sender<AuthState>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::Unknown);
        Self {
            accounts: Mutex::new(Accounts::default()),
            state,
        }
    }

    /// Register an account up front; returns its identity
    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let identity = Identity::new(Uuid::new_v4().to_string(), Some(email.to_string()));
        self.accounts.lock().by_email.insert(
            email.to_lowercase(),
            (password.to_string(), identity.clone()),
        );
        identity
    }

    /// Make an OAuth provider sign in as the given identity
    pub fn add_oauth_account(&self, provider: OAuthProvider, identity: Identity) {
        self.accounts.lock().oauth.insert(provider, identity);
    }

    /// Finish the initial session restore with `identity`
    pub fn restore(&self, identity: Option<Identity>) {
        self.accounts.lock().current = identity.clone();
        self.state.send_replace(AuthState::Resolved(identity));
    }

    fn sign_in_as(&self, identity: Identity) -> Identity {
        self.accounts.lock().current = Some(identity.clone());
        self.state.send_replace(AuthState::Resolved(Some(identity.clone())));
        identity
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let identity = {
            let accounts = self.accounts.lock();
            match accounts.by_email.get(&email.to_lowercase()) {
                Some((stored, identity)) if stored == password => identity.clone(),
                _ => return Err(Error::auth("Invalid login credentials")),
            }
        };
        debug!(user_id = %identity.id, "Memory provider sign-in");
        Ok(self.sign_in_as(identity))
    }

    async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<Identity, Error> {
        if password.len() < 6 {
            return Err(Error::auth("Password should be at least 6 characters"));
        }
        if self.accounts.lock().by_email.contains_key(&email.to_lowercase()) {
            return Err(Error::auth("Email address already in use"));
        }
        let identity = self.add_account(email, password);
        Ok(self.sign_in_as(identity))
    }

    async fn sign_in_with_popup(&self, provider: OAuthProvider) -> Result<Identity, Error> {
        let identity = self
            .accounts
            .lock()
            .oauth
            .get(&provider)
            .cloned()
            .ok_or_else(|| Error::auth("Popup closed by user"))?;
        Ok(self.sign_in_as(identity))
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.accounts.lock().current = None;
        self.state.send_replace(AuthState::Resolved(None));
        Ok(())
    }

    fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}
