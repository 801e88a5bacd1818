//! Authentication: identity providers and the session store

mod memory;
mod rest;
mod session;
mod store;
mod types;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Error;

pub use memory::MemoryIdentityProvider;
pub use rest::RestIdentityProvider;
pub use session::*;
pub use store::SessionStore;
pub use types::*;

/// Whether the provider has finished restoring the previous session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Session restore has not completed yet
    #[default]
    Unknown,
    /// Restore completed; `None` means nobody is signed in
    Resolved(Option<Identity>),
}

/// OAuth providers available for popup sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

/// An external identity service
///
/// Implementations publish every sign-in, sign-out and the initial
/// session restore on the [`AuthState`] feed.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign in with an email credential
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, Error>;

    /// Create an account with an email credential and sign it in
    async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<Identity, Error>;

    /// Sign in through an interactive OAuth flow
    async fn sign_in_with_popup(&self, provider: OAuthProvider) -> Result<Identity, Error>;

    /// End the current session
    async fn sign_out(&self) -> Result<(), Error>;

    /// Feed of authentication state changes
    fn auth_state(&self) -> watch::Receiver<AuthState>;
}

/// Interactive part of an OAuth sign-in
///
/// Opens whatever UI the host application has (browser, webview) at
/// `authorize_url` and returns the ID token the provider issued.
#[async_trait]
pub trait OAuthPopup: Send + Sync {
    async fn authorize(&self, provider: OAuthProvider, authorize_url: &str) -> Result<String, Error>;
}

/// Something that can hand out the current access token
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}
