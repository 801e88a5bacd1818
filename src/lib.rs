//! Togetherly client library
//!
//! Client-side state for a two-person relationship app: the signed-in
//! session, the shared couple profile and its dated events (with birthday
//! events kept in step with the profile), a route guard and an audio player
//! controller.

pub mod auth;
pub mod clock;
pub mod config;
pub mod couple;
pub mod db;
pub mod error;
pub mod fetch;
pub mod media;
pub mod realtime;
pub mod router;
pub mod storage;

use reqwest::Client;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

use crate::auth::{IdentityProvider, OAuthPopup, RestIdentityProvider, SessionStore};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientOptions;
use crate::couple::CoupleStore;
use crate::db::{DocumentStore, RestDocumentStore};
use crate::error::Error;
use crate::media::MediaController;
use crate::router::{NavigationGuard, RouteTable};
use crate::storage::{LogNotifier, Notifier};

/// The main entry point: every store the application reads from
pub struct Togetherly {
    session: Arc<SessionStore>,
    couple: Arc<CoupleStore>,
    router: Arc<NavigationGuard>,
    player: Arc<MediaController>,
    options: ClientOptions,
}

impl Togetherly {
    /// Create a client for a hosted project
    ///
    /// Must be called inside a tokio runtime: the previous session is
    /// restored in the background and [`SessionStore::verify_auth`] waits
    /// for it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use togetherly::Togetherly;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), togetherly::error::Error> {
    /// let app = Togetherly::new("https://your-project.example.com", "your-anon-key")?;
    /// let user = app.session().verify_auth().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(url: &str, key: &str) -> Result<Self, Error> {
        Self::new_with_options(url, key, ClientOptions::default())
    }

    /// Create a client for a hosted project with custom options
    pub fn new_with_options(url: &str, key: &str, options: ClientOptions) -> Result<Self, Error> {
        Self::hosted(url, key, options, None)
    }

    /// Create a client for a hosted project whose Google sign-in runs
    /// through `popup`
    pub fn new_with_popup(
        url: &str,
        key: &str,
        options: ClientOptions,
        popup: Arc<dyn OAuthPopup>,
    ) -> Result<Self, Error> {
        Self::hosted(url, key, options, Some(popup))
    }

    fn hosted(
        url: &str,
        key: &str,
        options: ClientOptions,
        popup: Option<Arc<dyn OAuthPopup>>,
    ) -> Result<Self, Error> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::general("The client must be created inside a tokio runtime"))?;
        let http_client = Client::new();

        let mut provider =
            RestIdentityProvider::new(url, key, http_client.clone(), options.clone());
        if let Some(popup) = popup {
            provider = provider.with_popup(popup);
        }
        let identity = Arc::new(provider);
        let db = RestDocumentStore::new(url, key, http_client, options.clone())
            .with_token_source(identity.clone());

        let restoring = identity.clone();
        runtime.spawn(async move {
            restoring.restore_session().await;
        });

        Ok(Self::with_backends(
            identity,
            Arc::new(db),
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
            options,
        ))
    }

    /// Assemble the stores over explicit backends
    ///
    /// The identity provider is expected to resolve its initial auth state
    /// on its own; until then route checks wait. Must be called inside a
    /// tokio runtime.
    pub fn with_backends(
        identity: Arc<dyn IdentityProvider>,
        db: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        options: ClientOptions,
    ) -> Self {
        debug!(schema = %options.db_schema, "Creating client");

        let session = SessionStore::start(identity);
        let couple = Arc::new(CoupleStore::new(db, clock, notifier, options.clone()));
        let router = Arc::new(NavigationGuard::new(
            session.clone(),
            RouteTable::default(),
            &options,
        ));

        Self {
            session,
            couple,
            router,
            player: Arc::new(MediaController::new()),
            options,
        }
    }

    /// The signed-in identity and auth operations
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The couple profile and events
    pub fn couple(&self) -> &Arc<CoupleStore> {
        &self.couple
    }

    /// The route guard
    pub fn router(&self) -> &Arc<NavigationGuard> {
        &self.router
    }

    /// The audio player
    pub fn player(&self) -> &Arc<MediaController> {
        &self.player
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::auth::{Identity, SessionStore};
    pub use crate::config::ClientOptions;
    pub use crate::couple::{CoupleProfile, CoupleProfileUpdate, Event, EventType, NewEvent, Partner};
    pub use crate::error::Error;
    pub use crate::router::Navigation;
    pub use crate::Togetherly;
}
