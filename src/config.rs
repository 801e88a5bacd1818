//! Configuration options for the Togetherly client

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for the Togetherly client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The request timeout applied to every HTTP call
    pub request_timeout: Option<Duration>,

    /// Whether to persist the signed-in session between runs
    pub persist_session: bool,

    /// Where the persisted session lives
    pub session_file: PathBuf,

    /// The database schema
    pub db_schema: String,

    /// Collection holding couple profiles
    pub couples_collection: String,

    /// Collection holding events
    pub events_collection: String,

    /// How often HTTP-backed snapshot streams poll for changes
    pub realtime_poll_interval: Duration,

    /// Re-title birthday events when only a partner name changes
    pub retitle_birthdays_on_rename: bool,

    /// Route unauthenticated visitors are sent to
    pub login_path: String,

    /// Route signed-in users land on
    pub home_path: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            persist_session: true,
            session_file: PathBuf::from(".togetherly-session.json"),
            db_schema: "public".to_string(),
            couples_collection: "couples".to_string(),
            events_collection: "events".to_string(),
            realtime_poll_interval: Duration::from_secs(2),
            retitle_birthdays_on_rename: false,
            login_path: "/login".to_string(),
            home_path: "/".to_string(),
        }
    }
}

impl ClientOptions {
    /// Default options overlaid with any `TOGETHERLY_*` environment variables
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(secs) = env_parse::<u64>("TOGETHERLY_REQUEST_TIMEOUT_SECS") {
            options.request_timeout = if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            };
        }
        if let Some(value) = env_parse::<bool>("TOGETHERLY_PERSIST_SESSION") {
            options.persist_session = value;
        }
        if let Ok(path) = env::var("TOGETHERLY_SESSION_FILE") {
            options.session_file = PathBuf::from(path);
        }
        if let Ok(schema) = env::var("TOGETHERLY_DB_SCHEMA") {
            options.db_schema = schema;
        }
        if let Some(ms) = env_parse::<u64>("TOGETHERLY_POLL_INTERVAL_MS") {
            options.realtime_poll_interval = Duration::from_millis(ms.max(100));
        }
        if let Some(value) = env_parse::<bool>("TOGETHERLY_RETITLE_BIRTHDAYS") {
            options.retitle_birthdays_on_rename = value;
        }

        options
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set whether to persist the session
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    /// Set the session file location
    pub fn with_session_file(mut self, value: impl Into<PathBuf>) -> Self {
        self.session_file = value.into();
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the collection names for couples and events
    pub fn with_collections(mut self, couples: &str, events: &str) -> Self {
        self.couples_collection = couples.to_string();
        self.events_collection = events.to_string();
        self
    }

    /// Set the snapshot polling interval
    pub fn with_realtime_poll_interval(mut self, value: Duration) -> Self {
        self.realtime_poll_interval = value;
        self
    }

    /// Enable or disable birthday re-titling on bare name changes
    pub fn with_retitle_birthdays_on_rename(mut self, value: bool) -> Self {
        self.retitle_birthdays_on_rename = value;
        self
    }

    /// Set the login and home route paths
    pub fn with_routes(mut self, login_path: &str, home_path: &str) -> Self {
        self.login_path = login_path.to_string();
        self.home_path = home_path.to_string();
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
