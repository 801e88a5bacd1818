//! Error handling for the Togetherly client

use std::fmt;
use thiserror::Error;

/// Unified error type for the Togetherly client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A backend answered with a non-success status
    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// Realtime subscription errors
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Media playback errors
    #[error("Media error: {0}")]
    Media(String),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Filesystem errors (session persistence)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new realtime error
    pub fn realtime<T: fmt::Display>(msg: T) -> Self {
        Error::Realtime(msg.to_string())
    }

    /// Create a new media error
    pub fn media<T: fmt::Display>(msg: T) -> Self {
        Error::Media(msg.to_string())
    }

    /// Create a new general error
    pub fn general<T: fmt::Display>(msg: T) -> Self {
        Error::General(msg.to_string())
    }

    /// The message a user should see, without the category prefix
    pub fn user_message(&self) -> String {
        match self {
            Error::Api { message, .. } => message.clone(),
            Error::Auth(msg)
            | Error::Database(msg)
            | Error::Realtime(msg)
            | Error::Media(msg)
            | Error::General(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
