//! Types for authentication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An authenticated user as the rest of the crate sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The user ID
    pub id: String,

    /// The user's email address
    pub email: Option<String>,

    /// Display name, when the provider knows one
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            display_name: None,
        }
    }
}

/// Token response from the auth endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    /// The access token
    pub access_token: String,

    /// The refresh token
    pub refresh_token: String,

    /// The token type
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The expiry time in seconds
    pub expires_in: i64,

    /// The expiry timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The user data
    pub user: RemoteUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// User object as returned by the auth server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    /// The user ID
    pub id: String,

    /// The user's email address
    #[serde(default)]
    pub email: Option<String>,

    /// The user metadata
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
}

impl From<RemoteUser> for Identity {
    fn from(user: RemoteUser) -> Self {
        let display_name = ["full_name", "name"]
            .iter()
            .find_map(|key| user.user_metadata.get(*key))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Identity {
            id: user.id,
            email: user.email,
            display_name,
        }
    }
}
