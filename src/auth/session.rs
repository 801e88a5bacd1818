//! Session management for authentication

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::types::{AuthResponse, Identity};
use crate::error::Error;

/// Session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    pub refresh_token: String,

    /// The token type
    pub token_type: String,

    /// The expiry timestamp (seconds since the epoch)
    pub expires_at: i64,

    /// Who the session belongs to
    pub user: Identity,
}

/// Claims read from an access token
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

impl Session {
    /// Build a session from a token response
    pub fn from_response(response: AuthResponse) -> Self {
        let expires_at = response
            .expires_at
            .unwrap_or_else(|| unix_now() + response.expires_in);

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            expires_at,
            user: response.user.into(),
        }
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    /// Check expiry against an explicit timestamp
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Read the claims carried by the access token
    ///
    /// The signature is not checked: the server does that on every call,
    /// this is only used to recognise a stored session offline.
    pub fn claims(&self) -> Result<AccessClaims, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<AccessClaims>(
            &self.access_token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )?;
        Ok(data.claims)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}
