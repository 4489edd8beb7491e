//! In-flight authorization request state
//!
//! One [`AuthorizationRequestState`] exists per login attempt. It is created
//! by `start_authorization`, persisted in the credential store so it survives
//! the browser redirect, and consumed exactly once by `handle_callback`.
//! A replayed callback must fail because the state is deleted on first use,
//! and an abandoned attempt ages out after a bounded TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::pkce::PkceChallenge;

/// How long an unconsumed authorization request stays valid, in seconds.
pub const PENDING_REQUEST_TTL_SECONDS: i64 = 600;

/// Ephemeral state for one authorization attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequestState {
    /// Anti-CSRF nonce, matched exactly against the callback `state`
    pub state: String,

    /// PKCE code verifier, sent only during token exchange
    pub code_verifier: String,

    /// PKCE code challenge, sent in the authorization request
    pub code_challenge: String,

    /// Redirect URI this attempt was started with
    pub redirect_uri: String,

    /// Scopes requested for this attempt
    pub requested_scopes: Vec<String>,

    /// Creation instant, used for TTL expiry
    pub created_at: DateTime<Utc>,
}

impl AuthorizationRequestState {
    /// Build the pending state for a new attempt.
    #[must_use]
    pub fn new(
        state: String,
        pkce: &PkceChallenge,
        redirect_uri: String,
        requested_scopes: Vec<String>,
    ) -> Self {
        Self {
            state,
            code_verifier: pkce.code_verifier.clone(),
            code_challenge: pkce.code_challenge.clone(),
            redirect_uri,
            requested_scopes,
            created_at: Utc::now(),
        }
    }

    /// True once the attempt has outlived [`PENDING_REQUEST_TTL_SECONDS`].
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > chrono::Duration::seconds(PENDING_REQUEST_TTL_SECONDS)
    }

    /// Serialize for the credential store.
    ///
    /// # Errors
    /// Returns [`AuthError::Storage`] if serialization fails.
    pub fn to_json(&self) -> Result<String, AuthError> {
        serde_json::to_string(self).map_err(|e| AuthError::Storage(e.to_string()))
    }

    /// Deserialize from the credential store.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidState`] if the stored value does not
    /// parse; a corrupt pending request cannot be trusted.
    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        serde_json::from_str(raw)
            .map_err(|e| AuthError::InvalidState(format!("stored request unreadable: {e}")))
    }
}
