//! Error types for the relying-party client
//!
//! One taxonomy covers the whole crate so callers can match on a single enum
//! regardless of which layer failed. Module-specific sub-errors (`PkceError`,
//! `OAuthError`) compose into [`AuthError`] rather than duplicating variants.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Error response reported by the authorization server
///
/// Standard OAuth 2.0 error response format (RFC 6749 §5.2). Deserializes
/// error bodies from the token endpoint and error query parameters on the
/// callback URL. Surfaced verbatim to callers.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthError {
    /// Machine-readable error code (e.g. `invalid_grant`, `access_denied`)
    pub error: String,

    /// Human-readable description, when the server provides one
    pub error_description: Option<String>,
}

impl OAuthError {
    /// True when the server reports the grant as permanently unusable.
    ///
    /// `invalid_grant` on a refresh request means the refresh token is dead;
    /// the client must drop its local session rather than retry.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        self.error == "invalid_grant"
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for OAuthError {}

/// Errors raised by the PKCE engine
#[derive(Debug, Clone, Error)]
pub enum PkceError {
    /// No cryptographically secure random source is available
    #[error("secure entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),

    /// Caller asked for a challenge method this client does not implement
    ///
    /// Verification never downgrades to `plain` when the caller expects
    /// `S256`; an unknown method is always an error.
    #[error("unsupported code challenge method: {0}")]
    UnsupportedMethod(String),
}

/// Unified error type for client operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid or incomplete configuration; fatal at construction
    #[error("configuration error: {0}")]
    Configuration(String),

    /// PKCE generation or verification failed
    #[error("PKCE error: {0}")]
    Pkce(#[from] PkceError),

    /// Callback state mismatch, or the pending authorization request is
    /// missing, already consumed, or expired. Always treated as a CSRF
    /// attempt; the token endpoint is never called.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Error reported by the authorization server
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),

    /// Transport failure, timeout, or a non-2xx response without an OAuth
    /// error body. Never conflated with token expiry.
    #[error("network error: {0}")]
    Network(String),

    /// Refresh could not produce a new token set
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    /// Credential store operation failed; aborts the enclosing operation
    #[error("storage error: {0}")]
    Storage(String),

    /// JWT could not be decoded; means "cannot verify locally", never fatal
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Operation requires a signed-in session
    #[error("not authenticated")]
    NotAuthenticated,
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("request timed out: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}
