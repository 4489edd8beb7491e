//! Client configuration
//!
//! An explicit configuration struct constructed once and handed to the
//! client; there is no ambient global state. Validation happens at client
//! construction and configuration problems are fatal there.

use std::time::Duration;

use crate::error::AuthError;
use crate::store::StorageKind;

/// Default clock-skew tolerance for local JWT checks, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 60;

/// Default lead time before expiry at which tokens are refreshed, in seconds.
pub const DEFAULT_REFRESH_THRESHOLD_SECONDS: i64 = 300;

/// Default timeout for token endpoint and userinfo requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default prefix applied to every credential store key.
pub const DEFAULT_STORAGE_PREFIX: &str = "relykit_";

/// Provider endpoint set
///
/// Derived from the issuer by convention, or taken from a fetched discovery
/// document.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorization: String,
    pub token: String,
    pub userinfo: String,
    pub revocation: Option<String>,
    pub end_session: Option<String>,
}

impl Endpoints {
    /// Derive the endpoint set from an issuer base URL.
    #[must_use]
    pub fn from_issuer(issuer: &str) -> Self {
        let base = issuer.trim_end_matches('/');
        Self {
            authorization: format!("{base}/oauth2/authorize"),
            token: format!("{base}/oauth2/token"),
            userinfo: format!("{base}/oauth2/userinfo"),
            revocation: Some(format!("{base}/oauth2/revoke")),
            end_session: Some(format!("{base}/auth/logout")),
        }
    }
}

/// Configuration for an [`AuthClient`](crate::client::AuthClient)
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Authorization server base URL (e.g. `https://id.example.com`)
    pub issuer: String,

    /// OAuth client ID
    pub client_id: String,

    /// Redirect URI registered with the provider
    pub redirect_uri: String,

    /// Scopes requested by default
    pub scopes: Vec<String>,

    /// API audience, for providers that use one
    pub audience: Option<String>,

    /// Extra query parameters appended to every authorization URL
    pub additional_params: Vec<(String, String)>,

    /// Clock-skew tolerance for local JWT checks, in seconds
    pub clock_skew_seconds: i64,

    /// Refresh tokens this many seconds before expiry
    pub refresh_threshold_seconds: i64,

    /// Timeout applied to provider HTTP calls
    pub http_timeout: Duration,

    /// Credential store backend
    pub storage: StorageKind,

    /// Prefix applied to credential store keys
    pub storage_prefix: String,
}

impl AuthConfig {
    /// Create a configuration with defaults for everything optional.
    #[must_use]
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
            audience: None,
            additional_params: Vec::new(),
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            refresh_threshold_seconds: DEFAULT_REFRESH_THRESHOLD_SECONDS,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            storage: StorageKind::Memory,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
        }
    }

    /// Replace the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the API audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Select the credential store backend.
    #[must_use]
    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Set the refresh lead time in seconds.
    #[must_use]
    pub fn with_refresh_threshold(mut self, seconds: i64) -> Self {
        self.refresh_threshold_seconds = seconds;
        self
    }

    /// Set the clock-skew tolerance in seconds.
    #[must_use]
    pub fn with_clock_skew(mut self, seconds: i64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Append a query parameter to every authorization URL.
    #[must_use]
    pub fn with_additional_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_params.push((key.into(), value.into()));
        self
    }

    /// Requested scopes as a space-separated string.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Validate required fields.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] when the client id is empty or
    /// the issuer is missing or not an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client_id is required".to_string()));
        }
        if self.issuer.trim().is_empty() {
            return Err(AuthError::Configuration("issuer is required".to_string()));
        }
        if !(self.issuer.starts_with("https://") || self.issuer.starts_with("http://")) {
            return Err(AuthError::Configuration(format!(
                "issuer must be an absolute http(s) URL: {}",
                self.issuer
            )));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(AuthError::Configuration("redirect_uri is required".to_string()));
        }
        if self.refresh_threshold_seconds < 0 || self.clock_skew_seconds < 0 {
            return Err(AuthError::Configuration(
                "refresh threshold and clock skew must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoint set derived from the issuer.
    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        Endpoints::from_issuer(&self.issuer)
    }

    /// Apply the store key prefix to a key.
    #[must_use]
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.storage_prefix, key)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration validation and endpoint derivation.
    use super::*;

    #[test]
    fn endpoints_derived_from_issuer() {
        let endpoints = Endpoints::from_issuer("https://id.example.com/");

        assert_eq!(endpoints.authorization, "https://id.example.com/oauth2/authorize");
        assert_eq!(endpoints.token, "https://id.example.com/oauth2/token");
        assert_eq!(endpoints.userinfo, "https://id.example.com/oauth2/userinfo");
        assert_eq!(endpoints.revocation.as_deref(), Some("https://id.example.com/oauth2/revoke"));
        assert_eq!(endpoints.end_session.as_deref(), Some("https://id.example.com/auth/logout"));
    }

    #[test]
    fn config_defaults() {
        let config = AuthConfig::new("https://id.example.com", "client-1", "https://app/cb");

        assert_eq!(config.clock_skew_seconds, DEFAULT_CLOCK_SKEW_SECONDS);
        assert_eq!(config.refresh_threshold_seconds, DEFAULT_REFRESH_THRESHOLD_SECONDS);
        assert_eq!(config.scope_string(), "openid profile email");
        assert!(matches!(config.storage, StorageKind::Memory));
        config.validate().unwrap();
    }

    #[test]
    fn trailing_slash_is_stripped_from_issuer() {
        let config = AuthConfig::new("https://id.example.com/", "client-1", "https://app/cb");
        assert_eq!(config.issuer, "https://id.example.com");
    }

    #[test]
    fn missing_client_id_is_fatal() {
        let config = AuthConfig::new("https://id.example.com", "", "https://app/cb");
        assert!(matches!(config.validate(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn non_http_issuer_is_fatal() {
        let config = AuthConfig::new("id.example.com", "client-1", "https://app/cb");
        assert!(matches!(config.validate(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn storage_key_applies_prefix() {
        let config = AuthConfig::new("https://id.example.com", "client-1", "https://app/cb");
        assert_eq!(config.storage_key("tokens"), "relykit_tokens");
    }
}
