//! Provider HTTP transport
//!
//! Form-encoded token endpoint requests (authorization-code and
//! refresh-token grants), userinfo fetch, and the best-effort RP-initiated
//! end-session call. A non-2xx response carrying an OAuth error body becomes
//! [`AuthError::OAuth`]; everything else on the wire is
//! [`AuthError::Network`]. Timeouts are network errors, never token expiry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Endpoints;
use crate::error::{AuthError, OAuthError};
use crate::token::{TokenResponse, TokenSet};

/// Profile returned by the userinfo endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Subject identifier
    #[serde(default, alias = "id")]
    pub sub: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub email_verified: Option<bool>,

    /// Admin flag, used by the authorization decision engine
    #[serde(default)]
    pub is_admin: Option<bool>,

    /// Everything else the provider included
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Admin flag with absence meaning "not an admin".
    #[must_use]
    pub fn admin(&self) -> bool {
        self.is_admin.unwrap_or(false)
    }
}

/// HTTP client bound to one provider's endpoint set
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    http: reqwest::Client,
    endpoints: Endpoints,
    client_id: String,
}

impl ProviderHttp {
    /// Build the transport.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(
        endpoints: Endpoints,
        client_id: String,
        timeout: std::time::Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("http client: {e}")))?;
        Ok(Self { http, endpoints, client_id })
    }

    /// Endpoint set this transport talks to.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Raw reqwest client, for discovery fetches.
    #[must_use]
    pub fn raw(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange an authorization code for tokens (PKCE grant).
    ///
    /// # Errors
    /// Returns [`AuthError::OAuth`] for server-reported errors and
    /// [`AuthError::Network`] for transport failures.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        debug!(endpoint = %self.endpoints.token, "exchanging authorization code");
        self.token_request(&form).await
    }

    /// Exchange a refresh token for a new token set.
    ///
    /// # Errors
    /// Returns [`AuthError::OAuth`] for server-reported errors (including
    /// `invalid_grant`) and [`AuthError::Network`] for transport failures.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        debug!(endpoint = %self.endpoints.token, "refreshing access token");
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, AuthError> {
        let response = self.http.post(&self.endpoints.token).form(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Prefer the structured OAuth error when the server sent one.
            return match serde_json::from_str::<OAuthError>(&body) {
                Ok(oauth) => Err(AuthError::OAuth(oauth)),
                Err(_) => Err(AuthError::Network(format!(
                    "token endpoint returned {status}: {body}"
                ))),
            };
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid token response: {e}")))?;

        Ok(token_response.into())
    }

    /// Fetch the user profile with a bearer token.
    ///
    /// # Errors
    /// Returns [`AuthError::Network`] on transport failure or a non-2xx
    /// response.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response =
            self.http.get(&self.endpoints.userinfo).bearer_auth(access_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Network(format!("userinfo returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("invalid userinfo response: {e}")))
    }

    /// Terminate the provider-side session (RP-initiated logout).
    ///
    /// # Errors
    /// Returns [`AuthError::Network`] on failure; callers treat this as
    /// best-effort and never let it block local logout.
    pub async fn end_session(&self, return_to: Option<&str>) -> Result<(), AuthError> {
        let Some(end_session) = &self.endpoints.end_session else {
            debug!("provider exposes no end-session endpoint, skipping");
            return Ok(());
        };

        let mut request = self.http.get(end_session).query(&[("client_id", &self.client_id)]);
        if let Some(target) = return_to {
            request = request.query(&[("post_logout_redirect_uri", target)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Network(format!("end-session returned {status}")));
        }
        Ok(())
    }
}
