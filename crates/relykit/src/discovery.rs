//! Provider discovery document
//!
//! Consumes the OpenID Connect discovery metadata published at
//! `/.well-known/openid-configuration`. The client refuses to start a
//! PKCE-less flow: when the document advertises challenge methods at all,
//! `S256` must be among them.

use serde::Deserialize;
use tracing::debug;

use crate::config::Endpoints;
use crate::error::AuthError;

/// OpenID Connect provider metadata (the fields this client consumes)
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub revocation_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
    pub subject_types_supported: Option<Vec<String>>,
}

impl DiscoveryDocument {
    /// Fetch the discovery document for an issuer.
    ///
    /// # Errors
    /// Returns [`AuthError::Network`] on transport failure or a non-2xx
    /// response, and [`AuthError::Configuration`] if the body does not parse
    /// as a discovery document.
    pub async fn fetch(http: &reqwest::Client, issuer: &str) -> Result<Self, AuthError> {
        let url =
            format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));
        debug!(url = %url, "fetching discovery document");

        let response = http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "discovery fetch failed with status {}",
                response.status()
            )));
        }

        response
            .json::<Self>()
            .await
            .map_err(|e| AuthError::Configuration(format!("invalid discovery document: {e}")))
    }

    /// Refuse to proceed unless the provider supports S256 PKCE.
    ///
    /// A document that omits `code_challenge_methods_supported` is accepted;
    /// per RFC 8414 the field is optional and absence does not assert the
    /// method is unsupported.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] when the advertised methods
    /// exclude `S256`.
    pub fn ensure_pkce_support(&self) -> Result<(), AuthError> {
        match &self.code_challenge_methods_supported {
            Some(methods) if !methods.iter().any(|m| m == "S256") => {
                Err(AuthError::Configuration(format!(
                    "provider {} does not support S256 code challenges",
                    self.issuer
                )))
            }
            _ => Ok(()),
        }
    }

    /// Endpoint set taken from the document, falling back to issuer-derived
    /// conventions for anything the provider omitted.
    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::from_issuer(&self.issuer);
        Endpoints {
            authorization: self.authorization_endpoint.clone(),
            token: self.token_endpoint.clone(),
            userinfo: self.userinfo_endpoint.clone().unwrap_or(defaults.userinfo),
            revocation: self.revocation_endpoint.clone().or(defaults.revocation),
            end_session: self.end_session_endpoint.clone().or(defaults.end_session),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for discovery document handling.
    use super::*;

    fn sample_document(methods: Option<Vec<&str>>) -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: "https://id.example.com".to_string(),
            authorization_endpoint: "https://id.example.com/authorize".to_string(),
            token_endpoint: "https://id.example.com/token".to_string(),
            userinfo_endpoint: None,
            revocation_endpoint: None,
            end_session_endpoint: Some("https://id.example.com/logout".to_string()),
            code_challenge_methods_supported: methods
                .map(|m| m.into_iter().map(String::from).collect()),
            subject_types_supported: Some(vec!["public".to_string()]),
        }
    }

    #[test]
    fn s256_support_is_accepted() {
        let doc = sample_document(Some(vec!["plain", "S256"]));
        doc.ensure_pkce_support().unwrap();
    }

    #[test]
    fn missing_methods_field_is_accepted() {
        let doc = sample_document(None);
        doc.ensure_pkce_support().unwrap();
    }

    #[test]
    fn plain_only_provider_is_refused() {
        let doc = sample_document(Some(vec!["plain"]));
        assert!(matches!(doc.ensure_pkce_support(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn endpoints_prefer_document_values_and_fill_gaps() {
        let doc = sample_document(Some(vec!["S256"]));
        let endpoints = doc.endpoints();

        assert_eq!(endpoints.authorization, "https://id.example.com/authorize");
        assert_eq!(endpoints.token, "https://id.example.com/token");
        // Omitted in the document, filled from issuer conventions.
        assert_eq!(endpoints.userinfo, "https://id.example.com/oauth2/userinfo");
        assert_eq!(endpoints.end_session.as_deref(), Some("https://id.example.com/logout"));
    }

    #[test]
    fn document_deserializes_from_json() {
        let body = r#"{
            "issuer": "https://id.example.com",
            "authorization_endpoint": "https://id.example.com/authorize",
            "token_endpoint": "https://id.example.com/token",
            "code_challenge_methods_supported": ["S256"],
            "subject_types_supported": ["public"]
        }"#;

        let doc: DiscoveryDocument = serde_json::from_str(body).unwrap();
        assert_eq!(doc.issuer, "https://id.example.com");
        doc.ensure_pkce_support().unwrap();
    }
}
