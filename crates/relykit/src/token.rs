//! Token types and local JWT inspection
//!
//! Two concerns live here:
//!
//! - [`TokenSet`] / [`TokenResponse`]: the durable credential material
//!   obtained from the token endpoint, with an absolute `expires_at` derived
//!   from the server-reported `expires_in` at the instant the response was
//!   received.
//! - The claims codec: decoding a JWT payload **without signature
//!   verification** and evaluating expiry/not-before with clock-skew
//!   tolerance. This is a claims-reading utility, not a trust decision; it
//!   avoids a network round trip per request and stays advisory. Server-side
//!   introspection or refresh remains the source of truth for opaque tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AuthError;

/// OAuth 2.0 access and refresh tokens with metadata
///
/// Replaced atomically on refresh, never partially updated; destroyed by
/// logout or an irrecoverable refresh failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token for API authentication (JWT or opaque)
    pub access_token: String,

    /// Refresh token, when the provider issues one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (OpenID Connect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Token type (always "Bearer" for OAuth 2.0)
    pub token_type: String,

    /// Access token lifetime in seconds as reported by the server
    pub expires_in: Option<i64>,

    /// Absolute expiration instant, computed from `expires_in` when the
    /// response was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scopes (space-separated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// Create a `TokenSet`, deriving `expires_at` from `expires_in` and the
    /// current instant.
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: Option<i64>,
        scope: Option<String>,
    ) -> Self {
        let expires_at =
            expires_in.filter(|s| *s > 0).map(|s| Utc::now() + chrono::Duration::seconds(s));

        Self {
            access_token,
            refresh_token,
            id_token,
            token_type: "Bearer".to_string(),
            expires_in,
            expires_at,
            scope,
        }
    }

    /// Check whether the token is expired or expires within `threshold_seconds`.
    ///
    /// A token without a known expiry is treated as not expired; local JWT
    /// checks or the server decide for those.
    #[must_use]
    pub fn is_expired(&self, threshold_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + chrono::Duration::seconds(threshold_seconds) >= expires_at
            }
            None => false,
        }
    }

    /// Seconds until expiry, or `None` if the server reported no lifetime.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|at| (at - Utc::now()).num_seconds())
    }

    /// Granted scopes as a list.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

/// Token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        Self::new(
            response.access_token,
            response.refresh_token,
            response.id_token,
            response.expires_in,
            response.scope,
        )
    }
}

/// The `aud` claim: a single audience or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    /// Check membership regardless of representation.
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(a) => a == audience,
            Self::Many(list) => list.iter().any(|a| a == audience),
        }
    }
}

/// Decoded JWT claim set
///
/// Recomputed on demand from the access token; never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (`sub`)
    #[serde(default)]
    pub sub: Option<String>,

    /// Issuer (`iss`)
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience (`aud`)
    #[serde(default)]
    pub aud: Option<Audience>,

    /// Expiry as UNIX seconds (`exp`)
    #[serde(default)]
    pub exp: Option<i64>,

    /// Not-before as UNIX seconds (`nbf`)
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Everything else the issuer included
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options for [`is_valid`]
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Tolerance applied to `exp`/`nbf` comparisons, in seconds
    pub skew_seconds: i64,

    /// When set, the `iss` claim must equal this value
    pub expected_issuer: Option<String>,

    /// When set, the `aud` claim must contain this value
    pub expected_audience: Option<String>,
}

/// Decode the claim set of a JWT without verifying its signature
///
/// Splits on `.`, requires exactly three segments, and base64url-decodes the
/// payload as JSON.
///
/// # Errors
/// Returns [`AuthError::MalformedToken`] if the token is not a three-segment
/// JWT or the payload is not valid JSON.
pub fn decode(token: &str) -> Result<Claims, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    // Some issuers pad; base64url JWTs normally do not.
    let payload = segments[1].trim_end_matches('=');
    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&raw)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))
}

fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// True if the claims are expired under `skew_seconds` of tolerance.
///
/// Fail-closed: a missing `exp` claim counts as expired.
#[must_use]
pub fn is_expired(claims: &Claims, skew_seconds: i64) -> bool {
    match claims.exp {
        Some(exp) => exp - skew_seconds <= now_unix(),
        None => true,
    }
}

/// True if the claims are not yet valid under `skew_seconds` of tolerance.
///
/// Fail-open: a missing `nbf` claim asserts no restriction.
#[must_use]
pub fn is_not_yet_valid(claims: &Claims, skew_seconds: i64) -> bool {
    match claims.nbf {
        Some(nbf) => nbf + skew_seconds > now_unix(),
        None => false,
    }
}

/// Local validity check: decode plus expiry, not-before, issuer, and audience
///
/// Returns `false` on any decode failure — callers must treat that as
/// "cannot verify locally", never as "valid". Advisory only; performs no
/// signature verification.
#[must_use]
pub fn is_valid(token: &str, options: &ValidationOptions) -> bool {
    let Ok(claims) = decode(token) else {
        return false;
    };

    if is_expired(&claims, options.skew_seconds) || is_not_yet_valid(&claims, options.skew_seconds)
    {
        return false;
    }

    if let Some(expected) = &options.expected_issuer {
        if claims.iss.as_deref() != Some(expected.as_str()) {
            return false;
        }
    }

    if let Some(expected) = &options.expected_audience {
        match &claims.aud {
            Some(aud) if aud.contains(expected) => {}
            _ => return false,
        }
    }

    true
}

/// Seconds of lifetime left in the claims; 0 if absent or already expired.
#[must_use]
pub fn remaining_seconds(claims: &Claims) -> i64 {
    claims.exp.map_or(0, |exp| (exp - now_unix()).max(0))
}

#[cfg(test)]
mod tests {
    //! Unit tests for the token codec and `TokenSet`.
    use super::*;

    /// Build an unsigned JWT with the given payload JSON.
    fn make_jwt(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn decode_reads_standard_and_extra_claims() {
        let token = make_jwt(&serde_json::json!({
            "sub": "user-1",
            "iss": "https://id.example.com",
            "aud": "client-1",
            "exp": 2_000_000_000i64,
            "role": "admin",
        }));

        let claims = decode(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.iss.as_deref(), Some("https://id.example.com"));
        assert!(claims.aud.as_ref().unwrap().contains("client-1"));
        assert_eq!(claims.extra.get("role").and_then(Value::as_str), Some("admin"));
    }

    #[test]
    fn decode_rejects_wrong_segment_count() {
        assert!(matches!(decode("only.two"), Err(AuthError::MalformedToken(_))));
        assert!(matches!(decode("a.b.c.d"), Err(AuthError::MalformedToken(_))));
        assert!(matches!(decode("opaque-token"), Err(AuthError::MalformedToken(_))));
    }

    #[test]
    fn decode_rejects_non_json_payload() {
        let garbage = format!("{}.{}.sig", URL_SAFE_NO_PAD.encode(b"{}"), "!!not-base64!!");
        assert!(matches!(decode(&garbage), Err(AuthError::MalformedToken(_))));
    }

    #[test]
    fn expiry_respects_skew() {
        let now = Utc::now().timestamp();

        // Already expired: skew never rescues a token past its expiry.
        let expired = decode(&make_jwt(&serde_json::json!({ "exp": now - 1 }))).unwrap();
        assert!(is_expired(&expired, 0));
        assert!(is_expired(&expired, 60));

        // Comfortably inside the window even after skew is subtracted.
        let live = decode(&make_jwt(&serde_json::json!({ "exp": now + 61 }))).unwrap();
        assert!(!is_expired(&live, 60));
    }

    #[test]
    fn missing_exp_fails_closed() {
        let claims = decode(&make_jwt(&serde_json::json!({ "sub": "u" }))).unwrap();
        assert!(is_expired(&claims, 0));
        assert_eq!(remaining_seconds(&claims), 0);
    }

    #[test]
    fn missing_nbf_fails_open() {
        let now = Utc::now().timestamp();
        let claims = decode(&make_jwt(&serde_json::json!({ "exp": now + 600 }))).unwrap();
        assert!(!is_not_yet_valid(&claims, 0));

        let future = decode(&make_jwt(&serde_json::json!({ "nbf": now + 600 }))).unwrap();
        assert!(is_not_yet_valid(&future, 0));
    }

    #[test]
    fn is_valid_checks_issuer_and_audience() {
        let now = Utc::now().timestamp();
        let token = make_jwt(&serde_json::json!({
            "exp": now + 600,
            "iss": "https://id.example.com",
            "aud": ["client-1", "client-2"],
        }));

        let ok = ValidationOptions {
            skew_seconds: 60,
            expected_issuer: Some("https://id.example.com".to_string()),
            expected_audience: Some("client-2".to_string()),
        };
        assert!(is_valid(&token, &ok));

        let wrong_issuer = ValidationOptions {
            expected_issuer: Some("https://evil.example.com".to_string()),
            ..ok.clone()
        };
        assert!(!is_valid(&token, &wrong_issuer));

        let wrong_audience =
            ValidationOptions { expected_audience: Some("client-9".to_string()), ..ok };
        assert!(!is_valid(&token, &wrong_audience));
    }

    #[test]
    fn is_valid_returns_false_on_decode_failure() {
        assert!(!is_valid("opaque-token", &ValidationOptions::default()));
    }

    #[test]
    fn remaining_seconds_clamps_at_zero() {
        let now = Utc::now().timestamp();
        let stale = decode(&make_jwt(&serde_json::json!({ "exp": now - 100 }))).unwrap();
        assert_eq!(remaining_seconds(&stale), 0);

        let live = decode(&make_jwt(&serde_json::json!({ "exp": now + 100 }))).unwrap();
        let remaining = remaining_seconds(&live);
        assert!(remaining > 90 && remaining <= 100);
    }

    #[test]
    fn token_set_derives_expires_at() {
        let tokens = TokenSet::new(
            "access".to_string(),
            Some("refresh".to_string()),
            None,
            Some(3600),
            Some("openid profile".to_string()),
        );

        assert!(tokens.expires_at.is_some());
        let secs = tokens.seconds_until_expiry().unwrap();
        assert!(secs > 3590 && secs <= 3600);
        assert_eq!(tokens.scopes(), vec!["openid".to_string(), "profile".to_string()]);
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[test]
    fn token_set_without_lifetime_never_expires_locally() {
        let tokens = TokenSet::new("access".to_string(), None, None, None, None);
        assert!(tokens.expires_at.is_none());
        assert!(!tokens.is_expired(300));
        assert!(tokens.seconds_until_expiry().is_none());
    }

    #[test]
    fn token_set_expiry_threshold() {
        let tokens =
            TokenSet::new("access".to_string(), Some("refresh".to_string()), None, Some(3600), None);

        assert!(!tokens.is_expired(300));
        assert!(tokens.is_expired(7200));
    }

    #[test]
    fn token_response_conversion() {
        let response = TokenResponse {
            access_token: "access123".to_string(),
            refresh_token: Some("refresh456".to_string()),
            id_token: Some("id789".to_string()),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            scope: Some("openid".to_string()),
        };

        let tokens: TokenSet = response.into();
        assert_eq!(tokens.access_token, "access123");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh456"));
        assert!(tokens.expires_at.is_some());
    }

    #[test]
    fn token_set_serde_roundtrip() {
        let tokens = TokenSet::new(
            "access".to_string(),
            Some("refresh".to_string()),
            Some("id".to_string()),
            Some(3600),
            Some("openid".to_string()),
        );

        let json = serde_json::to_string(&tokens).unwrap();
        let back: TokenSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.access_token, tokens.access_token);
        assert_eq!(back.expires_at, tokens.expires_at);
    }
}
