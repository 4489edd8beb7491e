//! OAuth 2.0 authorization-code + PKCE relying-party client.
//!
//! A public client (no client secret) for web and desktop applications:
//! PKCE verifier/challenge generation, authorization URL construction,
//! callback handling with single-use CSRF state, token persistence through a
//! pluggable credential store, proactive refresh scheduling, and a pure
//! authorization decision engine for routing middleware.
//!
//! The JWT utilities in [`token`] decode claims **without signature
//! verification**; they are advisory local checks, never a trust decision.
//!
//! # Quick start
//!
//! ```no_run
//! use relykit::{AuthClient, AuthConfig, AuthorizeOptions};
//!
//! # async fn run() -> Result<(), relykit::AuthError> {
//! let config = AuthConfig::new(
//!     "https://id.example.com",
//!     "my-client-id",
//!     "https://app.example.com/callback",
//! );
//! let client = AuthClient::new(config)?;
//! client.initialize().await?;
//!
//! let url = client.start_authorization(AuthorizeOptions::default()).await?;
//! // Send the browser to `url`; later, on the redirect back:
//! let tokens = client.handle_callback("https://app.example.com/callback?code=...&state=...").await?;
//! # let _ = tokens;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod client;
pub mod config;
pub mod decision;
pub mod discovery;
pub mod error;
pub mod http;
pub mod pkce;
pub mod request;
pub mod store;
pub mod token;

// Re-export the types most callers touch
// ------------------------------------
pub use client::{
    AuthClient, AuthEvent, AuthState, AuthStatus, AuthorizeOptions, EventKind, ListenerId,
    LogoutOptions,
};
pub use config::{AuthConfig, Endpoints};
pub use decision::{Decision, DecisionEngine, RouteClass, RouteRule, SessionFacts};
pub use discovery::DiscoveryDocument;
pub use error::{AuthError, OAuthError, PkceError};
pub use http::UserProfile;
pub use pkce::{CodeChallengeMethod, PkceChallenge};
pub use store::{CredentialStore, KeyringStore, MemoryStore, StorageKind};
pub use token::{Claims, TokenSet, ValidationOptions};
