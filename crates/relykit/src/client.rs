//! Auth client state machine
//!
//! Orchestrates the authorization-code flow end to end: starting
//! authorization, handling the redirect callback, exchanging and refreshing
//! tokens, scheduling refresh ahead of expiry, and logout. The client owns
//! the credential store (it is the sole writer) and emits lifecycle events
//! after each committed transition.
//!
//! Concurrency model: one logical timeline per instance. Network calls are
//! the only suspension points. At most one refresh is in flight at a time;
//! concurrent callers wait on the in-flight result instead of issuing a
//! duplicate request, which would race the provider on refresh-token
//! rotation. Cancellation is dropping the operation future; the token set is
//! written with a single store call, so a cancelled operation never leaves a
//! partial write.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::decision::SessionFacts;
use crate::discovery::DiscoveryDocument;
use crate::error::{AuthError, OAuthError};
use crate::http::{ProviderHttp, UserProfile};
use crate::pkce::{self, PkceChallenge};
use crate::request::AuthorizationRequestState;
use crate::store::{create_store, CredentialStore, PENDING_REQUEST_KEY, TOKEN_SET_KEY};
use crate::token::TokenSet;

/// Minimum delay before a scheduled refresh fires, in seconds.
const MIN_REFRESH_DELAY_SECONDS: i64 = 1;

/// Client lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// Observable snapshot of the client state
#[derive(Debug, Clone)]
pub struct AuthState {
    pub status: AuthStatus,
    pub user: Option<UserProfile>,
    pub last_error: Option<String>,
}

/// Lifecycle event kinds, used for subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Authenticated,
    Unauthenticated,
    TokenRefreshed,
    TokenExpired,
    Error,
}

/// Lifecycle events emitted after a state transition has committed
#[derive(Debug, Clone)]
pub enum AuthEvent {
    Authenticated { user: Option<UserProfile> },
    Unauthenticated,
    TokenRefreshed { tokens: TokenSet },
    TokenExpired,
    Error { message: String },
}

impl AuthEvent {
    /// Kind of this event, for subscription matching.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Authenticated { .. } => EventKind::Authenticated,
            Self::Unauthenticated => EventKind::Unauthenticated,
            Self::TokenRefreshed { .. } => EventKind::TokenRefreshed,
            Self::TokenExpired => EventKind::TokenExpired,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// Handle returned by [`AuthClient::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

struct Subscription {
    id: u64,
    kind: EventKind,
    listener: Listener,
}

/// Options for [`AuthClient::start_authorization`]
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// Override the configured scopes for this attempt
    pub scopes: Option<Vec<String>>,

    /// Override the configured redirect URI for this attempt
    pub redirect_uri: Option<String>,

    /// Caller-supplied state nonce; must be unguessable. Generated when
    /// absent.
    pub state: Option<String>,

    /// Extra query parameters for this authorization URL only
    pub extra_params: Vec<(String, String)>,
}

/// Options for [`AuthClient::logout`]
#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    /// Skip the provider-side session termination
    pub local_only: bool,

    /// Where the provider should send the browser after its logout
    pub return_to: Option<String>,
}

struct ClientInner {
    config: AuthConfig,
    http: ProviderHttp,
    store: Arc<dyn CredentialStore>,
    status: RwLock<AuthStatus>,
    tokens: RwLock<Option<TokenSet>>,
    user: RwLock<Option<UserProfile>>,
    last_error: Mutex<Option<String>>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_listener_id: AtomicU64,
    refresh_gate: AsyncMutex<()>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.lock().take() {
            task.abort();
        }
    }
}

/// OAuth 2.0 authorization-code + PKCE relying-party client
///
/// Cheap to clone; clones share one state machine.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("issuer", &self.inner.config.issuer)
            .field("client_id", &self.inner.config.client_id)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Create a client with the store selected by the configuration.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] for invalid configuration; this
    /// is fatal at construction.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let store = create_store(&config.storage);
        Self::with_store(config, store)
    }

    /// Create a client with an injected credential store.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] for invalid configuration.
    pub fn with_store(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let http =
            ProviderHttp::new(config.endpoints(), config.client_id.clone(), config.http_timeout)?;
        Ok(Self::build(config, store, http))
    }

    /// Create a client whose endpoints come from the provider's discovery
    /// document.
    ///
    /// Refuses to construct when the provider advertises challenge methods
    /// that exclude `S256`; this client never starts a PKCE-less flow.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] for invalid configuration or a
    /// PKCE-incapable provider, and [`AuthError::Network`] if the document
    /// cannot be fetched.
    pub async fn from_discovery(config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let store = create_store(&config.storage);

        let probe =
            ProviderHttp::new(config.endpoints(), config.client_id.clone(), config.http_timeout)?;
        let document = DiscoveryDocument::fetch(probe.raw(), &config.issuer).await?;
        document.ensure_pkce_support()?;

        let http =
            ProviderHttp::new(document.endpoints(), config.client_id.clone(), config.http_timeout)?;
        Ok(Self::build(config, store, http))
    }

    fn build(config: AuthConfig, store: Arc<dyn CredentialStore>, http: ProviderHttp) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                store,
                status: RwLock::new(AuthStatus::Uninitialized),
                tokens: RwLock::new(None),
                user: RwLock::new(None),
                last_error: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                refresh_gate: AsyncMutex::new(()),
                refresh_task: Mutex::new(None),
            }),
        }
    }

    /// The configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Restore a session from the credential store.
    ///
    /// Call once at startup. Returns `true` when a non-expired token set was
    /// restored. A storage read miss is treated as "not signed in", not as
    /// an error.
    ///
    /// # Errors
    /// Currently infallible in practice; the signature leaves room for
    /// stores whose failures should halt startup.
    pub async fn initialize(&self) -> Result<bool, AuthError> {
        *self.inner.status.write().await = AuthStatus::Initializing;

        let raw = match self.inner.store.get(&self.key(TOKEN_SET_KEY)).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "token read during initialize failed, treating as signed out");
                None
            }
        };

        let restored = match raw.as_deref().map(serde_json::from_str::<TokenSet>) {
            Some(Ok(tokens)) if !tokens.is_expired(0) => Some(tokens),
            Some(Ok(_)) => {
                debug!("stored token set expired, discarding");
                let _ = self.inner.store.remove(&self.key(TOKEN_SET_KEY)).await;
                None
            }
            Some(Err(e)) => {
                warn!(error = %e, "stored token set unreadable, discarding");
                let _ = self.inner.store.remove(&self.key(TOKEN_SET_KEY)).await;
                None
            }
            None => None,
        };

        match restored {
            Some(tokens) => {
                self.arm_refresh_timer(&tokens);
                *self.inner.tokens.write().await = Some(tokens);
                *self.inner.status.write().await = AuthStatus::Authenticated;
                info!("session restored from credential store");
                Ok(true)
            }
            None => {
                *self.inner.status.write().await = AuthStatus::Unauthenticated;
                Ok(false)
            }
        }
    }

    /// Begin an authorization attempt and return the provider URL to send
    /// the browser to.
    ///
    /// Persists the PKCE verifier and state nonce so the callback can
    /// complete the flow after the redirect round trip. A second call
    /// invalidates the first attempt. Navigation itself is the caller's job.
    ///
    /// # Errors
    /// Returns [`AuthError::Pkce`] if no entropy source is available and
    /// [`AuthError::Storage`] if the pending request cannot be persisted.
    pub async fn start_authorization(
        &self,
        options: AuthorizeOptions,
    ) -> Result<String, AuthError> {
        // A new flow supersedes whatever the timer was armed for.
        self.cancel_refresh_timer();
        match self.start_authorization_inner(options).await {
            Ok(url) => Ok(url),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn start_authorization_inner(
        &self,
        options: AuthorizeOptions,
    ) -> Result<String, AuthError> {
        let config = &self.inner.config;

        let pkce_pair = PkceChallenge::generate()?;
        let state = match options.state {
            Some(state) => state,
            None => pkce::generate_state()?,
        };
        let scopes = options.scopes.unwrap_or_else(|| config.scopes.clone());
        let redirect_uri = options.redirect_uri.unwrap_or_else(|| config.redirect_uri.clone());

        let pending = AuthorizationRequestState::new(
            state.clone(),
            &pkce_pair,
            redirect_uri.clone(),
            scopes.clone(),
        );
        // Overwriting the key is what invalidates an earlier attempt.
        self.inner.store.set(&self.key(PENDING_REQUEST_KEY), &pending.to_json()?).await?;

        let mut params: Vec<(String, String)> = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), config.client_id.clone()),
            ("redirect_uri".to_string(), redirect_uri),
            ("scope".to_string(), scopes.join(" ")),
            ("state".to_string(), state),
            ("code_challenge".to_string(), pkce_pair.code_challenge.clone()),
            ("code_challenge_method".to_string(), pkce_pair.challenge_method().as_str().to_string()),
        ];
        if let Some(audience) = &config.audience {
            params.push(("audience".to_string(), audience.clone()));
        }
        params.extend(config.additional_params.iter().cloned());
        params.extend(options.extra_params);

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        debug!("authorization URL generated");
        Ok(format!("{}?{}", self.inner.http.endpoints().authorization, query))
    }

    /// Complete an authorization attempt from the callback URL.
    ///
    /// Provider-reported errors fail without touching the token endpoint. A
    /// missing, expired, or mismatched state nonce fails with
    /// [`AuthError::InvalidState`]; a mismatch is always treated as CSRF. On
    /// match the pending request is consumed (a replayed callback fails),
    /// the code is exchanged, and the resulting token set is persisted
    /// before any observable transition.
    ///
    /// # Errors
    /// See [`AuthError`]; every failure is also emitted once on the error
    /// event channel.
    pub async fn handle_callback(&self, callback_url: &str) -> Result<TokenSet, AuthError> {
        match self.handle_callback_inner(callback_url).await {
            Ok(tokens) => Ok(tokens),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn handle_callback_inner(&self, callback_url: &str) -> Result<TokenSet, AuthError> {
        let url = Url::parse(callback_url)
            .map_err(|e| AuthError::InvalidState(format!("callback URL unparseable: {e}")))?;

        let mut code = None;
        let mut returned_state = None;
        let mut oauth_error = None;
        let mut oauth_description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => returned_state = Some(value.into_owned()),
                "error" => oauth_error = Some(value.into_owned()),
                "error_description" => oauth_description = Some(value.into_owned()),
                _ => {}
            }
        }

        // Provider-reported failure: the token endpoint is never called.
        if let Some(error) = oauth_error {
            return Err(AuthError::OAuth(OAuthError {
                error,
                error_description: oauth_description,
            }));
        }

        let code =
            code.ok_or_else(|| AuthError::InvalidState("missing code parameter".to_string()))?;
        let returned_state = returned_state
            .ok_or_else(|| AuthError::InvalidState("missing state parameter".to_string()))?;

        let pending_key = self.key(PENDING_REQUEST_KEY);
        let raw = self
            .inner
            .store
            .get(&pending_key)
            .await?
            .ok_or_else(|| AuthError::InvalidState("no pending authorization request".to_string()))?;
        let pending = AuthorizationRequestState::from_json(&raw)?;

        if pending.is_expired() {
            self.inner.store.remove(&pending_key).await?;
            return Err(AuthError::InvalidState("pending authorization request expired".to_string()));
        }

        if !pkce::constant_time_eq(pending.state.as_bytes(), returned_state.as_bytes()) {
            return Err(AuthError::InvalidState("state mismatch".to_string()));
        }

        // Single use: consumed on match, before the exchange can fail.
        self.inner.store.remove(&pending_key).await?;

        let tokens = match self
            .inner
            .http
            .exchange_code(&code, &pending.code_verifier, &pending.redirect_uri)
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                *self.inner.status.write().await = AuthStatus::Unauthenticated;
                return Err(e);
            }
        };

        self.commit_tokens(tokens.clone()).await?;

        // Best-effort profile fetch; a failure here does not undo the login.
        let user = match self.inner.http.fetch_userinfo(&tokens.access_token).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                debug!(error = %e, "userinfo fetch after login failed");
                None
            }
        };
        *self.inner.user.write().await = user.clone();

        info!("authorization flow completed");
        self.emit(AuthEvent::Authenticated { user });
        Ok(tokens)
    }

    /// Log out.
    ///
    /// Local state (credential store, in-memory session, refresh timer) is
    /// always cleared. Unless `local_only` is set, the provider session is
    /// terminated afterwards; a failure there is reported but the local
    /// logout has already happened.
    ///
    /// # Errors
    /// Returns [`AuthError::Storage`] if the store could not be fully
    /// cleared and [`AuthError::Network`] if the provider-side logout
    /// failed. In both cases the in-memory session is gone.
    pub async fn logout(&self, options: LogoutOptions) -> Result<(), AuthError> {
        let local = self.clear_local_session().await;

        if !options.local_only {
            if let Err(e) = self.inner.http.end_session(options.return_to.as_deref()).await {
                warn!(error = %e, "provider-side logout failed; local session already cleared");
                return Err(self.fail(e));
            }
        }

        local.map_err(|e| self.fail(e))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether a non-expired token set is present.
    pub async fn is_authenticated(&self) -> bool {
        self.inner.tokens.read().await.as_ref().is_some_and(|t| !t.is_expired(0))
    }

    /// Observable state snapshot.
    pub async fn state(&self) -> AuthState {
        AuthState {
            status: *self.inner.status.read().await,
            user: self.inner.user.read().await.clone(),
            last_error: self.inner.last_error.lock().clone(),
        }
    }

    /// Current token set, without triggering a refresh.
    pub async fn tokens(&self) -> Option<TokenSet> {
        self.inner.tokens.read().await.clone()
    }

    /// The signed-in user's profile.
    ///
    /// Served from the cached profile when available, otherwise fetched from
    /// the userinfo endpoint and cached. `None` when not authenticated.
    ///
    /// # Errors
    /// Returns [`AuthError::Network`] if the profile fetch fails.
    pub async fn get_user(&self) -> Result<Option<UserProfile>, AuthError> {
        if !self.is_authenticated().await {
            return Ok(None);
        }

        if let Some(user) = self.inner.user.read().await.clone() {
            return Ok(Some(user));
        }

        let Some(access_token) =
            self.inner.tokens.read().await.as_ref().map(|t| t.access_token.clone())
        else {
            return Ok(None);
        };

        match self.inner.http.fetch_userinfo(&access_token).await {
            Ok(profile) => {
                *self.inner.user.write().await = Some(profile.clone());
                Ok(Some(profile))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Current access token, refreshing just in time when the remaining
    /// lifetime is below the configured threshold.
    ///
    /// Returns `None` when not authenticated, or when the just-in-time
    /// refresh fails (the session is dropped in that case).
    pub async fn get_access_token(&self) -> Option<String> {
        let tokens = self.inner.tokens.read().await.clone()?;
        if !tokens.is_expired(self.inner.config.refresh_threshold_seconds) {
            return Some(tokens.access_token);
        }

        match self.refresh_locked(false).await {
            Ok(fresh) => Some(fresh.access_token),
            Err(e) => {
                let e = self.fail(e);
                warn!(error = %e, "just-in-time refresh failed, dropping session");
                let _ = self.clear_local_session().await;
                None
            }
        }
    }

    /// Session facts for the authorization decision engine.
    ///
    /// Middleware derives these once per request and hands them to
    /// [`DecisionEngine::decide`](crate::decision::DecisionEngine::decide).
    pub async fn session_facts(&self) -> SessionFacts {
        let authenticated = self.is_authenticated().await;
        let is_admin = self.inner.user.read().await.as_ref().is_some_and(UserProfile::admin);
        let scopes =
            self.inner.tokens.read().await.as_ref().map(TokenSet::scopes).unwrap_or_default();
        SessionFacts { authenticated, is_admin, scopes }
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Exchange the stored refresh token for a new token set.
    ///
    /// Single-flight: a concurrent caller waits for the in-flight refresh
    /// and reuses its result rather than racing the provider.
    ///
    /// # Errors
    /// Returns [`AuthError::TokenRefreshFailed`] when no refresh token is
    /// stored or the provider rejects the grant; `invalid_grant`
    /// additionally forces a local logout because the refresh token is
    /// permanently unusable.
    pub async fn refresh_tokens(&self) -> Result<TokenSet, AuthError> {
        match self.refresh_locked(true).await {
            Ok(tokens) => Ok(tokens),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Refresh under the single-flight gate.
    ///
    /// With `force` unset, a token that regained headroom while we waited on
    /// the gate (a sibling refreshed it) is returned as-is, so N concurrent
    /// just-in-time callers produce exactly one network request.
    async fn refresh_locked(&self, force: bool) -> Result<TokenSet, AuthError> {
        let _gate = self.inner.refresh_gate.lock().await;

        let current = self
            .inner
            .tokens
            .read()
            .await
            .clone()
            .ok_or_else(|| AuthError::TokenRefreshFailed("no tokens stored".to_string()))?;

        if !force && !current.is_expired(self.inner.config.refresh_threshold_seconds) {
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::TokenRefreshFailed("no refresh token stored".to_string()))?;

        match self.inner.http.refresh(&refresh_token).await {
            Ok(mut fresh) => {
                // Providers that do not rotate omit the refresh token.
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token);
                }
                self.commit_tokens(fresh.clone()).await?;
                debug!("access token refreshed");
                self.emit(AuthEvent::TokenRefreshed { tokens: fresh.clone() });
                Ok(fresh)
            }
            Err(AuthError::OAuth(oauth)) if oauth.is_invalid_grant() => {
                warn!("refresh token rejected with invalid_grant, dropping session");
                let _ = self.clear_local_session().await;
                Err(AuthError::TokenRefreshFailed(oauth.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Persist and adopt a new token set.
    ///
    /// The store write happens first; if it fails the enclosing operation
    /// aborts and neither memory nor timer change. The in-memory set is then
    /// replaced whole.
    async fn commit_tokens(&self, tokens: TokenSet) -> Result<(), AuthError> {
        let serialized =
            serde_json::to_string(&tokens).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.inner.store.set(&self.key(TOKEN_SET_KEY), &serialized).await?;

        self.arm_refresh_timer(&tokens);
        *self.inner.tokens.write().await = Some(tokens);
        *self.inner.status.write().await = AuthStatus::Authenticated;
        Ok(())
    }

    async fn clear_local_session(&self) -> Result<(), AuthError> {
        self.cancel_refresh_timer();

        // Idempotent: one sign-out emits one event. A failed just-in-time
        // refresh may have dropped the session already.
        if *self.inner.status.read().await == AuthStatus::Unauthenticated {
            return Ok(());
        }

        // Memory is cleared even when the store fails; the storage error is
        // reported after the transition so local logout stays unconditional.
        let store_result = self.inner.store.clear().await;

        *self.inner.tokens.write().await = None;
        *self.inner.user.write().await = None;
        *self.inner.status.write().await = AuthStatus::Unauthenticated;

        info!("local session cleared");
        self.emit(AuthEvent::Unauthenticated);
        store_result
    }

    // ------------------------------------------------------------------
    // Refresh timer
    // ------------------------------------------------------------------

    /// Arm the single scheduled refresh, replacing any previous one.
    ///
    /// Fires at `expires_at - refresh_threshold`, clamped to a minimum
    /// positive delay. Not armed when the provider reported no lifetime or
    /// issued no refresh token.
    fn arm_refresh_timer(&self, tokens: &TokenSet) {
        self.cancel_refresh_timer();

        let Some(expires_at) = tokens.expires_at else {
            return;
        };
        if tokens.refresh_token.is_none() {
            return;
        }

        let delay =
            compute_refresh_delay(expires_at, self.inner.config.refresh_threshold_seconds);
        debug!(delay_secs = delay.as_secs(), "refresh timer armed");

        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let client = AuthClient { inner };

            debug!("scheduled refresh firing");
            if let Err(e) = client.refresh_locked(false).await {
                let e = client.fail(e);
                warn!(error = %e, "scheduled refresh failed");
                client.emit(AuthEvent::TokenExpired);
            }
        });

        *self.inner.refresh_task.lock() = Some(task);
    }

    fn cancel_refresh_timer(&self) {
        if let Some(task) = self.inner.refresh_task.lock().take() {
            task.abort();
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to a lifecycle event kind.
    ///
    /// Listeners run synchronously, in registration order, after the state
    /// transition has committed. A panicking listener is isolated and logged
    /// so the remaining listeners still run.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&AuthEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.lock().push(Subscription {
            id,
            kind,
            listener: Arc::new(listener),
        });
        ListenerId(id)
    }

    /// Remove a subscription; unknown ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.inner.subscriptions.lock().retain(|s| s.id != id.0);
    }

    fn emit(&self, event: AuthEvent) {
        let listeners: Vec<Listener> = {
            let subscriptions = self.inner.subscriptions.lock();
            subscriptions
                .iter()
                .filter(|s| s.kind == event.kind())
                .map(|s| Arc::clone(&s.listener))
                .collect()
        };

        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(kind = ?event.kind(), "event listener panicked");
            }
        }
    }

    /// Record a failure and emit it on the error channel exactly once.
    fn fail(&self, err: AuthError) -> AuthError {
        *self.inner.last_error.lock() = Some(err.to_string());
        self.emit(AuthEvent::Error { message: err.to_string() });
        err
    }

    fn key(&self, key: &str) -> String {
        self.inner.config.storage_key(key)
    }
}

/// Delay until the scheduled refresh should fire.
fn compute_refresh_delay(expires_at: DateTime<Utc>, threshold_seconds: i64) -> Duration {
    let fire_in = (expires_at - Utc::now()).num_seconds() - threshold_seconds;
    Duration::from_secs(fire_in.max(MIN_REFRESH_DELAY_SECONDS) as u64)
}
