//! Authorization decision engine
//!
//! A pure function from request path plus pre-fetched session facts to a
//! routing decision. Route classification is supplied by the caller as
//! ordered match rules; the first matching rule wins and unclassified paths
//! are allowed. No I/O happens here so routing behavior is testable without
//! network mocking; the HTTP layer translates the decision into a redirect,
//! a 403, or pass-through.

/// Classification attached to a route rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteClass {
    /// Requires a valid credential; may additionally require scopes
    Protected {
        /// Scopes the credential must carry; empty means any valid credential
        required_scopes: Vec<String>,
    },

    /// Requires a valid credential with the admin role
    AdminOnly,

    /// Only reachable without a credential (login, signup, ...)
    PublicOnly,
}

/// One ordered match rule
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: String,
    pub class: RouteClass,
}

impl RouteRule {
    /// Protected route with no scope requirement.
    #[must_use]
    pub fn protected(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), class: RouteClass::Protected { required_scopes: Vec::new() } }
    }

    /// Protected route requiring every listed scope.
    #[must_use]
    pub fn protected_with_scopes(pattern: impl Into<String>, scopes: Vec<String>) -> Self {
        Self { pattern: pattern.into(), class: RouteClass::Protected { required_scopes: scopes } }
    }

    /// Admin-only route.
    #[must_use]
    pub fn admin_only(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), class: RouteClass::AdminOnly }
    }

    /// Public-only route.
    #[must_use]
    pub fn public_only(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), class: RouteClass::PublicOnly }
    }
}

/// Pre-fetched credential facts for one request
///
/// The caller derives these from the credential store and token codec before
/// asking for a decision; the engine itself never inspects tokens.
#[derive(Debug, Clone, Default)]
pub struct SessionFacts {
    /// A credential is present and locally valid
    pub authenticated: bool,

    /// The credential carries the admin role
    pub is_admin: bool,

    /// Scopes granted to the credential
    pub scopes: Vec<String>,
}

/// Outcome for one request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through
    Allow,

    /// Send to login, remembering the originally requested path
    RedirectToLogin(String),

    /// Send an already-authenticated visitor away from a public-only page
    RedirectAway(String),

    /// Authenticated but not entitled; the HTTP layer answers 403
    Forbidden,
}

/// Ordered-rule decision engine used by routing middleware
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    rules: Vec<RouteRule>,
    redirect_away_target: String,
}

impl DecisionEngine {
    /// Build an engine from ordered rules.
    ///
    /// `redirect_away_target` is where authenticated visitors of public-only
    /// pages are sent (typically `/`).
    #[must_use]
    pub fn new(rules: Vec<RouteRule>, redirect_away_target: impl Into<String>) -> Self {
        Self { rules, redirect_away_target: redirect_away_target.into() }
    }

    /// Decide what to do with a request.
    #[must_use]
    pub fn decide(&self, path: &str, facts: &SessionFacts) -> Decision {
        let Some(rule) = self.rules.iter().find(|r| matches_pattern(&r.pattern, path)) else {
            return Decision::Allow;
        };

        match &rule.class {
            RouteClass::Protected { required_scopes } => {
                if !facts.authenticated {
                    return Decision::RedirectToLogin(path.to_string());
                }
                let missing =
                    required_scopes.iter().any(|needed| !facts.scopes.iter().any(|s| s == needed));
                if missing {
                    Decision::Forbidden
                } else {
                    Decision::Allow
                }
            }
            RouteClass::AdminOnly => {
                if !facts.authenticated {
                    Decision::RedirectToLogin(path.to_string())
                } else if !facts.is_admin {
                    Decision::Forbidden
                } else {
                    Decision::Allow
                }
            }
            RouteClass::PublicOnly => {
                if facts.authenticated {
                    Decision::RedirectAway(self.redirect_away_target.clone())
                } else {
                    Decision::Allow
                }
            }
        }
    }
}

/// Pattern matching for route rules.
///
/// - `/a/**` matches `/a` and everything under it
/// - `*` matches exactly one path segment
/// - anything else matches the path itself or any sub-path (`/dashboard`
///   covers `/dashboard/x`)
fn matches_pattern(pattern: &str, path: &str) -> bool {
    if let Some(base) = pattern.strip_suffix("/**") {
        return path == base || path.starts_with(&format!("{base}/"));
    }

    if pattern.contains('*') {
        let pattern_segments: Vec<&str> = pattern.split('/').collect();
        let path_segments: Vec<&str> = path.split('/').collect();
        if pattern_segments.len() != path_segments.len() {
            return false;
        }
        return pattern_segments
            .iter()
            .zip(path_segments.iter())
            .all(|(p, s)| *p == "*" || p == s);
    }

    path == pattern || path.starts_with(&format!("{pattern}/"))
}
