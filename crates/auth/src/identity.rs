//! The authenticated caller, immutable per request.

use std::collections::{BTreeMap, BTreeSet};

/// Claim name carrying the token routing hint.
pub const CLAIM_TOKEN_TYPE: &str = "token_type";
/// Claim name carrying the raw bearer token, forwarded to the resolve
/// endpoint for redirect authorization.
pub const CLAIM_BEARER_TOKEN: &str = "bearer_token";
/// `token_type` value that routes authorization to the resolve endpoint.
pub const TOKEN_TYPE_REDIRECT: &str = "redirect";

/// Identity derived from authenticated headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User name (the JWT `sub` claim).
    pub user: String,
    /// Groups the user belongs to, per server configuration.
    pub groups: BTreeSet<String>,
    /// Claims verified during authentication.
    pub verified_claims: BTreeMap<String, String>,
}

impl Identity {
    /// Identity with no groups and no extra claims; mostly for tests.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            groups: BTreeSet::new(),
            verified_claims: BTreeMap::new(),
        }
    }

    /// Whether authorization decisions must go through the resolve endpoint.
    pub fn is_redirect(&self) -> bool {
        self.verified_claims
            .get(CLAIM_TOKEN_TYPE)
            .is_some_and(|v| v == TOKEN_TYPE_REDIRECT)
    }

    /// The raw bearer token, when captured at authentication time.
    pub fn bearer_token(&self) -> Option<&str> {
        self.verified_claims.get(CLAIM_BEARER_TOKEN).map(String::as_str)
    }

    /// Whether this identity matches a rule principal (user or group name).
    pub fn matches_principal(&self, principal: &str) -> bool {
        self.user == principal || self.groups.contains(principal)
    }
}
