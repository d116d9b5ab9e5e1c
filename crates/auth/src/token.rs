//! HS256 bearer tokens for the Flight surface.

use duckgate_common::{GateError, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Default token lifetime in hours.
pub const DEFAULT_TOKEN_EXPIRY_HOURS: i64 = 24;

/// JWT claims the gateway mints and verifies.
///
/// `sub` is the user. `token_type = "redirect"` routes authorization to the
/// remote resolve endpoint instead of the static policy store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user name).
    pub sub: String,
    /// Expiration (Unix seconds).
    pub exp: usize,
    /// Issued-at (Unix seconds).
    pub iat: usize,
    /// Optional routing hint for authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Mint a signed bearer token for `user`.
pub fn issue_token(user: &str, secret: &str, expiry_hours: Option<i64>) -> Result<String> {
    let now = chrono::Utc::now();
    let exp = now + chrono::Duration::hours(expiry_hours.unwrap_or(DEFAULT_TOKEN_EXPIRY_HOURS));
    let claims = Claims {
        sub: user.to_string(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
        token_type: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| GateError::Internal(format!("token encoding failed: {e}")))
}

/// Verify signature and expiration, returning the claims.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_nbf = false;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| GateError::Unauthenticated(format!("invalid bearer token: {e}")))?;

    if data.claims.sub.is_empty() {
        return Err(GateError::Unauthenticated(
            "bearer token has no subject".to_string(),
        ));
    }
    Ok(data.claims)
}
