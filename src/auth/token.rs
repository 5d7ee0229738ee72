use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Tokens issued by the identity provider, as cached in the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Refresh grants do not return a new refresh token; the previous one is
    /// carried over.
    pub fn into_token_set(self, now: DateTime<Utc>, previous_refresh: Option<String>) -> TokenSet {
        TokenSet {
            id_token: self.id_token,
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: now + Duration::seconds(self.expires_in),
        }
    }
}

/// Claims read from the ID token payload. The signature is not checked here;
/// tokens only ever come straight from the provider over TLS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(rename = "cognito:groups", default)]
    pub groups: Vec<String>,
    pub exp: i64,
}

impl IdTokenClaims {
    pub fn decode(id_token: &str) -> Result<Self, AuthError> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::InvalidToken("ID token is not a JWT".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidToken(format!("ID token payload: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::InvalidToken(format!("ID token claims: {e}")))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// True once `now + skew` has passed the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now + skew >= self.expires_at()
    }

    /// Membership of the configured admin group, from `cognito:groups`.
    pub fn is_admin(&self, admin_group: &str) -> bool {
        self.groups.iter().any(|g| g == admin_group)
    }
}
