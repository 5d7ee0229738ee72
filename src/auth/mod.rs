// Authentication: OAuth2 hosted login, token refresh and the session cache

pub mod provider;
pub mod session;
pub mod token;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use provider::OAuthClient;
pub use session::{HierarchyView, SessionData, SessionStore};
pub use token::{IdTokenClaims, TokenResponse, TokenSet};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not logged in. Run `snap2snomed login-url` and then `snap2snomed login --code <code>`")]
    NotLoggedIn,
    #[error("Session expired and no refresh token is available")]
    NoRefreshToken,
    #[error("Identity provider rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Identity provider unreachable: {0}")]
    Provider(String),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Session store error: {0}")]
    Session(String),
    #[error("Auth configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of bearer tokens for API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, refreshed first if it is about to expire.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Replace a token the API rejected, returning the new access token.
    async fn refresh(&self, rejected_token: &str) -> Result<String, AuthError>;
}

/// Tokens within this margin of expiry are refreshed up front.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Token provider backed by the session file and the OAuth2 refresh grant.
pub struct SessionTokenProvider {
    store: SessionStore,
    oauth: OAuthClient,
    // Serialises refreshes so parallel requests do not each spend the
    // refresh token.
    refresh_lock: Mutex<()>,
}

impl SessionTokenProvider {
    pub fn new(store: SessionStore, oauth: OAuthClient) -> Self {
        Self {
            store,
            oauth,
            refresh_lock: Mutex::new(()),
        }
    }

    async fn refresh_stored(&self, stale_access: &str) -> Result<String, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        let tokens = self.store.tokens()?.ok_or(AuthError::NotLoggedIn)?;

        // Another task refreshed while we waited for the lock.
        if stale_access != tokens.access_token {
            debug!("Token already refreshed by a concurrent request");
            return Ok(tokens.access_token);
        }

        let refresh_token = tokens.refresh_token.ok_or(AuthError::NoRefreshToken)?;
        let refreshed = self.oauth.refresh(&refresh_token).await?;
        let access = refreshed.access_token.clone();
        self.store.store_tokens(refreshed)?;
        info!("Access token refreshed");
        Ok(access)
    }
}

#[async_trait]
impl TokenProvider for SessionTokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let tokens = self.store.tokens()?.ok_or(AuthError::NotLoggedIn)?;
        if Utc::now() + Duration::seconds(EXPIRY_SKEW_SECONDS) < tokens.expires_at {
            return Ok(tokens.access_token);
        }
        self.refresh_stored(&tokens.access_token).await
    }

    async fn refresh(&self, rejected_token: &str) -> Result<String, AuthError> {
        self.refresh_stored(rejected_token).await
    }
}
