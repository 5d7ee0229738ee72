use chrono::Utc;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::token::{TokenResponse, TokenSet};
use super::AuthError;
use crate::config::AuthConfig;

/// OAuth2 client for the hosted login (authorization-code flow).
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    domain: Url,
    client_id: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OAuthClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let domain = Url::parse(&config.domain)
            .map_err(|e| AuthError::Config(format!("auth.domain '{}': {e}", config.domain)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self {
            http,
            domain,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.domain
            .join(path)
            .map_err(|e| AuthError::Config(format!("auth endpoint {path}: {e}")))
    }

    /// Hosted login page the curator is sent to.
    pub fn authorize_url(&self, state: &str) -> Result<Url, AuthError> {
        let mut url = self.endpoint("oauth2/authorize")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        Ok(url)
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, AuthError> {
        info!("Exchanging authorization code for tokens");
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let response = self.post_token(&form).await?;
        Ok(response.into_token_set(Utc::now(), None))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        debug!("Refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self.post_token(&form).await?;
        Ok(response.into_token_set(Utc::now(), Some(refresh_token.to_string())))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let url = self.endpoint("oauth2/token")?;
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token endpoint rejected request");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::Provider(format!("token response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            domain: "https://login.example.org/".to_string(),
            client_id: "client-1".to_string(),
            redirect_uri: "http://localhost:4200/auth".to_string(),
            scopes: vec!["openid".to_string(), "email".to_string()],
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_authorize_url() {
        let client = OAuthClient::new(&config()).unwrap();
        let url = client.authorize_url("xyz").unwrap();
        assert_eq!(url.path(), "/oauth2/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("client_id".to_string(), "client-1".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "openid email".to_string())));
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
    }

    #[test]
    fn test_bad_domain_is_config_error() {
        let mut config = config();
        config.domain = "not a url".to_string();
        assert!(matches!(OAuthClient::new(&config), Err(AuthError::Config(_))));
    }
}
