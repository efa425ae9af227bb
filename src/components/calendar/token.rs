use crate::config::Config;
use crate::error::{auth_error, BotResult};
use crate::utils::time::Clock;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Google OAuth token endpoint
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Tokens this close to expiry are refreshed early
const EXPIRY_SKEW_SECS: i64 = 30;

/// OAuth token as persisted on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp after which `access_token` is no longer valid
    pub expires_at: i64,
}

impl StoredToken {
    /// Build a token from an OAuth token endpoint response
    pub fn from_response(response: TokenResponse, fallback_refresh: Option<String>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh),
            expires_at: Utc::now().timestamp() + response.expires_in.unwrap_or(3600),
        }
    }
}

/// Body returned by the OAuth token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Loads, refreshes and persists the calendar access token
#[derive(Clone)]
pub struct TokenManager {
    path: PathBuf,
    client_id: String,
    client_secret: String,
    token_url: String,
    client: Client,
    clock: Arc<dyn Clock>,
    cached: Arc<Mutex<Option<StoredToken>>>,
}

impl TokenManager {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: config.token_path.clone(),
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            token_url: OAUTH_TOKEN_URL.to_string(),
            client: Client::new(),
            clock,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Use a different token endpoint
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Get a valid access token, refreshing it if it expired
    pub async fn access_token(&self) -> BotResult<String> {
        let mut cached = self.cached.lock().await;

        let token = match cached.take() {
            Some(token) => token,
            None => read_token(&self.path)?,
        };

        if token.expires_at > self.clock.now().timestamp() + EXPIRY_SKEW_SECS {
            let access = token.access_token.clone();
            *cached = Some(token);
            return Ok(access);
        }

        debug!("Access token expired, refreshing");
        let refreshed = self.refresh_token(&token).await?;
        let access = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(access)
    }

    /// Refresh an expired token
    async fn refresh_token(&self, token: &StoredToken) -> BotResult<StoredToken> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| auth_error("No refresh token in token data"))?;

        let params = [
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("refresh_token", refresh_token.clone()),
            ("grant_type", "refresh_token".to_string()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| auth_error(&format!("Failed to refresh token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(auth_error(&format!(
                "Failed to refresh token: HTTP {} - {}",
                status, error_body
            )));
        }

        let new_token: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(&format!("Failed to parse token response: {}", e)))?;

        let merged = StoredToken {
            access_token: new_token.access_token,
            refresh_token: new_token.refresh_token.or(Some(refresh_token)),
            expires_at: self.clock.now().timestamp() + new_token.expires_in.unwrap_or(3600),
        };

        save_token(&self.path, &merged)?;
        info!("Calendar access token refreshed");

        Ok(merged)
    }

    /// Persist a token obtained through the authorization flow
    pub async fn set_token(&self, token: StoredToken) -> BotResult<()> {
        save_token(&self.path, &token)?;
        *self.cached.lock().await = Some(token);
        Ok(())
    }
}

fn read_token(path: &Path) -> BotResult<StoredToken> {
    let content = fs::read_to_string(path).map_err(|_| {
        auth_error(&format!(
            "No token found at {}. Run get_calendar_token first.",
            path.display()
        ))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| auth_error(&format!("Failed to parse token file: {}", e)))
}

fn save_token(path: &Path, token: &StoredToken) -> BotResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(token)?)?;
    Ok(())
}
