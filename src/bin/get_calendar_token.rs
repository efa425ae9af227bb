use ontime::components::calendar::token::{StoredToken, TokenResponse, OAUTH_TOKEN_URL};
use ontime::components::calendar::TokenManager;
use ontime::config::Config;
use ontime::error::{auth_error, config_error, other_error};
use ontime::utils::time::SystemClock;
use std::sync::Arc;
use url::Url;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const REDIRECT_URI: &str = "http://127.0.0.1:8080";
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Load configuration
    let config = Config::load()?;
    let token_manager = TokenManager::new(&config, Arc::new(SystemClock));

    // Generate random state for security
    let state = uuid::Uuid::new_v4().to_string();

    // Construct authorization URL
    let mut auth_url =
        Url::parse(AUTH_URL).map_err(|e| config_error(&format!("Failed to parse URL: {}", e)))?;
    auth_url
        .query_pairs_mut()
        .append_pair("client_id", &config.google_client_id)
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("response_type", "code")
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("scope", CALENDAR_SCOPE)
        .append_pair("state", &state);

    // Open browser for authorization
    println!("Opening browser for Google Calendar authorization...");
    if webbrowser::open(auth_url.as_str()).is_err() {
        println!("Could not open a browser, visit this URL instead:\n{}", auth_url);
    }

    // Start local server to receive the callback
    let server = tiny_http::Server::http("127.0.0.1:8080")
        .map_err(|e| other_error(&format!("Failed to start callback server: {}", e)))?;
    println!("Waiting for authorization callback...");

    // Handle the callback
    let request = server
        .recv()
        .map_err(|e| other_error(&format!("Failed to receive callback: {}", e)))?;
    let callback = Url::parse(REDIRECT_URI)
        .and_then(|base| base.join(request.url()))
        .map_err(|e| other_error(&format!("Failed to parse callback URL: {}", e)))?;

    let param = |name: &str| {
        callback
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if param("state").as_deref() != Some(state.as_str()) {
        return Err(auth_error("Authorization state mismatch").into());
    }
    let code = param("code").ok_or_else(|| auth_error("No authorization code found in callback"))?;

    // Exchange code for tokens
    let client = reqwest::Client::new();
    let response = client
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", config.google_client_id.as_str()),
            ("client_secret", config.google_client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(ontime::error::Error::from)?;

    if !response.status().is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(auth_error(&format!("Failed to get token: {}", error_text)).into());
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| auth_error(&format!("Failed to parse token response: {}", e)))?;

    // Save token using TokenManager
    token_manager
        .set_token(StoredToken::from_response(token, None))
        .await?;

    // Send success response to browser
    let response =
        tiny_http::Response::from_string("Authorization successful! You can close this window.");
    if let Err(e) = request.respond(response) {
        eprintln!("Failed to answer the browser: {}", e);
    }

    println!("Token saved to {}", config.token_path.display());

    Ok(())
}
