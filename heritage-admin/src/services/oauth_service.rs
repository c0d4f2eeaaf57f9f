use serde::Deserialize;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};

use crate::config::AppConfig;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub email: String,
    #[serde(default)]
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleOAuth {
    /// `None` when no client credentials are configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if !config.google_enabled() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
        })
    }

    /// Consent screen URL carrying `state` for CSRF protection.
    pub fn authorization_url(&self, state: &str) -> AppResult<String> {
        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| AppError::internal(format!("invalid authorization url: {e}")))?;
        Ok(url.into())
    }

    /// Exchanges an authorization code for the user's Google profile.
    pub async fn exchange_code(&self, code: &str) -> AppResult<GoogleProfile> {
        let token_response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("google token exchange failed: {e}")))?;

        if !token_response.status().is_success() {
            let status = token_response.status();
            let body = token_response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "google rejected the authorization code");
            return Err(AppError::new(ErrorCode::OAuthError, "google rejected the authorization code"));
        }

        let token: GoogleTokenResponse = token_response
            .json()
            .await
            .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("invalid token response: {e}")))?;

        let profile: GoogleProfile = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("google userinfo failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("google userinfo failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("invalid userinfo response: {e}")))?;

        if profile.email_verified == Some(false) {
            return Err(AppError::new(ErrorCode::OAuthError, "google account email is not verified"));
        }
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        AppConfig {
            google_client_id: "client-id".into(),
            google_client_secret: "client-secret".into(),
            google_redirect_uri: "http://localhost:5000/auth/google/callback".into(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn disabled_without_credentials() {
        assert!(GoogleOAuth::from_config(&AppConfig::default()).is_none());
    }

    #[test]
    fn authorization_url_carries_client_and_state() {
        let google = GoogleOAuth::from_config(&configured()).unwrap();
        let url = google.authorization_url("xyz").unwrap();
        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("response_type=code"));
    }
}
