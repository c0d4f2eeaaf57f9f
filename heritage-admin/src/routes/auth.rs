use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::types::auth::{AuthUser, TokenPair, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use heritage_shared::types::ApiResponse;

use crate::services::token_service;
use crate::services::user_service::{self, UserListItem};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/google", get(google_url).post(google_login))
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Stores both tokens as HttpOnly cookies.
pub fn with_session(jar: CookieJar, pair: &TokenPair, secure: bool) -> CookieJar {
    jar.add(session_cookie(ACCESS_TOKEN_COOKIE, pair.access_token.clone(), secure))
        .add(session_cookie(REFRESH_TOKEN_COOKIE, pair.refresh_token.clone(), secure))
}

pub fn without_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_TOKEN_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_TOKEN_COOKIE).path("/"))
}

// --- POST /api/auth/login ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<ApiResponse<TokenPair>>)> {
    let mut conn = state.db.get()?;
    let user = user_service::authenticate(&mut conn, &req.email, &req.password)?;
    let pair = token_service::issue_token_pair(&mut conn, &user, &state.config)?;

    tracing::info!(user_id = user.id, "user logged in");

    let jar = with_session(jar, &pair, state.config.cookie_secure);
    Ok((jar, Json(ApiResponse::ok(pair))))
}

// --- POST /api/auth/refresh ---

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

fn presented_refresh_token(body: Option<Json<RefreshRequest>>, jar: &CookieJar) -> Option<String> {
    body.and_then(|Json(req)| req.refresh_token)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| jar.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()))
        .filter(|t| !t.is_empty())
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<(CookieJar, Json<ApiResponse<TokenPair>>)> {
    let raw = presented_refresh_token(body, &jar)
        .ok_or_else(|| AppError::new(ErrorCode::TokenInvalid, "missing refresh token"))?;

    let mut conn = state.db.get()?;
    let pair = token_service::rotate_refresh_token(&mut conn, &raw, &state.config)?;

    let jar = with_session(jar, &pair, state.config.cookie_secure);
    Ok((jar, Json(ApiResponse::ok(pair))))
}

// --- POST /api/auth/logout ---

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<(CookieJar, Json<ApiResponse<&'static str>>)> {
    if let Some(raw) = presented_refresh_token(body, &jar) {
        let mut conn = state.db.get()?;
        token_service::revoke_refresh_token(&mut conn, &raw)?;
    }
    Ok((without_session(jar), Json(ApiResponse::ok("logged out"))))
}

// --- GET /api/auth/me ---

pub async fn me(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UserListItem>>> {
    let mut conn = state.db.get()?;
    let account = user_service::get_user(&mut conn, user.id)?;
    if !account.can_log_in() {
        return Err(AppError::new(ErrorCode::AccountInactive, "account is inactive"));
    }
    Ok(Json(ApiResponse::ok(user_service::with_role(&mut conn, account)?)))
}

// --- GET /api/auth/google ---

#[derive(Debug, Serialize)]
pub struct GoogleAuthorization {
    pub url: String,
    pub state: String,
}

pub async fn google_url(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<GoogleAuthorization>>> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| AppError::new(ErrorCode::OAuthError, "google sign-in is not configured"))?;
    let csrf = token_service::create_refresh_token();
    let url = google.authorization_url(&csrf)?;
    Ok(Json(ApiResponse::ok(GoogleAuthorization { url, state: csrf })))
}

// --- POST /api/auth/google ---

#[derive(Debug, Deserialize)]
pub struct GoogleCodeRequest {
    pub code: String,
}

pub async fn google_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<GoogleCodeRequest>,
) -> AppResult<(CookieJar, Json<ApiResponse<TokenPair>>)> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| AppError::new(ErrorCode::OAuthError, "google sign-in is not configured"))?;
    if req.code.trim().is_empty() {
        return Err(AppError::validation("authorization code is required"));
    }
    let profile = google.exchange_code(req.code.trim()).await?;

    let mut conn = state.db.get()?;
    let user = user_service::find_or_create_google_user(
        &mut conn,
        &profile.email,
        profile.name.as_deref(),
        profile.picture.as_deref(),
    )?;
    let pair = token_service::issue_token_pair(&mut conn, &user, &state.config)?;

    tracing::info!(user_id = user.id, "user logged in with google");

    let jar = with_session(jar, &pair, state.config.cookie_secure);
    Ok((jar, Json(ApiResponse::ok(pair))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn pair() -> TokenPair {
        TokenPair::new("access.jwt".into(), "opaque".into(), 3600)
    }

    #[test]
    fn session_cookies_are_http_only() {
        let jar = with_session(CookieJar::new(), &pair(), true);
        let access = jar.get(ACCESS_TOKEN_COOKIE).unwrap();
        assert_eq!(access.value(), "access.jwt");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.secure(), Some(true));
        assert_eq!(jar.get(REFRESH_TOKEN_COOKIE).unwrap().value(), "opaque");
    }

    #[test]
    fn body_token_wins_over_cookie() {
        let jar = CookieJar::new().add(Cookie::new(REFRESH_TOKEN_COOKIE, "from-cookie"));
        let body = Json(RefreshRequest { refresh_token: Some("from-body".into()) });
        assert_eq!(presented_refresh_token(Some(body), &jar).as_deref(), Some("from-body"));
        assert_eq!(presented_refresh_token(None, &jar).as_deref(), Some("from-cookie"));
        assert_eq!(presented_refresh_token(None, &CookieJar::new()), None);
    }

    #[tokio::test]
    async fn me_requires_a_token() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/api/auth/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_without_token_is_rejected() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(
                Request::post("/api/auth/refresh")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn google_is_unavailable_without_credentials() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/api/auth/google").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
