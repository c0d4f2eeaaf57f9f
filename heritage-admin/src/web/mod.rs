//! Server-rendered admin pages.
//!
//! Every page handler takes a [`WebUser`]; an unauthenticated request is sent
//! to the login page instead of receiving a JSON error. Form posts answer with
//! a redirect and carry their outcome in a one-shot flash cookie.

pub mod layout;

mod auth;
mod catalog;
mod flags;
mod home;
mod reviews;
mod sites;
mod users;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use heritage_shared::clients::DbConn;
use heritage_shared::errors::AppError;
use heritage_shared::types::auth::AuthUser;

use crate::rbac;
use crate::AppState;

pub const LOGIN_PATH: &str = "/auth/login";
pub const FLASH_COOKIE: &str = "flash";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(home::router())
        .nest("/auth", auth::router())
        .nest("/sites", sites::router())
        .merge(catalog::router())
        .nest("/reviews", reviews::router())
        .nest("/flags", flags::router())
        .nest("/users", users::router())
}

// --- Flash messages ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FlashKind::Success => "success",
            FlashKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    fn encode(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.message)
    }

    fn decode(raw: &str) -> Option<Self> {
        let (kind, message) = raw.split_once(':')?;
        let kind = match kind {
            "success" => FlashKind::Success,
            "error" => FlashKind::Error,
            _ => return None,
        };
        Some(Self { kind, message: message.to_string() })
    }
}

fn flash_cookie(flash: &Flash) -> Cookie<'static> {
    Cookie::build((FLASH_COOKIE, flash.encode()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn with_flash(jar: CookieJar, kind: FlashKind, message: impl Into<String>) -> CookieJar {
    jar.add(flash_cookie(&Flash { kind, message: message.into() }))
}

pub fn flash_success(jar: CookieJar, message: impl Into<String>) -> CookieJar {
    with_flash(jar, FlashKind::Success, message)
}

/// Reads the pending flash message and schedules its removal.
pub fn take_flash(jar: CookieJar) -> (CookieJar, Option<Flash>) {
    let Some(raw) = jar.get(FLASH_COOKIE).map(|c| c.value().to_string()) else {
        return (jar, None);
    };
    (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), Flash::decode(&raw))
}

// --- Errors ---

pub type WebResult<T> = Result<T, WebError>;

#[derive(Debug)]
pub enum WebError {
    /// Rendered as an error page.
    Page(AppError),
    /// Sends the browser back to `to` with the error as a flash message.
    Back { to: String, error: AppError },
}

impl From<AppError> for WebError {
    fn from(error: AppError) -> Self {
        WebError::Page(error)
    }
}

impl From<diesel::r2d2::PoolError> for WebError {
    fn from(error: diesel::r2d2::PoolError) -> Self {
        WebError::Page(error.into())
    }
}

/// Turns a failed form action into a redirect with a flash message.
pub trait BackTo<T> {
    fn back_to(self, to: impl Into<String>) -> WebResult<T>;
}

impl<T> BackTo<T> for Result<T, AppError> {
    fn back_to(self, to: impl Into<String>) -> WebResult<T> {
        self.map_err(|error| WebError::Back { to: to.into(), error })
    }
}

fn log_server_error(error: &AppError) {
    if error.status_code().is_server_error() {
        tracing::error!(error = %error, "page request failed");
    }
}

fn login_redirect() -> Response {
    let jar = with_flash(CookieJar::new(), FlashKind::Error, "Please log in to continue.");
    (jar, Redirect::to(LOGIN_PATH)).into_response()
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::Page(error) if error.status_code() == StatusCode::UNAUTHORIZED => login_redirect(),
            WebError::Page(error) => {
                log_server_error(&error);
                let status = error.status_code();
                (status, layout::error_page(status, &error.public_message())).into_response()
            }
            WebError::Back { to, error } => {
                log_server_error(&error);
                let jar = with_flash(CookieJar::new(), FlashKind::Error, error.public_message());
                (jar, Redirect::to(&to)).into_response()
            }
        }
    }
}

// --- Extractors ---

/// Logged-in user for the HTML surface.
#[derive(Debug, Clone)]
pub struct WebUser(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for WebUser {
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        AuthUser::from_request_parts(parts, state)
            .await
            .map(WebUser)
            .map_err(WebError::Page)
    }
}

impl WebUser {
    /// Pooled connection once the user holds `permission`.
    pub fn authorize(&self, state: &AppState, permission: &str) -> WebResult<DbConn> {
        let mut conn = state.db.get()?;
        rbac::require_permission(&mut conn, &self.0, permission)?;
        Ok(conn)
    }

    pub fn require_sys_admin(&self) -> WebResult<()> {
        Ok(rbac::require_sys_admin(&self.0)?)
    }
}

/// Parses an optional numeric form field; blank means absent.
pub fn optional_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<Option<T>, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| AppError::validation(format!("{field} must be a number")))
}

pub fn required_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, AppError> {
    optional_number(value, field)?.ok_or_else(|| AppError::validation(format!("{field} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{header, Request};
    use heritage_shared::errors::ErrorCode;
    use tower::ServiceExt;

    #[test]
    fn flash_survives_a_cookie_round() {
        let jar = with_flash(CookieJar::new(), FlashKind::Error, "name: already taken");
        let (jar, flash) = take_flash(jar);
        let flash = flash.unwrap();
        assert_eq!(flash.kind, FlashKind::Error);
        assert_eq!(flash.message, "name: already taken");
        assert!(jar.get(FLASH_COOKIE).is_none());
    }

    #[test]
    fn unknown_flash_kind_is_dropped() {
        assert_eq!(Flash::decode("warning:x"), None);
        assert_eq!(Flash::decode("no separator"), None);
    }

    #[test]
    fn failed_action_redirects_back() {
        let result: Result<(), AppError> = Err(AppError::new(ErrorCode::TagInUse, "tag is in use"));
        let resp = result.back_to("/tags").unwrap_err().into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/tags");
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("flash="));
    }

    #[test]
    fn missing_page_renders_html() {
        let resp = WebError::Page(AppError::not_found("site not found")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    }

    #[test]
    fn optional_numbers_allow_blank() {
        assert_eq!(optional_number::<f64>("  ", "latitude").unwrap(), None);
        assert_eq!(optional_number::<f64>("-34.9", "latitude").unwrap(), Some(-34.9));
        assert!(optional_number::<i32>("abc", "opening year").is_err());
        assert!(required_number::<i32>("", "category").is_err());
    }

    #[tokio::test]
    async fn anonymous_pages_redirect_to_login() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/sites").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], LOGIN_PATH);
    }
}
