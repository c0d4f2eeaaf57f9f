use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use heritage_shared::errors::{AppResult, ErrorCode};
use heritage_shared::middleware::{decode_access_token, extract_token};
use heritage_shared::types::ApiErrorResponse;

use crate::models::Flag;
use crate::services::flag_service;
use crate::web::layout;
use crate::AppState;

pub const DEFAULT_MESSAGE: &str = "The site is under maintenance. Please try again later.";

const ADMIN_EXEMPT: &[&str] = &["/static/", "/auth/", "/api/auth/", "/health", "/metrics"];
const PORTAL_EXEMPT: &[&str] = &["/api/handler", "/api/auth/"];

/// Which maintenance flag guards a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Exempt,
    Admin,
    Portal,
}

impl Surface {
    fn flag(self) -> Option<&'static str> {
        match self {
            Surface::Exempt => None,
            Surface::Admin => Some(flag_service::ADMIN_MAINTENANCE),
            Surface::Portal => Some(flag_service::PORTAL_MAINTENANCE),
        }
    }
}

pub fn surface_for(path: &str) -> Surface {
    let is_admin_api = path == "/api/admin" || path.starts_with("/api/admin/");
    if !is_admin_api && (path == "/api" || path.starts_with("/api/")) {
        if PORTAL_EXEMPT.iter().any(|prefix| path.starts_with(prefix)) {
            return Surface::Exempt;
        }
        return Surface::Portal;
    }
    if ADMIN_EXEMPT.iter().any(|prefix| path.starts_with(prefix)) {
        return Surface::Exempt;
    }
    Surface::Admin
}

fn is_sys_admin(headers: &HeaderMap, secret: &str) -> bool {
    extract_token(headers)
        .and_then(|token| decode_access_token(&token, secret).ok())
        .map(|claims| claims.sys_admin && !claims.is_expired())
        .unwrap_or(false)
}

fn enabled_flag(state: &AppState, name: &str) -> AppResult<Option<Flag>> {
    let mut conn = state.db.get()?;
    Ok(flag_service::find_by_name(&mut conn, name)?.filter(|flag| flag.is_enabled))
}

fn unavailable(path: &str, flag: &Flag) -> Response {
    let message = flag
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    if path.starts_with("/api/") {
        let body = ApiErrorResponse::new(ErrorCode::Maintenance.code(), message);
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, layout::maintenance_page(&message)).into_response()
    }
}

/// Answers 503 on a surface whose maintenance flag is on, unless the caller
/// is a system administrator.
pub async fn maintenance_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let Some(flag_name) = surface_for(&path).flag() else {
        return next.run(req).await;
    };
    if is_sys_admin(req.headers(), &state.config.jwt_secret) {
        return next.run(req).await;
    }

    match enabled_flag(&state, flag_name) {
        Ok(Some(flag)) => {
            tracing::debug!(path = %path, flag = %flag.name, "request blocked by maintenance mode");
            unavailable(&path, &flag)
        }
        Ok(None) => next.run(req).await,
        Err(e) => {
            tracing::warn!(error = %e, flag = flag_name, "maintenance flag lookup failed");
            next.run(req).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::http::header;
    use chrono::Utc;
    use tower::ServiceExt;

    fn flag(message: Option<&str>) -> Flag {
        Flag {
            id: 1,
            name: flag_service::PORTAL_MAINTENANCE.into(),
            description: "Portal maintenance".into(),
            is_enabled: true,
            message: message.map(str::to_string),
            user_id: None,
            last_edit: Utc::now(),
        }
    }

    #[test]
    fn admin_surface_exemptions() {
        assert_eq!(surface_for("/static/css/app.css"), Surface::Exempt);
        assert_eq!(surface_for("/auth/login"), Surface::Exempt);
        assert_eq!(surface_for("/health"), Surface::Exempt);
        assert_eq!(surface_for("/metrics"), Surface::Exempt);
        assert_eq!(surface_for("/"), Surface::Admin);
        assert_eq!(surface_for("/sites/4/images"), Surface::Admin);
        assert_eq!(surface_for("/api/admin/sites"), Surface::Admin);
    }

    #[test]
    fn portal_surface_exemptions() {
        assert_eq!(surface_for("/api/handler"), Surface::Exempt);
        assert_eq!(surface_for("/api/auth/login"), Surface::Exempt);
        assert_eq!(surface_for("/api/sites"), Surface::Portal);
        assert_eq!(surface_for("/api/reviews"), Surface::Portal);
        assert_eq!(surface_for("/api/administrators"), Surface::Portal);
    }

    #[test]
    fn api_paths_get_json_with_flag_message() {
        let resp = unavailable("/api/sites", &flag(Some("Back at noon")));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json")));
    }

    #[test]
    fn pages_get_html() {
        let resp = unavailable("/sites", &flag(None));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html")));
    }

    #[test]
    fn only_sys_admin_tokens_bypass() {
        let state = test_support::state();
        let mut headers = HeaderMap::new();
        assert!(!is_sys_admin(&headers, &state.config.jwt_secret));

        headers.insert(header::AUTHORIZATION, test_support::bearer(&state, false).parse().unwrap());
        assert!(!is_sys_admin(&headers, &state.config.jwt_secret));

        headers.insert(header::AUTHORIZATION, test_support::bearer(&state, true).parse().unwrap());
        assert!(is_sys_admin(&headers, &state.config.jwt_secret));
    }

    #[tokio::test]
    async fn flag_lookup_failure_lets_request_through() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/api/admin/sites").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // no database: the middleware passes through and the handler rejects the anonymous caller
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
