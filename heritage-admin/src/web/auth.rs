use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Form;
use maud::{html, Markup};
use serde::Deserialize;

use heritage_shared::middleware::OptionalAuthUser;
use heritage_shared::types::auth::REFRESH_TOKEN_COOKIE;

use super::{flash_success, layout, take_flash, BackTo, Flash, WebResult, LOGIN_PATH};
use crate::routes::auth::{with_session, without_session};
use crate::services::{token_service, user_service};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_page))
        .route("/authenticate", axum::routing::post(authenticate))
        .route("/logout", get(logout).post(logout))
}

fn login_view(flash: Option<&Flash>, email: &str) -> Markup {
    layout::bare_page(
        "Log in",
        flash,
        html! {
            form class="login" action="/auth/authenticate" method="POST" {
                h1 { "Historic Sites Admin" }
                label {
                    "Email"
                    input type="email" name="email" value=(email) required autofocus;
                }
                label {
                    "Password"
                    input type="password" name="password" required;
                }
                button type="submit" { "Log in" }
            }
        },
    )
}

// --- GET /auth/login ---

pub async fn login_page(OptionalAuthUser(user): OptionalAuthUser, jar: CookieJar) -> Response {
    if user.is_some() {
        return Redirect::to("/").into_response();
    }
    let (jar, flash) = take_flash(jar);
    (jar, login_view(flash.as_ref(), "")).into_response()
}

// --- POST /auth/authenticate ---

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = state.db.get()?;
    let user = user_service::authenticate(&mut conn, &form.email, &form.password).back_to(LOGIN_PATH)?;
    let pair = token_service::issue_token_pair(&mut conn, &user, &state.config)?;

    tracing::info!(user_id = user.id, "admin logged in");

    let jar = with_session(jar, &pair, state.config.cookie_secure);
    Ok((jar, Redirect::to("/")))
}

// --- /auth/logout ---

pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> WebResult<(CookieJar, Redirect)> {
    if let Some(raw) = jar.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()) {
        let mut conn = state.db.get()?;
        token_service::revoke_refresh_token(&mut conn, &raw)?;
    }
    let jar = flash_success(without_session(jar), "You have been logged out.");
    Ok((jar, Redirect::to(LOGIN_PATH)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn login_form_posts_to_authenticate() {
        let html = login_view(None, "admin@example.com").into_string();
        assert!(html.contains(r#"action="/auth/authenticate""#));
        assert!(html.contains(r#"value="admin@example.com""#));
    }

    #[tokio::test]
    async fn login_page_renders_for_anonymous_users() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/auth/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn logged_in_users_skip_the_login_page() {
        let state = test_support::state();
        let token = test_support::bearer(&state, false);
        let app = crate::build_router(state);
        let resp = app
            .oneshot(
                Request::get("/auth/login")
                    .header(header::AUTHORIZATION, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn logout_without_session_returns_to_login() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::post("/auth/logout").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], LOGIN_PATH);
    }
}
