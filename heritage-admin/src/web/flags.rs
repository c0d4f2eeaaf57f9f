use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Form;
use maud::{html, Markup};
use serde::Deserialize;

use heritage_shared::types::auth::AuthUser;

use super::{flash_success, layout, take_flash, BackTo, Flash, WebResult, WebUser};
use crate::models::Flag;
use crate::services::flag_service::{self, FLAG_MESSAGE_MAX};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/:id/toggle", post(toggle))
}

fn flags_view(user: &AuthUser, flash: Option<&Flash>, flags: &[Flag]) -> Markup {
    layout::page(
        "Feature flags",
        user,
        flash,
        html! {
            table class="flags" {
                thead { tr { th { "Flag" } th { "Status" } th { "Message" } th { "Last change" } th {} } }
                tbody {
                    @for flag in flags {
                        tr class=(if flag.is_enabled { "on" } else { "off" }) {
                            td { strong { (flag.description) } br; code { (flag.name) } }
                            td { (if flag.is_enabled { "ON" } else { "OFF" }) }
                            td { (flag.message.as_deref().unwrap_or_default()) }
                            td { (layout::timestamp(&flag.last_edit)) }
                            td {
                                form action=(format!("/flags/{}/toggle", flag.id)) method="POST" {
                                    @if !flag.is_enabled && flag_service::is_maintenance_flag(&flag.name) {
                                        input type="text" name="message" maxlength=(FLAG_MESSAGE_MAX)
                                            placeholder="Message shown to visitors" required;
                                    }
                                    button type="submit" { (if flag.is_enabled { "Turn off" } else { "Turn on" }) }
                                }
                            }
                        }
                    }
                }
            }
        },
    )
}

// --- GET /flags ---

pub async fn index(user: WebUser, State(state): State<Arc<AppState>>, jar: CookieJar) -> WebResult<(CookieJar, Markup)> {
    user.require_sys_admin()?;
    let mut conn = state.db.get()?;
    let flags = flag_service::list_flags(&mut conn)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, flags_view(&user.0, flash.as_ref(), &flags)))
}

// --- POST /flags/:id/toggle ---

#[derive(Debug, Default, Deserialize)]
pub struct ToggleForm {
    pub message: Option<String>,
}

pub async fn toggle(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<ToggleForm>,
) -> WebResult<(CookieJar, Redirect)> {
    user.require_sys_admin()?;
    let mut conn = state.db.get()?;
    let flag = flag_service::toggle_flag(&mut conn, id, user.0.id, form.message.as_deref()).back_to("/flags")?;

    tracing::info!(flag = %flag.name, enabled = flag.is_enabled, user_id = user.0.id, "flag toggled");

    let state_label = if flag.is_enabled { "enabled" } else { "disabled" };
    let message = format!("{} {state_label}.", flag.description);
    Ok((flash_success(jar, message), Redirect::to("/flags")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn flag(name: &str, enabled: bool) -> Flag {
        Flag {
            id: 1,
            name: name.into(),
            description: "Portal maintenance".into(),
            is_enabled: enabled,
            message: None,
            user_id: None,
            last_edit: Utc::now(),
        }
    }

    fn admin() -> AuthUser {
        AuthUser { id: 1, email: "root@example.com".into(), role: None, sys_admin: true }
    }

    #[test]
    fn maintenance_flag_asks_for_a_message_when_off() {
        let html = flags_view(&admin(), None, &[flag("portal_maintenance_mode", false)]).into_string();
        assert!(html.contains(r#"name="message""#));
        assert!(html.contains("Turn on"));
    }

    #[test]
    fn other_flags_toggle_without_message() {
        let html = flags_view(&admin(), None, &[flag("reviews_enabled", true)]).into_string();
        assert!(!html.contains(r#"name="message""#));
        assert!(html.contains("Turn off"));
    }

    #[tokio::test]
    async fn flags_page_is_for_system_administrators() {
        let state = test_support::state();
        let token = test_support::bearer(&state, false);
        let app = crate::build_router(state);
        let resp = app
            .oneshot(
                Request::get("/flags")
                    .header(header::AUTHORIZATION, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
