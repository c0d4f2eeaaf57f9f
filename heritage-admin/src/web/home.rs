use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use maud::{html, Markup};

use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::PaginationParams;

use super::{layout, take_flash, Flash, WebResult, WebUser};
use crate::models::Flag;
use crate::rbac::{self, perm};
use crate::search::SearchQuery;
use crate::services::review_service::{self, STATUS_PENDING};
use crate::services::site_service::{self, SiteListFilter};
use crate::services::flag_service;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(index))
}

#[derive(Debug, Default)]
struct Overview {
    sites: Option<u64>,
    pending_reviews: Option<u64>,
    flags: Vec<Flag>,
}

fn count_only() -> PaginationParams {
    PaginationParams::new(Some(1), Some(1), 1)
}

fn home_view(user: &AuthUser, flash: Option<&Flash>, overview: &Overview) -> Markup {
    layout::page(
        "Dashboard",
        user,
        flash,
        html! {
            section class="cards" {
                @if let Some(total) = overview.sites {
                    a class="card" href="/sites" {
                        strong { (total) }
                        span { "published and draft sites" }
                    }
                }
                @if let Some(pending) = overview.pending_reviews {
                    a class="card" href="/reviews?status=pending" {
                        strong { (pending) }
                        span { "reviews awaiting moderation" }
                    }
                }
            }
            @if !overview.flags.is_empty() {
                section class="flags" {
                    h2 { "Feature flags" }
                    ul {
                        @for flag in &overview.flags {
                            li class=(if flag.is_enabled { "on" } else { "off" }) {
                                (flag.description) ": " (if flag.is_enabled { "ON" } else { "OFF" })
                            }
                        }
                    }
                }
            }
        },
    )
}

// --- GET / ---

pub async fn index(
    WebUser(user): WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = state.db.get()?;
    let mut overview = Overview::default();

    if rbac::has_permission(&mut conn, &user, perm::SITE_INDEX)? {
        let page = site_service::list_sites(
            &mut conn,
            &SiteListFilter::default(),
            &count_only(),
            false,
            &state.config.default_image_url,
        )?;
        overview.sites = Some(page.total);
    }
    if rbac::has_permission(&mut conn, &user, perm::REVIEW_INDEX)? {
        let pending = SearchQuery::from_params([("status", STATUS_PENDING)]);
        overview.pending_reviews = Some(review_service::list_reviews(&mut conn, &pending, &count_only())?.total);
    }
    if user.sys_admin {
        overview.flags = flag_service::list_flags(&mut conn)?;
    }

    let (jar, flash) = take_flash(jar);
    Ok((jar, home_view(&user, flash.as_ref(), &overview)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AuthUser {
        AuthUser { id: 1, email: "admin@example.com".into(), role: Some("admin".into()), sys_admin: true }
    }

    #[test]
    fn dashboard_hides_cards_without_permission() {
        let html = home_view(&admin(), None, &Overview::default()).into_string();
        assert!(!html.contains("awaiting moderation"));
        assert!(html.contains("admin@example.com"));
    }

    #[test]
    fn dashboard_links_to_pending_reviews() {
        let overview = Overview { sites: Some(12), pending_reviews: Some(3), flags: Vec::new() };
        let html = home_view(&admin(), None, &overview).into_string();
        assert!(html.contains(r#"href="/reviews?status=pending""#));
        assert!(html.contains("<strong>3</strong>"));
    }
}
