use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use maud::{html, Markup, DOCTYPE};
use serde::Serialize;

use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::Paginated;

use super::Flash;

const MAIN_CSS_URL: &str = "/static/css/admin.css";
const ADMIN_JS_URL: &str = "/static/js/admin.js";

const NAV: &[(&str, &str)] = &[
    ("/", "Home"),
    ("/sites", "Sites"),
    ("/tags", "Tags"),
    ("/categories", "Categories"),
    ("/reviews", "Reviews"),
    ("/users", "Users"),
];

fn head(title: &str) -> Markup {
    html! {
        head {
            meta charset="utf-8";
            meta name="viewport" content="width=device-width, initial-scale=1";
            title { (title) " | Historic Sites Admin" }
            link rel="stylesheet" href=(MAIN_CSS_URL);
            script src=(ADMIN_JS_URL) defer {}
        }
    }
}

fn flash_msg(flash: Option<&Flash>) -> Markup {
    html! {
        @if let Some(flash) = flash {
            div class=(format!("flash {}", flash.kind.as_str())) role="alert" {
                (flash.message)
            }
        }
    }
}

fn header(user: &AuthUser) -> Markup {
    html! {
        header {
            nav {
                @for (href, label) in NAV {
                    a href=(href) { (label) }
                }
                @if user.sys_admin {
                    a href="/flags" { "Flags" }
                }
            }
            div class="session" {
                span class="email" { (user.email) }
                @if let Some(role) = &user.role {
                    span class="role" { (role) }
                }
                form class="logout" action="/auth/logout" method="POST" {
                    button type="submit" { "Log out" }
                }
            }
        }
    }
}

/// Page chrome for a logged-in administrator.
pub fn page(title: &str, user: &AuthUser, flash: Option<&Flash>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            (head(title))
            body {
                (header(user))
                main {
                    (flash_msg(flash))
                    h1 { (title) }
                    (content)
                }
            }
        }
    }
}

/// Page without navigation, for the login form and error screens.
pub fn bare_page(title: &str, flash: Option<&Flash>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            (head(title))
            body class="bare" {
                main {
                    (flash_msg(flash))
                    (content)
                }
            }
        }
    }
}

pub fn maintenance_page(message: &str) -> Markup {
    bare_page(
        "Maintenance",
        None,
        html! {
            section class="maintenance" {
                h1 { "Under maintenance" }
                p { (message) }
            }
        },
    )
}

pub fn error_page(status: StatusCode, message: &str) -> Markup {
    let reason = status.canonical_reason().unwrap_or("Error");
    bare_page(
        reason,
        None,
        html! {
            section class="error" {
                h1 { (status.as_u16()) " " (reason) }
                p { (message) }
                a href="/" { "Back to the dashboard" }
            }
        },
    )
}

pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// Link to `page` of a listing, keeping every other query parameter.
pub fn page_href(path: &str, pairs: &[(String, String)], page: u64) -> String {
    let kept = pairs.iter().filter(|(k, _)| k != "page");
    let Ok(mut url) = reqwest::Url::parse("http://admin.invalid/") else {
        return format!("{path}?page={page}");
    };
    url.query_pairs_mut()
        .extend_pairs(kept.map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair("page", &page.to_string());
    format!("{path}?{}", url.query().unwrap_or_default())
}

pub fn pagination_nav<T: Serialize>(path: &str, pairs: &[(String, String)], page: &Paginated<T>) -> Markup {
    html! {
        @if page.total_pages > 1 {
            nav class="pagination" {
                @if let Some(prev) = page.prev_page {
                    a href=(page_href(path, pairs, prev)) rel="prev" { "‹" }
                }
                @for n in &page.page_range {
                    @if *n == page.page {
                        span class="current" { (n) }
                    } @else {
                        a href=(page_href(path, pairs, *n)) { (n) }
                    }
                }
                @if let Some(next) = page.next_page {
                    a href=(page_href(path, pairs, next)) rel="next" { "›" }
                }
            }
        }
        p class="total" { (page.total) " results" }
    }
}

/// `<option>`s for a select, marking `selected`.
pub fn options<'a>(items: impl IntoIterator<Item = (i32, &'a str)>, selected: Option<i32>) -> Markup {
    html! {
        @for (id, label) in items {
            option value=(id) selected[selected == Some(id)] { (label) }
        }
    }
}

pub fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heritage_shared::types::pagination::PaginationParams;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn page_links_keep_filters() {
        let href = page_href("/sites", &pairs(&[("city", "La Plata"), ("page", "2")]), 3);
        assert_eq!(href, "/sites?city=La+Plata&page=3");
    }

    #[test]
    fn single_page_has_no_navigation() {
        let page = Paginated::new(vec![1u8], 1, &PaginationParams::default());
        let html = pagination_nav("/tags", &[], &page).into_string();
        assert!(!html.contains("pagination"));
        assert!(html.contains("1 results"));
    }

    #[test]
    fn current_page_is_not_a_link() {
        let params = PaginationParams { page: 2, per_page: 10 };
        let page = Paginated::new(vec![0u8; 10], 45, &params);
        let html = pagination_nav("/sites", &[], &page).into_string();
        assert!(html.contains(r#"<span class="current">2</span>"#));
        assert!(html.contains(r#"href="/sites?page=3""#));
    }

    #[test]
    fn maintenance_page_shows_the_message() {
        let html = maintenance_page("Back at 18:00").into_string();
        assert!(html.contains("Back at 18:00"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn selected_option_is_marked() {
        let html = options([(1, "Good"), (2, "Fair")], Some(2)).into_string();
        assert!(html.contains(r#"<option value="2" selected>Fair</option>"#));
    }
}
