use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Form;
use maud::{html, Markup};
use serde::Deserialize;

use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::Paginated;

use super::{flash_success, layout, take_flash, BackTo, Flash, WebResult, WebUser};
use crate::rbac::perm;
use crate::routes::{ListParams, ADMIN_PER_PAGE};
use crate::services::review_service::{
    self, ReviewDetail, ReviewListItem, REJECTION_REASON_MAX, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED,
};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/:id", get(detail))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
        .route("/:id/delete", post(delete))
}

const STATUSES: [&str; 3] = [STATUS_PENDING, STATUS_APPROVED, STATUS_REJECTED];

fn stars(rating: i32) -> String {
    let filled = rating.clamp(0, 5) as usize;
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn list_view(
    user: &AuthUser,
    flash: Option<&Flash>,
    params: &ListParams,
    pairs: &[(String, String)],
    page: &Paginated<ReviewListItem>,
) -> Markup {
    let value = |key: &str| params.get(key).unwrap_or_default().to_string();
    layout::page(
        "Reviews",
        user,
        flash,
        html! {
            form class="filters" action="/reviews" method="GET" {
                select name="status" {
                    option value="" { "Any status" }
                    @for status in STATUSES {
                        option value=(status) selected[params.get("status") == Some(status)] { (status) }
                    }
                }
                input type="number" name="site_id" placeholder="Site id" value=(value("site_id"));
                input type="number" name="user_id" placeholder="User id" value=(value("user_id"));
                select name="rating" {
                    option value="" { "Any rating" }
                    @for rating in 1..=5 {
                        option value=(rating) selected[params.get("rating") == Some(rating.to_string().as_str())] { (rating) }
                    }
                }
                label { "From " input type="date" name="date_from" value=(value("date_from")); }
                label { "To " input type="date" name="date_to" value=(value("date_to")); }
                button type="submit" { "Filter" }
            }
            table class="reviews" {
                thead { tr { th { "Site" } th { "Author" } th { "Rating" } th { "Status" } th { "Submitted" } th {} } }
                tbody {
                    @for item in &page.items {
                        tr class=(item.review.status) {
                            td { (item.site_name) }
                            td { (item.user_email) }
                            td { (stars(item.review.rating)) }
                            td { (item.review.status) }
                            td { (layout::timestamp(&item.review.created_at)) }
                            td { a href=(format!("/reviews/{}", item.review.id)) { "Open" } }
                        }
                    }
                }
            }
            (layout::pagination_nav("/reviews", pairs, page))
        },
    )
}

fn detail_view(user: &AuthUser, flash: Option<&Flash>, detail: &ReviewDetail) -> Markup {
    let review = &detail.item.review;
    layout::page(
        &format!("Review #{}", review.id),
        user,
        flash,
        html! {
            dl {
                dt { "Site" } dd { a href=(format!("/sites/{}", review.site_id)) { (detail.item.site_name) } }
                dt { "Author" } dd { (detail.item.user_email) }
                dt { "Rating" } dd { (stars(review.rating)) }
                dt { "Status" } dd { (review.status) }
                @if let Some(reason) = &review.rejection_reason {
                    dt { "Rejection reason" } dd { (reason) }
                }
                dt { "Submitted" } dd { (layout::timestamp(&review.created_at)) }
            }
            blockquote { (review.content) }
            div class="actions" {
                @if review.status != STATUS_APPROVED {
                    form action=(format!("/reviews/{}/approve", review.id)) method="POST" {
                        button type="submit" { "Approve" }
                    }
                }
                @if review.status != STATUS_REJECTED {
                    form action=(format!("/reviews/{}/reject", review.id)) method="POST" {
                        input type="text" name="reason" maxlength=(REJECTION_REASON_MAX) placeholder="Reason for rejection" required;
                        button type="submit" { "Reject" }
                    }
                }
                form action=(format!("/reviews/{}/delete", review.id)) method="POST" {
                    button type="submit" class="danger" { "Delete permanently" }
                }
            }
            @if !detail.audits.is_empty() {
                h2 { "Moderation history" }
                ul class="audits" {
                    @for audit in &detail.audits {
                        li { (layout::timestamp(&audit.created_at)) " · " (audit.action_type) " · " (audit.description) }
                    }
                }
            }
        },
    )
}

// --- GET /reviews ---

pub async fn index(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(pairs): Query<Vec<(String, String)>>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::REVIEW_INDEX)?;
    let params = ListParams::new(pairs.clone(), ADMIN_PER_PAGE);
    let page = review_service::list_reviews(&mut conn, &params.search(), &params.pagination)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, list_view(&user.0, flash.as_ref(), &params, &pairs, &page)))
}

// --- GET /reviews/:id ---

pub async fn detail(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::REVIEW_SHOW)?;
    let detail = review_service::review_detail(&mut conn, id)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, detail_view(&user.0, flash.as_ref(), &detail)))
}

// --- Moderation ---

pub async fn approve(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::REVIEW_MODERATE)?;
    review_service::approve_review(&mut conn, id, user.0.id).back_to(format!("/reviews/{id}"))?;
    Ok((flash_success(jar, "Review approved."), Redirect::to("/reviews")))
}

#[derive(Debug, Deserialize)]
pub struct RejectForm {
    #[serde(default)]
    pub reason: String,
}

pub async fn reject(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<RejectForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::REVIEW_MODERATE)?;
    review_service::reject_review(&mut conn, id, user.0.id, &form.reason).back_to(format!("/reviews/{id}"))?;
    Ok((flash_success(jar, "Review rejected."), Redirect::to("/reviews")))
}

pub async fn delete(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::REVIEW_DESTROY)?;
    review_service::delete_review(&mut conn, id, user.0.id).back_to(format!("/reviews/{id}"))?;
    Ok((flash_success(jar, "Review deleted."), Redirect::to("/reviews")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Review;
    use chrono::Utc;

    fn moderator() -> AuthUser {
        AuthUser { id: 3, email: "mod@example.com".into(), role: Some("moderator".into()), sys_admin: false }
    }

    fn detail(status: &str) -> ReviewDetail {
        let now = Utc::now();
        ReviewDetail {
            item: ReviewListItem {
                review: Review {
                    id: 9,
                    site_id: 1,
                    user_id: 5,
                    rating: 4,
                    content: "Beautiful stained glass and a great tour.".into(),
                    status: status.into(),
                    rejection_reason: None,
                    created_at: now,
                    updated_at: now,
                },
                site_name: "Catedral".into(),
                user_email: "visitor@example.com".into(),
            },
            audits: Vec::new(),
        }
    }

    #[test]
    fn stars_are_clamped() {
        assert_eq!(stars(4), "★★★★☆");
        assert_eq!(stars(9), "★★★★★");
    }

    #[test]
    fn pending_review_offers_both_decisions() {
        let html = detail_view(&moderator(), None, &detail(STATUS_PENDING)).into_string();
        assert!(html.contains("/reviews/9/approve"));
        assert!(html.contains("/reviews/9/reject"));
    }

    #[test]
    fn approved_review_cannot_be_approved_again() {
        let html = detail_view(&moderator(), None, &detail(STATUS_APPROVED)).into_string();
        assert!(!html.contains("/reviews/9/approve"));
        assert!(html.contains("/reviews/9/reject"));
    }
}
