use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{NewReview, NewReviewAudit, Review, ReviewAudit};
use crate::schema::{review_audits, reviews, sites, users};
use crate::search::{
    self, integer_condition, like_pattern, order_by_column, text_condition, timestamp_condition,
    ColumnKind, Direction, FilterOp, FilterValue, SearchQuery, Searchable,
};
use crate::services::{flag_service, site_service};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

pub const CONTENT_MIN: usize = 20;
pub const CONTENT_MAX: usize = 1000;
pub const REJECTION_REASON_MAX: usize = 200;
pub const REVIEWS_PER_PAGE: u64 = 10;

type ReviewQuery = reviews::BoxedQuery<'static, Pg>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Approve,
    Reject,
    Delete,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Approve => "APPROVE",
            ModerationAction::Reject => "REJECT",
            ModerationAction::Delete => "DELETE",
        }
    }
}

fn record_moderation(
    conn: &mut PgConnection,
    review_id: i32,
    user_id: i32,
    action: ModerationAction,
    description: impl Into<String>,
    details: serde_json::Value,
) -> AppResult<ReviewAudit> {
    Ok(diesel::insert_into(review_audits::table)
        .values(&NewReviewAudit {
            review_id: Some(review_id),
            user_id,
            action_type: action.as_str().to_string(),
            description: description.into(),
            details: Some(details),
        })
        .get_result(conn)?)
}

// --- Portal ---

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewInput {
    pub site_id: i32,
    pub rating: i32,
    pub text: String,
}

impl ReviewInput {
    pub fn check(&self) -> AppResult<String> {
        if !(1..=5).contains(&self.rating) {
            return Err(AppError::validation("rating must be between 1 and 5"));
        }
        let text = self.text.trim();
        let length = text.chars().count();
        if !(CONTENT_MIN..=CONTENT_MAX).contains(&length) {
            return Err(AppError::validation(format!(
                "review text must be {CONTENT_MIN} to {CONTENT_MAX} characters"
            )));
        }
        Ok(text.to_string())
    }
}

pub fn create_review(conn: &mut PgConnection, user_id: i32, input: ReviewInput) -> AppResult<Review> {
    if !flag_service::is_enabled(conn, flag_service::REVIEWS_ENABLED)? {
        return Err(AppError::new(ErrorCode::ReviewsDisabled, "reviews are currently disabled"));
    }
    let content = input.check()?;
    site_service::get_public_site(conn, input.site_id)?;

    let existing = reviews::table
        .filter(reviews::user_id.eq(user_id))
        .filter(reviews::site_id.eq(input.site_id))
        .select(reviews::id)
        .first::<i32>(conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::new(
            ErrorCode::DuplicateReview,
            "you have already reviewed this site",
        ));
    }

    let review: Review = diesel::insert_into(reviews::table)
        .values(&NewReview {
            site_id: input.site_id,
            user_id,
            rating: input.rating,
            content,
            status: STATUS_PENDING.to_string(),
        })
        .get_result(conn)?;
    tracing::info!(review_id = review.id, site_id = review.site_id, user_id, "review submitted");
    Ok(review)
}

#[derive(Debug, Serialize)]
pub struct PublicReview {
    pub id: i32,
    pub site_id: i32,
    pub rating: i32,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

fn on_live_sites(query: ReviewQuery) -> ReviewQuery {
    query.filter(
        reviews::site_id.eq_any(sites::table.filter(sites::deleted.eq(false)).select(sites::id)),
    )
}

fn approved_query(site_id: Option<i32>) -> ReviewQuery {
    let mut query = on_live_sites(
        reviews::table
            .filter(reviews::status.eq(STATUS_APPROVED))
            .into_boxed(),
    );
    if let Some(site_id) = site_id {
        query = query.filter(reviews::site_id.eq(site_id));
    }
    query
}

fn first_names(conn: &mut PgConnection, user_ids: &[i32]) -> AppResult<HashMap<i32, String>> {
    Ok(users::table
        .filter(users::id.eq_any(user_ids.to_vec()))
        .select((users::id, users::first_name))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .collect())
}

/// Approved reviews newest first.
pub fn list_approved(
    conn: &mut PgConnection,
    site_id: Option<i32>,
    pagination: &PaginationParams,
) -> AppResult<Paginated<PublicReview>> {
    let total: i64 = approved_query(site_id).count().get_result(conn)?;
    let rows: Vec<Review> = approved_query(site_id)
        .order((reviews::created_at.desc(), reviews::id.desc()))
        .offset(pagination.sql_offset())
        .limit(pagination.sql_limit())
        .load(conn)?;

    let ids: Vec<i32> = rows.iter().map(|r| r.user_id).collect();
    let names = first_names(conn, &ids)?;
    let items = rows
        .into_iter()
        .map(|r| PublicReview {
            author: names.get(&r.user_id).cloned().unwrap_or_default(),
            id: r.id,
            site_id: r.site_id,
            rating: r.rating,
            content: r.content,
            created_at: r.created_at,
        })
        .collect();
    Ok(Paginated::new(items, total as u64, pagination))
}

#[derive(Debug, Serialize)]
pub struct ReviewSiteSummary {
    pub id: i32,
    pub name: String,
    pub image: String,
    pub short_desc: String,
}

#[derive(Debug, Serialize)]
pub struct OwnReview {
    #[serde(flatten)]
    pub review: Review,
    pub site: Option<ReviewSiteSummary>,
}

/// The caller's reviews in any status, sorted by `created_at` or `rating`.
pub fn list_user_reviews(
    conn: &mut PgConnection,
    user_id: i32,
    pagination: &PaginationParams,
    sort: Option<&str>,
    order: Option<&str>,
    default_image: &str,
) -> AppResult<Paginated<OwnReview>> {
    let total: i64 = reviews::table
        .filter(reviews::user_id.eq(user_id))
        .count()
        .get_result(conn)?;

    let direction = match order {
        Some(o) if o.trim().eq_ignore_ascii_case("asc") => Direction::Asc,
        _ => Direction::Desc,
    };
    let query = reviews::table.filter(reviews::user_id.eq(user_id)).into_boxed();
    let query = match sort {
        Some("rating") => order_by_column!(query, reviews::rating, reviews::id, direction),
        _ => order_by_column!(query, reviews::created_at, reviews::id, direction),
    };
    let rows: Vec<Review> = query
        .offset(pagination.sql_offset())
        .limit(pagination.sql_limit())
        .load(conn)?;

    let site_ids: Vec<i32> = rows.iter().map(|r| r.site_id).collect();
    let site_rows: Vec<(i32, String, String)> = sites::table
        .filter(sites::id.eq_any(site_ids.clone()))
        .select((sites::id, sites::site_name, sites::short_desc))
        .load(conn)?;
    let covers = site_service::cover_urls(conn, &site_ids)?;
    let summaries: HashMap<i32, (String, String)> = site_rows
        .into_iter()
        .map(|(id, name, short_desc)| (id, (name, short_desc)))
        .collect();

    let items = rows
        .into_iter()
        .map(|review| {
            let site = summaries.get(&review.site_id).cloned().map(|(name, short_desc)| ReviewSiteSummary {
                id: review.site_id,
                name,
                image: covers
                    .get(&review.site_id)
                    .cloned()
                    .unwrap_or_else(|| default_image.to_string()),
                short_desc,
            });
            OwnReview { review, site }
        })
        .collect();

    Ok(Paginated::new(items, total as u64, pagination).with_ordering(
        sort.unwrap_or("created_at"),
        direction.as_str(),
    ))
}

pub fn get_review(conn: &mut PgConnection, id: i32) -> AppResult<Review> {
    reviews::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ReviewNotFound, "review not found"))
}

fn snapshot(review: &Review) -> serde_json::Value {
    json!({
        "site_id": review.site_id,
        "user_id": review.user_id,
        "rating": review.rating,
        "content": review.content,
        "status": review.status,
        "rejection_reason": review.rejection_reason,
        "created_at": review.created_at,
    })
}

fn remove(conn: &mut PgConnection, review: &Review, actor_id: i32, description: &str) -> AppResult<()> {
    conn.transaction(|conn| {
        record_moderation(
            conn,
            review.id,
            actor_id,
            ModerationAction::Delete,
            description,
            json!({ "review": snapshot(review) }),
        )?;
        diesel::delete(reviews::table.find(review.id)).execute(conn)?;
        Ok(())
    })
}

/// Another user's review reads as missing.
pub fn delete_own_review(conn: &mut PgConnection, user_id: i32, review_id: i32) -> AppResult<()> {
    let review = get_review(conn, review_id)?;
    if review.user_id != user_id {
        return Err(AppError::new(ErrorCode::ReviewNotFound, "review not found"));
    }
    remove(conn, &review, user_id, "Review deleted by its author")?;
    tracing::info!(review_id, user_id, "review deleted by author");
    Ok(())
}

// --- Moderation ---

pub struct ReviewSearch;

impl Searchable for ReviewSearch {
    type Query = ReviewQuery;

    fn fields() -> &'static [(&'static str, ColumnKind)] {
        &[
            ("status", ColumnKind::Text),
            ("site_id", ColumnKind::Integer),
            ("user_id", ColumnKind::Integer),
            ("rating", ColumnKind::Integer),
            ("created_at", ColumnKind::Timestamp),
        ]
    }

    fn apply_filter(query: ReviewQuery, field: &str, op: FilterOp, value: FilterValue) -> ReviewQuery {
        match (field, op, value) {
            // exact match on status
            ("status", FilterOp::ILike, FilterValue::Text(v)) => {
                query.filter(reviews::status.eq(v.trim().to_ascii_lowercase()))
            }
            ("status", op, value) => text_condition!(query, reviews::status, op, value),
            ("site_id", op, value) => integer_condition!(query, reviews::site_id, op, value),
            ("user_id", op, value) => integer_condition!(query, reviews::user_id, op, value),
            ("rating", op, value) => integer_condition!(query, reviews::rating, op, value),
            ("created_at", op, value) => timestamp_condition!(query, reviews::created_at, op, value),
            _ => query,
        }
    }

    fn apply_text(query: ReviewQuery, text: &str) -> ReviewQuery {
        query.filter(reviews::content.ilike(like_pattern(text, true, true)))
    }

    fn apply_dates(mut query: ReviewQuery, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> ReviewQuery {
        if let Some(from) = from {
            query = query.filter(reviews::created_at.ge(from));
        }
        if let Some(to) = to {
            query = query.filter(reviews::created_at.le(to));
        }
        query
    }

    fn apply_order(query: ReviewQuery, field: Option<&str>, direction: Direction) -> ReviewQuery {
        match field {
            Some("created_at") => order_by_column!(query, reviews::created_at, reviews::id, direction),
            Some("rating") => order_by_column!(query, reviews::rating, reviews::id, direction),
            Some("status") => order_by_column!(query, reviews::status, reviews::id, direction),
            _ => query.order((reviews::created_at.desc(), reviews::id.desc())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReviewListItem {
    #[serde(flatten)]
    pub review: Review,
    pub site_name: String,
    pub user_email: String,
}

fn with_names(conn: &mut PgConnection, rows: Vec<Review>) -> AppResult<Vec<ReviewListItem>> {
    let site_ids: Vec<i32> = rows.iter().map(|r| r.site_id).collect();
    let user_ids: Vec<i32> = rows.iter().map(|r| r.user_id).collect();
    let site_names: HashMap<i32, String> = sites::table
        .filter(sites::id.eq_any(site_ids))
        .select((sites::id, sites::site_name))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .collect();
    let emails: HashMap<i32, String> = users::table
        .filter(users::id.eq_any(user_ids))
        .select((users::id, users::email))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .collect();

    Ok(rows
        .into_iter()
        .map(|review| ReviewListItem {
            site_name: site_names.get(&review.site_id).cloned().unwrap_or_default(),
            user_email: emails.get(&review.user_id).cloned().unwrap_or_default(),
            review,
        })
        .collect())
}

pub fn list_reviews(
    conn: &mut PgConnection,
    search: &SearchQuery,
    pagination: &PaginationParams,
) -> AppResult<Paginated<ReviewListItem>> {
    let total: i64 = search::build_query::<ReviewSearch>(reviews::table.into_boxed(), search)?
        .count()
        .get_result(conn)?;
    let rows: Vec<Review> = search::apply_ordering::<ReviewSearch>(
        search::build_query::<ReviewSearch>(reviews::table.into_boxed(), search)?,
        search,
    )
    .offset(pagination.sql_offset())
    .limit(pagination.sql_limit())
    .load(conn)?;

    let items = with_names(conn, rows)?;
    let mut page = Paginated::new(items, total as u64, pagination);
    if let Some(order_by) = &search.order_by {
        page = page.with_ordering(order_by.clone(), search.direction.as_str());
    }
    Ok(page)
}

#[derive(Debug, Serialize)]
pub struct ReviewDetail {
    #[serde(flatten)]
    pub item: ReviewListItem,
    pub audits: Vec<ReviewAudit>,
}

pub fn review_detail(conn: &mut PgConnection, id: i32) -> AppResult<ReviewDetail> {
    let review = get_review(conn, id)?;
    let audits: Vec<ReviewAudit> = review_audits::table
        .filter(review_audits::review_id.eq(id))
        .order((review_audits::created_at.desc(), review_audits::id.desc()))
        .load(conn)?;
    let item = with_names(conn, vec![review])?
        .pop()
        .ok_or_else(|| AppError::new(ErrorCode::ReviewNotFound, "review not found"))?;
    Ok(ReviewDetail { item, audits })
}

pub fn check_rejection_reason(reason: &str) -> AppResult<String> {
    let reason = reason.trim();
    let length = reason.chars().count();
    if length == 0 || length > REJECTION_REASON_MAX {
        return Err(AppError::new(
            ErrorCode::RejectionReasonRequired,
            format!("a rejection reason of 1 to {REJECTION_REASON_MAX} characters is required"),
        ));
    }
    Ok(reason.to_string())
}

pub fn approve_review(conn: &mut PgConnection, id: i32, moderator_id: i32) -> AppResult<Review> {
    let before = get_review(conn, id)?;
    conn.transaction(|conn| {
        let review: Review = diesel::update(reviews::table.find(id))
            .set((
                reviews::status.eq(STATUS_APPROVED),
                reviews::rejection_reason.eq(None::<String>),
                reviews::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;
        record_moderation(
            conn,
            id,
            moderator_id,
            ModerationAction::Approve,
            "Review approved",
            json!({ "previous_status": before.status }),
        )?;
        tracing::info!(review_id = id, moderator_id, "review approved");
        Ok(review)
    })
}

pub fn reject_review(conn: &mut PgConnection, id: i32, moderator_id: i32, reason: &str) -> AppResult<Review> {
    let reason = check_rejection_reason(reason)?;
    let before = get_review(conn, id)?;
    conn.transaction(|conn| {
        let review: Review = diesel::update(reviews::table.find(id))
            .set((
                reviews::status.eq(STATUS_REJECTED),
                reviews::rejection_reason.eq(Some(reason.clone())),
                reviews::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;
        record_moderation(
            conn,
            id,
            moderator_id,
            ModerationAction::Reject,
            "Review rejected",
            json!({ "previous_status": before.status, "reason": reason }),
        )?;
        tracing::info!(review_id = id, moderator_id, "review rejected");
        Ok(review)
    })
}

/// Hard delete; the audit row outlives the review with a null `review_id`.
pub fn delete_review(conn: &mut PgConnection, id: i32, moderator_id: i32) -> AppResult<()> {
    let review = get_review(conn, id)?;
    remove(conn, &review, moderator_id, "Review deleted by moderator")?;
    tracing::info!(review_id = id, moderator_id, "review deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(rating: i32, text: &str) -> ReviewInput {
        ReviewInput { site_id: 1, rating, text: text.to_string() }
    }

    #[test]
    fn rating_must_be_one_to_five() {
        let text = "A lovely old building worth a visit.";
        assert!(input(0, text).check().is_err());
        assert!(input(6, text).check().is_err());
        assert!(input(5, text).check().is_ok());
    }

    #[test]
    fn text_length_counts_trimmed_characters() {
        assert!(input(4, "   too short   ").check().is_err());
        assert!(input(4, &"é".repeat(20)).check().is_ok());
        assert!(input(4, &"x".repeat(1001)).check().is_err());
        assert_eq!(input(4, "  twenty-one characters  ").check().unwrap(), "twenty-one characters");
    }

    #[test]
    fn rejection_reason_is_required_and_bounded() {
        assert!(check_rejection_reason("   ").is_err());
        assert!(check_rejection_reason(&"r".repeat(201)).is_err());
        assert_eq!(check_rejection_reason(" spam ").unwrap(), "spam");
    }

    #[test]
    fn moderation_actions_have_stable_names() {
        assert_eq!(ModerationAction::Approve.as_str(), "APPROVE");
        assert_eq!(ModerationAction::Reject.as_str(), "REJECT");
        assert_eq!(ModerationAction::Delete.as_str(), "DELETE");
    }
}
