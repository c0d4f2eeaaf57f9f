use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::Serialize;

use heritage_shared::errors::AppResult;
use heritage_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{Audit, NewAudit};
use crate::schema::{audits, users};
use crate::search::{
    self, integer_condition, order_by_column, text_condition, timestamp_condition, ColumnKind,
    Direction, FilterOp, FilterValue, SearchQuery, Searchable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
    Tags,
    ImageAdd,
    ImageUpdate,
    ImageDelete,
    Cover,
    Reorder,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Restore => "RESTORE",
            AuditAction::Tags => "TAGS",
            AuditAction::ImageAdd => "IMAGE_ADD",
            AuditAction::ImageUpdate => "IMAGE_UPDATE",
            AuditAction::ImageDelete => "IMAGE_DELETE",
            AuditAction::Cover => "COVER",
            AuditAction::Reorder => "REORDER",
        }
    }

    pub const ALL: [AuditAction; 10] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Restore,
        AuditAction::Tags,
        AuditAction::ImageAdd,
        AuditAction::ImageUpdate,
        AuditAction::ImageDelete,
        AuditAction::Cover,
        AuditAction::Reorder,
    ];
}

pub fn record(
    conn: &mut PgConnection,
    site_id: i32,
    user_id: i32,
    action: AuditAction,
    description: impl Into<String>,
    details: Option<serde_json::Value>,
) -> AppResult<Audit> {
    let audit = diesel::insert_into(audits::table)
        .values(&NewAudit {
            site_id,
            user_id,
            action_type: action.as_str().to_string(),
            description: description.into(),
            details,
        })
        .get_result::<Audit>(conn)?;

    tracing::debug!(site_id, user_id, action = action.as_str(), "site audit recorded");
    Ok(audit)
}

#[derive(Debug, Serialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub audit: Audit,
    pub user_email: Option<String>,
}

pub struct AuditSearch;

impl Searchable for AuditSearch {
    type Query = audits::BoxedQuery<'static, Pg>;

    fn fields() -> &'static [(&'static str, ColumnKind)] {
        &[
            ("action_type", ColumnKind::Text),
            ("user_id", ColumnKind::Integer),
            ("created_at", ColumnKind::Timestamp),
        ]
    }

    fn apply_filter(query: Self::Query, field: &str, op: FilterOp, value: FilterValue) -> Self::Query {
        match (field, op) {
            // Action names are a closed set; match them exactly.
            ("action_type", FilterOp::ILike) => {
                text_condition!(query, audits::action_type, FilterOp::Eq, upper(value))
            }
            ("action_type", _) => text_condition!(query, audits::action_type, op, upper(value)),
            ("user_id", _) => integer_condition!(query, audits::user_id, op, value),
            ("created_at", _) => timestamp_condition!(query, audits::created_at, op, value),
            _ => query,
        }
    }

    fn apply_text(query: Self::Query, text: &str) -> Self::Query {
        query.filter(audits::description.ilike(search::like_pattern(text, true, true)))
    }

    fn apply_dates(
        mut query: Self::Query,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self::Query {
        if let Some(from) = from {
            query = query.filter(audits::created_at.ge(from));
        }
        if let Some(to) = to {
            query = query.filter(audits::created_at.le(to));
        }
        query
    }

    fn apply_order(query: Self::Query, field: Option<&str>, direction: Direction) -> Self::Query {
        match field {
            Some("action_type") => order_by_column!(query, audits::action_type, audits::id, direction),
            Some("user_id") => order_by_column!(query, audits::user_id, audits::id, direction),
            Some("created_at") => order_by_column!(query, audits::created_at, audits::id, direction),
            _ => query.order(audits::created_at.desc()).then_order_by(audits::id.desc()),
        }
    }
}

fn upper(value: FilterValue) -> FilterValue {
    match value {
        FilterValue::Text(v) => FilterValue::Text(v.to_uppercase()),
        FilterValue::Texts(vs) => FilterValue::Texts(vs.into_iter().map(|v| v.to_uppercase()).collect()),
        other => other,
    }
}

/// Paginated audit trail of one site, newest first unless reordered.
pub fn history(
    conn: &mut PgConnection,
    site_id: i32,
    search: &SearchQuery,
    pagination: &PaginationParams,
) -> AppResult<Paginated<AuditEntry>> {
    let base = || audits::table.filter(audits::site_id.eq(site_id)).into_boxed();

    let total: i64 = search::build_query::<AuditSearch>(base(), search)?
        .count()
        .get_result(conn)?;

    let rows: Vec<Audit> = search::apply_ordering::<AuditSearch>(
        search::build_query::<AuditSearch>(base(), search)?,
        search,
    )
    .offset(pagination.sql_offset())
    .limit(pagination.sql_limit())
    .load(conn)?;

    let user_ids: Vec<i32> = rows.iter().map(|a| a.user_id).collect();
    let emails: Vec<(i32, String)> = users::table
        .filter(users::id.eq_any(user_ids))
        .select((users::id, users::email))
        .load(conn)?;

    let items = rows
        .into_iter()
        .map(|audit| {
            let user_email = emails
                .iter()
                .find(|(id, _)| *id == audit.user_id)
                .map(|(_, email)| email.clone());
            AuditEntry { audit, user_email }
        })
        .collect();

    let mut page = Paginated::new(items, total as u64, pagination);
    if let Some(order_by) = &search.order_by {
        page = page.with_ordering(order_by.clone(), search.direction.as_str());
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_uppercase_and_unique() {
        let names: Vec<&str> = AuditAction::ALL.iter().map(|a| a.as_str()).collect();
        for name in &names {
            assert_eq!(name.to_uppercase(), *name);
            assert_eq!(names.iter().filter(|n| *n == name).count(), 1);
        }
    }

    #[test]
    fn action_filter_values_are_uppercased() {
        assert_eq!(upper(FilterValue::Text("cover".into())), FilterValue::Text("COVER".into()));
    }
}
