use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use unicode_normalization::UnicodeNormalization;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{NewTag, Tag};
use crate::schema::{site_tags, tags};
use crate::search::{
    self, like_pattern, order_by_column, text_condition, timestamp_condition, ColumnKind,
    Direction, FilterOp, FilterValue, SearchQuery, Searchable,
};

pub const TAG_NAME_MIN: usize = 3;
pub const TAG_NAME_MAX: usize = 50;

/// Decomposes (NFKD) and keeps the ASCII part, lowercases, turns whitespace
/// into `-` and drops everything else that is not alphanumeric or `-`.
/// Letters without a decomposition, such as `ł` or `ß`, are dropped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().nfkd() {
        let next = if c.is_whitespace() || c == '-' {
            '-'
        } else if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            continue;
        };
        if next == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(next);
    }
    slug.trim_matches('-').to_string()
}

pub fn normalize_tag_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    let len = name.chars().count();
    if !(TAG_NAME_MIN..=TAG_NAME_MAX).contains(&len) {
        return Err(AppError::validation(format!(
            "tag name must be between {TAG_NAME_MIN} and {TAG_NAME_MAX} characters"
        )));
    }
    if slugify(name).is_empty() {
        return Err(AppError::validation("tag name must contain letters or digits"));
    }
    Ok(name.to_string())
}

pub struct TagSearch;

impl Searchable for TagSearch {
    type Query = tags::BoxedQuery<'static, Pg>;

    fn fields() -> &'static [(&'static str, ColumnKind)] {
        &[
            ("name", ColumnKind::Text),
            ("slug", ColumnKind::Text),
            ("created_at", ColumnKind::Timestamp),
        ]
    }

    fn apply_filter(query: Self::Query, field: &str, op: FilterOp, value: FilterValue) -> Self::Query {
        match field {
            "name" => text_condition!(query, tags::name, op, value),
            "slug" => text_condition!(query, tags::slug, op, value),
            "created_at" => timestamp_condition!(query, tags::created_at, op, value),
            _ => query,
        }
    }

    fn apply_text(query: Self::Query, text: &str) -> Self::Query {
        query.filter(tags::name.ilike(like_pattern(text, true, true)))
    }

    fn apply_dates(
        mut query: Self::Query,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self::Query {
        if let Some(from) = from {
            query = query.filter(tags::created_at.ge(from));
        }
        if let Some(to) = to {
            query = query.filter(tags::created_at.le(to));
        }
        query
    }

    fn apply_order(query: Self::Query, field: Option<&str>, direction: Direction) -> Self::Query {
        match field {
            Some("created_at") => order_by_column!(query, tags::created_at, tags::id, direction),
            Some("name") => order_by_column!(query, tags::name, tags::id, direction),
            _ => query.order(tags::name.asc()).then_order_by(tags::id.asc()),
        }
    }
}

pub fn list_tags(
    conn: &mut PgConnection,
    search: &SearchQuery,
    pagination: &PaginationParams,
) -> AppResult<Paginated<Tag>> {
    let total: i64 = search::build_query::<TagSearch>(tags::table.into_boxed(), search)?
        .count()
        .get_result(conn)?;
    let items: Vec<Tag> = search::apply_ordering::<TagSearch>(
        search::build_query::<TagSearch>(tags::table.into_boxed(), search)?,
        search,
    )
    .offset(pagination.sql_offset())
    .limit(pagination.sql_limit())
    .load(conn)?;

    let mut page = Paginated::new(items, total as u64, pagination);
    if let Some(order_by) = &search.order_by {
        page = page.with_ordering(order_by.clone(), search.direction.as_str());
    }
    Ok(page)
}

pub fn all_tags(conn: &mut PgConnection) -> AppResult<Vec<Tag>> {
    Ok(tags::table.order(tags::name.asc()).load(conn)?)
}

pub fn get_tag(conn: &mut PgConnection, id: i32) -> AppResult<Tag> {
    tags::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::TagNotFound, "tag not found"))
}

fn ensure_unique(conn: &mut PgConnection, name: &str, slug: &str, except: Option<i32>) -> AppResult<()> {
    let mut query = tags::table
        .filter(
            tags::name
                .ilike(like_pattern(name, false, false))
                .or(tags::slug.eq(slug.to_string())),
        )
        .select(tags::id)
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(tags::id.ne(id));
    }
    if query.first::<i32>(conn).optional()?.is_some() {
        return Err(AppError::new(ErrorCode::TagNameTaken, "a tag with this name already exists"));
    }
    Ok(())
}

pub fn create_tag(conn: &mut PgConnection, name: &str) -> AppResult<Tag> {
    let name = normalize_tag_name(name)?;
    let slug = slugify(&name);
    ensure_unique(conn, &name, &slug, None)?;

    let tag = diesel::insert_into(tags::table)
        .values(&NewTag { name, slug })
        .get_result::<Tag>(conn)?;
    tracing::info!(tag_id = tag.id, slug = %tag.slug, "tag created");
    Ok(tag)
}

pub fn update_tag(conn: &mut PgConnection, id: i32, name: &str) -> AppResult<Tag> {
    get_tag(conn, id)?;
    let name = normalize_tag_name(name)?;
    let slug = slugify(&name);
    ensure_unique(conn, &name, &slug, Some(id))?;

    Ok(diesel::update(tags::table.find(id))
        .set((tags::name.eq(&name), tags::slug.eq(&slug)))
        .get_result(conn)?)
}

pub fn usage_count(conn: &mut PgConnection, id: i32) -> AppResult<i64> {
    Ok(site_tags::table
        .filter(site_tags::tag_id.eq(id))
        .count()
        .get_result(conn)?)
}

pub fn delete_tag(conn: &mut PgConnection, id: i32) -> AppResult<()> {
    get_tag(conn, id)?;
    let in_use = usage_count(conn, id)?;
    if in_use > 0 {
        return Err(AppError::with_details(
            ErrorCode::TagInUse,
            "tag is assigned to sites",
            serde_json::json!({ "sites": in_use }),
        ));
    }
    diesel::delete(tags::table.find(id)).execute(conn)?;
    tracing::info!(tag_id = id, "tag deleted");
    Ok(())
}

/// Tags per site for a batch of sites.
pub fn tags_for_sites(conn: &mut PgConnection, site_ids: &[i32]) -> AppResult<Vec<(i32, Tag)>> {
    if site_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(site_tags::table
        .inner_join(tags::table)
        .filter(site_tags::site_id.eq_any(site_ids.to_vec()))
        .order(tags::name.asc())
        .select((site_tags::site_id, (tags::id, tags::name, tags::slug, tags::created_at)))
        .load::<(i32, Tag)>(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_folds_accents_and_spaces() {
        assert_eq!(slugify("Sitio Arqueológico"), "sitio-arqueologico");
        assert_eq!(slugify("  Art   Déco! "), "art-deco");
        assert_eq!(slugify("Año 1890"), "ano-1890");
        assert_eq!(slugify("a--b"), "a-b");
    }

    #[test]
    fn slug_folds_letters_beyond_latin_1() {
        assert_eq!(slugify("Čapek"), "capek");
        assert_eq!(slugify("Ýpsilon"), "ypsilon");
        assert_eq!(slugify("Şehir"), "sehir");
        assert_eq!(slugify("Őrség"), "orseg");
        assert_eq!(slugify("Łódź"), "odz");
        assert_eq!(slugify("ﬁesta"), "fiesta");
    }

    #[test]
    fn slug_drops_symbols() {
        assert_eq!(slugify("rock & roll"), "rock-roll");
        assert_eq!(slugify("C++/Rust"), "crust");
    }

    #[test]
    fn tag_name_length_is_enforced() {
        assert!(normalize_tag_name("ab").is_err());
        assert!(normalize_tag_name("  abc  ").is_ok());
        assert!(normalize_tag_name(&"x".repeat(51)).is_err());
        assert!(normalize_tag_name("!!!!").is_err());
    }
}
