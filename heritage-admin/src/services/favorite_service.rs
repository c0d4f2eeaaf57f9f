use diesel::prelude::*;

use heritage_shared::errors::AppResult;
use heritage_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{NewUserFavorite, Site};
use crate::schema::{sites, user_favorites};
use crate::services::site_service::{self, SiteListItem};

/// Idempotent: adding an existing favorite is not an error.
pub fn add_favorite(conn: &mut PgConnection, user_id: i32, site_id: i32) -> AppResult<bool> {
    site_service::get_public_site(conn, site_id)?;
    let inserted = diesel::insert_into(user_favorites::table)
        .values(&NewUserFavorite { user_id, site_id })
        .on_conflict((user_favorites::user_id, user_favorites::site_id))
        .do_nothing()
        .execute(conn)?;
    tracing::debug!(user_id, site_id, inserted, "favorite added");
    Ok(inserted > 0)
}

pub fn remove_favorite(conn: &mut PgConnection, user_id: i32, site_id: i32) -> AppResult<bool> {
    let removed = diesel::delete(
        user_favorites::table
            .filter(user_favorites::user_id.eq(user_id))
            .filter(user_favorites::site_id.eq(site_id)),
    )
    .execute(conn)?;
    Ok(removed > 0)
}

pub fn is_favorite(conn: &mut PgConnection, user_id: i32, site_id: i32) -> AppResult<bool> {
    Ok(diesel::select(diesel::dsl::exists(
        user_favorites::table
            .filter(user_favorites::user_id.eq(user_id))
            .filter(user_favorites::site_id.eq(site_id)),
    ))
    .get_result(conn)?)
}

/// Favorited sites that are still visible on the portal, most recently added first.
pub fn list_favorites(
    conn: &mut PgConnection,
    user_id: i32,
    pagination: &PaginationParams,
    default_image: &str,
) -> AppResult<Paginated<SiteListItem>> {
    let visible = user_favorites::table
        .inner_join(sites::table)
        .filter(user_favorites::user_id.eq(user_id))
        .filter(sites::deleted.eq(false))
        .filter(sites::active.eq(true));

    let total: i64 = visible.clone().count().get_result(conn)?;
    let rows: Vec<Site> = visible
        .order((user_favorites::created_at.desc(), user_favorites::id.desc()))
        .select(sites::all_columns)
        .offset(pagination.sql_offset())
        .limit(pagination.sql_limit())
        .load(conn)?;

    let items = site_service::enrich(conn, rows, default_image)?;
    Ok(Paginated::new(items, total as u64, pagination))
}
