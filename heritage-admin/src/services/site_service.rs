use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use diesel::dsl::{count, sql, sum};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Double};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use heritage_shared::errors::{AppError, AppResult, ErrorCode};
use heritage_shared::types::pagination::{Paginated, PaginationParams};

use crate::models::{NewSite, NewSiteTag, Site, SiteChanges, SiteImage, Tag};
use crate::schema::{categories, reviews, site_images, site_tags, sites, states, tags, user_favorites};
use crate::search::{
    self, bool_condition, integer_condition, like_pattern, order_by_column, parse_bool,
    parse_id_list, text_condition, timestamp_condition, ColumnKind, Direction, FilterOp,
    FilterValue, SearchQuery, Searchable,
};
use crate::services::audit_service::{self, AuditAction};
use crate::services::{catalog_service, image_service, tag_service};

pub type SiteQuery = sites::BoxedQuery<'static, Pg>;

// --- Input ---

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SiteInput {
    #[validate(length(min = 1, max = 50, message = "site name must be 1 to 50 characters"))]
    pub site_name: String,
    #[validate(length(min = 1, max = 50, message = "short description must be 1 to 50 characters"))]
    pub short_desc: String,
    #[validate(length(min = 1, max = 120, message = "full description must be 1 to 120 characters"))]
    pub full_desc: String,
    #[validate(length(min = 1, max = 50, message = "city must be 1 to 50 characters"))]
    pub city: String,
    #[validate(length(min = 1, max = 50, message = "province must be 1 to 50 characters"))]
    pub province: String,
    pub opening_year: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category_id: i32,
    pub state_id: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SiteInput {
    pub fn trimmed(mut self) -> Self {
        for field in [
            &mut self.site_name,
            &mut self.short_desc,
            &mut self.full_desc,
            &mut self.city,
            &mut self.province,
        ] {
            *field = field.trim().to_string();
        }
        self
    }

    /// Field checks that need no database.
    pub fn check(&self) -> AppResult<()> {
        self.validate()?;

        let current_year = Utc::now().year();
        if self.opening_year < 1 || self.opening_year > current_year {
            return Err(AppError::validation(format!(
                "opening year must be between 1 and {current_year}"
            )));
        }

        match (self.latitude, self.longitude) {
            (None, None) => {}
            (Some(lat), Some(lng)) => {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    return Err(AppError::validation("latitude must be between -90 and 90"));
                }
                if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
                    return Err(AppError::validation("longitude must be between -180 and 180"));
                }
            }
            _ => {
                return Err(AppError::validation(
                    "latitude and longitude must be provided together",
                ))
            }
        }
        Ok(())
    }
}

fn ensure_name_free(conn: &mut PgConnection, name: &str, except: Option<i32>) -> AppResult<()> {
    let mut query = sites::table
        .filter(sites::site_name.ilike(like_pattern(name, false, false)))
        .select(sites::id)
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(sites::id.ne(id));
    }
    if query.first::<i32>(conn).optional()?.is_some() {
        return Err(AppError::new(ErrorCode::SiteNameTaken, "a site with this name already exists"));
    }
    Ok(())
}

fn validate_input(conn: &mut PgConnection, input: &SiteInput, except: Option<i32>) -> AppResult<()> {
    input.check()?;
    catalog_service::get_category(conn, input.category_id)?;
    catalog_service::get_state(conn, input.state_id)?;
    ensure_name_free(conn, &input.site_name, except)
}

// --- Reads ---

fn live_sites() -> SiteQuery {
    sites::table.filter(sites::deleted.eq(false)).into_boxed()
}

/// Sites in the trash are not found.
pub fn get_site(conn: &mut PgConnection, id: i32) -> AppResult<Site> {
    live_sites()
        .filter(sites::id.eq(id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::SiteNotFound, "site not found"))
}

pub fn get_site_including_deleted(conn: &mut PgConnection, id: i32) -> AppResult<Site> {
    sites::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::SiteNotFound, "site not found"))
}

/// Active, non-deleted site as seen by the portal.
pub fn get_public_site(conn: &mut PgConnection, id: i32) -> AppResult<Site> {
    let site = get_site(conn, id)?;
    if !site.active {
        return Err(AppError::new(ErrorCode::SiteNotFound, "site not found"));
    }
    Ok(site)
}

pub fn site_tags(conn: &mut PgConnection, site_id: i32) -> AppResult<Vec<Tag>> {
    Ok(tags::table
        .inner_join(site_tags::table)
        .filter(site_tags::site_id.eq(site_id))
        .order(tags::name.asc())
        .select((tags::id, tags::name, tags::slug, tags::created_at))
        .load(conn)?)
}

pub fn provinces(conn: &mut PgConnection) -> AppResult<Vec<String>> {
    Ok(sites::table
        .filter(sites::deleted.eq(false))
        .filter(sites::active.eq(true))
        .select(sites::province)
        .distinct()
        .order(sites::province.asc())
        .load(conn)?)
}

pub fn increment_views(conn: &mut PgConnection, id: i32) -> AppResult<i32> {
    Ok(diesel::update(sites::table.find(id))
        .set(sites::views.eq(sites::views + 1))
        .returning(sites::views)
        .get_result(conn)?)
}

// --- Mutations ---

fn snapshot(site: &Site) -> serde_json::Value {
    json!({
        "site_name": site.site_name,
        "short_desc": site.short_desc,
        "full_desc": site.full_desc,
        "city": site.city,
        "province": site.province,
        "opening_year": site.opening_year,
        "latitude": site.latitude,
        "longitude": site.longitude,
        "category_id": site.category_id,
        "state_id": site.state_id,
        "active": site.active,
    })
}

/// Field-level `{old, new}` pairs between two snapshots.
pub fn diff(before: &serde_json::Value, after: &serde_json::Value) -> serde_json::Value {
    let mut changes = serde_json::Map::new();
    if let (Some(before), Some(after)) = (before.as_object(), after.as_object()) {
        for (key, new_value) in after {
            let old_value = before.get(key).cloned().unwrap_or(serde_json::Value::Null);
            if &old_value != new_value {
                changes.insert(key.clone(), json!({ "old": old_value, "new": new_value }));
            }
        }
    }
    serde_json::Value::Object(changes)
}

pub fn create_site(conn: &mut PgConnection, input: SiteInput, user_id: i32) -> AppResult<Site> {
    let input = input.trimmed();
    validate_input(conn, &input, None)?;

    conn.transaction(|conn| {
        let site: Site = diesel::insert_into(sites::table)
            .values(&NewSite {
                site_name: input.site_name,
                short_desc: input.short_desc,
                full_desc: input.full_desc,
                city: input.city,
                province: input.province,
                opening_year: input.opening_year,
                latitude: input.latitude,
                longitude: input.longitude,
                category_id: input.category_id,
                state_id: input.state_id,
                active: input.active,
            })
            .get_result(conn)?;

        audit_service::record(
            conn,
            site.id,
            user_id,
            AuditAction::Create,
            format!("Site '{}' created", site.site_name),
            Some(snapshot(&site)),
        )?;

        tracing::info!(site_id = site.id, user_id, "site created");
        Ok(site)
    })
}

pub fn update_site(conn: &mut PgConnection, id: i32, input: SiteInput, user_id: i32) -> AppResult<Site> {
    let before = get_site(conn, id)?;
    let input = input.trimmed();
    validate_input(conn, &input, Some(id))?;

    conn.transaction(|conn| {
        let site: Site = diesel::update(sites::table.find(id))
            .set(&SiteChanges {
                site_name: input.site_name,
                short_desc: input.short_desc,
                full_desc: input.full_desc,
                city: input.city,
                province: input.province,
                opening_year: input.opening_year,
                latitude: input.latitude,
                longitude: input.longitude,
                category_id: input.category_id,
                state_id: input.state_id,
                active: input.active,
                updated_at: Utc::now(),
            })
            .get_result(conn)?;

        audit_service::record(
            conn,
            id,
            user_id,
            AuditAction::Update,
            format!("Site '{}' updated", site.site_name),
            Some(diff(&snapshot(&before), &snapshot(&site))),
        )?;

        Ok(site)
    })
}

fn set_deleted(conn: &mut PgConnection, id: i32, deleted: bool, user_id: i32) -> AppResult<Site> {
    let site = get_site_including_deleted(conn, id)?;
    if site.deleted == deleted {
        return Err(AppError::bad_request(if deleted {
            "site is already deleted"
        } else {
            "site is not deleted"
        }));
    }

    conn.transaction(|conn| {
        let site: Site = diesel::update(sites::table.find(id))
            .set((sites::deleted.eq(deleted), sites::updated_at.eq(Utc::now())))
            .get_result(conn)?;

        let (action, verb) = if deleted {
            (AuditAction::Delete, "deleted")
        } else {
            (AuditAction::Restore, "restored")
        };
        audit_service::record(conn, id, user_id, action, format!("Site '{}' {verb}", site.site_name), None)?;
        tracing::info!(site_id = id, user_id, deleted, "site trash state changed");
        Ok(site)
    })
}

pub fn soft_delete_site(conn: &mut PgConnection, id: i32, user_id: i32) -> AppResult<Site> {
    set_deleted(conn, id, true, user_id)
}

pub fn restore_site(conn: &mut PgConnection, id: i32, user_id: i32) -> AppResult<Site> {
    set_deleted(conn, id, false, user_id)
}

/// Replaces the site's tag set.
pub fn set_tags(conn: &mut PgConnection, site_id: i32, tag_ids: &[i32], user_id: i32) -> AppResult<Vec<Tag>> {
    get_site(conn, site_id)?;

    let mut wanted = tag_ids.to_vec();
    wanted.sort_unstable();
    wanted.dedup();

    let known: Vec<i32> = tags::table
        .filter(tags::id.eq_any(wanted.clone()))
        .select(tags::id)
        .load(conn)?;
    let unknown: Vec<i32> = wanted.iter().copied().filter(|id| !known.contains(id)).collect();
    if !unknown.is_empty() {
        return Err(AppError::with_details(
            ErrorCode::TagNotFound,
            "unknown tags",
            json!({ "tag_ids": unknown }),
        ));
    }

    conn.transaction(|conn| {
        let before: Vec<i32> = site_tags::table
            .filter(site_tags::site_id.eq(site_id))
            .select(site_tags::tag_id)
            .order(site_tags::tag_id.asc())
            .load(conn)?;

        diesel::delete(site_tags::table.filter(site_tags::site_id.eq(site_id))).execute(conn)?;
        let rows: Vec<NewSiteTag> = wanted
            .iter()
            .map(|&tag_id| NewSiteTag { site_id, tag_id })
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(site_tags::table).values(&rows).execute(conn)?;
        }

        audit_service::record(
            conn,
            site_id,
            user_id,
            AuditAction::Tags,
            "Site tags updated",
            Some(json!({ "old": before, "new": wanted })),
        )?;

        site_tags(conn, site_id)
    })
}

// --- Admin listing ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFilter {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
}

impl GeoFilter {
    pub fn parse(lat: Option<&str>, lng: Option<&str>, radius: Option<&str>) -> AppResult<Option<Self>> {
        let (Some(lat), Some(lng), Some(radius)) = (lat, lng, radius) else {
            return Ok(None);
        };
        let parse = |name: &str, v: &str| {
            v.trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| AppError::validation(format!("invalid {name}: '{v}'")))
        };
        let geo = GeoFilter {
            lat: parse("lat", lat)?,
            lng: parse("lng", lng)?,
            radius_km: parse("radius", radius)?,
        };
        if !(-90.0..=90.0).contains(&geo.lat) || !(-180.0..=180.0).contains(&geo.lng) {
            return Err(AppError::validation("coordinates out of range"));
        }
        if geo.radius_km <= 0.0 {
            return Err(AppError::validation("radius must be positive"));
        }
        Ok(Some(geo))
    }

    fn apply(self, query: SiteQuery) -> SiteQuery {
        query.filter(
            sql::<Bool>("ST_DWithin(sites.location, ST_SetSRID(ST_MakePoint(")
                .bind::<Double, _>(self.lng)
                .sql(", ")
                .bind::<Double, _>(self.lat)
                .sql("), 4326)::geography, ")
                .bind::<Double, _>(self.radius_km * 1000.0)
                .sql(")"),
        )
    }
}

/// Site must carry every listed tag.
fn with_all_tags(mut query: SiteQuery, tag_ids: &[i32]) -> SiteQuery {
    for &tag_id in tag_ids {
        query = query.filter(
            sites::id.eq_any(
                site_tags::table
                    .filter(site_tags::tag_id.eq(tag_id))
                    .select(site_tags::site_id),
            ),
        );
    }
    query
}

#[derive(Debug, Clone, Default)]
pub struct SiteListFilter {
    pub search: SearchQuery,
    pub tags: Vec<i32>,
    pub geo: Option<GeoFilter>,
}

impl SiteListFilter {
    pub fn from_params<'a, I>(params: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut search = SearchQuery::from_params(params);
        let tags = match search.take("tags") {
            Some(raw) => parse_id_list(&raw)?,
            None => Vec::new(),
        };
        let lat = search.take("lat");
        let lng = search.take("lng");
        let radius = search.take("radius");
        let geo = GeoFilter::parse(lat.as_deref(), lng.as_deref(), radius.as_deref())?;
        Ok(Self { search, tags, geo })
    }

    fn build(&self, deleted: bool) -> AppResult<SiteQuery> {
        let mut query = search::build_query::<SiteSearch>(
            sites::table.filter(sites::deleted.eq(deleted)).into_boxed(),
            &self.search,
        )?;
        query = with_all_tags(query, &self.tags);
        if let Some(geo) = self.geo {
            query = geo.apply(query);
        }
        Ok(query)
    }
}

pub struct SiteSearch;

impl Searchable for SiteSearch {
    type Query = SiteQuery;

    fn fields() -> &'static [(&'static str, ColumnKind)] {
        &[
            ("site_name", ColumnKind::Text),
            ("short_desc", ColumnKind::Text),
            ("city", ColumnKind::Text),
            ("province", ColumnKind::Text),
            ("state_id", ColumnKind::Integer),
            ("category_id", ColumnKind::Integer),
            ("opening_year", ColumnKind::Integer),
            ("views", ColumnKind::Integer),
            ("active", ColumnKind::Boolean),
            ("registration", ColumnKind::Timestamp),
            ("updated_at", ColumnKind::Timestamp),
        ]
    }

    fn apply_filter(query: SiteQuery, field: &str, op: FilterOp, value: FilterValue) -> SiteQuery {
        match field {
            "site_name" => text_condition!(query, sites::site_name, op, value),
            "short_desc" => text_condition!(query, sites::short_desc, op, value),
            "city" => text_condition!(query, sites::city, op, value),
            "province" => text_condition!(query, sites::province, op, value),
            "state_id" => integer_condition!(query, sites::state_id, op, value),
            "category_id" => integer_condition!(query, sites::category_id, op, value),
            "opening_year" => integer_condition!(query, sites::opening_year, op, value),
            "views" => integer_condition!(query, sites::views, op, value),
            "active" => bool_condition!(query, sites::active, op, value),
            "registration" => timestamp_condition!(query, sites::registration, op, value),
            "updated_at" => timestamp_condition!(query, sites::updated_at, op, value),
            _ => query,
        }
    }

    fn apply_text(query: SiteQuery, text: &str) -> SiteQuery {
        let pattern = like_pattern(text, true, true);
        query.filter(
            sites::site_name
                .ilike(pattern.clone())
                .or(sites::short_desc.ilike(pattern)),
        )
    }

    fn apply_dates(mut query: SiteQuery, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> SiteQuery {
        if let Some(from) = from {
            query = query.filter(sites::registration.ge(from));
        }
        if let Some(to) = to {
            query = query.filter(sites::registration.le(to));
        }
        query
    }

    fn apply_order(query: SiteQuery, field: Option<&str>, direction: Direction) -> SiteQuery {
        match field {
            Some("site_name") => order_by_column!(query, sites::site_name, sites::id, direction),
            Some("city") => order_by_column!(query, sites::city, sites::id, direction),
            Some("province") => order_by_column!(query, sites::province, sites::id, direction),
            Some("registration") => order_by_column!(query, sites::registration, sites::id, direction),
            Some("opening_year") => order_by_column!(query, sites::opening_year, sites::id, direction),
            Some("views") => order_by_column!(query, sites::views, sites::id, direction),
            _ => query.order(sites::registration.desc()).then_order_by(sites::id.desc()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteListItem {
    #[serde(flatten)]
    pub site: Site,
    pub category: String,
    pub state: String,
    pub tags: Vec<Tag>,
    pub cover_url: String,
    pub rating: RatingSummary,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct RatingSummary {
    pub average: f64,
    pub count: i64,
}

impl RatingSummary {
    pub fn from_totals(sum: i64, count: i64) -> Self {
        if count == 0 {
            return Self::default();
        }
        let average = (sum as f64 / count as f64 * 10.0).round() / 10.0;
        Self { average, count }
    }
}

/// Approved-review rating summaries keyed by site.
pub fn ratings_for_sites(conn: &mut PgConnection, site_ids: &[i32]) -> AppResult<HashMap<i32, RatingSummary>> {
    if site_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i32, Option<i64>, i64)> = reviews::table
        .filter(reviews::site_id.eq_any(site_ids.to_vec()))
        .filter(reviews::status.eq(crate::services::review_service::STATUS_APPROVED))
        .group_by(reviews::site_id)
        .select((reviews::site_id, sum(reviews::rating), count(reviews::id)))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(site_id, total, n)| (site_id, RatingSummary::from_totals(total.unwrap_or(0), n)))
        .collect())
}

pub fn cover_urls(conn: &mut PgConnection, site_ids: &[i32]) -> AppResult<HashMap<i32, String>> {
    if site_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i32, String)> = site_images::table
        .filter(site_images::site_id.eq_any(site_ids.to_vec()))
        .filter(site_images::is_cover.eq(true))
        .select((site_images::site_id, site_images::public_url))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

/// Joins category, state, tag, cover and rating data onto a page of sites.
pub fn enrich(conn: &mut PgConnection, sites: Vec<Site>, default_image: &str) -> AppResult<Vec<SiteListItem>> {
    let ids: Vec<i32> = sites.iter().map(|s| s.id).collect();

    let category_names: HashMap<i32, String> = categories::table
        .select((categories::id, categories::name))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .collect();
    let state_names: HashMap<i32, String> = states::table
        .select((states::id, states::name))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .collect();

    let mut tags_by_site: HashMap<i32, Vec<Tag>> = HashMap::new();
    for (site_id, tag) in tag_service::tags_for_sites(conn, &ids)? {
        tags_by_site.entry(site_id).or_default().push(tag);
    }
    let covers = cover_urls(conn, &ids)?;
    let ratings = ratings_for_sites(conn, &ids)?;

    Ok(sites
        .into_iter()
        .map(|site| SiteListItem {
            category: category_names.get(&site.category_id).cloned().unwrap_or_default(),
            state: state_names.get(&site.state_id).cloned().unwrap_or_default(),
            tags: tags_by_site.remove(&site.id).unwrap_or_default(),
            cover_url: covers
                .get(&site.id)
                .cloned()
                .unwrap_or_else(|| default_image.to_string()),
            rating: ratings.get(&site.id).copied().unwrap_or_default(),
            site,
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct SiteDetail {
    #[serde(flatten)]
    pub item: SiteListItem,
    pub images: Vec<SiteImage>,
}

/// Enriched site with its images in display order.
pub fn site_detail(conn: &mut PgConnection, site: Site, default_image: &str) -> AppResult<SiteDetail> {
    let images = image_service::list_images(conn, site.id)?;
    let item = enrich(conn, vec![site], default_image)?
        .pop()
        .ok_or_else(|| AppError::new(ErrorCode::SiteNotFound, "site not found"))?;
    Ok(SiteDetail { item, images })
}

/// Admin listing; `trash` lists soft-deleted sites instead.
pub fn list_sites(
    conn: &mut PgConnection,
    filter: &SiteListFilter,
    pagination: &PaginationParams,
    trash: bool,
    default_image: &str,
) -> AppResult<Paginated<SiteListItem>> {
    let total: i64 = filter.build(trash)?.count().get_result(conn)?;
    let rows: Vec<Site> = search::apply_ordering::<SiteSearch>(filter.build(trash)?, &filter.search)
        .offset(pagination.sql_offset())
        .limit(pagination.sql_limit())
        .load(conn)?;

    let items = enrich(conn, rows, default_image)?;
    let mut page = Paginated::new(items, total as u64, pagination);
    if let Some(order_by) = &filter.search.order_by {
        page = page.with_ordering(order_by.clone(), filter.search.direction.as_str());
    }
    Ok(page)
}

/// Every site matching the admin filters, unpaginated.
pub fn list_for_export(conn: &mut PgConnection, filter: &SiteListFilter, default_image: &str) -> AppResult<Vec<SiteListItem>> {
    let rows: Vec<Site> = search::apply_ordering::<SiteSearch>(filter.build(false)?, &filter.search).load(conn)?;
    enrich(conn, rows, default_image)
}

// --- Portal listing ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortalSiteQuery {
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub q: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
    pub tags: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub radius: Option<String>,
    pub favorites: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

pub const PORTAL_PER_PAGE: u64 = 12;

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PortalSiteQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams::parse(self.page.as_deref(), self.per_page.as_deref(), PORTAL_PER_PAGE)
    }

    pub fn wants_favorites(&self) -> bool {
        non_empty(&self.favorites).and_then(parse_bool).unwrap_or(false)
    }

    /// `user_id` is required when only favorites are requested.
    fn build(&self, user_id: Option<i32>) -> AppResult<SiteQuery> {
        let mut query: SiteQuery = sites::table
            .filter(sites::deleted.eq(false))
            .filter(sites::active.eq(true))
            .into_boxed();

        if let Some(q) = non_empty(&self.q) {
            let pattern = like_pattern(q, true, true);
            query = query.filter(
                sites::site_name
                    .ilike(pattern.clone())
                    .or(sites::short_desc.ilike(pattern.clone()))
                    .or(sites::city.ilike(pattern)),
            );
        }
        if let Some(province) = non_empty(&self.province) {
            query = query.filter(sites::province.ilike(like_pattern(province, true, true)));
        }
        if let Some(city) = non_empty(&self.city) {
            query = query.filter(sites::city.ilike(like_pattern(city, true, true)));
        }
        if let Some(category) = non_empty(&self.category) {
            query = query.filter(
                sites::category_id.eq_any(
                    categories::table
                        .filter(categories::name.ilike(like_pattern(category, false, false)))
                        .select(categories::id),
                ),
            );
        }
        if let Some(state) = non_empty(&self.state) {
            query = query.filter(
                sites::state_id.eq_any(
                    states::table
                        .filter(states::name.ilike(like_pattern(state, false, false)))
                        .select(states::id),
                ),
            );
        }
        if let Some(raw) = non_empty(&self.tags) {
            query = with_all_tags(query, &parse_id_list(raw)?);
        }
        if let Some(geo) = GeoFilter::parse(
            non_empty(&self.lat),
            non_empty(&self.lng),
            non_empty(&self.radius),
        )? {
            query = geo.apply(query);
        }
        if self.wants_favorites() {
            let user_id = user_id.ok_or_else(|| AppError::unauthorized("log in to list favorites"))?;
            query = query.filter(
                sites::id.eq_any(
                    user_favorites::table
                        .filter(user_favorites::user_id.eq(user_id))
                        .select(user_favorites::site_id),
                ),
            );
        }
        Ok(query)
    }

    fn order(&self, query: SiteQuery) -> SiteQuery {
        let direction = Direction::parse(self.order.as_deref());
        match self.sort.as_deref().map(str::trim) {
            Some("site_name") | Some("name") => order_by_column!(query, sites::site_name, sites::id, direction),
            Some("registration") => order_by_column!(query, sites::registration, sites::id, direction),
            Some("views") => order_by_column!(query, sites::views, sites::id, direction),
            Some("rating") => {
                let average = sql::<Double>(
                    "(SELECT COALESCE(AVG(r.rating), 0)::float8 FROM reviews r \
                     WHERE r.site_id = sites.id AND r.status = 'approved')",
                );
                match direction {
                    Direction::Asc => query.order(average.asc()).then_order_by(sites::id.asc()),
                    Direction::Desc => query.order(average.desc()).then_order_by(sites::id.desc()),
                }
            }
            // "recent" and anything unknown
            _ => query.order(sites::registration.desc()).then_order_by(sites::id.desc()),
        }
    }
}

pub fn portal_list(
    conn: &mut PgConnection,
    params: &PortalSiteQuery,
    user_id: Option<i32>,
    default_image: &str,
) -> AppResult<Paginated<SiteListItem>> {
    let pagination = params.pagination();
    let total: i64 = params.build(user_id)?.count().get_result(conn)?;
    let rows: Vec<Site> = params
        .order(params.build(user_id)?)
        .offset(pagination.sql_offset())
        .limit(pagination.sql_limit())
        .load(conn)?;

    let items = enrich(conn, rows, default_image)?;
    let mut page = Paginated::new(items, total as u64, &pagination);
    if let Some(sort) = non_empty(&params.sort) {
        page = page.with_ordering(sort, Direction::parse(params.order.as_deref()).as_str());
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;

    fn input() -> SiteInput {
        SiteInput {
            site_name: "  Casa Vieja ".into(),
            short_desc: "Casa antigua".into(),
            full_desc: "Casa histórica del siglo XIX".into(),
            city: "La Plata".into(),
            province: "Buenos Aires".into(),
            opening_year: 1890,
            latitude: Some(-34.92),
            longitude: Some(-57.95),
            category_id: 1,
            state_id: 1,
            active: true,
        }
    }

    #[test]
    fn valid_input_passes_after_trim() {
        let input = input().trimmed();
        assert_eq!(input.site_name, "Casa Vieja");
        assert!(input.check().is_ok());
    }

    #[test]
    fn length_limits_are_enforced() {
        let mut bad = input();
        bad.short_desc = "x".repeat(51);
        assert!(bad.check().is_err());

        let mut bad = input();
        bad.full_desc = "x".repeat(121);
        assert!(bad.check().is_err());

        let mut bad = input().trimmed();
        bad.site_name = String::new();
        assert!(bad.check().is_err());
    }

    #[test]
    fn opening_year_cannot_be_in_the_future() {
        let mut bad = input();
        bad.opening_year = Utc::now().year() + 1;
        assert!(bad.check().is_err());
        bad.opening_year = 0;
        assert!(bad.check().is_err());
    }

    #[test]
    fn coordinates_come_in_pairs_and_ranges() {
        let mut bad = input();
        bad.longitude = None;
        assert!(bad.check().is_err());

        let mut bad = input();
        bad.latitude = Some(91.0);
        assert!(bad.check().is_err());

        let mut none = input();
        none.latitude = None;
        none.longitude = None;
        assert!(none.check().is_ok());
    }

    #[test]
    fn diff_lists_changed_fields_only() {
        let before = json!({ "city": "La Plata", "views": 1 });
        let after = json!({ "city": "Quilmes", "views": 1 });
        let changes = diff(&before, &after);
        assert_eq!(changes["city"]["old"], "La Plata");
        assert_eq!(changes["city"]["new"], "Quilmes");
        assert!(changes.get("views").is_none());
    }

    #[test]
    fn list_filter_extracts_tags_and_geo() {
        let filter = SiteListFilter::from_params([
            ("tags", "1,3"),
            ("lat", "-34.9"),
            ("lng", "-57.9"),
            ("radius", "10"),
            ("city", "plata"),
        ])
        .unwrap();
        assert_eq!(filter.tags, vec![1, 3]);
        assert_eq!(filter.geo.unwrap().radius_km, 10.0);
        assert_eq!(filter.search.conditions.len(), 1);
    }

    #[test]
    fn partial_geo_is_ignored_and_bad_geo_rejected() {
        let filter = SiteListFilter::from_params([("lat", "-34.9")]).unwrap();
        assert!(filter.geo.is_none());

        assert!(GeoFilter::parse(Some("100"), Some("0"), Some("5")).is_err());
        assert!(GeoFilter::parse(Some("0"), Some("0"), Some("-1")).is_err());
        assert!(GeoFilter::parse(Some("NaN"), Some("0"), Some("1")).is_err());
    }

    #[test]
    fn rating_summary_rounds_to_one_decimal() {
        assert_eq!(RatingSummary::from_totals(0, 0), RatingSummary::default());
        let summary = RatingSummary::from_totals(14, 3);
        assert_eq!(summary.average, 4.7);
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn default_listing_skips_the_trash() {
        let filter = SiteListFilter::default();
        let live = debug_query::<Pg, _>(&filter.build(false).unwrap()).to_string();
        assert!(live.contains(r#""sites"."deleted" = $1"#));
        assert!(live.ends_with("-- binds: [false]"));

        let trash = debug_query::<Pg, _>(&filter.build(true).unwrap()).to_string();
        assert!(trash.ends_with("-- binds: [true]"));

        let single = debug_query::<Pg, _>(&live_sites().filter(sites::id.eq(5))).to_string();
        assert!(single.contains(r#""sites"."deleted" = $1"#));
        assert!(single.ends_with("-- binds: [false, 5]"));
    }

    #[test]
    fn portal_listing_only_shows_active_live_sites() {
        let query = PortalSiteQuery { city: Some("Plata".into()), ..Default::default() };
        let sql = debug_query::<Pg, _>(&query.build(None).unwrap()).to_string();
        assert!(sql.contains(r#""sites"."deleted" = $1"#));
        assert!(sql.contains(r#""sites"."active" = $2"#));
        assert!(sql.ends_with(r#"-- binds: [false, true, "%Plata%"]"#));
    }

    #[test]
    fn portal_query_defaults() {
        let query = PortalSiteQuery::default();
        assert_eq!(query.pagination().limit(), PORTAL_PER_PAGE);
        assert!(!query.wants_favorites());

        let query = PortalSiteQuery { favorites: Some("true".into()), ..Default::default() };
        assert!(query.wants_favorites());
        assert!(query.build(None).is_err());
    }
}
