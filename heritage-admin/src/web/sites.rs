use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Form;
use maud::{html, Markup};
use serde::Deserialize;

use heritage_shared::errors::AppResult;
use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::Paginated;

use super::{flash_success, layout, optional_number, required_number, take_flash, BackTo, Flash, WebResult, WebUser};
use crate::models::{Category, Site, State as ConservationState, Tag};
use crate::rbac::perm;
use crate::routes::{read_image_upload, ListParams, ADMIN_PER_PAGE, UPLOAD_BODY_LIMIT};
use crate::search::parse_id_list;
use crate::services::audit_service::{self, AuditAction, AuditEntry};
use crate::services::image_service::{self, ImageMetadata};
use crate::services::site_service::{self, SiteDetail, SiteInput, SiteListFilter, SiteListItem};
use crate::services::{catalog_service, tag_service};
use crate::AppState;

type Pairs = Query<Vec<(String, String)>>;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index).post(create))
        .route("/new", get(new_form))
        .route("/trash", get(trash))
        .route("/:id", get(detail).post(update))
        .route("/:id/edit", get(edit_form))
        .route("/:id/delete", post(delete))
        .route("/:id/restore", post(restore))
        .route("/:id/history", get(history))
        .route(
            "/:id/images",
            post(upload_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/:id/images/order", post(reorder_images))
        .route("/:id/images/:image_id", post(update_image))
        .route("/:id/images/:image_id/cover", post(set_cover))
        .route("/:id/images/:image_id/delete", post(delete_image))
}

/// Select options shared by the site form and the list filters.
struct Lookups {
    categories: Vec<Category>,
    states: Vec<ConservationState>,
    tags: Vec<Tag>,
}

impl Lookups {
    fn load(conn: &mut diesel::PgConnection) -> AppResult<Self> {
        Ok(Self {
            categories: catalog_service::list_categories(conn)?,
            states: catalog_service::list_states(conn)?,
            tags: tag_service::all_tags(conn)?,
        })
    }
}

// --- Views ---

fn filters_view(params: &ListParams, lookups: &Lookups, action: &str) -> Markup {
    let value = |key: &str| params.get(key).unwrap_or_default().to_string();
    let selected = |key: &str| params.get(key).and_then(|v| v.parse::<i32>().ok());
    html! {
        form class="filters" action=(action) method="GET" {
            input type="search" name="q" placeholder="Name or short description" value=(value("q"));
            input type="text" name="city" placeholder="City" value=(value("city"));
            input type="text" name="province" placeholder="Province" value=(value("province"));
            select name="category_id" {
                option value="" { "Any category" }
                (layout::options(lookups.categories.iter().map(|c| (c.id, c.name.as_str())), selected("category_id")))
            }
            select name="state_id" {
                option value="" { "Any state" }
                (layout::options(lookups.states.iter().map(|s| (s.id, s.name.as_str())), selected("state_id")))
            }
            select name="active" {
                option value="" { "Any visibility" }
                option value="true" selected[params.get("active") == Some("true")] { "Visible" }
                option value="false" selected[params.get("active") == Some("false")] { "Hidden" }
            }
            label { "From " input type="date" name="date_from" value=(value("date_from")); }
            label { "To " input type="date" name="date_to" value=(value("date_to")); }
            select name="order_by" {
                @for (column, label) in [("registration", "Registered"), ("site_name", "Name"), ("city", "City"), ("province", "Province"), ("opening_year", "Opening year"), ("views", "Views")] {
                    option value=(column) selected[params.get("order_by") == Some(column)] { (label) }
                }
            }
            select name="sorted_by" {
                option value="desc" selected[params.get("sorted_by") != Some("asc")] { "Descending" }
                option value="asc" selected[params.get("sorted_by") == Some("asc")] { "Ascending" }
            }
            button type="submit" { "Filter" }
            a href=(action) { "Clear" }
        }
    }
}

fn site_rows(page: &Paginated<SiteListItem>, trash: bool) -> Markup {
    html! {
        table class="sites" {
            thead {
                tr { th { "Name" } th { "City" } th { "Province" } th { "Category" } th { "State" } th { "Tags" } th { "Visible" } th { "Registered" } th {} }
            }
            tbody {
                @for item in &page.items {
                    tr {
                        td { a href=(format!("/sites/{}", item.site.id)) { (item.site.site_name) } }
                        td { (item.site.city) }
                        td { (item.site.province) }
                        td { (item.category) }
                        td { (item.state) }
                        td { (item.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")) }
                        td { (layout::yes_no(item.site.active)) }
                        td { (layout::timestamp(&item.site.registration)) }
                        td {
                            @if trash {
                                form action=(format!("/sites/{}/restore", item.site.id)) method="POST" {
                                    button type="submit" { "Restore" }
                                }
                            } @else {
                                a href=(format!("/sites/{}/edit", item.site.id)) { "Edit" }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn list_view(
    user: &AuthUser,
    flash: Option<&Flash>,
    params: &ListParams,
    pairs: &[(String, String)],
    lookups: &Lookups,
    page: &Paginated<SiteListItem>,
) -> Markup {
    let export = layout::page_href("/api/admin/sites/export", pairs, 1);
    layout::page(
        "Sites",
        user,
        flash,
        html! {
            div class="actions" {
                a class="button" href="/sites/new" { "New site" }
                a href=(export) { "Export CSV" }
                a href="/sites/trash" { "Trash" }
            }
            (filters_view(params, lookups, "/sites"))
            (site_rows(page, false))
            (layout::pagination_nav("/sites", pairs, page))
        },
    )
}

/// Current values of the site form; empty for a new site.
#[derive(Debug, Default)]
struct SiteFormValues {
    site: Option<Site>,
    tag_ids: Vec<i32>,
}

fn form_view(user: &AuthUser, flash: Option<&Flash>, lookups: &Lookups, values: &SiteFormValues) -> Markup {
    let site = values.site.as_ref();
    let (title, action) = match site {
        Some(site) => (format!("Edit {}", site.site_name), format!("/sites/{}", site.id)),
        None => ("New site".to_string(), "/sites".to_string()),
    };
    let text = |value: Option<&str>| value.unwrap_or_default().to_string();
    let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();

    layout::page(
        &title,
        user,
        flash,
        html! {
            form class="site" action=(action) method="POST" {
                label { "Name" input type="text" name="site_name" maxlength="50" required value=(text(site.map(|s| s.site_name.as_str()))); }
                label { "Short description" input type="text" name="short_desc" maxlength="50" required value=(text(site.map(|s| s.short_desc.as_str()))); }
                label { "Full description" textarea name="full_desc" maxlength="120" required { (text(site.map(|s| s.full_desc.as_str()))) } }
                label { "City" input type="text" name="city" maxlength="50" required value=(text(site.map(|s| s.city.as_str()))); }
                label { "Province" input type="text" name="province" maxlength="50" required value=(text(site.map(|s| s.province.as_str()))); }
                label { "Opening year" input type="number" name="opening_year" min="1" required value=(site.map(|s| s.opening_year.to_string()).unwrap_or_default()); }
                label { "Latitude" input type="number" name="latitude" step="any" min="-90" max="90" value=(number(site.and_then(|s| s.latitude))); }
                label { "Longitude" input type="number" name="longitude" step="any" min="-180" max="180" value=(number(site.and_then(|s| s.longitude))); }
                label {
                    "Category"
                    select name="category_id" required {
                        (layout::options(lookups.categories.iter().map(|c| (c.id, c.name.as_str())), site.map(|s| s.category_id)))
                    }
                }
                label {
                    "Conservation state"
                    select name="state_id" required {
                        (layout::options(lookups.states.iter().map(|s| (s.id, s.name.as_str())), site.map(|s| s.state_id)))
                    }
                }
                fieldset class="tags" {
                    legend { "Tags" }
                    @for tag in &lookups.tags {
                        label {
                            input type="checkbox" name="tag_ids" value=(tag.id) checked[values.tag_ids.contains(&tag.id)];
                            (tag.name)
                        }
                    }
                }
                label {
                    input type="checkbox" name="active" value="true" checked[site.map_or(true, |s| s.active)];
                    "Visible on the portal"
                }
                button type="submit" { "Save" }
            }
        },
    )
}

fn images_view(detail: &SiteDetail) -> Markup {
    let site_id = detail.item.site.id;
    let order = detail.images.iter().map(|i| i.id.to_string()).collect::<Vec<_>>().join(",");
    html! {
        section class="images" {
            h2 { "Images (" (detail.images.len()) "/" (image_service::MAX_IMAGES_PER_SITE) ")" }
            @for image in &detail.images {
                figure class=(if image.is_cover { "cover" } else { "" }) {
                    img src=(image.public_url) alt=(image.title_alt);
                    figcaption { "#" (image.id) " · " (image.title_alt) @if image.is_cover { " (cover)" } }
                    form action=(format!("/sites/{site_id}/images/{}", image.id)) method="POST" {
                        input type="text" name="title_alt" maxlength="120" required value=(image.title_alt);
                        input type="text" name="description" maxlength="255" value=(image.description.as_deref().unwrap_or_default());
                        button type="submit" { "Save" }
                    }
                    @if !image.is_cover {
                        form action=(format!("/sites/{site_id}/images/{}/cover", image.id)) method="POST" {
                            button type="submit" { "Make cover" }
                        }
                    }
                    form action=(format!("/sites/{site_id}/images/{}/delete", image.id)) method="POST" {
                        button type="submit" class="danger" { "Delete" }
                    }
                }
            }
            @if detail.images.len() > 1 {
                form class="reorder" action=(format!("/sites/{site_id}/images/order")) method="POST" {
                    label { "Order (image ids)" input type="text" name="order" value=(order); }
                    button type="submit" { "Reorder" }
                }
            }
            form class="upload" action=(format!("/sites/{site_id}/images")) method="POST" enctype="multipart/form-data" {
                input type="file" name="file" accept="image/jpeg,image/png,image/webp" required;
                input type="text" name="title_alt" maxlength="120" placeholder="Alternative text" required;
                input type="text" name="description" maxlength="255" placeholder="Description";
                button type="submit" { "Upload" }
            }
        }
    }
}

fn detail_view(user: &AuthUser, flash: Option<&Flash>, detail: &SiteDetail) -> Markup {
    let item = &detail.item;
    let site = &item.site;
    layout::page(
        &site.site_name,
        user,
        flash,
        html! {
            div class="actions" {
                a class="button" href=(format!("/sites/{}/edit", site.id)) { "Edit" }
                a href=(format!("/sites/{}/history", site.id)) { "History" }
                form action=(format!("/sites/{}/delete", site.id)) method="POST" {
                    button type="submit" class="danger" { "Move to trash" }
                }
            }
            dl {
                dt { "Short description" } dd { (site.short_desc) }
                dt { "Description" } dd { (site.full_desc) }
                dt { "Location" } dd { (site.city) ", " (site.province) }
                @if let (Some(lat), Some(lng)) = (site.latitude, site.longitude) {
                    dt { "Coordinates" } dd { (lat) ", " (lng) }
                }
                dt { "Opening year" } dd { (site.opening_year) }
                dt { "Category" } dd { (item.category) }
                dt { "Conservation state" } dd { (item.state) }
                dt { "Tags" } dd { (item.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")) }
                dt { "Visible" } dd { (layout::yes_no(site.active)) }
                dt { "Views" } dd { (site.views) }
                dt { "Rating" } dd { (item.rating.average) " (" (item.rating.count) " reviews)" }
                dt { "Registered" } dd { (layout::timestamp(&site.registration)) }
            }
            (images_view(detail))
        },
    )
}

fn history_view(
    user: &AuthUser,
    flash: Option<&Flash>,
    site: &Site,
    params: &ListParams,
    pairs: &[(String, String)],
    page: &Paginated<AuditEntry>,
) -> Markup {
    let path = format!("/sites/{}/history", site.id);
    let value = |key: &str| params.get(key).unwrap_or_default().to_string();
    layout::page(
        &format!("History of {}", site.site_name),
        user,
        flash,
        html! {
            form class="filters" action=(path) method="GET" {
                select name="action_type" {
                    option value="" { "Any action" }
                    @for action in AuditAction::ALL {
                        option value=(action.as_str()) selected[params.get("action_type") == Some(action.as_str())] { (action.as_str()) }
                    }
                }
                input type="number" name="user_id" placeholder="User id" value=(value("user_id"));
                label { "From " input type="date" name="date_from" value=(value("date_from")); }
                label { "To " input type="date" name="date_to" value=(value("date_to")); }
                button type="submit" { "Filter" }
            }
            table class="history" {
                thead { tr { th { "When" } th { "Action" } th { "User" } th { "Description" } } }
                tbody {
                    @for entry in &page.items {
                        tr {
                            td { (layout::timestamp(&entry.audit.created_at)) }
                            td { (entry.audit.action_type) }
                            td { (entry.user_email.as_deref().unwrap_or("deleted user")) }
                            td { (entry.audit.description) }
                        }
                    }
                }
            }
            (layout::pagination_nav(&path, pairs, page))
            a href=(format!("/sites/{}", site.id)) { "Back to the site" }
        },
    )
}

// --- GET /sites ---

pub async fn index(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(pairs): Pairs,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::SITE_INDEX)?;
    let params = ListParams::new(pairs.clone(), ADMIN_PER_PAGE);
    let filter = SiteListFilter::from_params(params.pairs())?;
    let page = site_service::list_sites(&mut conn, &filter, &params.pagination, false, &state.config.default_image_url)?;
    let lookups = Lookups::load(&mut conn)?;

    let (jar, flash) = take_flash(jar);
    Ok((jar, list_view(&user.0, flash.as_ref(), &params, &pairs, &lookups, &page)))
}

// --- GET /sites/trash ---

pub async fn trash(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(pairs): Pairs,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::SITE_RESTORE)?;
    let params = ListParams::new(pairs.clone(), ADMIN_PER_PAGE);
    let filter = SiteListFilter::from_params(params.pairs())?;
    let page = site_service::list_sites(&mut conn, &filter, &params.pagination, true, &state.config.default_image_url)?;

    let (jar, flash) = take_flash(jar);
    let html = layout::page(
        "Trash",
        &user.0,
        flash.as_ref(),
        html! {
            (site_rows(&page, true))
            (layout::pagination_nav("/sites/trash", &pairs, &page))
        },
    );
    Ok((jar, html))
}

// --- GET /sites/new, POST /sites ---

#[derive(Debug, Deserialize)]
pub struct SiteForm {
    pub site_name: String,
    pub short_desc: String,
    pub full_desc: String,
    pub city: String,
    pub province: String,
    pub opening_year: String,
    #[serde(default)]
    pub latitude: String,
    #[serde(default)]
    pub longitude: String,
    pub category_id: String,
    pub state_id: String,
    pub active: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<i32>,
}

impl SiteForm {
    fn into_input(self) -> AppResult<(SiteInput, Vec<i32>)> {
        let input = SiteInput {
            opening_year: required_number(&self.opening_year, "opening year")?,
            latitude: optional_number(&self.latitude, "latitude")?,
            longitude: optional_number(&self.longitude, "longitude")?,
            category_id: required_number(&self.category_id, "category")?,
            state_id: required_number(&self.state_id, "conservation state")?,
            active: self.active.is_some(),
            site_name: self.site_name,
            short_desc: self.short_desc,
            full_desc: self.full_desc,
            city: self.city,
            province: self.province,
        };
        Ok((input, self.tag_ids))
    }
}

pub async fn new_form(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::SITE_NEW)?;
    let lookups = Lookups::load(&mut conn)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, form_view(&user.0, flash.as_ref(), &lookups, &SiteFormValues::default())))
}

pub async fn create(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<SiteForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_NEW)?;
    let (input, tag_ids) = form.into_input().back_to("/sites/new")?;
    let site = site_service::create_site(&mut conn, input, user.0.id).back_to("/sites/new")?;
    let to = format!("/sites/{}", site.id);
    if !tag_ids.is_empty() {
        site_service::set_tags(&mut conn, site.id, &tag_ids, user.0.id).back_to(&to)?;
    }
    Ok((flash_success(jar, "Site created."), Redirect::to(&to)))
}

// --- GET /sites/:id ---

pub async fn detail(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::SITE_SHOW)?;
    let site = site_service::get_site(&mut conn, id)?;
    let detail = site_service::site_detail(&mut conn, site, &state.config.default_image_url)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, detail_view(&user.0, flash.as_ref(), &detail)))
}

// --- GET /sites/:id/edit, POST /sites/:id ---

pub async fn edit_form(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::SITE_UPDATE)?;
    let site = site_service::get_site(&mut conn, id)?;
    let tag_ids = site_service::site_tags(&mut conn, id)?.into_iter().map(|t| t.id).collect();
    let lookups = Lookups::load(&mut conn)?;
    let values = SiteFormValues { site: Some(site), tag_ids };
    let (jar, flash) = take_flash(jar);
    Ok((jar, form_view(&user.0, flash.as_ref(), &lookups, &values)))
}

pub async fn update(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<SiteForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_UPDATE)?;
    let back = format!("/sites/{id}/edit");
    let (input, tag_ids) = form.into_input().back_to(&back)?;
    site_service::update_site(&mut conn, id, input, user.0.id).back_to(&back)?;

    let mut current: Vec<i32> = site_service::site_tags(&mut conn, id)?.into_iter().map(|t| t.id).collect();
    let mut wanted = tag_ids.clone();
    current.sort_unstable();
    wanted.sort_unstable();
    wanted.dedup();
    if current != wanted {
        site_service::set_tags(&mut conn, id, &tag_ids, user.0.id).back_to(&back)?;
    }
    Ok((flash_success(jar, "Site updated."), Redirect::to(&format!("/sites/{id}"))))
}

// --- POST /sites/:id/delete, POST /sites/:id/restore ---

pub async fn delete(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_DESTROY)?;
    let site = site_service::soft_delete_site(&mut conn, id, user.0.id).back_to(&format!("/sites/{id}"))?;
    let message = format!("{} moved to trash.", site.site_name);
    Ok((flash_success(jar, message), Redirect::to("/sites")))
}

pub async fn restore(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_RESTORE)?;
    let site = site_service::restore_site(&mut conn, id, user.0.id).back_to("/sites/trash")?;
    let message = format!("{} restored.", site.site_name);
    Ok((flash_success(jar, message), Redirect::to(&format!("/sites/{id}"))))
}

// --- GET /sites/:id/history ---

pub async fn history(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Query(pairs): Pairs,
) -> WebResult<(CookieJar, Markup)> {
    let mut conn = user.authorize(&state, perm::SITE_HISTORY)?;
    let site = site_service::get_site_including_deleted(&mut conn, id)?;
    let params = ListParams::new(pairs.clone(), ADMIN_PER_PAGE);
    let page = audit_service::history(&mut conn, id, &params.search(), &params.pagination)?;
    let (jar, flash) = take_flash(jar);
    Ok((jar, history_view(&user.0, flash.as_ref(), &site, &params, &pairs, &page)))
}

// --- Images ---

fn site_page(id: i32) -> String {
    format!("/sites/{id}")
}

pub async fn upload_image(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> WebResult<(CookieJar, Redirect)> {
    drop(user.authorize(&state, perm::SITE_UPDATE)?);
    let upload = read_image_upload(multipart).await.back_to(site_page(id))?;
    let mut conn = state.db.get()?;
    image_service::upload_image(&mut conn, &state.minio, id, upload, user.0.id)
        .await
        .back_to(site_page(id))?;
    Ok((flash_success(jar, "Image uploaded."), Redirect::to(&site_page(id))))
}

#[derive(Debug, Deserialize)]
pub struct OrderForm {
    pub order: String,
}

pub async fn reorder_images(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<i32>,
    Form(form): Form<OrderForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_UPDATE)?;
    let ids = parse_id_list(&form.order).back_to(site_page(id))?;
    image_service::reorder(&mut conn, id, &ids, user.0.id).back_to(site_page(id))?;
    Ok((flash_success(jar, "Images reordered."), Redirect::to(&site_page(id))))
}

#[derive(Debug, Deserialize)]
pub struct ImageForm {
    pub title_alt: String,
    #[serde(default)]
    pub description: String,
}

pub async fn update_image(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((id, image_id)): Path<(i32, i32)>,
    Form(form): Form<ImageForm>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_UPDATE)?;
    let metadata = ImageMetadata { title_alt: form.title_alt, description: Some(form.description) };
    image_service::update_metadata(&mut conn, id, image_id, metadata, user.0.id).back_to(site_page(id))?;
    Ok((flash_success(jar, "Image updated."), Redirect::to(&site_page(id))))
}

pub async fn set_cover(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((id, image_id)): Path<(i32, i32)>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_UPDATE)?;
    image_service::set_cover(&mut conn, id, image_id, user.0.id).back_to(site_page(id))?;
    Ok((flash_success(jar, "Cover image changed."), Redirect::to(&site_page(id))))
}

pub async fn delete_image(
    user: WebUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((id, image_id)): Path<(i32, i32)>,
) -> WebResult<(CookieJar, Redirect)> {
    let mut conn = user.authorize(&state, perm::SITE_UPDATE)?;
    image_service::delete_image(&mut conn, &state.minio, id, image_id, user.0.id)
        .await
        .back_to(site_page(id))?;
    Ok((flash_success(jar, "Image deleted."), Redirect::to(&site_page(id))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn form() -> SiteForm {
        SiteForm {
            site_name: "Catedral de La Plata".into(),
            short_desc: "Neo-gothic cathedral".into(),
            full_desc: "Largest church in the country.".into(),
            city: "La Plata".into(),
            province: "Buenos Aires".into(),
            opening_year: "1932".into(),
            latitude: "".into(),
            longitude: " ".into(),
            category_id: "2".into(),
            state_id: "1".into(),
            active: None,
            tag_ids: vec![3, 1],
        }
    }

    fn site() -> Site {
        let now = Utc::now();
        Site {
            id: 7,
            site_name: "Catedral".into(),
            short_desc: "Cathedral".into(),
            full_desc: "Neo-gothic".into(),
            city: "La Plata".into(),
            province: "Buenos Aires".into(),
            opening_year: 1932,
            latitude: Some(-34.92),
            longitude: Some(-57.95),
            category_id: 2,
            state_id: 1,
            active: true,
            deleted: false,
            views: 0,
            registration: now,
            updated_at: now,
        }
    }

    fn lookups() -> Lookups {
        Lookups {
            categories: vec![Category { id: 2, name: "Religious".into() }],
            states: vec![ConservationState { id: 1, name: "Good".into() }],
            tags: vec![Tag { id: 3, name: "Gothic".into(), slug: "gothic".into(), created_at: Utc::now() }],
        }
    }

    fn admin() -> AuthUser {
        AuthUser { id: 1, email: "admin@example.com".into(), role: None, sys_admin: true }
    }

    #[test]
    fn blank_coordinates_become_none() {
        let (input, tags) = form().into_input().unwrap();
        assert_eq!(input.latitude, None);
        assert_eq!(input.longitude, None);
        assert_eq!(input.opening_year, 1932);
        assert!(!input.active);
        assert_eq!(tags, vec![3, 1]);
    }

    #[test]
    fn non_numeric_year_is_rejected() {
        let mut bad = form();
        bad.opening_year = "nineteen".into();
        assert!(bad.into_input().is_err());
    }

    #[test]
    fn edit_form_posts_to_the_site() {
        let values = SiteFormValues { site: Some(site()), tag_ids: vec![3] };
        let html = form_view(&admin(), None, &lookups(), &values).into_string();
        assert!(html.contains(r#"action="/sites/7""#));
        assert!(html.contains(r#"value="3" checked"#));
        assert!(html.contains(r#"value="-34.92""#));
    }

    #[test]
    fn new_form_defaults_to_visible() {
        let html = form_view(&admin(), None, &lookups(), &SiteFormValues::default()).into_string();
        assert!(html.contains(r#"action="/sites""#));
        assert!(html.contains(r#"name="active" value="true" checked"#));
    }
}
