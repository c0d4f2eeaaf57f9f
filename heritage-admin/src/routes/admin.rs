use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use heritage_shared::clients::DbConn;
use heritage_shared::errors::{AppError, AppResult};
use heritage_shared::middleware::SysAdminUser;
use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::Paginated;
use heritage_shared::types::ApiResponse;

use crate::models::{Category, Flag, Permission, Review, Role, Site, SiteImage, State as ConservationState, Tag};
use crate::rbac::{self, perm};
use crate::routes::{read_image_upload, ListParams, Removed, ADMIN_PER_PAGE, UPLOAD_BODY_LIMIT};
use crate::services::audit_service::{self, AuditEntry};
use crate::services::flag_service::{self, FlagInput, FlagUpdate};
use crate::services::image_service::{self, ImageMetadata};
use crate::services::review_service::{self, ReviewDetail, ReviewListItem};
use crate::services::site_service::{self, SiteDetail, SiteInput, SiteListFilter, SiteListItem};
use crate::services::user_service::{self, CreateUser, UpdateUser, UserListItem};
use crate::services::{catalog_service, export_service, tag_service};
use crate::AppState;

type Pairs = Query<Vec<(String, String)>>;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sites", get(list_sites).post(create_site))
        .route("/sites/trash", get(list_trash))
        .route("/sites/export", get(export_sites))
        .route("/sites/:id", get(get_site).put(update_site).delete(delete_site))
        .route("/sites/:id/restore", post(restore_site))
        .route("/sites/:id/history", get(site_history))
        .route("/sites/:id/tags", put(set_site_tags))
        .route(
            "/sites/:id/images",
            get(list_images)
                .post(upload_image)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/sites/:id/images/order", put(reorder_images))
        .route("/sites/:id/images/:image_id", put(update_image).delete(delete_image))
        .route("/sites/:id/images/:image_id/cover", post(set_cover))
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", get(get_tag).put(update_tag).delete(delete_tag))
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/:id", put(rename_category).delete(delete_category))
        .route("/states", get(list_states))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/users/:id/password", put(change_password))
        .route("/users/:id/toggle-active", post(toggle_user))
        .route("/roles", get(list_roles))
        .route("/roles/:id/permissions", get(list_role_permissions))
        .route("/reviews", get(list_reviews))
        .route("/reviews/:id", get(get_review).delete(delete_review))
        .route("/reviews/:id/approve", post(approve_review))
        .route("/reviews/:id/reject", post(reject_review))
        .route("/flags", get(list_flags).post(create_flag))
        .route("/flags/:id", get(get_flag).put(update_flag).delete(delete_flag))
        .route("/flags/:id/toggle", post(toggle_flag))
}

fn authorize(state: &AppState, user: &AuthUser, permission: &str) -> AppResult<DbConn> {
    let mut conn = state.db.get()?;
    rbac::require_permission(&mut conn, user, permission)?;
    Ok(conn)
}

// --- Sites ---

pub async fn list_sites(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(pairs): Pairs,
) -> AppResult<Json<ApiResponse<Paginated<SiteListItem>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_INDEX)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let filter = SiteListFilter::from_params(params.pairs())?;
    let page = site_service::list_sites(
        &mut conn,
        &filter,
        &params.pagination,
        false,
        &state.config.default_image_url,
    )?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn list_trash(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(pairs): Pairs,
) -> AppResult<Json<ApiResponse<Paginated<SiteListItem>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_RESTORE)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let filter = SiteListFilter::from_params(params.pairs())?;
    let page = site_service::list_sites(
        &mut conn,
        &filter,
        &params.pagination,
        true,
        &state.config.default_image_url,
    )?;
    Ok(Json(ApiResponse::ok(page)))
}

/// CSV download of every site matching the list filters.
pub async fn export_sites(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(pairs): Pairs,
) -> AppResult<Response> {
    let mut conn = authorize(&state, &user, perm::SITE_EXPORT)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let filter = SiteListFilter::from_params(params.pairs())?;
    let items = site_service::list_for_export(&mut conn, &filter, &state.config.default_image_url)?;
    let body = export_service::sites_csv(&items)?;
    let filename = export_service::csv_filename(Utc::now());

    tracing::info!(user_id = user.id, rows = items.len(), "sites exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response())
}

pub async fn get_site(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<SiteDetail>>> {
    let mut conn = authorize(&state, &user, perm::SITE_SHOW)?;
    let site = site_service::get_site(&mut conn, id)?;
    let detail = site_service::site_detail(&mut conn, site, &state.config.default_image_url)?;
    Ok(Json(ApiResponse::ok(detail)))
}

pub async fn create_site(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(input): Json<SiteInput>,
) -> AppResult<(StatusCode, Json<ApiResponse<Site>>)> {
    let mut conn = authorize(&state, &user, perm::SITE_NEW)?;
    let site = site_service::create_site(&mut conn, input, user.id)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(site))))
}

pub async fn update_site(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(input): Json<SiteInput>,
) -> AppResult<Json<ApiResponse<Site>>> {
    let mut conn = authorize(&state, &user, perm::SITE_UPDATE)?;
    let site = site_service::update_site(&mut conn, id, input, user.id)?;
    Ok(Json(ApiResponse::ok(site)))
}

pub async fn delete_site(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Site>>> {
    let mut conn = authorize(&state, &user, perm::SITE_DESTROY)?;
    let site = site_service::soft_delete_site(&mut conn, id, user.id)?;
    Ok(Json(ApiResponse::ok_with_message(site, "site moved to trash")))
}

pub async fn restore_site(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Site>>> {
    let mut conn = authorize(&state, &user, perm::SITE_RESTORE)?;
    let site = site_service::restore_site(&mut conn, id, user.id)?;
    Ok(Json(ApiResponse::ok(site)))
}

pub async fn site_history(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(pairs): Pairs,
) -> AppResult<Json<ApiResponse<Paginated<AuditEntry>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_HISTORY)?;
    site_service::get_site_including_deleted(&mut conn, id)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let page = audit_service::history(&mut conn, id, &params.search(), &params.pagination)?;
    Ok(Json(ApiResponse::ok(page)))
}

#[derive(Debug, Deserialize)]
pub struct SiteTagsRequest {
    pub tag_ids: Vec<i32>,
}

pub async fn set_site_tags(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<SiteTagsRequest>,
) -> AppResult<Json<ApiResponse<Vec<Tag>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_UPDATE)?;
    let tags = site_service::set_tags(&mut conn, id, &req.tag_ids, user.id)?;
    Ok(Json(ApiResponse::ok(tags)))
}

// --- Images ---

pub async fn list_images(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<i32>,
) -> AppResult<Json<ApiResponse<Vec<SiteImage>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_SHOW)?;
    site_service::get_site(&mut conn, site_id)?;
    Ok(Json(ApiResponse::ok(image_service::list_images(&mut conn, site_id)?)))
}

pub async fn upload_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<i32>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<SiteImage>>)> {
    drop(authorize(&state, &user, perm::SITE_UPDATE)?);
    let upload = read_image_upload(multipart).await?;

    let mut conn = state.db.get()?;
    let image = image_service::upload_image(&mut conn, &state.minio, site_id, upload, user.id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(image))))
}

pub async fn update_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((site_id, image_id)): Path<(i32, i32)>,
    Json(metadata): Json<ImageMetadata>,
) -> AppResult<Json<ApiResponse<SiteImage>>> {
    let mut conn = authorize(&state, &user, perm::SITE_UPDATE)?;
    let image = image_service::update_metadata(&mut conn, site_id, image_id, metadata, user.id)?;
    Ok(Json(ApiResponse::ok(image)))
}

pub async fn set_cover(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((site_id, image_id)): Path<(i32, i32)>,
) -> AppResult<Json<ApiResponse<SiteImage>>> {
    let mut conn = authorize(&state, &user, perm::SITE_UPDATE)?;
    let image = image_service::set_cover(&mut conn, site_id, image_id, user.id)?;
    Ok(Json(ApiResponse::ok(image)))
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i32>,
}

pub async fn reorder_images(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<i32>,
    Json(req): Json<ReorderRequest>,
) -> AppResult<Json<ApiResponse<Vec<SiteImage>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_UPDATE)?;
    let images = image_service::reorder(&mut conn, site_id, &req.ids, user.id)?;
    Ok(Json(ApiResponse::ok(images)))
}

pub async fn delete_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((site_id, image_id)): Path<(i32, i32)>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = authorize(&state, &user, perm::SITE_UPDATE)?;
    image_service::delete_image(&mut conn, &state.minio, site_id, image_id, user.id).await?;
    Ok(Json(ApiResponse::ok(Removed::new(image_id))))
}

// --- Tags ---

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

pub async fn list_tags(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(pairs): Pairs,
) -> AppResult<Json<ApiResponse<Paginated<Tag>>>> {
    let mut conn = authorize(&state, &user, perm::TAG_INDEX)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let page = tag_service::list_tags(&mut conn, &params.search(), &params.pagination)?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn get_tag(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Tag>>> {
    let mut conn = authorize(&state, &user, perm::TAG_SHOW)?;
    Ok(Json(ApiResponse::ok(tag_service::get_tag(&mut conn, id)?)))
}

pub async fn create_tag(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NameRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Tag>>)> {
    let mut conn = authorize(&state, &user, perm::TAG_NEW)?;
    let tag = tag_service::create_tag(&mut conn, &req.name)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(tag))))
}

pub async fn update_tag(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<NameRequest>,
) -> AppResult<Json<ApiResponse<Tag>>> {
    let mut conn = authorize(&state, &user, perm::TAG_UPDATE)?;
    Ok(Json(ApiResponse::ok(tag_service::update_tag(&mut conn, id, &req.name)?)))
}

pub async fn delete_tag(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = authorize(&state, &user, perm::TAG_DESTROY)?;
    tag_service::delete_tag(&mut conn, id)?;
    Ok(Json(ApiResponse::ok(Removed::new(id))))
}

// --- Categories and states ---

pub async fn list_categories(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Category>>>> {
    let mut conn = authorize(&state, &user, perm::CATEGORY_INDEX)?;
    Ok(Json(ApiResponse::ok(catalog_service::list_categories(&mut conn)?)))
}

pub async fn create_category(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NameRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Category>>)> {
    let mut conn = authorize(&state, &user, perm::CATEGORY_MANAGE)?;
    let category = catalog_service::create_category(&mut conn, &req.name)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(category))))
}

pub async fn rename_category(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<NameRequest>,
) -> AppResult<Json<ApiResponse<Category>>> {
    let mut conn = authorize(&state, &user, perm::CATEGORY_MANAGE)?;
    Ok(Json(ApiResponse::ok(catalog_service::rename_category(&mut conn, id, &req.name)?)))
}

pub async fn delete_category(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = authorize(&state, &user, perm::CATEGORY_MANAGE)?;
    catalog_service::delete_category(&mut conn, id)?;
    Ok(Json(ApiResponse::ok(Removed::new(id))))
}

pub async fn list_states(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConservationState>>>> {
    let mut conn = authorize(&state, &user, perm::SITE_INDEX)?;
    Ok(Json(ApiResponse::ok(catalog_service::list_states(&mut conn)?)))
}

// --- Users and roles ---

pub async fn list_users(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(pairs): Pairs,
) -> AppResult<Json<ApiResponse<Paginated<UserListItem>>>> {
    let mut conn = authorize(&state, &user, perm::USER_INDEX)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let page = user_service::list_users(&mut conn, &params.search(), &params.pagination)?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn get_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<UserListItem>>> {
    let mut conn = authorize(&state, &user, perm::USER_SHOW)?;
    let found = user_service::get_user(&mut conn, id)?;
    Ok(Json(ApiResponse::ok(user_service::with_role(&mut conn, found)?)))
}

/// Only system administrators may grant the system administrator flag.
pub(crate) fn check_sys_admin_grant(user: &AuthUser, requested: bool) -> AppResult<()> {
    if requested && !user.sys_admin {
        return Err(AppError::forbidden("only system administrators can grant system administrator access"));
    }
    Ok(())
}

pub async fn create_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateUser>,
) -> AppResult<(StatusCode, Json<ApiResponse<UserListItem>>)> {
    check_sys_admin_grant(&user, input.sys_admin)?;
    let mut conn = authorize(&state, &user, perm::USER_NEW)?;
    let created = user_service::create_user(&mut conn, input)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user_service::with_role(&mut conn, created)?))))
}

pub async fn update_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(input): Json<UpdateUser>,
) -> AppResult<Json<ApiResponse<UserListItem>>> {
    check_sys_admin_grant(&user, input.sys_admin.is_some())?;
    let mut conn = authorize(&state, &user, perm::USER_UPDATE)?;
    let updated = user_service::update_user(&mut conn, id, input)?;
    Ok(Json(ApiResponse::ok(user_service::with_role(&mut conn, updated)?)))
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

pub async fn change_password(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<PasswordRequest>,
) -> AppResult<Json<ApiResponse<&'static str>>> {
    let mut conn = if user.id == id {
        state.db.get()?
    } else {
        authorize(&state, &user, perm::USER_UPDATE)?
    };
    user_service::change_password(&mut conn, id, &req.password)?;
    Ok(Json(ApiResponse::ok("password changed")))
}

pub async fn toggle_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<UserListItem>>> {
    let mut conn = authorize(&state, &user, perm::USER_DEACTIVATE)?;
    let toggled = user_service::toggle_active(&mut conn, id)?;
    Ok(Json(ApiResponse::ok(user_service::with_role(&mut conn, toggled)?)))
}

pub async fn delete_user(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = authorize(&state, &user, perm::USER_DESTROY)?;
    if user.id == id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }
    user_service::soft_delete_user(&mut conn, id)?;
    Ok(Json(ApiResponse::ok(Removed::new(id))))
}

pub async fn list_roles(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Role>>>> {
    let mut conn = authorize(&state, &user, perm::USER_INDEX)?;
    Ok(Json(ApiResponse::ok(rbac::list_roles(&mut conn)?)))
}

pub async fn list_role_permissions(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Vec<Permission>>>> {
    let mut conn = authorize(&state, &user, perm::USER_INDEX)?;
    Ok(Json(ApiResponse::ok(rbac::role_permissions(&mut conn, id)?)))
}

// --- Reviews ---

pub async fn list_reviews(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(pairs): Pairs,
) -> AppResult<Json<ApiResponse<Paginated<ReviewListItem>>>> {
    let mut conn = authorize(&state, &user, perm::REVIEW_INDEX)?;
    let params = ListParams::new(pairs, ADMIN_PER_PAGE);
    let page = review_service::list_reviews(&mut conn, &params.search(), &params.pagination)?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn get_review(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<ReviewDetail>>> {
    let mut conn = authorize(&state, &user, perm::REVIEW_SHOW)?;
    Ok(Json(ApiResponse::ok(review_service::review_detail(&mut conn, id)?)))
}

pub async fn approve_review(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Review>>> {
    let mut conn = authorize(&state, &user, perm::REVIEW_MODERATE)?;
    Ok(Json(ApiResponse::ok(review_service::approve_review(&mut conn, id, user.id)?)))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn reject_review(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<RejectRequest>,
) -> AppResult<Json<ApiResponse<Review>>> {
    let mut conn = authorize(&state, &user, perm::REVIEW_MODERATE)?;
    let review = review_service::reject_review(&mut conn, id, user.id, &req.reason)?;
    Ok(Json(ApiResponse::ok(review)))
}

pub async fn delete_review(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = authorize(&state, &user, perm::REVIEW_DESTROY)?;
    review_service::delete_review(&mut conn, id, user.id)?;
    Ok(Json(ApiResponse::ok(Removed::new(id))))
}

// --- Flags (system administrators) ---

pub async fn list_flags(
    SysAdminUser(_): SysAdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Flag>>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(flag_service::list_flags(&mut conn)?)))
}

pub async fn get_flag(
    SysAdminUser(_): SysAdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Flag>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(flag_service::get_flag(&mut conn, id)?)))
}

pub async fn create_flag(
    SysAdminUser(user): SysAdminUser,
    State(state): State<Arc<AppState>>,
    Json(input): Json<FlagInput>,
) -> AppResult<(StatusCode, Json<ApiResponse<Flag>>)> {
    let mut conn = state.db.get()?;
    let flag = flag_service::create_flag(&mut conn, input, user.id)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(flag))))
}

pub async fn update_flag(
    SysAdminUser(user): SysAdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(update): Json<FlagUpdate>,
) -> AppResult<Json<ApiResponse<Flag>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(flag_service::update_flag(&mut conn, id, update, user.id)?)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    pub message: Option<String>,
}

pub async fn toggle_flag(
    SysAdminUser(user): SysAdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    body: Option<Json<ToggleRequest>>,
) -> AppResult<Json<ApiResponse<Flag>>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let mut conn = state.db.get()?;
    let flag = flag_service::toggle_flag(&mut conn, id, user.id, req.message.as_deref())?;
    Ok(Json(ApiResponse::ok(flag)))
}

pub async fn delete_flag(
    SysAdminUser(_): SysAdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = state.db.get()?;
    flag_service::delete_flag(&mut conn, id)?;
    Ok(Json(ApiResponse::ok(Removed::new(id))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn status_of(request: Request<Body>) -> StatusCode {
        let app = crate::build_router(test_support::state());
        app.oneshot(request).await.unwrap().status()
    }

    #[test]
    fn only_sys_admins_grant_sys_admin() {
        let editor = AuthUser { id: 2, email: "e@example.com".into(), role: Some("editor".into()), sys_admin: false };
        assert!(check_sys_admin_grant(&editor, false).is_ok());
        assert_eq!(
            check_sys_admin_grant(&editor, true).unwrap_err().status_code(),
            StatusCode::FORBIDDEN
        );
        let root = AuthUser { sys_admin: true, ..editor };
        assert!(check_sys_admin_grant(&root, true).is_ok());
    }

    #[tokio::test]
    async fn site_list_requires_authentication() {
        let status = status_of(Request::get("/api/admin/sites").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn flags_require_sys_admin() {
        let state = test_support::state();
        let token = test_support::bearer(&state, false);
        let app = crate::build_router(state);
        let resp = app
            .oneshot(
                Request::get("/api/admin/flags")
                    .header(header::AUTHORIZATION, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let status = status_of(
            Request::get("/api/admin/users")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
