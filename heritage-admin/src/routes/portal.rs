use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use heritage_shared::errors::AppResult;
use heritage_shared::middleware::OptionalAuthUser;
use heritage_shared::types::auth::AuthUser;
use heritage_shared::types::pagination::{Paginated, PaginationParams};
use heritage_shared::types::ApiResponse;

use crate::models::{Category, Review, State as ConservationState, Tag};
use crate::routes::Removed;
use crate::services::review_service::{self, OwnReview, PublicReview, ReviewInput, REVIEWS_PER_PAGE};
use crate::services::site_service::{self, PortalSiteQuery, SiteDetail, SiteListItem, PORTAL_PER_PAGE};
use crate::services::{catalog_service, favorite_service, flag_service, tag_service};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/handler", get(handler_status))
        .route("/sites", get(list_sites))
        .route("/sites/:id", get(get_site))
        .route("/categories", get(list_categories))
        .route("/states", get(list_states))
        .route("/tags", get(list_tags))
        .route("/provinces", get(list_provinces))
        .route("/reviews", get(list_reviews).post(create_review))
        .route("/reviews/:id", delete(delete_review))
        .route("/my/reviews", get(my_reviews))
        .route("/favorites", get(list_favorites))
        .route("/favorites/:site_id", axum::routing::post(add_favorite).delete(remove_favorite))
}

/// Page envelope consumed by the portal front-end.
#[derive(Debug, Serialize)]
pub struct PortalPage<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl<T: Serialize> From<Paginated<T>> for PortalPage<T> {
    fn from(page: Paginated<T>) -> Self {
        Self {
            pagination: PageMeta {
                page: page.page,
                per_page: page.per_page,
                total: page.total,
                total_pages: page.total_pages,
                has_next: page.has_next,
                has_prev: page.has_prev,
                next_page: page.next_page,
                prev_page: page.prev_page,
            },
            data: page.items,
        }
    }
}

// --- GET /api/handler ---

#[derive(Debug, Serialize)]
pub struct HandlerStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Portal availability probe; answers 503 while portal maintenance is on.
pub async fn handler_status(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let mut conn = state.db.get()?;
    let flag = flag_service::find_by_name(&mut conn, flag_service::PORTAL_MAINTENANCE)?
        .filter(|f| f.is_enabled);

    let response = match flag {
        Some(flag) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HandlerStatus { status: flag.description, message: flag.message }),
        )
            .into_response(),
        None => Json(HandlerStatus { status: "ok".into(), message: None }).into_response(),
    };
    Ok(response)
}

// --- Sites ---

pub async fn list_sites(
    OptionalAuthUser(user): OptionalAuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PortalSiteQuery>,
) -> AppResult<Json<PortalPage<SiteListItem>>> {
    let mut conn = state.db.get()?;
    let page = site_service::portal_list(
        &mut conn,
        &params,
        user.map(|u| u.id),
        &state.config.default_image_url,
    )?;
    Ok(Json(page.into()))
}

#[derive(Debug, Serialize)]
pub struct PortalSiteDetail {
    #[serde(flatten)]
    pub detail: SiteDetail,
    pub is_favorite: bool,
}

/// Public site detail; each call counts as a view.
pub async fn get_site(
    OptionalAuthUser(user): OptionalAuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<PortalSiteDetail>>> {
    let mut conn = state.db.get()?;
    let mut site = site_service::get_public_site(&mut conn, id)?;
    site.views = site_service::increment_views(&mut conn, id)?;

    let is_favorite = match &user {
        Some(user) => favorite_service::is_favorite(&mut conn, user.id, id)?,
        None => false,
    };
    let detail = site_service::site_detail(&mut conn, site, &state.config.default_image_url)?;
    Ok(Json(ApiResponse::ok(PortalSiteDetail { detail, is_favorite })))
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Category>>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(catalog_service::list_categories(&mut conn)?)))
}

pub async fn list_states(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConservationState>>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(catalog_service::list_states(&mut conn)?)))
}

pub async fn list_tags(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<Tag>>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(tag_service::all_tags(&mut conn)?)))
}

pub async fn list_provinces(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let mut conn = state.db.get()?;
    Ok(Json(ApiResponse::ok(site_service::provinces(&mut conn)?)))
}

// --- Reviews ---

#[derive(Debug, Default, Deserialize)]
pub struct ReviewListQuery {
    pub site_id: Option<i32>,
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl ReviewListQuery {
    fn pagination(&self) -> PaginationParams {
        PaginationParams::parse(self.page.as_deref(), self.per_page.as_deref(), REVIEWS_PER_PAGE)
    }
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReviewListQuery>,
) -> AppResult<Json<PortalPage<PublicReview>>> {
    let mut conn = state.db.get()?;
    let page = review_service::list_approved(&mut conn, query.site_id, &query.pagination())?;
    Ok(Json(page.into()))
}

pub async fn create_review(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(input): Json<ReviewInput>,
) -> AppResult<(StatusCode, Json<ApiResponse<Review>>)> {
    let mut conn = state.db.get()?;
    let review = review_service::create_review(&mut conn, user.id, input)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(review, "review submitted for moderation")),
    ))
}

pub async fn delete_review(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<Removed>>> {
    let mut conn = state.db.get()?;
    review_service::delete_own_review(&mut conn, user.id, id)?;
    Ok(Json(ApiResponse::ok(Removed::new(id))))
}

pub async fn my_reviews(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReviewListQuery>,
) -> AppResult<Json<PortalPage<OwnReview>>> {
    let mut conn = state.db.get()?;
    let page = review_service::list_user_reviews(
        &mut conn,
        user.id,
        &query.pagination(),
        query.sort.as_deref(),
        query.order.as_deref(),
        &state.config.default_image_url,
    )?;
    Ok(Json(page.into()))
}

// --- Favorites ---

#[derive(Debug, Default, Deserialize)]
pub struct FavoritesQuery {
    pub page: Option<String>,
    pub per_page: Option<String>,
}

pub async fn list_favorites(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<FavoritesQuery>,
) -> AppResult<Json<PortalPage<SiteListItem>>> {
    let mut conn = state.db.get()?;
    let pagination = PaginationParams::parse(query.page.as_deref(), query.per_page.as_deref(), PORTAL_PER_PAGE);
    let page = favorite_service::list_favorites(
        &mut conn,
        user.id,
        &pagination,
        &state.config.default_image_url,
    )?;
    Ok(Json(page.into()))
}

#[derive(Debug, Serialize)]
pub struct FavoriteStatus {
    pub site_id: i32,
    pub is_favorite: bool,
}

pub async fn add_favorite(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<i32>,
) -> AppResult<Json<ApiResponse<FavoriteStatus>>> {
    let mut conn = state.db.get()?;
    favorite_service::add_favorite(&mut conn, user.id, site_id)?;
    Ok(Json(ApiResponse::ok(FavoriteStatus { site_id, is_favorite: true })))
}

pub async fn remove_favorite(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<i32>,
) -> AppResult<Json<ApiResponse<FavoriteStatus>>> {
    let mut conn = state.db.get()?;
    favorite_service::remove_favorite(&mut conn, user.id, site_id)?;
    Ok(Json(ApiResponse::ok(FavoriteStatus { site_id, is_favorite: false })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    #[test]
    fn page_envelope_carries_navigation() {
        let params = PaginationParams { page: 2, per_page: 12 };
        let page: PortalPage<u8> = Paginated::new(vec![1, 2], 26, &params).into();
        let body = serde_json::to_value(&page).unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["pagination"]["total_pages"], 3);
        assert_eq!(body["pagination"]["next_page"], 3);
        assert_eq!(body["pagination"]["prev_page"], 1);
    }

    #[test]
    fn negative_page_falls_back_to_first_page() {
        let uri: axum::http::Uri = "/api/reviews?site_id=3&page=-1&per_page=x".parse().unwrap();
        let Query(query) = Query::<ReviewListQuery>::try_from_uri(&uri).unwrap();
        let pagination = query.pagination();
        assert_eq!(pagination.page(), 1);
        assert_eq!(pagination.limit(), REVIEWS_PER_PAGE);
        assert_eq!(query.site_id, Some(3));

        let uri: axum::http::Uri = "/api/favorites?page=-7".parse().unwrap();
        assert!(Query::<FavoritesQuery>::try_from_uri(&uri).is_ok());
    }

    #[tokio::test]
    async fn negative_page_is_not_a_query_rejection() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/api/reviews?page=-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(resp.status(), StatusCode::BAD_REQUEST);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("application/json"));
    }

    #[test]
    fn handler_status_omits_empty_message() {
        let body = serde_json::to_value(HandlerStatus { status: "ok".into(), message: None }).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn creating_a_review_requires_login() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(
                Request::post("/api/reviews")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"site_id":1,"rating":5,"text":"A wonderful place to visit."}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn favorites_require_login() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/api/favorites").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
