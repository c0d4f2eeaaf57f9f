pub mod config;
pub mod maintenance;
pub mod models;
pub mod rbac;
pub mod routes;
pub mod schema;
pub mod search;
pub mod seeds;
pub mod services;
pub mod web;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::middleware;
use axum::Router;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use heritage_shared::clients::{DbPool, MinioClient};
use heritage_shared::middleware::metrics_middleware;
use heritage_shared::types::auth::AuthState;

use config::AppConfig;
use services::oauth_service::GoogleOAuth;

pub const SERVICE_NAME: &str = "heritage-admin";

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub minio: MinioClient,
    pub google: Option<GoogleOAuth>,
    pub metrics_handle: PrometheusHandle,
}

impl AuthState for AppState {
    fn jwt_secret(&self) -> &str {
        &self.config.jwt_secret
    }
}

fn cors(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_credentials(true)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/auth", routes::auth::router())
        .nest("/api/admin", routes::admin::router())
        .nest("/api", routes::portal::router())
        .merge(web::router())
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            maintenance::maintenance_middleware,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use heritage_shared::clients::lazy_pool;
    use heritage_shared::middleware::{detached_metrics_handle, encode_access_token};
    use heritage_shared::types::auth::Claims;

    /// Router over a pool that never connects; only database-free paths succeed.
    pub fn state() -> Arc<AppState> {
        let config = AppConfig {
            database_url: "postgres://nobody@127.0.0.1:1/none".into(),
            ..AppConfig::default()
        };
        Arc::new(AppState {
            db: lazy_pool(&config.database_url),
            minio: MinioClient::new(
                &config.minio_endpoint,
                &config.minio_access_key,
                &config.minio_secret_key,
                &config.minio_bucket,
                &config.minio_public_url,
            ),
            google: None,
            metrics_handle: detached_metrics_handle(),
            config,
        })
    }

    pub fn bearer(state: &AppState, sys_admin: bool) -> String {
        let claims = Claims::new(1, "admin@example.com", Some("admin".into()), sys_admin, 3600);
        let token = encode_access_token(&claims, &state.config.jwt_secret).unwrap();
        format!("Bearer {token}")
    }
}
