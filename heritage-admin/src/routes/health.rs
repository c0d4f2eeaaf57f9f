use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use diesel::prelude::*;

use heritage_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::{AppState, SERVICE_NAME};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

fn database_check(state: &AppState) -> HealthCheck {
    let probe = state
        .db
        .get()
        .map_err(|e| e.to_string())
        .and_then(|mut conn| {
            diesel::sql_query("SELECT 1")
                .execute(&mut conn)
                .map_err(|e| e.to_string())
        });
    match probe {
        Ok(_) => HealthCheck::healthy("database"),
        Err(e) => HealthCheck::failed("database", HealthStatus::Unhealthy, e),
    }
}

async fn storage_check(state: &AppState) -> HealthCheck {
    if state.minio.bucket_exists().await {
        HealthCheck::healthy("storage")
    } else {
        HealthCheck::failed(
            "storage",
            HealthStatus::Degraded,
            format!("bucket '{}' is not reachable", state.minio.bucket()),
        )
    }
}

/// Database and object store probes. A missing bucket only degrades the service.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let checks = vec![database_check(&state), storage_check(&state).await];
    let response = HealthResponse::healthy(SERVICE_NAME, env!("CARGO_PKG_VERSION")).with_checks(checks);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

#[cfg(test)]
mod tests {
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let app = crate::build_router(test_support::state());
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
