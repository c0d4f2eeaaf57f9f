use std::sync::Arc;

use diesel_migrations::MigrationHarness;

use heritage_admin::config::AppConfig;
use heritage_admin::services::oauth_service::GoogleOAuth;
use heritage_admin::{build_router, seeds, AppState, MIGRATIONS, SERVICE_NAME};
use heritage_shared::clients::{create_pool, MinioClient};
use heritage_shared::middleware::{init_metrics, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(SERVICE_NAME);

    let config = AppConfig::load()?;
    let port = config.port;

    let db = create_pool(&config.database_url, config.db_pool_size)?;

    if config.run_migrations {
        let mut conn = db.get()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
        tracing::info!(count = applied.len(), "migrations applied");
    }

    if config.seed {
        let mut conn = db.get()?;
        let report = seeds::run(&mut conn)?;
        tracing::info!(users = report.users, tags = report.tags, sites = report.sites, "seed data loaded");
    }

    let minio = MinioClient::new(
        &config.minio_endpoint,
        &config.minio_access_key,
        &config.minio_secret_key,
        &config.minio_bucket,
        &config.minio_public_url,
    );
    if let Err(e) = minio.ensure_bucket().await {
        tracing::warn!(error = %e, bucket = %config.minio_bucket, "object storage unavailable, uploads will fail");
    }

    let google = GoogleOAuth::from_config(&config);
    if google.is_none() {
        tracing::info!("google sign-in disabled");
    }

    let metrics_handle = init_metrics()?;

    let state = Arc::new(AppState { db, config, minio, google, metrics_handle });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "{SERVICE_NAME} starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
