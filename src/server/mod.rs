//! Read API over the catalog.

use crate::catalog::{load_catalog, CatalogEntry};
use crate::config::{AffiliateConfig, AppConfig};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub db_path: Arc<PathBuf>,
    pub fallback_path: Arc<PathBuf>,
    pub affiliate: Arc<AffiliateConfig>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            db_path: Arc::new(config.storage.db_path.clone()),
            fallback_path: Arc::new(config.public_works_path()),
            affiliate: Arc::new(config.affiliate.clone()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/works", get(list_works))
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_works(State(state): State<AppState>) -> Result<Json<Vec<CatalogEntry>>, StatusCode> {
    let entries = tokio::task::spawn_blocking(move || {
        load_catalog(&state.db_path, &state.fallback_path, &state.affiliate)
    })
    .await
    .map_err(|e| {
        error!("Catalog task failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(entries))
}

/// Start the web server.
pub async fn serve(config: &AppConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(AppState::new(config));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_dir;
    use crate::storage::Repository;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn get_works(app: Router) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri("/api/works").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_api_works_from_store() {
        let dir = tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.storage.db_path = dir.path().join("cache/asmr.duckdb");
        cfg.paths.raw_data_dir = dir.path().join("raw");
        cfg.paths.public_data_dir = dir.path().join("public");
        cfg.affiliate.affiliate_id = "me".into();

        std::fs::create_dir_all(&cfg.paths.raw_data_dir).unwrap();
        std::fs::write(
            cfg.paths.raw_data_dir.join("RJ123456.json"),
            r#"{"code":"RJ123456","static":{"title":"X","cv":["Alice","Bob"]},"dynamic":{}}"#,
        )
        .unwrap();
        {
            let repo = Repository::open(&cfg.storage.db_path).unwrap();
            repo.run_migrations().unwrap();
            ingest_dir(&repo, &cfg.paths.raw_data_dir).unwrap();
        }

        let json = get_works(create_router(AppState::new(&cfg))).await;
        let works = json.as_array().unwrap();
        assert_eq!(works.len(), 1);
        assert_eq!(works[0]["code"], "RJ123456");
        assert_eq!(works[0]["genres"], serde_json::json!(["2cv"]));
        assert_eq!(works[0]["cv"], serde_json::json!(["Alice", "Bob"]));
        assert_eq!(
            works[0]["affiliate_url"],
            "https://dlaf.jp/maniax/dlaf/=/t/i/link/work/aid/me/id/RJ123456.html"
        );
    }

    #[tokio::test]
    async fn test_api_works_without_store_or_export() {
        let dir = tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.storage.db_path = dir.path().join("missing.duckdb");
        cfg.paths.public_data_dir = dir.path().join("public");

        let json = get_works(create_router(AppState::new(&cfg))).await;
        assert_eq!(json, serde_json::json!([]));
    }
}
