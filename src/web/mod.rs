pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod ui;

use crate::{models::ModelManager, segmentation::SegmentationService, utils::error::SegError};
use crate::{Config, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

/// Shared handler state: the service built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SegmentationService>,
}

impl AppState {
    pub fn new(service: SegmentationService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub async fn serve(config: Config) -> Result<()> {
    // 初始化模型管理器 (one load attempt per process)
    let manager = ModelManager::init(config.clone());
    let state = AppState::new(SegmentationService::new(manager));

    let app = create_app(state);

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        SegError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /                     - Web UI");
    tracing::info!("  POST /api/predict          - Multipart file upload");
    tracing::info!("  POST /api/predict/base64   - JSON base64 upload");
    tracing::info!("  GET  /api/examples         - Example images");
    tracing::info!("  GET  /health               - Health check");
    tracing::info!("  GET  /api/info             - Service information");

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| SegError::Internal(format!("Failed to bind to address {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| SegError::Internal(format!("Server failed: {}", e)))?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let max_request_size = state.service.manager().config().server_config.max_request_size;

    Router::new()
        .route("/", get(ui::index_handler))
        .route("/api/predict", post(handlers::predict_upload_handler))
        .route("/api/predict/base64", post(handlers::predict_json_handler))
        .route("/api/examples", get(handlers::examples_handler))
        .route("/api/examples/:index", get(handlers::example_image_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查端点
async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.service.manager().health_check()?;

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.service.manager().get_stats();

    Json(json!({
        "service": "Polyp Segmentation Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": stats,
    }))
}
