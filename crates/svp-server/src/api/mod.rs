pub mod response;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::db;
use crate::error::{ApiResult, AppError};
use crate::features::{self, FeatureState};
use crate::middleware;

/// State of the routes outside the feature slices
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
}

/// Full application router: health, versioned API and the middleware stack
pub fn create_router(state: AppState, feature_state: FeatureState, config: &Config) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", features::router(feature_state))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "SVP Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Reports healthy only while the database answers
async fn health_check(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    db::health_check(&state.db).await.map_err(|e| AppError::Unavailable(e.to_string()))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "database": "connected"
        })),
    ))
}
