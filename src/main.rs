use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use manga_translate::core::types::ApiTier;
use manga_translate::core::{Config, ConfigError, TranslationError, TranslationJob};
use manga_translate::orchestration::TranslationPipeline;
use manga_translate::services::ocr::DisabledOcr;
use manga_translate::services::translation::GeminiClient;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    pipeline: TranslationPipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::new().context("failed to load configuration")?;
    if config.api_key().is_empty() {
        return Err(ConfigError::NoApiKey.into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level().to_string())),
        )
        .init();

    let provider = Arc::new(GeminiClient::new(
        config.api_key().to_string(),
        config.max_retries(),
        Duration::from_secs(config.api.request_timeout_secs),
    ));
    let pipeline = TranslationPipeline::new(&config, Arc::new(DisabledOcr), provider)
        .await
        .context("failed to initialize translation pipeline")?;

    let state = AppState { pipeline };
    let app = Router::new()
        .route("/translate", post(translate))
        .route("/stats", get(stats))
        .route("/tier", put(set_tier))
        .route("/cancel", post(cancel))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, tier = %config.tier().label, "translation server listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}

async fn translate(
    State(state): State<AppState>,
    Json(job): Json<TranslationJob>,
) -> Result<Response, ApiError> {
    let outcome = state.pipeline.submit_translation(job).await?;
    Ok(Json(outcome).into_response())
}

async fn stats(State(state): State<AppState>) -> Response {
    Json(json!({
        "usage": state.pipeline.usage_snapshot(),
        "cache": state.pipeline.cache_stats(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct TierRequest {
    tier: String,
}

async fn set_tier(
    State(state): State<AppState>,
    Json(body): Json<TierRequest>,
) -> Result<Response, ApiError> {
    let tier = match body.tier.to_lowercase().as_str() {
        "free" => ApiTier::free(),
        "paid" => ApiTier::paid(),
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown tier '{other}' (expected 'free' or 'paid')"
            )))
        }
    };
    state.pipeline.set_tier(tier);
    Ok(Json(json!({ "status": "ok" })).into_response())
}

async fn cancel(State(state): State<AppState>) -> Response {
    let cancelled = state.pipeline.cancel_all();
    Json(json!({ "cancelled": cancelled })).into_response()
}

async fn health() -> Response {
    Json(json!({ "status": "healthy" })).into_response()
}

enum ApiError {
    BadRequest(String),
    Translation(TranslationError),
}

impl From<TranslationError> for ApiError {
    fn from(e: TranslationError) -> Self {
        ApiError::Translation(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Translation(TranslationError::NoTextFound) => {
                (StatusCode::UNPROCESSABLE_ENTITY, TranslationError::NoTextFound.to_string())
            }
            ApiError::Translation(TranslationError::Cancelled) => {
                (StatusCode::CONFLICT, TranslationError::Cancelled.to_string())
            }
            ApiError::Translation(e @ TranslationError::Provider(_)) => {
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
