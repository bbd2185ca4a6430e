use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use image_harvest::searxng::SearxngImageProvider;
use image_harvest::types::*;
use image_harvest::{
    AcquireError, AppState, CollectionLimits, ControllerStats, RateLimitConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Get configuration from environment
    let searxng_url =
        env::var("SEARXNG_URL").unwrap_or_else(|_| "http://localhost:8888".to_string());
    let default_limits = CollectionLimits {
        max_images_per_session: env_parse("MAX_IMAGES_PER_SESSION", 200),
        max_pages_per_session: env_parse("MAX_PAGES_PER_SESSION", 50),
        warn_threshold: env_parse("WARN_THRESHOLD", 100),
        batch_size: env_parse("BATCH_SIZE", 20),
        confirmation_interval: env_parse("CONFIRMATION_INTERVAL", 50),
        max_cache_bytes: env_parse("MAX_CACHE_BYTES", 64 * 1024 * 1024),
    };
    let rate_config = RateLimitConfig::new(
        env_parse("MAX_CALLS_PER_WINDOW", 45),
        env_parse("WINDOW_SECS", 3600),
    );

    info!("Starting image-harvest");
    info!("SearXNG URL: {}", searxng_url);

    // Create HTTP client; the provider owns its timeout
    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let provider = Arc::new(SearxngImageProvider::new(searxng_url, http_client)?);

    let state = Arc::new(AppState::new(provider, rate_config, default_limits));

    // Build router
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/search/start", post(start_search_handler))
        .route("/search/next", post(fetch_next_handler))
        .route("/search/confirm", post(confirm_handler))
        .route("/search/stop", post(stop_handler))
        .route("/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
    info!("image-harvest listening on http://0.0.0.0:5000");

    axum::serve(listener, app).await?;

    Ok(())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn reject(e: AcquireError) -> (StatusCode, Json<ErrorResponse>) {
    e.log();
    let retry_after_secs = e.retry_after().map(|d| d.as_secs());
    (
        e.status_code(),
        Json(ErrorResponse {
            error: e.to_string(),
            retry_after_secs,
        }),
    )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-harvest",
        "version": "0.1.0"
    }))
}

async fn start_search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSearchRequest>,
) -> Result<Json<StartSearchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limits = request
        .limits
        .unwrap_or_else(|| state.default_limits.clone());
    let mut controller = state.controller.lock().await;
    match controller.start_search(&request.query, limits) {
        Ok(session) => Ok(Json(StartSearchResponse { session })),
        Err(e) => Err(reject(e)),
    }
}

async fn fetch_next_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FetchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut controller = state.controller.lock().await;
    match controller.fetch_next_batch().await {
        Ok(outcome) => Ok(Json(FetchResponse {
            images: outcome.images,
            awaiting_confirmation: outcome.awaiting_confirmation,
            should_warn: outcome.should_warn,
            progress: outcome.progress,
        })),
        Err(e) => Err(reject(e)),
    }
}

async fn confirm_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let mut controller = state.controller.lock().await;
    match controller.confirm() {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "active" }))),
        Err(e) => Err(reject(e)),
    }
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    // Flag first so an in-flight fetch aborts at its next page boundary,
    // then mark the session once the lock frees up.
    state.stop.request_stop();
    let mut controller = state.controller.lock().await;
    controller.stop();
    Json(serde_json::json!({ "status": "aborted" }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<ControllerStats> {
    let controller = state.controller.lock().await;
    Json(controller.stats())
}
