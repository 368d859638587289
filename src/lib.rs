//! acestep-studio library
//!
//! Self-hosted web app for ACE-Step 1.5 music generation: a JSON API that
//! wraps the generation server and an OpenAI-compatible LLM (for lyric and
//! tag authoring), plus the embedded browser UI that consumes it.

use axum::{routing::get, routing::post, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod api;
pub mod config;
pub mod services;

use config::Config;
use services::ace_step::AceStepClient;
use services::llm::LlmService;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ace: Arc<AceStepClient>,
    pub llm: Arc<LlmService>,
}

impl AppState {
    /// Build upstream clients from the resolved configuration
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let ace = AceStepClient::new(&config.ace_step_api_url, config.ace_step_api_key.clone())?;
        let llm = LlmService::new(
            &config.openai_base_url,
            config.openai_api_key.clone(),
            &config.openai_chat_model,
        )?;

        Ok(Self {
            config: Arc::new(config),
            ace: Arc::new(ace),
            llm: Arc::new(llm),
        })
    }
}

/// GET /api
///
/// Service identification and endpoint catalog
async fn api_info() -> Json<serde_json::Value> {
    Json(json!({
        "name": "ACE-Step Studio API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "generate": {
                "POST /api/generate": "create a music generation task",
                "GET /api/status/{task_id}": "poll task status",
                "POST /api/generate_and_wait": "generate and wait for completion",
            },
            "lyrics": {
                "POST /api/lyrics": "AI lyric writing",
                "POST /api/tags": "tag suggestion",
                "POST /api/full_generate": "lyrics + tags in one call",
            },
            "utility": {
                "GET /api/languages": "supported vocal languages",
                "GET /api/key_scales": "supported key scales",
                "GET /api/health": "generation server health",
                "GET /api/models": "generation server models",
                "GET /api/stats": "generation server statistics",
                "GET /api/audio": "audio file proxy",
            }
        }
    }))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api", get(api_info))
        .route("/api/generate", post(api::generate_music))
        .route("/api/status/:task_id", get(api::get_task_status))
        .route("/api/generate_and_wait", post(api::generate_and_wait))
        .route("/api/lyrics", post(api::generate_lyrics))
        .route("/api/tags", post(api::generate_tags))
        .route("/api/full_generate", post(api::full_generate))
        .route("/api/languages", get(api::get_languages))
        .route("/api/key_scales", get(api::get_key_scales))
        .route("/api/health", get(api::upstream_health))
        .route("/api/models", get(api::get_models))
        .route("/api/stats", get(api::get_stats))
        .route("/api/audio", get(api::proxy_audio));

    let ui = Router::new()
        .route("/", get(api::serve_index))
        .route("/static/app.js", get(api::serve_app_js))
        .route("/static/style.css", get(api::serve_style_css))
        .merge(api::health_routes());

    // CORS is wide open, matching the original deployment model of a
    // single-user LAN tool
    Router::new()
        .merge(api)
        .merge(ui)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
