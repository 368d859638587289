//! acestep-studio - ACE-Step 1.5 music generation web app
//!
//! Serves the browser UI and the JSON API that wraps the ACE-Step generation
//! server and the lyric/tag LLM.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use acestep_studio::config::{Args, Config};
use acestep_studio::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting ACE-Step Studio v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config = Config::resolve(args)?;

    info!("ACE-Step API Base URL: {}", config.ace_step_api_url);
    info!("LLM API Base URL: {}", config.openai_base_url);
    info!("LLM Model: {}", config.openai_chat_model);

    let bind_addr = config.bind_addr();
    let state = AppState::new(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("acestep-studio listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
