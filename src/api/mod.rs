//! HTTP API handlers

pub mod generate;
pub mod health;
pub mod lyrics;
pub mod ui;

pub use generate::{
    generate_and_wait, generate_music, get_key_scales, get_languages, get_models, get_stats,
    get_task_status, proxy_audio, upstream_health,
};
pub use health::health_routes;
pub use lyrics::{full_generate, generate_lyrics, generate_tags};
pub use ui::{serve_app_js, serve_index, serve_style_css};
