//! Music generation API
//!
//! Task creation, status polling, the synchronous wait variant, the audio
//! proxy that keeps generated files same-origin, and the upstream info
//! endpoints (models, stats, health).

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::services::ace_step::{
    AceError, ReleaseTaskRequest, TaskResult, TaskStatus, SUPPORTED_KEY_SCALES,
    SUPPORTED_LANGUAGES,
};
use crate::AppState;

/// Music generation request with the documented API defaults
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub lyrics: String,
    #[serde(default = "default_thinking")]
    pub thinking: bool,
    #[serde(default = "default_language")]
    pub vocal_language: String,
    #[serde(default = "default_duration")]
    pub audio_duration: i64,
    #[serde(default)]
    pub bpm: Option<i64>,
    #[serde(default)]
    pub key_scale: Option<String>,
    #[serde(default = "default_time_signature")]
    pub time_signature: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_inference_steps")]
    pub inference_steps: i64,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
}

fn default_thinking() -> bool {
    true
}
fn default_language() -> String {
    "ja".to_string()
}
fn default_duration() -> i64 {
    60
}
fn default_time_signature() -> String {
    "4".to_string()
}
fn default_batch_size() -> i64 {
    1
}
fn default_audio_format() -> String {
    "mp3".to_string()
}
fn default_inference_steps() -> i64 {
    60
}
fn default_guidance_scale() -> f64 {
    3.0
}

impl GenerateRequest {
    /// Range checks matching the upstream API contract
    pub fn validate(&self) -> Result<(), GenerateError> {
        if !(10..=300).contains(&self.audio_duration) {
            return Err(GenerateError::Validation(
                "audio_duration must be between 10 and 300".to_string(),
            ));
        }
        if let Some(bpm) = self.bpm {
            if !(30..=300).contains(&bpm) {
                return Err(GenerateError::Validation(
                    "bpm must be between 30 and 300".to_string(),
                ));
            }
        }
        if !(1..=4).contains(&self.batch_size) {
            return Err(GenerateError::Validation(
                "batch_size must be between 1 and 4".to_string(),
            ));
        }
        if !(1..=200).contains(&self.inference_steps) {
            return Err(GenerateError::Validation(
                "inference_steps must be between 1 and 200".to_string(),
            ));
        }
        if !(0.0..=20.0).contains(&self.guidance_scale) {
            return Err(GenerateError::Validation(
                "guidance_scale must be between 0.0 and 20.0".to_string(),
            ));
        }
        Ok(())
    }

    fn into_release_request(self) -> ReleaseTaskRequest {
        ReleaseTaskRequest {
            prompt: self.prompt,
            lyrics: self.lyrics,
            thinking: self.thinking,
            vocal_language: self.vocal_language,
            audio_duration: self.audio_duration,
            bpm: self.bpm,
            key_scale: self.key_scale.filter(|k| !k.is_empty()),
            time_signature: self.time_signature,
            batch_size: self.batch_size,
            audio_format: self.audio_format,
            seed: self.seed,
            inference_steps: self.inference_steps,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub task_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    /// 0=processing, 1=succeeded, 2=failed
    pub status: i64,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TaskResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateAndWaitRequest {
    #[serde(flatten)]
    pub params: GenerateRequest,
    /// Maximum seconds to wait for completion
    #[serde(default = "default_wait_timeout")]
    pub timeout: f64,
}

fn default_wait_timeout() -> f64 {
    300.0
}

#[derive(Debug, Serialize)]
pub struct GenerateAndWaitResponse {
    pub success: bool,
    pub results: Vec<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Flattened view of one result for the synchronous wait endpoint
#[derive(Debug, Serialize)]
pub struct ResultSummary {
    pub url: Option<String>,
    pub file: String,
    pub prompt: Option<String>,
    pub lyrics: Option<String>,
    pub metas: MetaSummary,
    pub seed: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct MetaSummary {
    pub bpm: Option<i64>,
    pub duration: Option<f64>,
    pub keyscale: Option<String>,
}

impl From<TaskResult> for ResultSummary {
    fn from(result: TaskResult) -> Self {
        let metas = result.metas.unwrap_or_default();
        Self {
            url: result.url.as_deref().map(proxy_audio_url),
            file: result.file,
            prompt: result.prompt,
            lyrics: result.lyrics,
            metas: MetaSummary {
                bpm: metas.bpm,
                duration: metas.duration,
                keyscale: metas.keyscale,
            },
            seed: result.seed_value,
        }
    }
}

/// Handler errors for the generation endpoints
#[derive(Debug)]
pub enum GenerateError {
    Validation(String),
    Upstream(String),
    AudioNotFound(u16),
    AudioFetch(String),
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            GenerateError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            GenerateError::Upstream(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            GenerateError::AudioNotFound(code) => (
                StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
                "Audio not found".to_string(),
            ),
            GenerateError::AudioFetch(message) => (
                StatusCode::BAD_GATEWAY,
                format!("Failed to fetch audio: {}", message),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// Rewrite an upstream `/v1/audio?path=...` URL to the local proxy form.
///
/// Any other URL (relative, different path, missing query) passes through
/// unchanged. The already-encoded query value is reused as-is.
pub fn proxy_audio_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.path() != "/v1/audio" {
        return url.to_string();
    }
    if let Some(query) = parsed.query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("path=") {
                if !value.is_empty() {
                    return format!("/api/audio?path={}", value);
                }
            }
        }
    }
    url.to_string()
}

/// POST /api/generate
///
/// Creates a generation task and returns its id without waiting.
pub async fn generate_music(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, GenerateError> {
    request.validate()?;

    let task_id = state
        .ace
        .release_task(&request.into_release_request())
        .await
        .map_err(|e| match e {
            AceError::MissingTaskId => GenerateError::Upstream("Failed to create task".to_string()),
            other => GenerateError::Upstream(other.to_string()),
        })?;

    Ok(Json(GenerateResponse {
        task_id,
        status: "queued".to_string(),
        message: "Task created successfully".to_string(),
    }))
}

/// GET /api/status/:task_id
///
/// One status poll. Succeeded tasks carry their result list with audio URLs
/// rewritten to the local proxy; failed tasks carry the backend message.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, GenerateError> {
    let record = state
        .ace
        .query_task(&task_id)
        .await
        .map_err(|e| GenerateError::Upstream(e.to_string()))?;

    let Some(record) = record else {
        // No record yet: the scheduler has not picked the task up
        return Ok(Json(TaskStatusResponse {
            task_id,
            status: 0,
            status_text: TaskStatus::Processing.as_str().to_string(),
            results: None,
            error: None,
        }));
    };

    let mut results = None;
    let mut error = None;

    match record.status() {
        TaskStatus::Succeeded => {
            let mut parsed = record
                .parse_results(state.ace.base_url())
                .map_err(|e| GenerateError::Upstream(e.to_string()))?;
            for result in &mut parsed {
                result.url = result.url.as_deref().map(proxy_audio_url);
            }
            results = Some(parsed);
        }
        TaskStatus::Failed => {
            error = Some(record.error_message());
        }
        TaskStatus::Processing | TaskStatus::Unknown => {}
    }

    Ok(Json(TaskStatusResponse {
        task_id,
        status: record.status,
        status_text: record.status().as_str().to_string(),
        results,
        error,
    }))
}

/// POST /api/generate_and_wait
///
/// Creates a task and blocks until it completes. Timeouts and task failures
/// are business results (`success:false`), not transport errors.
pub async fn generate_and_wait(
    State(state): State<AppState>,
    Json(request): Json<GenerateAndWaitRequest>,
) -> Result<Json<GenerateAndWaitResponse>, GenerateError> {
    request.params.validate()?;

    let timeout = Duration::from_secs_f64(request.timeout.max(0.0));
    let interval = Duration::from_secs_f64(state.config.poll_interval_secs);

    let task_id = match state
        .ace
        .release_task(&request.params.into_release_request())
        .await
    {
        Ok(task_id) => task_id,
        Err(AceError::MissingTaskId) => {
            return Ok(Json(failure("Failed to create task".to_string())));
        }
        Err(e) => return Ok(Json(failure(e.to_string()))),
    };

    match state.ace.wait_for_completion(&task_id, interval, timeout).await {
        Ok(results) => Ok(Json(GenerateAndWaitResponse {
            success: true,
            results: results.into_iter().map(ResultSummary::from).collect(),
            error: None,
        })),
        Err(e) => Ok(Json(failure(e.to_string()))),
    }
}

fn failure(error: String) -> GenerateAndWaitResponse {
    GenerateAndWaitResponse {
        success: false,
        results: Vec::new(),
        error: Some(error),
    }
}

/// GET /api/languages
pub async fn get_languages() -> Json<serde_json::Value> {
    Json(json!({ "languages": SUPPORTED_LANGUAGES }))
}

/// GET /api/key_scales
pub async fn get_key_scales() -> Json<serde_json::Value> {
    Json(json!({ "key_scales": SUPPORTED_KEY_SCALES }))
}

/// GET /api/health
///
/// Upstream generation server health; errors are reported in-band so the UI
/// can show a disconnected state.
pub async fn upstream_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.ace.health().await {
        Ok(value) => Json(value),
        Err(e) => Json(json!({ "status": "error", "message": e.to_string() })),
    }
}

/// GET /api/models
pub async fn get_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.ace.models().await {
        Ok(value) => {
            let data = value.get("data").cloned().unwrap_or_default();
            Json(json!({
                "success": true,
                "models": data.get("models").cloned().unwrap_or_else(|| json!([])),
                "default_model": data.get("default_model").cloned().unwrap_or_else(|| json!("unknown")),
            }))
        }
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string(),
            "models": [],
            "default_model": "unknown",
        })),
    }
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.ace.stats().await {
        Ok(value) => {
            let data = value.get("data").cloned().unwrap_or_default();
            Json(json!({
                "success": true,
                "jobs": data.get("jobs").cloned().unwrap_or_else(|| json!({})),
                "queue_size": data.get("queue_size").cloned().unwrap_or_else(|| json!(0)),
                "avg_job_seconds": data.get("avg_job_seconds").cloned().unwrap_or_else(|| json!(0)),
            }))
        }
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub path: String,
}

/// GET /api/audio?path=...
///
/// Proxies a generated audio file from the upstream server so the browser
/// never makes a cross-origin request for it.
pub async fn proxy_audio(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
) -> Result<Response, GenerateError> {
    let url = format!("{}/v1/audio", state.ace.base_url());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| GenerateError::AudioFetch(e.to_string()))?;
    let response = client
        .get(&url)
        .query(&[("path", query.path.as_str())])
        .send()
        .await
        .map_err(|e| GenerateError::AudioFetch(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GenerateError::AudioNotFound(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/mpeg")
        .to_string();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| GenerateError::AudioFetch(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        bytes,
    )
        .into_response())
}
