//! ACE-Step 1.5 REST API client
//!
//! Talks to the generation server: task creation (`/release_task`), result
//! queries (`/query_result`), the bounded completion-wait polling loop, and
//! the utility endpoints (health, stats, models).

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Vocal languages accepted by the generation server
pub const SUPPORTED_LANGUAGES: [&str; 20] = [
    "en", "zh", "ja", "ko", "es", "fr", "de", "it", "pt", "ru", "ar", "hi", "bn", "th", "vi",
    "id", "tr", "nl", "pl", "unknown",
];

/// Key scales accepted by the generation server
pub const SUPPORTED_KEY_SCALES: [&str; 24] = [
    "C major", "C minor", "C# major", "C# minor", "D major", "D minor", "D# major", "D# minor",
    "E major", "E minor", "F major", "F minor", "F# major", "F# minor", "G major", "G minor",
    "G# major", "G# minor", "A major", "A minor", "A# major", "A# minor", "B major", "B minor",
];

/// ACE-Step client errors
#[derive(Debug, Error)]
pub enum AceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Task creation returned no task id")]
    MissingTaskId,

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Task {task_id} timed out after {timeout_secs} seconds")]
    Timeout { task_id: String, timeout_secs: f64 },
}

/// Task lifecycle as reported by the generation server.
///
/// A task moves from `Processing` to exactly one terminal state. Codes the
/// server has not documented are treated as still pending by pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Processing,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => TaskStatus::Processing,
            1 => TaskStatus::Succeeded,
            2 => TaskStatus::Failed,
            _ => TaskStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Unknown => "unknown",
        }
    }
}

/// Parameter bag for `/release_task`
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseTaskRequest {
    pub prompt: String,
    pub lyrics: String,
    pub thinking: bool,
    pub vocal_language: String,
    pub audio_duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_scale: Option<String>,
    pub time_signature: String,
    pub batch_size: i64,
    pub audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub inference_steps: i64,
    pub guidance_scale: f64,
}

#[derive(Debug, Deserialize)]
struct ReleaseEnvelope {
    #[serde(default)]
    data: Option<ReleaseData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseData {
    #[serde(default)]
    task_id: String,
}

/// Envelope returned by `/query_result`
#[derive(Debug, Deserialize)]
pub struct QueryEnvelope {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Vec<TaskRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One task entry from `/query_result`.
///
/// `result` is a JSON string when the server has finished with the task:
/// a serialized result list on success, a bare error message on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl TaskRecord {
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_code(self.status)
    }

    /// Error message carried by a failed task
    pub fn error_message(&self) -> String {
        match self.result.as_str() {
            Some(message) if !message.is_empty() => message.to_string(),
            _ => "Unknown error".to_string(),
        }
    }

    /// Decode the result list of a succeeded task, attaching audio URLs
    pub fn parse_results(&self, base_url: &str) -> Result<Vec<TaskResult>, AceError> {
        let mut results: Vec<TaskResult> = match &self.result {
            serde_json::Value::String(raw) => {
                serde_json::from_str(raw).map_err(|e| AceError::Parse(e.to_string()))?
            }
            other => serde_json::from_value(other.clone())
                .map_err(|e| AceError::Parse(e.to_string()))?,
        };

        for result in &mut results {
            if !result.file.is_empty() {
                result.url = Some(format!("{}{}", base_url, result.file));
            }
        }

        Ok(results)
    }
}

/// One generated audio result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default)]
    pub metas: Option<AudioMetadata>,
    #[serde(default)]
    pub generation_info: Option<String>,
    #[serde(default)]
    pub seed_value: Option<serde_json::Value>,
}

/// Audio metadata reported alongside a result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioMetadata {
    #[serde(default)]
    pub bpm: Option<i64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub genres: Option<String>,
    #[serde(default)]
    pub keyscale: Option<String>,
    #[serde(default)]
    pub timesignature: Option<String>,
}

/// Capped linear progress estimate for a pending task
pub fn progress_percent(elapsed: Duration, timeout: Duration) -> u8 {
    if timeout.is_zero() {
        return 99;
    }
    let ratio = elapsed.as_secs_f64() / timeout.as_secs_f64();
    ((ratio * 100.0) as u8).min(99)
}

/// ACE-Step REST API client
pub struct AceStepClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl AceStepClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AceError> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AceError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a generated audio file on the upstream server
    pub fn audio_url(&self, file_path: &str) -> String {
        format!("{}{}", self.base_url, file_path)
    }

    /// Create a generation task; returns the task id
    pub async fn release_task(&self, request: &ReleaseTaskRequest) -> Result<String, AceError> {
        tracing::info!(
            duration = request.audio_duration,
            steps = request.inference_steps,
            format = %request.audio_format,
            "Submitting generation task"
        );

        let envelope: ReleaseEnvelope = self
            .post_json("/release_task", request)
            .await?;

        if let Some(error) = envelope.error {
            return Err(AceError::Upstream(error));
        }

        let task_id = envelope.data.map(|d| d.task_id).unwrap_or_default();
        if task_id.is_empty() {
            return Err(AceError::MissingTaskId);
        }

        tracing::info!(task_id = %task_id, "Generation task created");
        Ok(task_id)
    }

    /// Query results for a batch of task ids
    pub async fn query_result(&self, task_ids: &[String]) -> Result<QueryEnvelope, AceError> {
        let payload = serde_json::json!({ "task_id_list": task_ids });
        let envelope: QueryEnvelope = self.post_json("/query_result", &payload).await?;

        if envelope.code != 200 {
            let message = envelope
                .error
                .unwrap_or_else(|| format!("query_result returned code {}", envelope.code));
            return Err(AceError::Upstream(message));
        }

        Ok(envelope)
    }

    /// Query a single task; `None` while the server has no record for it yet
    pub async fn query_task(&self, task_id: &str) -> Result<Option<TaskRecord>, AceError> {
        let envelope = self.query_result(&[task_id.to_string()]).await?;
        Ok(envelope.data.into_iter().next())
    }

    /// Poll a task until it reaches a terminal state.
    ///
    /// Sleeps `interval` between polls; gives up with a timeout error once
    /// `timeout` has elapsed. Unknown status codes keep the loop polling.
    pub async fn wait_for_completion(
        &self,
        task_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<TaskResult>, AceError> {
        let started = Instant::now();

        loop {
            if started.elapsed() > timeout {
                tracing::warn!(task_id = %task_id, "Generation task timed out");
                return Err(AceError::Timeout {
                    task_id: task_id.to_string(),
                    timeout_secs: timeout.as_secs_f64(),
                });
            }

            if let Some(record) = self.query_task(task_id).await? {
                match record.status() {
                    TaskStatus::Succeeded => {
                        tracing::info!(task_id = %task_id, "Generation task succeeded");
                        return record.parse_results(&self.base_url);
                    }
                    TaskStatus::Failed => {
                        let message = record.error_message();
                        tracing::warn!(task_id = %task_id, error = %message, "Generation task failed");
                        return Err(AceError::TaskFailed(message));
                    }
                    TaskStatus::Processing | TaskStatus::Unknown => {}
                }
            }

            tracing::debug!(
                task_id = %task_id,
                progress = progress_percent(started.elapsed(), timeout),
                "Generation in progress"
            );
            tokio::time::sleep(interval).await;
        }
    }

    /// GET /health on the upstream server
    pub async fn health(&self) -> Result<serde_json::Value, AceError> {
        self.get_json("/health").await
    }

    /// GET /v1/stats: queue size and average job time
    pub async fn stats(&self) -> Result<serde_json::Value, AceError> {
        self.get_json("/v1/stats").await
    }

    /// GET /v1/models: available models and the server default
    pub async fn models(&self) -> Result<serde_json::Value, AceError> {
        self.get_json("/v1/models").await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, AceError>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AceError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| AceError::Parse(e.to_string()))
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, AceError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut request = self.http.get(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AceError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| AceError::Parse(e.to_string()))
    }
}
