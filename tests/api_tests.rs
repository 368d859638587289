//! Integration tests for the acestep-studio API
//!
//! Tests cover:
//! - Local health endpoint and endpoint catalog
//! - Lyric/tag endpoints, including validation short-circuits that must not
//!   reach the LLM
//! - Task creation, status polling and URL rewriting
//! - The synchronous wait endpoint, including poll-budget timeout
//! - The audio proxy
//!
//! Upstreams are mocked with in-process axum servers on ephemeral ports.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot` method

use acestep_studio::{build_router, config::Config, AppState};

// =============================================================================
// Mock upstream servers
// =============================================================================

#[derive(Clone)]
struct MockAceState {
    release: Arc<Value>,
    /// Successive /query_result responses; the last one repeats
    queries: Arc<Vec<Value>>,
    query_count: Arc<AtomicUsize>,
}

async fn mock_release(State(state): State<MockAceState>) -> Json<Value> {
    Json(state.release.as_ref().clone())
}

async fn mock_query(State(state): State<MockAceState>) -> Json<Value> {
    let i = state.query_count.fetch_add(1, Ordering::SeqCst);
    let idx = i.min(state.queries.len() - 1);
    Json(state.queries[idx].clone())
}

async fn mock_models() -> Json<Value> {
    Json(json!({
        "code": 200,
        "data": {
            "models": ["acestep-v15-turbo"],
            "default_model": "acestep-v15-turbo",
        }
    }))
}

async fn mock_stats() -> Json<Value> {
    Json(json!({
        "code": 200,
        "data": { "jobs": {}, "queue_size": 2, "avg_job_seconds": 42.5 }
    }))
}

async fn mock_audio() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "audio/mpeg")],
        &b"FAKE_MP3_BYTES"[..],
    )
}

/// Spawn a mock ACE-Step server; returns its base URL
async fn spawn_mock_ace(release: Value, queries: Vec<Value>) -> String {
    let state = MockAceState {
        release: Arc::new(release),
        queries: Arc::new(queries),
        query_count: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/release_task", post(mock_release))
        .route("/query_result", post(mock_query))
        .route("/v1/models", get(mock_models))
        .route("/v1/stats", get(mock_stats))
        .route("/v1/audio", get(mock_audio))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone)]
struct MockLlmState {
    /// Successive chat reply contents; the last one repeats
    replies: Arc<Vec<String>>,
    hits: Arc<AtomicUsize>,
}

async fn mock_chat(State(state): State<MockLlmState>) -> Json<Value> {
    let i = state.hits.fetch_add(1, Ordering::SeqCst);
    let idx = i.min(state.replies.len() - 1);
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": state.replies[idx] } }]
    }))
}

/// Spawn a mock OpenAI-compatible server; returns (base URL with /v1, hit counter)
async fn spawn_mock_llm(replies: Vec<&str>) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = MockLlmState {
        replies: Arc::new(replies.into_iter().map(str::to_string).collect()),
        hits: hits.clone(),
    };

    let app = Router::new()
        .route("/v1/chat/completions", post(mock_chat))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v1", addr), hits)
}

// =============================================================================
// Test helpers
// =============================================================================

/// Unroutable base URLs for upstreams a test must not touch
const DEAD_ACE: &str = "http://127.0.0.1:9";
const DEAD_LLM: &str = "http://127.0.0.1:9/v1";

fn setup_app(ace_url: &str, llm_url: &str) -> Router {
    let config = Config {
        ace_step_api_url: ace_url.to_string(),
        openai_base_url: llm_url.to_string(),
        // Fast polling so timeout tests finish quickly
        poll_interval_secs: 0.01,
        ..Config::default()
    };
    let state = AppState::new(config).expect("Should build app state");
    build_router(state)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn release_ok(task_id: &str) -> Value {
    json!({ "code": 200, "data": { "task_id": task_id } })
}

fn query_pending() -> Value {
    json!({ "code": 200, "data": [{ "status": 0, "result": null }] })
}

fn query_succeeded() -> Value {
    let results = json!([{
        "file": "/v1/audio?path=foo.mp3",
        "prompt": "lofi hip hop",
        "metas": { "bpm": 95, "duration": 150.0, "keyscale": "A minor" },
        "seed_value": "42",
    }]);
    json!({ "code": 200, "data": [{ "status": 1, "result": results.to_string() }] })
}

fn query_failed(message: &str) -> Value {
    json!({ "code": 200, "data": [{ "status": 2, "result": message }] })
}

// =============================================================================
// Health and catalog
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "acestep-studio");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_api_catalog() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.oneshot(get_request("/api")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["name"], "ACE-Step Studio API");
    assert!(body["endpoints"]["generate"].is_object());
}

#[tokio::test]
async fn test_language_and_key_scale_lists() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.clone().oneshot(get_request("/api/languages")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["languages"].as_array().unwrap().len(), 20);

    let response = app.oneshot(get_request("/api/key_scales")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    let scales = body["key_scales"].as_array().unwrap();
    assert_eq!(scales.len(), 24);
    assert!(scales.contains(&json!("C major")));
}

// =============================================================================
// Lyric and tag endpoints
// =============================================================================

#[tokio::test]
async fn test_lyrics_blank_theme_never_calls_llm() {
    let (llm_url, hits) = spawn_mock_llm(vec!["should never be used"]).await;
    let app = setup_app(DEAD_ACE, &llm_url);

    let response = app
        .oneshot(json_request("POST", "/api/lyrics", &json!({ "theme": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("required"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tags_blank_inputs_never_call_llm() {
    let (llm_url, hits) = spawn_mock_llm(vec!["should never be used"]).await;
    let app = setup_app(DEAD_ACE, &llm_url);

    let response = app
        .oneshot(json_request("POST", "/api/tags", &json!({})))
        .await
        .unwrap();

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("required"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lyrics_success_with_metadata_line() {
    let reply = "{\"recommended_duration\": 120, \"parts\": {\"intro\": 10}}\n[intro]\nNeon rain\n";
    let (llm_url, _hits) = spawn_mock_llm(vec![reply]).await;
    let app = setup_app(DEAD_ACE, &llm_url);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/lyrics",
            &json!({ "theme": "night drive", "language": "English" }),
        ))
        .await
        .unwrap();

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["recommended_duration"], 120);
    assert_eq!(body["parts"]["intro"], 10);
    assert!(body["lyrics"].as_str().unwrap().starts_with("[intro]"));
}

#[tokio::test]
async fn test_tags_success_parses_json_reply() {
    let reply = "{\"genre\": \"synthwave\", \"tags\": \"synth, drums, night\", \"bpm\": 102, \"key_scale\": \"A minor\"}";
    let (llm_url, _hits) = spawn_mock_llm(vec![reply]).await;
    let app = setup_app(DEAD_ACE, &llm_url);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/tags",
            &json!({ "theme": "night drive" }),
        ))
        .await
        .unwrap();

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["genre"], "synthwave");
    assert_eq!(body["bpm"], 102);
    assert_eq!(body["key_scale"], "A minor");
}

#[tokio::test]
async fn test_full_generate_combines_lyrics_and_tags() {
    let lyrics_reply =
        "{\"recommended_duration\": 95, \"parts\": {}}\n[verse]\nHeadlights on the bay\n";
    let tags_reply = "{\"genre\": \"city pop\", \"tags\": \"bass, brass\", \"bpm\": 110, \"key_scale\": \"F major\"}";
    let (llm_url, hits) = spawn_mock_llm(vec![lyrics_reply, tags_reply]).await;
    let app = setup_app(DEAD_ACE, &llm_url);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/full_generate",
            &json!({ "theme": "summer coastline" }),
        ))
        .await
        .unwrap();

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["recommended_duration"], 95);
    assert!(body["lyrics"].as_str().unwrap().contains("Headlights"));
    assert_eq!(body["genre"], "city pop");
    assert_eq!(body["bpm"], 110);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_lyrics_llm_failure_is_business_error() {
    // Unreachable LLM: the endpoint still answers 200 with success:false
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app
        .oneshot(json_request("POST", "/api/lyrics", &json!({ "theme": "x" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

// =============================================================================
// Task creation and status polling
// =============================================================================

#[tokio::test]
async fn test_generate_creates_task() {
    let ace_url = spawn_mock_ace(release_ok("task-123"), vec![query_pending()]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/generate",
            &json!({ "prompt": "lofi hip hop", "audio_duration": 150 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["task_id"], "task-123");
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn test_generate_missing_task_id_is_server_error() {
    let ace_url = spawn_mock_ace(json!({ "code": 200, "data": {} }), vec![]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app
        .oneshot(json_request("POST", "/api/generate", &json!({ "prompt": "x" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("Failed to create task"));
}

#[tokio::test]
async fn test_generate_rejects_out_of_range_duration() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/generate",
            &json!({ "prompt": "x", "audio_duration": 5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("audio_duration"));
}

#[tokio::test]
async fn test_status_succeeded_rewrites_audio_url() {
    let ace_url = spawn_mock_ace(release_ok("task-123"), vec![query_succeeded()]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app.oneshot(get_request("/api/status/task-123")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["task_id"], "task-123");
    assert_eq!(body["status"], 1);
    assert_eq!(body["status_text"], "succeeded");

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["url"], "/api/audio?path=foo.mp3");
    assert_eq!(results[0]["metas"]["bpm"], 95);
}

#[tokio::test]
async fn test_status_failed_reports_backend_message() {
    let ace_url =
        spawn_mock_ace(release_ok("task-123"), vec![query_failed("CUDA out of memory")]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app.oneshot(get_request("/api/status/task-123")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    assert_eq!(body["status"], 2);
    assert_eq!(body["status_text"], "failed");
    assert_eq!(body["error"], "CUDA out of memory");
    assert!(body.get("results").is_none());
}

#[tokio::test]
async fn test_status_without_record_is_processing() {
    let ace_url =
        spawn_mock_ace(release_ok("task-123"), vec![json!({ "code": 200, "data": [] })]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app.oneshot(get_request("/api/status/task-123")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    assert_eq!(body["status"], 0);
    assert_eq!(body["status_text"], "processing");
}

#[tokio::test]
async fn test_status_unknown_code_stays_pending() {
    let ace_url = spawn_mock_ace(
        release_ok("task-123"),
        vec![json!({ "code": 200, "data": [{ "status": 5, "result": null }] })],
    )
    .await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app.oneshot(get_request("/api/status/task-123")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    assert_eq!(body["status"], 5);
    assert_eq!(body["status_text"], "unknown");
    assert!(body.get("results").is_none());
    assert!(body.get("error").is_none());
}

// =============================================================================
// Synchronous wait endpoint
// =============================================================================

#[tokio::test]
async fn test_generate_and_wait_success_after_pending() {
    let ace_url = spawn_mock_ace(
        release_ok("task-123"),
        vec![query_pending(), query_pending(), query_succeeded()],
    )
    .await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/generate_and_wait",
            &json!({ "prompt": "lofi", "timeout": 5.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], true);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["url"], "/api/audio?path=foo.mp3");
    assert_eq!(results[0]["file"], "/v1/audio?path=foo.mp3");
    assert_eq!(results[0]["metas"]["bpm"], 95);
    assert_eq!(results[0]["metas"]["keyscale"], "A minor");
    assert_eq!(results[0]["seed"], "42");
}

#[tokio::test]
async fn test_generate_and_wait_times_out_on_always_pending() {
    let ace_url = spawn_mock_ace(release_ok("task-123"), vec![query_pending()]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/generate_and_wait",
            &json!({ "prompt": "lofi", "timeout": 0.05 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("timed out"));
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_generate_and_wait_reports_task_failure() {
    let ace_url =
        spawn_mock_ace(release_ok("task-123"), vec![query_failed("bad seed")]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/generate_and_wait",
            &json!({ "prompt": "lofi", "timeout": 5.0 }),
        ))
        .await
        .unwrap();

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("bad seed"));
}

// =============================================================================
// Upstream info endpoints
// =============================================================================

#[tokio::test]
async fn test_models_endpoint_maps_upstream_data() {
    let ace_url = spawn_mock_ace(release_ok("t"), vec![]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app.oneshot(get_request("/api/models")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["default_model"], "acestep-v15-turbo");
    assert_eq!(body["models"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_models_endpoint_degrades_when_unreachable() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.oneshot(get_request("/api/models")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["default_model"], "unknown");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_stats_endpoint_maps_upstream_data() {
    let ace_url = spawn_mock_ace(release_ok("t"), vec![]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app.oneshot(get_request("/api/stats")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["queue_size"], 2);
    assert_eq!(body["avg_job_seconds"], 42.5);
}

#[tokio::test]
async fn test_upstream_health_error_is_in_band() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.oneshot(get_request("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].is_string());
}

// =============================================================================
// Audio proxy
// =============================================================================

#[tokio::test]
async fn test_audio_proxy_forwards_bytes_and_headers() {
    let ace_url = spawn_mock_ace(release_ok("t"), vec![]).await;
    let app = setup_app(&ace_url, DEAD_LLM);

    let response = app
        .oneshot(get_request("/api/audio?path=foo.mp3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/mpeg"
    );
    assert_eq!(
        response.headers().get(header::ACCEPT_RANGES).unwrap(),
        "bytes"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"FAKE_MP3_BYTES");
}

#[tokio::test]
async fn test_audio_proxy_without_path_is_bad_request() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.oneshot(get_request("/api/audio")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audio_proxy_unreachable_upstream_is_bad_gateway() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app
        .oneshot(get_request("/api/audio?path=foo.mp3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

// =============================================================================
// UI serving
// =============================================================================

#[tokio::test]
async fn test_index_and_static_assets_served() {
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("id=\"generate-btn\""));
    assert!(html.contains("id=\"visualizer\""));

    let response = app.clone().oneshot(get_request("/static/app.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/javascript"
    );

    let response = app.oneshot(get_request("/static/style.css")).await.unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/css"
    );
}

#[tokio::test]
async fn test_form_defaults_encoded_in_markup() {
    // Reset restores these values; they are the initial form state too
    let app = setup_app(DEAD_ACE, DEAD_LLM);

    let response = app.oneshot(get_request("/")).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(html.contains("id=\"audio_duration\" min=\"10\" max=\"300\" value=\"150\""));
    assert!(html.contains("id=\"bpm\" min=\"30\" max=\"300\" value=\"120\""));
    assert!(html.contains("id=\"inference_steps\" min=\"1\" max=\"200\" value=\"60\""));
    assert!(html.contains("id=\"guidance_scale\" min=\"0\" max=\"20\" step=\"0.1\" value=\"3.0\""));
}
