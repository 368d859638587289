//! Lyric and tag authoring API
//!
//! These endpoints always answer 200 with a `success` flag; LLM failures are
//! business results the UI renders as a status banner. Blank required fields
//! are rejected before any LLM call is made.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LyricsGenerateRequest {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default = "default_llm_language")]
    pub language: String,
    #[serde(default)]
    pub mood: String,
}

fn default_llm_language() -> String {
    "Japanese".to_string()
}

#[derive(Debug, Serialize)]
pub struct LyricsGenerateResponse {
    pub success: bool,
    pub lyrics: String,
    pub recommended_duration: i64,
    pub parts: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LyricsGenerateResponse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            lyrics: String::new(),
            recommended_duration: 90,
            parts: BTreeMap::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TagsGenerateRequest {
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default = "default_llm_language")]
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct TagsGenerateResponse {
    pub success: bool,
    pub genre: String,
    pub tags: String,
    pub bpm: i64,
    pub key_scale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TagsGenerateResponse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            genre: String::new(),
            tags: String::new(),
            bpm: 120,
            key_scale: "C major".to_string(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FullGenerateResponse {
    pub success: bool,
    pub lyrics: String,
    pub recommended_duration: i64,
    pub parts: BTreeMap<String, i64>,
    pub genre: String,
    pub tags: String,
    pub bpm: i64,
    pub key_scale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FullGenerateResponse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            lyrics: String::new(),
            recommended_duration: 90,
            parts: BTreeMap::new(),
            genre: String::new(),
            tags: String::new(),
            bpm: 120,
            key_scale: "C major".to_string(),
            error: Some(error),
        }
    }
}

/// POST /api/lyrics
///
/// AI lyric writing from a theme.
pub async fn generate_lyrics(
    State(state): State<AppState>,
    Json(request): Json<LyricsGenerateRequest>,
) -> Json<LyricsGenerateResponse> {
    if request.theme.trim().is_empty() {
        return Json(LyricsGenerateResponse::failure(
            "theme is required".to_string(),
        ));
    }

    match state
        .llm
        .generate_lyrics(&request.theme, &request.genre, &request.language, &request.mood)
        .await
    {
        Ok(draft) => Json(LyricsGenerateResponse {
            success: true,
            lyrics: draft.lyrics,
            recommended_duration: draft.recommended_duration,
            parts: draft.parts,
            error: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Lyric generation failed");
            Json(LyricsGenerateResponse::failure(e.to_string()))
        }
    }
}

/// POST /api/tags
///
/// Genre/tag/tempo suggestion from lyrics and/or a theme.
pub async fn generate_tags(
    State(state): State<AppState>,
    Json(request): Json<TagsGenerateRequest>,
) -> Json<TagsGenerateResponse> {
    if request.theme.trim().is_empty() && request.lyrics.trim().is_empty() {
        return Json(TagsGenerateResponse::failure(
            "theme or lyrics is required".to_string(),
        ));
    }

    match state
        .llm
        .generate_tags(&request.lyrics, &request.theme, &request.language)
        .await
    {
        Ok(tags) => Json(TagsGenerateResponse {
            success: true,
            genre: tags.genre,
            tags: tags.tags,
            bpm: tags.bpm,
            key_scale: tags.key_scale,
            error: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Tag generation failed");
            Json(TagsGenerateResponse::failure(e.to_string()))
        }
    }
}

/// POST /api/full_generate
///
/// Lyrics and tags in one round trip (tags conditioned on the lyrics).
pub async fn full_generate(
    State(state): State<AppState>,
    Json(request): Json<LyricsGenerateRequest>,
) -> Json<FullGenerateResponse> {
    if request.theme.trim().is_empty() {
        return Json(FullGenerateResponse::failure(
            "theme is required".to_string(),
        ));
    }

    match state
        .llm
        .generate_full(&request.theme, &request.genre, &request.language, &request.mood)
        .await
    {
        Ok((draft, tags)) => Json(FullGenerateResponse {
            success: true,
            lyrics: draft.lyrics,
            recommended_duration: draft.recommended_duration,
            parts: draft.parts,
            genre: tags.genre,
            tags: tags.tags,
            bpm: tags.bpm,
            key_scale: tags.key_scale,
            error: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Full generation failed");
            Json(FullGenerateResponse::failure(e.to_string()))
        }
    }
}
