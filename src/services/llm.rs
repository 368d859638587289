//! Lyric and tag authoring via an OpenAI-compatible chat API
//!
//! The model is asked for a fixed output shape (a JSON metadata line before
//! the lyrics, a flat JSON object for tags) and the parsers here are
//! deliberately forgiving: a malformed reply falls back to usable defaults
//! instead of failing the request.

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TOKENS: u32 = 2000;
const TAGS_LYRICS_LIMIT: usize = 1000;

const LYRICS_SYSTEM_PROMPT: &str = r#"You are a professional lyricist who creates song lyrics for AI music generation (ACE-Step).

CRITICAL OUTPUT RULES:
1. Start with a JSON metadata line, then output ONLY the lyrics with structure tags
2. Use structure tags: [intro], [verse], [chorus], [bridge], [outro], [inst] (for instrumental)
3. Do NOT include timestamps like (0:00-0:05) - ACE-Step does not use them
4. Do NOT include romanization in parentheses - write in the requested language ONLY
5. Write lyrics line by line, each line on its own

REQUIRED FIRST LINE FORMAT (JSON):
{"recommended_duration": 90, "parts": {"intro": 5, "verse1": 20, "chorus1": 25, "verse2": 20, "chorus2": 25, "outro": 5}}

- recommended_duration: Total song length in seconds (typically 60-180)
- parts: Estimated duration for each part in seconds

STRUCTURE GUIDELINES:
- [intro]: Keep short (1-2 lines) or use [inst] for instrumental (5-10 sec)
- [verse]: 4-6 lines per verse (15-25 sec)
- [chorus]: 4-6 lines, catchy and memorable (20-30 sec)
- [bridge]: Optional, 2-4 lines (10-15 sec)
- [outro]: Short ending, 1-2 lines or [inst] (5-10 sec)

STYLE GUIDELINES:
- Match the mood and genre specified
- Use natural, singable phrases
- If Japanese: Write only in Japanese (kanji/hiragana/katakana mix)
- If English: Write only in English
- Keep vocabulary natural for singing
"#;

const TAGS_SYSTEM_PROMPT: &str = r#"You are a music metadata expert. Based on the given lyrics and theme, generate appropriate music tags for AI music generation.

OUTPUT FORMAT (JSON only):
{
    "genre": "primary genre, secondary genre",
    "tags": "instrument1, instrument2, mood1, mood2, vocal type, tempo description",
    "bpm": 120,
    "key_scale": "C major"
}

TAG CATEGORIES:
- Genre: pop, rock, jazz, electronic, hip-hop, R&B, classical, folk, country, etc.
- Mood: upbeat, melancholic, energetic, calm, romantic, dark, hopeful, nostalgic
- Instruments: piano, guitar, drums, bass, strings, synth, brass, etc.
- Vocal: male voice, female voice, choir, falsetto, breathy, powerful
- Tempo: slow tempo, mid tempo, fast tempo, upbeat rhythm

GUIDELINES:
- Analyze the lyrics mood and theme
- Suggest appropriate instrumentation
- Match tempo to the emotional content
- Use 5-10 tags total
- BPM range: 60-180
"#;

/// LLM client errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model returned an empty response")]
    EmptyResponse,
}

/// Structure-tagged lyrics plus the model's timing estimate
#[derive(Debug, Clone, Serialize)]
pub struct LyricsDraft {
    pub lyrics: String,
    pub recommended_duration: i64,
    pub parts: BTreeMap<String, i64>,
}

/// Genre/tag/tempo suggestion for the style prompt
#[derive(Debug, Clone, Serialize)]
pub struct TagSuggestion {
    pub genre: String,
    pub tags: String,
    pub bpm: i64,
    pub key_scale: String,
}

impl TagSuggestion {
    /// Defaults used when the model reply cannot be parsed
    fn fallback() -> Self {
        Self {
            genre: "pop".to_string(),
            tags: "piano, emotional".to_string(),
            bpm: 120,
            key_scale: "C major".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LyricsMetaLine {
    #[serde(default = "default_duration")]
    recommended_duration: i64,
    #[serde(default)]
    parts: BTreeMap<String, i64>,
}

fn default_duration() -> i64 {
    90
}

#[derive(Debug, Deserialize)]
struct TagsObject {
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    bpm: Option<i64>,
    #[serde(default)]
    key_scale: Option<String>,
}

/// OpenAI-compatible chat client for lyric and tag generation
pub struct LlmService {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmService {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Result<Self, LlmError> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion round; returns the assistant message content
    pub async fn chat(
        &self,
        user_message: &str,
        system_prompt: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_message },
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": temperature,
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(status.as_u16(), error_text));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }

    /// Write lyrics for a theme
    pub async fn generate_lyrics(
        &self,
        theme: &str,
        genre: &str,
        language: &str,
        mood: &str,
    ) -> Result<LyricsDraft, LlmError> {
        let genre = if genre.is_empty() { "any" } else { genre };
        let mood = if mood.is_empty() { "match the theme" } else { mood };
        let prompt = format!(
            "Create lyrics for the following:\n\
             Theme: {theme}\n\
             Genre: {genre}\n\
             Language: {language}\n\
             Mood: {mood}\n\n\
             Generate complete song lyrics with structure tags."
        );

        tracing::info!(model = %self.model, language = %language, "Generating lyrics");
        let response = self.chat(&prompt, LYRICS_SYSTEM_PROMPT, 0.85).await?;
        Ok(parse_lyrics_response(&response))
    }

    /// Suggest genre, tags, tempo and key for lyrics and/or a theme
    pub async fn generate_tags(
        &self,
        lyrics: &str,
        theme: &str,
        language: &str,
    ) -> Result<TagSuggestion, LlmError> {
        let mut sections = Vec::new();
        if !theme.is_empty() {
            sections.push(format!("Theme: {theme}"));
        }
        if !lyrics.is_empty() {
            let truncated: String = lyrics.chars().take(TAGS_LYRICS_LIMIT).collect();
            sections.push(format!("Lyrics:\n{truncated}"));
        }
        sections.push(format!("Language: {language}"));
        let prompt = format!(
            "{}\n\nGenerate music tags in JSON format.",
            sections.join("\n\n")
        );

        tracing::info!(model = %self.model, "Generating tags");
        let response = self.chat(&prompt, TAGS_SYSTEM_PROMPT, 0.7).await?;
        Ok(parse_tags_response(&response))
    }

    /// Lyrics first, then tags conditioned on those lyrics
    pub async fn generate_full(
        &self,
        theme: &str,
        genre: &str,
        language: &str,
        mood: &str,
    ) -> Result<(LyricsDraft, TagSuggestion), LlmError> {
        let draft = self.generate_lyrics(theme, genre, language, mood).await?;
        let tags = self.generate_tags(&draft.lyrics, theme, language).await?;
        Ok((draft, tags))
    }
}

/// Split a lyrics reply into the metadata line and the lyrics body.
///
/// The metadata line is the first line starting with `{` that mentions
/// `recommended_duration`; everything after it is the lyrics. Replies without
/// a parseable metadata line keep all text as lyrics with default timing.
pub fn parse_lyrics_response(response: &str) -> LyricsDraft {
    let lines: Vec<&str> = response.trim().lines().collect();

    let mut meta = LyricsMetaLine {
        recommended_duration: default_duration(),
        parts: BTreeMap::new(),
    };
    let mut lyrics_start = 0;

    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.starts_with('{') && line.contains("recommended_duration") {
            if let Ok(parsed) = serde_json::from_str::<LyricsMetaLine>(line) {
                meta = parsed;
                lyrics_start = i + 1;
                break;
            }
        }
    }

    LyricsDraft {
        lyrics: lines[lyrics_start..].join("\n").trim().to_string(),
        recommended_duration: meta.recommended_duration,
        parts: meta.parts,
    }
}

/// Parse a tags reply; any failure falls back to the stock suggestion
pub fn parse_tags_response(response: &str) -> TagSuggestion {
    let fallback = TagSuggestion::fallback();

    let Some(json) = extract_flat_json(response) else {
        return fallback;
    };
    let Ok(object) = serde_json::from_str::<TagsObject>(json) else {
        return fallback;
    };

    TagSuggestion {
        genre: object.genre.unwrap_or(fallback.genre),
        tags: object.tags.unwrap_or(fallback.tags),
        bpm: object.bpm.unwrap_or(fallback.bpm),
        key_scale: object.key_scale.unwrap_or(fallback.key_scale),
    }
}

/// First `{...}` region containing no nested braces
fn extract_flat_json(text: &str) -> Option<&str> {
    let mut open = None;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'{' => open = Some(i),
            b'}' => {
                if let Some(start) = open {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
