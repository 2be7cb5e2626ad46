//! Remote speech synthesis.
//!
//! The generative-AI backend is a black box: one request per chunk, answered
//! with base64 PCM or with nothing at all.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::SpeechConfig;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech API returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed speech API response: {0}")]
    MalformedResponse(String),

    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),
}

/// Turns one chunk of text into base64 PCM16 audio.
///
/// `Ok(None)` means the service answered without audio; callers skip the chunk.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Option<String>, SynthError>;
}

/// Gemini `generateContent` client with the AUDIO response modality.
pub struct GeminiSynthesizer {
    client: Client,
    endpoint: String,
    api_key: String,
    voice: String,
}

impl GeminiSynthesizer {
    pub fn new(config: &SpeechConfig) -> Result<Self, SynthError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SynthError::MissingApiKey(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &SpeechConfig, api_key: String) -> Result<Self, SynthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.api_base.trim_end_matches('/'),
                config.model
            ),
            api_key,
            voice: config.voice.clone(),
        })
    }

    fn request_body(&self, text: &str, language: &str) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [{ "text": spoken_prompt(text, language) }]
            }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Option<String>, SynthError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(text, language))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SynthError::Status(resp.status()));
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| SynthError::MalformedResponse(e.to_string()))?;
        let audio = body.audio_payload();
        debug!(
            "Synthesized {} chars -> {} base64 bytes",
            text.len(),
            audio.as_ref().map_or(0, String::len)
        );
        Ok(audio)
    }
}

/// Prefix the chunk with a reading instruction in the requested language.
fn spoken_prompt(text: &str, language: &str) -> String {
    match language {
        "es" => format!("Lee en voz alta en español, con tono cálido y claro:\n{text}"),
        "en" => format!("Read aloud in English, in a warm and clear tone:\n{text}"),
        other => format!("Read aloud in the language with code '{other}':\n{text}"),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateResponse {
    fn audio_payload(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| p.inline_data)
            .map(|d| d.data)
            .filter(|d| !d.is_empty())
    }
}
