//! LLM collaborator interface: free-text prompt → structured song data.
//!
//! Only used to build Auto-DJ generation requests; prompt templating beyond
//! the request record stays outside the core.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::common::RadioError;
use crate::protocol::models::LlmSongData;

#[derive(Debug, Clone, Default)]
pub struct LlmGenerateRequest {
    pub user_prompt: String,
    pub previous: Option<LlmSongData>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_configured(&self) -> bool;
    async fn generate(&self, request: &LlmGenerateRequest) -> Result<LlmSongData, RadioError>;
}

/// OpenAI-compatible chat completions client (vLLM and friends).
pub struct OpenAiCompatLlm {
    http: reqwest::Client,
    endpoint_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: String,
}

const SYSTEM_PROMPT: &str = "You are a radio music director. Reply with a single JSON object: \
{\"song_title\", \"prompt\", \"lyrics\", \"audio_duration\", \"bpm\", \"key_scale\", \"time_signature\"}. \
The \"prompt\" field is a comma-separated style caption for a music generator. No prose outside the JSON.";

impl OpenAiCompatLlm {
    pub fn new(
        endpoint_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f64,
        max_tokens: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint_url: endpoint_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            temperature,
            max_tokens,
        }
    }

    /// Builds a client from the station's current settings, so owner-side
    /// `update-settings` changes take effect on the next generation.
    pub fn from_settings(settings: &crate::session::settings::RadioSettings) -> Self {
        Self::new(
            settings.llm_endpoint_url.clone(),
            settings.llm_model.clone(),
            settings.llm_api_key.clone(),
            settings.llm_temperature,
            settings.llm_max_tokens,
        )
    }

    fn chat_url(&self) -> String {
        let base = self.endpoint_url.trim_end_matches('/');
        if base.ends_with("/v1/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/v1/chat/completions")
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatLlm {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn is_configured(&self) -> bool {
        !self.endpoint_url.is_empty()
    }

    async fn generate(&self, request: &LlmGenerateRequest) -> Result<LlmSongData, RadioError> {
        let mut user = request.user_prompt.clone();
        if let Some(prev) = &request.previous {
            if let Ok(prev_json) = serde_json::to_string(prev) {
                user.push_str("\n\nPrevious song data: ");
                user.push_str(&prev_json);
            }
        }

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatTurn {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut req = self.http.post(self.chat_url()).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let response: Value = req.send().await?.error_for_status()?.json().await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| RadioError::Provider("LLM response missing content".to_string()))?;
        debug!("LLM raw content: {}", content);
        parse_song_data(content)
    }
}

/// Tolerates markdown fences and prose around the JSON object.
pub fn parse_song_data(content: &str) -> Result<LlmSongData, RadioError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(RadioError::Provider("no JSON object in LLM reply".to_string()));
    };
    if end < start {
        return Err(RadioError::Provider("no JSON object in LLM reply".to_string()));
    }
    Ok(serde_json::from_str(&content[start..=end])?)
}
