//! Music generation collaborator: generation params → finished `RadioSong`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::common::{RadioError, SongId, now_ms};
use crate::protocol::models::{GenParams, RadioSong};

#[async_trait]
pub trait MusicProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, params: &GenParams) -> Result<RadioSong, RadioError>;
}

/// Client for the local generation service's HTTP API. The service renders
/// the audio, stores it under the shared audio dir, and reports the song
/// record back.
pub struct HttpMusicProvider {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMusicProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MusicProvider for HttpMusicProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, params: &GenParams) -> Result<RadioSong, RadioError> {
        let url = format!("{}/generate", self.base_url);
        info!("Requesting generation: url={}", url);
        let body = json!({ "params": params });
        let response: Value = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let song = response.get("song").unwrap_or(&response);
        let audio_url = song["audioUrl"]
            .as_str()
            .ok_or_else(|| RadioError::Provider("generator reply missing audioUrl".to_string()))?
            .to_string();
        let id = song["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RadioSong {
            id: SongId(id),
            title: song["title"].as_str().unwrap_or_default().to_string(),
            lyrics: song["lyrics"].as_str().unwrap_or_default().to_string(),
            style: song["style"]
                .as_str()
                .or(params.style.as_deref())
                .unwrap_or_default()
                .to_string(),
            cover_url: song["coverUrl"].as_str().unwrap_or_default().to_string(),
            audio_url,
            duration: song["duration"].as_f64().unwrap_or(0.0),
            creator: Some("Auto-DJ".to_string()),
            created_at: now_ms(),
            gen_params: Some(params.clone()),
            is_auto_dj: true,
        })
    }
}
