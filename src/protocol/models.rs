//! Wire-level data model: songs, listeners, chat, generation parameters.
//!
//! Everything here serializes camelCase, matching what the web client and the
//! external generation pipeline exchange.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::{ListenerId, SongId};
use crate::session::settings::RadioSettings;

/// A song on the canonical timeline. Immutable once created; queue and
/// history hold clones of the same logical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioSong {
    pub id: SongId,
    pub title: String,
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub cover_url: String,
    pub audio_url: String,
    /// Seconds. 0 when the generator did not report one.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Unix millis.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_params: Option<GenParams>,
    #[serde(default)]
    pub is_auto_dj: bool,
}

impl RadioSong {
    /// Fill in the defaults the external pipeline is allowed to omit.
    pub fn normalized(mut self, now_ms: u64) -> Self {
        if self.title.is_empty() {
            self.title = "Untitled".to_string();
        }
        if self.cover_url.is_empty() {
            self.cover_url = format!("https://picsum.photos/seed/{}/400/400", self.id);
        }
        if self.created_at == 0 {
            self.created_at = now_ms;
        }
        self
    }
}

/// The parameters a song was generated with. Carried along so Auto-DJ can
/// continue from the previous song's prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenParams {
    #[serde(default)]
    pub custom_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumental: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocal_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_data: Option<LlmSongData>,
}

/// What an LLM provider returns for a free-text prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSongData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_title: Option<String>,
    /// Maps to caption/style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_scale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<String>,
}

/// Auto-DJ continuation style, decided by listener vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DjStyle {
    Explore,
    Similar,
    Consistent,
}

impl DjStyle {
    pub const ALL: [DjStyle; 3] = [DjStyle::Explore, DjStyle::Similar, DjStyle::Consistent];
}

/// Scheduling tier for generation jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Unlimited,
}

impl Tier {
    /// Base priority weight; aging is added on top so lower tiers are never
    /// starved.
    pub fn weight(self) -> f64 {
        match self {
            Tier::Free => 1.0,
            Tier::Pro => 5.0,
            Tier::Unlimited => 10.0,
        }
    }
}

/// Public roster entry. The outgoing sink never leaves the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicListener {
    pub id: ListenerId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: ListenerId,
    pub sender_name: String,
    pub message: String,
    pub timestamp: u64,
}

/// Sanitized full snapshot sent on connect and on `get-state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicState {
    pub current_song: Option<RadioSong>,
    pub playback_start_time: u64,
    pub queue: Vec<RadioSong>,
    pub history: Vec<RadioSong>,
    pub listeners: Vec<PublicListener>,
    pub listener_count: usize,
    pub skip_votes: usize,
    pub skip_votes_required: usize,
    pub dj_style_votes: HashMap<DjStyle, usize>,
    pub dj_style_votes_required: usize,
    pub owner_id: Option<ListenerId>,
    pub is_auto_generating: bool,
    pub settings: RadioSettings,
    pub chat: Vec<ChatMessage>,
}
