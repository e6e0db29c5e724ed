//! Owner-adjustable station settings and the partial-update patch applied by
//! `update-settings`.

use serde::{Deserialize, Serialize};

use crate::protocol::models::DjStyle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadioSettings {
    /// Fraction of listeners whose skip votes force a transition.
    pub skip_vote_percent: f64,
    /// Fraction of listeners needed to switch the Auto-DJ style.
    pub dj_style_vote_percent: f64,
    /// When set by the owner, style votes are rejected outright.
    pub dj_style_locked: bool,
    pub auto_dj_style: DjStyle,
    pub auto_dj_prompt: String,
    pub auto_dj_bpm_variation: bool,
    pub auto_dj_bpm_min: u32,
    pub auto_dj_bpm_max: u32,
    pub auto_dj_duration_min: u32,
    pub auto_dj_duration_max: u32,
    pub auto_dj_force_instrumental: bool,
    pub auto_dj_language: String,
    /// Request a filler song once the queue drops below this length.
    pub auto_dj_min_queue_size: usize,
    /// ...and the playing song has at most this many seconds left.
    pub auto_dj_pre_gen_seconds: u64,
    /// Seconds of fade applied by the broadcast transcoder.
    pub auto_dj_fade_in: f64,
    pub auto_dj_fade_out: f64,
    pub use_llm: bool,
    pub llm_endpoint_url: String,
    pub llm_model: String,
    /// Never serialized into public snapshots; see [`RadioSettings::sanitized`].
    #[serde(skip_serializing_if = "String::is_empty")]
    pub llm_api_key: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u32,
    pub music_provider_url: String,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            skip_vote_percent: 0.5,
            dj_style_vote_percent: 0.5,
            dj_style_locked: false,
            auto_dj_style: DjStyle::Similar,
            auto_dj_prompt: String::new(),
            auto_dj_bpm_variation: false,
            auto_dj_bpm_min: 80,
            auto_dj_bpm_max: 160,
            auto_dj_duration_min: 60,
            auto_dj_duration_max: 180,
            auto_dj_force_instrumental: false,
            auto_dj_language: String::new(),
            auto_dj_min_queue_size: 1,
            auto_dj_pre_gen_seconds: 15,
            auto_dj_fade_in: 2.0,
            auto_dj_fade_out: 3.0,
            use_llm: false,
            llm_endpoint_url: String::new(),
            llm_model: String::new(),
            llm_api_key: String::new(),
            llm_temperature: 0.7,
            llm_max_tokens: 4096,
            music_provider_url: "http://localhost:39871".to_string(),
        }
    }
}

impl RadioSettings {
    /// Copy with credentials stripped, safe for `state` snapshots and the
    /// settings REST endpoint.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        out.llm_api_key = String::new();
        out
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field {
                    self.$field = v;
                })*
            };
        }
        merge!(
            skip_vote_percent,
            dj_style_vote_percent,
            dj_style_locked,
            auto_dj_style,
            auto_dj_prompt,
            auto_dj_bpm_variation,
            auto_dj_bpm_min,
            auto_dj_bpm_max,
            auto_dj_duration_min,
            auto_dj_duration_max,
            auto_dj_force_instrumental,
            auto_dj_language,
            auto_dj_min_queue_size,
            auto_dj_pre_gen_seconds,
            auto_dj_fade_in,
            auto_dj_fade_out,
            use_llm,
            llm_endpoint_url,
            llm_model,
            llm_api_key,
            llm_temperature,
            llm_max_tokens,
            music_provider_url,
        );
    }
}

/// Partial settings update: absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub skip_vote_percent: Option<f64>,
    pub dj_style_vote_percent: Option<f64>,
    pub dj_style_locked: Option<bool>,
    pub auto_dj_style: Option<DjStyle>,
    pub auto_dj_prompt: Option<String>,
    pub auto_dj_bpm_variation: Option<bool>,
    pub auto_dj_bpm_min: Option<u32>,
    pub auto_dj_bpm_max: Option<u32>,
    pub auto_dj_duration_min: Option<u32>,
    pub auto_dj_duration_max: Option<u32>,
    pub auto_dj_force_instrumental: Option<bool>,
    pub auto_dj_language: Option<String>,
    pub auto_dj_min_queue_size: Option<usize>,
    pub auto_dj_pre_gen_seconds: Option<u64>,
    pub auto_dj_fade_in: Option<f64>,
    pub auto_dj_fade_out: Option<f64>,
    pub use_llm: Option<bool>,
    pub llm_endpoint_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_temperature: Option<f64>,
    pub llm_max_tokens: Option<u32>,
    pub music_provider_url: Option<String>,
}
