//! Auto-DJ worker: turns starved-queue signals into admission-queue jobs.
//!
//! Runs outside the session mutex. Each request optionally consults the LLM
//! provider for structured song data, builds generation params per the active
//! continuation style, and enqueues a job whose future calls the music
//! provider and feeds the finished song back into the session queue.

use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::common::{Clock, JobId};
use crate::protocol::models::{DjStyle, GenParams, LlmSongData, RadioSong, Tier};
use crate::providers::{
    HttpMusicProvider, LlmGenerateRequest, LlmProvider, MusicProvider, OpenAiCompatLlm,
};
use crate::queue::{GenerationJob, GenerationQueue};
use crate::session::RadioManager;
use crate::session::settings::RadioSettings;

/// Everything the worker needs from the session, snapshotted at request time.
#[derive(Debug, Clone)]
pub struct AutoDjRequest {
    pub settings: RadioSettings,
    pub previous: Option<RadioSong>,
}

/// Style captions used when exploring without an LLM.
const EXPLORE_POOL: &[&str] = &[
    "synthwave, retro, driving bass",
    "lo-fi hip hop, mellow, vinyl crackle",
    "uptempo house, four on the floor",
    "acoustic folk, warm, fingerpicked guitar",
    "ambient electronica, spacious pads",
    "funk, tight horns, groovy",
];

pub struct AutoDjWorker {
    pub manager: Arc<RadioManager>,
    pub gen_queue: Arc<GenerationQueue>,
    pub clock: Arc<dyn Clock>,
}

impl AutoDjWorker {
    pub fn spawn(self, rx: flume::Receiver<AutoDjRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(request) = rx.recv_async().await {
                self.handle(request).await;
            }
        })
    }

    async fn handle(&self, request: AutoDjRequest) {
        // Providers are rebuilt per request from the snapshotted settings,
        // so owner updates to endpoints and keys apply to the next song.
        let llm = OpenAiCompatLlm::from_settings(&request.settings);
        let llm_data = if request.settings.use_llm && llm.is_configured() {
            let llm_request = LlmGenerateRequest {
                user_prompt: llm_prompt(&request),
                previous: request
                    .previous
                    .as_ref()
                    .and_then(|s| s.gen_params.as_ref())
                    .and_then(|p| p.llm_data.clone()),
            };
            match llm.generate(&llm_request).await {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("LLM request failed, falling back to heuristics: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let params = build_params(&request, llm_data, &mut rand::thread_rng());
        let job_id = JobId::generate();
        info!(
            "Auto-DJ job prepared: id={} style={:?}",
            job_id, request.settings.auto_dj_style
        );

        let manager = self.manager.clone();
        let gen_queue = self.gen_queue.clone();
        let music = HttpMusicProvider::new(request.settings.music_provider_url.clone());
        let run_id = job_id.clone();
        let job = GenerationJob {
            id: job_id,
            user_id: "auto-dj".to_string(),
            tier: Tier::Unlimited,
            created_at: self.clock.now_ms(),
            run: Box::new(move || {
                Box::pin(async move {
                    let result = music.generate(&params).await;
                    gen_queue.mark_job_finished(&run_id);
                    match result {
                        Ok(song) => {
                            manager.deliver_auto_dj_song(song, Some(params));
                            Ok(())
                        }
                        Err(e) => {
                            warn!("Auto-DJ generation failed: {}", e);
                            manager.finish_auto_generating();
                            Err(e)
                        }
                    }
                })
            }),
        };
        self.gen_queue.enqueue(job);
    }
}

fn llm_prompt(request: &AutoDjRequest) -> String {
    let mut prompt = match request.settings.auto_dj_style {
        DjStyle::Explore => "Invent a song in a style unlike the previous one.".to_string(),
        DjStyle::Similar => "Write the next song, staying close to the previous style.".to_string(),
        DjStyle::Consistent => format!(
            "Write the next song for a station with this direction: {}",
            request.settings.auto_dj_prompt
        ),
    };
    if let Some(prev) = &request.previous {
        if !prev.style.is_empty() {
            prompt.push_str(&format!(" Previous style: {}.", prev.style));
        }
    }
    prompt
}

/// Pure param construction so tests can pin the policy down.
pub fn build_params<R: Rng>(
    request: &AutoDjRequest,
    llm_data: Option<LlmSongData>,
    rng: &mut R,
) -> GenParams {
    let settings = &request.settings;
    let previous_style = request
        .previous
        .as_ref()
        .map(|s| s.style.clone())
        .filter(|s| !s.is_empty());

    let style = llm_data
        .as_ref()
        .and_then(|d| d.prompt.clone())
        .or_else(|| match settings.auto_dj_style {
            DjStyle::Explore => {
                Some(EXPLORE_POOL[rng.gen_range(0..EXPLORE_POOL.len())].to_string())
            }
            DjStyle::Similar => previous_style.clone(),
            DjStyle::Consistent => {
                if settings.auto_dj_prompt.is_empty() {
                    previous_style.clone()
                } else {
                    Some(settings.auto_dj_prompt.clone())
                }
            }
        });

    let duration = llm_data.as_ref().and_then(|d| d.audio_duration).or_else(|| {
        let (min, max) = (
            settings.auto_dj_duration_min.min(settings.auto_dj_duration_max),
            settings.auto_dj_duration_max.max(settings.auto_dj_duration_min),
        );
        Some(rng.gen_range(min..=max) as f64)
    });

    let bpm = llm_data.as_ref().and_then(|d| d.bpm).or_else(|| {
        if !settings.auto_dj_bpm_variation {
            return None;
        }
        let (min, max) = (
            settings.auto_dj_bpm_min.min(settings.auto_dj_bpm_max),
            settings.auto_dj_bpm_max.max(settings.auto_dj_bpm_min),
        );
        Some(rng.gen_range(min..=max))
    });

    GenParams {
        custom_mode: false,
        song_description: None,
        lyrics: llm_data.as_ref().and_then(|d| d.lyrics.clone()),
        style,
        title: llm_data.as_ref().and_then(|d| d.song_title.clone()),
        instrumental: settings.auto_dj_force_instrumental.then_some(true),
        vocal_language: (!settings.auto_dj_language.is_empty())
            .then(|| settings.auto_dj_language.clone()),
        duration,
        bpm,
        llm_data,
    }
}
