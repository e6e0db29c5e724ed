//! Session state machine: listener roster, queue/history, vote consensus,
//! ownership, chat, and the Auto-DJ trigger policy.
//!
//! Every public method locks the single state mutex, runs to completion, and
//! broadcasts the resulting deltas before returning; no method yields or does
//! I/O while holding the lock. The Auto-DJ worker is fed over a channel so
//! provider calls never happen under the mutex.

pub mod autodj;
pub mod settings;
pub mod state;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::common::{Clock, ListenerId, SongId};
use crate::protocol::messages::OutgoingMessage;
use crate::protocol::models::{ChatMessage, DjStyle, GenParams, PublicState, RadioSong};
use crate::session::autodj::AutoDjRequest;
use crate::session::settings::{RadioSettings, SettingsPatch};
use crate::session::state::{Listener, RadioState};

/// Bounded-buffer capacities, set from config.
#[derive(Debug, Clone, Copy)]
pub struct RadioLimits {
    pub history: usize,
    pub chat: usize,
}

impl Default for RadioLimits {
    fn default() -> Self {
        Self {
            history: 50,
            chat: 100,
        }
    }
}

pub struct RadioManager {
    state: Mutex<RadioState>,
    clock: Arc<dyn Clock>,
    owner_secret: String,
    limits: RadioLimits,
    autodj_tx: flume::Sender<AutoDjRequest>,
}

impl RadioManager {
    /// Returns the manager plus the receiving end of the Auto-DJ request
    /// channel, to be handed to [`autodj::AutoDjWorker::spawn`].
    pub fn new(
        settings: RadioSettings,
        owner_secret: String,
        limits: RadioLimits,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, flume::Receiver<AutoDjRequest>) {
        let (autodj_tx, autodj_rx) = flume::unbounded();
        let manager = Arc::new(Self {
            state: Mutex::new(RadioState::new(settings)),
            clock,
            owner_secret,
            limits,
            autodj_tx,
        });
        (manager, autodj_rx)
    }

    // ---- roster ----

    pub fn join(&self, name: &str, sink: flume::Sender<String>) -> ListenerId {
        let id = ListenerId::generate();
        let mut state = self.state.lock();
        let name = if name.trim().is_empty() {
            "Anonymous".to_string()
        } else {
            name.trim().to_string()
        };
        info!("Listener joined: id={} name={}", id, name);
        state.listeners.insert(
            id.clone(),
            Listener {
                id: id.clone(),
                name,
                sink: sink.clone(),
            },
        );
        self.broadcast_roster(&state);
        self.broadcast_vote_counts(&state);
        // Full snapshot straight to the newcomer.
        if let Ok(json) = serde_json::to_string(&OutgoingMessage::State(self.snapshot(&state))) {
            let _ = sink.send(json);
        }
        id
    }

    pub fn leave(&self, id: &ListenerId) {
        let mut state = self.state.lock();
        if state.listeners.remove(id).is_none() {
            return;
        }
        info!("Listener left: id={}", id);
        state.purge_votes(id);
        self.broadcast_roster(&state);
        self.broadcast_vote_counts(&state);
        // Remaining votes count against the smaller denominator; the
        // threshold may now be satisfied.
        self.check_skip_threshold(&mut state);
    }

    // ---- votes ----

    /// Returns `(voted, skipped)`: whether the vote was recorded at all, and
    /// whether it crossed the threshold and skipped the song.
    pub fn vote_skip(&self, id: &ListenerId) -> (bool, bool) {
        let mut state = self.state.lock();
        if state.current_song.is_none() || !state.listeners.contains_key(id) {
            return (false, false);
        }
        state.skip_votes.insert(id.clone());
        let votes = state.skip_votes.len();
        let required = state.skip_votes_required();
        debug!("Skip vote: id={} votes={} required={}", id, votes, required);
        self.broadcast(
            &state,
            &OutgoingMessage::SkipVotesUpdate { votes, required },
        );
        let skipped = self.check_skip_threshold(&mut state);
        (true, skipped)
    }

    fn check_skip_threshold(&self, state: &mut RadioState) -> bool {
        if state.skip_pending
            || state.current_song.is_none()
            || state.skip_votes.is_empty()
            || state.skip_votes.len() < state.skip_votes_required()
        {
            return false;
        }
        state.skip_pending = true;
        self.broadcast(
            state,
            &OutgoingMessage::SkipPending {
                pending: true,
                message: "Vote passed, skipping...".to_string(),
            },
        );
        self.advance(state);
        true
    }

    pub fn vote_dj_style(&self, id: &ListenerId, style: DjStyle) -> bool {
        let mut state = self.state.lock();
        if !state.listeners.contains_key(id) {
            return false;
        }
        if state.settings.dj_style_locked {
            debug!("Style vote rejected (locked): id={}", id);
            return false;
        }
        // A listener holds at most one style vote; re-voting moves it.
        for votes in state.dj_style_votes.values_mut() {
            votes.remove(id);
        }
        state
            .dj_style_votes
            .entry(style)
            .or_default()
            .insert(id.clone());

        let required = state.dj_style_votes_required();
        let count = state.dj_style_votes.get(&style).map_or(0, |v| v.len());
        if count >= required {
            info!("DJ style consensus reached: style={:?}", style);
            state.settings.auto_dj_style = style;
            state.dj_style_votes.clear();
            self.broadcast(
                &state,
                &OutgoingMessage::SettingsUpdate {
                    settings: state.settings.sanitized(),
                },
            );
        }
        self.broadcast(
            &state,
            &OutgoingMessage::DjStyleVotesUpdate {
                votes: state.dj_vote_counts(),
                required,
            },
        );
        true
    }

    // ---- ownership ----

    /// Last correct claim wins; repeated correct claims are idempotent.
    pub fn claim_owner(&self, id: &ListenerId, secret: &str) -> bool {
        let mut state = self.state.lock();
        if secret != self.owner_secret || !state.listeners.contains_key(id) {
            warn!("Owner claim rejected: id={}", id);
            return false;
        }
        if state.owner_id.as_ref() != Some(id) {
            info!("Owner changed: id={}", id);
            state.owner_id = Some(id.clone());
            self.broadcast(
                &state,
                &OutgoingMessage::OwnerChange {
                    owner_id: state.owner_id.clone(),
                },
            );
        }
        true
    }

    pub fn is_owner(&self, id: &ListenerId) -> bool {
        self.state.lock().owner_id.as_ref() == Some(id)
    }

    pub fn owner_skip(&self, id: &ListenerId) -> bool {
        let mut state = self.state.lock();
        if state.owner_id.as_ref() != Some(id) {
            return false;
        }
        info!("Owner skip: id={}", id);
        self.advance(&mut state);
        true
    }

    pub fn update_settings(&self, patch: SettingsPatch) {
        let mut state = self.state.lock();
        state.settings.apply(patch);
        self.broadcast(
            &state,
            &OutgoingMessage::SettingsUpdate {
                settings: state.settings.sanitized(),
            },
        );
    }

    pub fn settings(&self) -> RadioSettings {
        self.state.lock().settings.clone()
    }

    // ---- queue ----

    /// Appends a song; user submissions go ahead of Auto-DJ filler. When
    /// nothing is playing the head of the queue is promoted immediately.
    /// Returns the song's 1-based queue position (0 if promoted).
    pub fn add_to_queue(
        &self,
        song: RadioSong,
        gen_params: Option<GenParams>,
        user_generated: bool,
    ) -> usize {
        let mut state = self.state.lock();
        self.enqueue_locked(&mut state, song, gen_params, user_generated)
    }

    fn enqueue_locked(
        &self,
        state: &mut RadioState,
        mut song: RadioSong,
        gen_params: Option<GenParams>,
        user_generated: bool,
    ) -> usize {
        if gen_params.is_some() {
            song.gen_params = gen_params;
        }
        song.is_auto_dj = !user_generated;
        let song = song.normalized(self.clock.now_ms());
        info!(
            "Queued song: id={} title={} autoDj={}",
            song.id, song.title, song.is_auto_dj
        );

        let position = if user_generated {
            let pos = state.user_insert_position();
            state.queue.insert(pos, song);
            pos + 1
        } else {
            state.queue.push(song);
            state.queue.len()
        };
        self.broadcast(
            state,
            &OutgoingMessage::QueueUpdate {
                queue: state.queue.clone(),
            },
        );
        if state.current_song.is_none() {
            self.advance(state);
            return 0;
        }
        position
    }

    /// Copies a historical song back into the queue; history keeps its record.
    pub fn requeue_from_history(&self, song_id: &SongId, listener_id: &ListenerId) -> bool {
        let mut state = self.state.lock();
        if !state.listeners.contains_key(listener_id) {
            return false;
        }
        let Some(song) = state.find_in_history(song_id).cloned() else {
            return false;
        };
        info!("Requeue from history: song={} by={}", song_id, listener_id);
        let params = song.gen_params.clone();
        self.enqueue_locked(&mut state, song, params, true);
        true
    }

    // ---- chat ----

    pub fn broadcast_chat(&self, id: &ListenerId, text: &str) {
        let mut state = self.state.lock();
        let Some(listener) = state.listeners.get(id) else {
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: id.clone(),
            sender_name: listener.name.clone(),
            message: text.to_string(),
            timestamp: self.clock.now_ms(),
        };
        self.broadcast(&state, &OutgoingMessage::ChatMessage(message.clone()));
        let cap = self.limits.chat;
        state.push_chat(message, cap);
    }

    // ---- playback ----

    /// Move the current song to history, promote the queue head, reset the
    /// playback clock, clear skip votes. Called by the transcoder on natural
    /// completion and by skip paths.
    pub fn play_next(&self) {
        let mut state = self.state.lock();
        self.advance(&mut state);
    }

    fn advance(&self, state: &mut RadioState) {
        let history_cap = self.limits.history;
        if let Some(finished) = state.current_song.take() {
            state.push_history(finished, history_cap);
            self.broadcast(
                state,
                &OutgoingMessage::HistoryUpdate {
                    history: state.history.iter().cloned().collect(),
                },
            );
        }

        state.current_song = if state.queue.is_empty() {
            None
        } else {
            Some(state.queue.remove(0))
        };
        state.playback_start_time = self.clock.now_ms();
        state.skip_votes.clear();

        match &state.current_song {
            Some(song) => info!("Now playing: id={} title={}", song.id, song.title),
            None => info!("Queue empty, station idle"),
        }

        self.broadcast(
            state,
            &OutgoingMessage::SongChange {
                song: state.current_song.clone(),
                start_time: state.playback_start_time,
            },
        );
        self.broadcast(
            state,
            &OutgoingMessage::QueueUpdate {
                queue: state.queue.clone(),
            },
        );
        self.broadcast(
            state,
            &OutgoingMessage::SkipVotesUpdate {
                votes: 0,
                required: state.skip_votes_required(),
            },
        );
        if state.skip_pending {
            state.skip_pending = false;
            self.broadcast(
                state,
                &OutgoingMessage::SkipPending {
                    pending: false,
                    message: String::new(),
                },
            );
        }
        self.maybe_request_auto_dj(state);
    }

    // ---- Auto-DJ policy ----

    /// Fires at most one generation request while the queue is starved: the
    /// queue is below the configured minimum and the playing song (if any)
    /// is inside the pre-generation window.
    fn maybe_request_auto_dj(&self, state: &mut RadioState) {
        if state.auto_generating {
            return;
        }
        if state.queue.len() >= state.settings.auto_dj_min_queue_size {
            return;
        }
        let due = match &state.current_song {
            None => true,
            Some(song) => {
                let elapsed_secs =
                    self.clock.now_ms().saturating_sub(state.playback_start_time) as f64 / 1000.0;
                let duration = if song.duration > 0.0 {
                    song.duration
                } else {
                    180.0
                };
                duration - elapsed_secs <= state.settings.auto_dj_pre_gen_seconds as f64
            }
        };
        if !due {
            return;
        }
        state.auto_generating = true;
        info!("Auto-DJ generation requested (queue={})", state.queue.len());
        self.broadcast(state, &OutgoingMessage::AutoGenerating { is_generating: true });
        let request = AutoDjRequest {
            settings: state.settings.clone(),
            previous: state
                .current_song
                .clone()
                .or_else(|| state.history.back().cloned()),
        };
        if self.autodj_tx.send(request).is_err() {
            // No worker attached (tests, shutdown). Clear so polling retries.
            state.auto_generating = false;
        }
    }

    /// Periodic tick: re-evaluate the Auto-DJ window against the clock.
    pub fn poll_auto_dj(&self) {
        let mut state = self.state.lock();
        self.maybe_request_auto_dj(&mut state);
    }

    /// Hands a finished Auto-DJ song to the session. Enqueueing and clearing
    /// the generation flag happen under one lock so a concurrent poll never
    /// observes a cleared flag against a still-starved queue.
    pub fn deliver_auto_dj_song(&self, song: RadioSong, gen_params: Option<GenParams>) {
        let mut state = self.state.lock();
        self.enqueue_locked(&mut state, song, gen_params, false);
        if state.auto_generating {
            state.auto_generating = false;
            self.broadcast(
                &state,
                &OutgoingMessage::AutoGenerating {
                    is_generating: false,
                },
            );
        }
    }

    /// Called by the Auto-DJ worker when its job failed and produced nothing.
    pub fn finish_auto_generating(&self) {
        let mut state = self.state.lock();
        if state.auto_generating {
            state.auto_generating = false;
            self.broadcast(
                &state,
                &OutgoingMessage::AutoGenerating {
                    is_generating: false,
                },
            );
        }
    }

    // ---- snapshots ----

    pub fn get_public_state(&self) -> PublicState {
        let state = self.state.lock();
        self.snapshot(&state)
    }

    fn snapshot(&self, state: &RadioState) -> PublicState {
        PublicState {
            current_song: state.current_song.clone(),
            playback_start_time: state.playback_start_time,
            queue: state.queue.clone(),
            history: state.history.iter().cloned().collect(),
            listeners: state.public_listeners(),
            listener_count: state.listeners.len(),
            skip_votes: state.skip_votes.len(),
            skip_votes_required: state.skip_votes_required(),
            dj_style_votes: state.dj_vote_counts(),
            dj_style_votes_required: state.dj_style_votes_required(),
            owner_id: state.owner_id.clone(),
            is_auto_generating: state.auto_generating,
            settings: state.settings.sanitized(),
            chat: state.chat.iter().cloned().collect(),
        }
    }

    /// What the broadcast transcoder polls.
    pub fn now_playing(&self) -> Option<RadioSong> {
        self.state.lock().current_song.clone()
    }

    /// (fade_in, fade_out) seconds for the transcode filter.
    pub fn fade_seconds(&self) -> (f64, f64) {
        let state = self.state.lock();
        (
            state.settings.auto_dj_fade_in,
            state.settings.auto_dj_fade_out,
        )
    }

    // ---- fan-out ----

    fn broadcast(&self, state: &RadioState, msg: &OutgoingMessage) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        for listener in state.listeners.values() {
            // A dead sink just means the socket task is gone; `leave` will
            // prune the roster.
            let _ = listener.sink.send(json.clone());
        }
    }

    fn broadcast_roster(&self, state: &RadioState) {
        self.broadcast(
            state,
            &OutgoingMessage::ListenersUpdate {
                listeners: state.public_listeners(),
                count: state.listeners.len(),
            },
        );
    }

    fn broadcast_vote_counts(&self, state: &RadioState) {
        self.broadcast(
            state,
            &OutgoingMessage::SkipVotesUpdate {
                votes: state.skip_votes.len(),
                required: state.skip_votes_required(),
            },
        );
        self.broadcast(
            state,
            &OutgoingMessage::DjStyleVotesUpdate {
                votes: state.dj_vote_counts(),
                required: state.dj_style_votes_required(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;

    fn manager() -> (Arc<RadioManager>, flume::Receiver<AutoDjRequest>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (mgr, rx) = RadioManager::new(
            RadioSettings::default(),
            "test-secret".to_string(),
            RadioLimits::default(),
            clock.clone(),
        );
        (mgr, rx, clock)
    }

    fn join(mgr: &RadioManager, name: &str) -> (ListenerId, flume::Receiver<String>) {
        let (tx, rx) = flume::unbounded();
        let id = mgr.join(name, tx);
        (id, rx)
    }

    fn song(id: &str) -> RadioSong {
        RadioSong {
            id: id.into(),
            title: id.to_string(),
            lyrics: String::new(),
            style: "synthwave".to_string(),
            cover_url: String::new(),
            audio_url: format!("/audio/{id}.mp3"),
            duration: 120.0,
            creator: None,
            created_at: 0,
            gen_params: None,
            is_auto_dj: false,
        }
    }

    fn events_of(rx: &flume::Receiver<String>, kind: &str) -> Vec<serde_json::Value> {
        rx.drain()
            .filter_map(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
            .filter(|v| v["type"] == kind)
            .collect()
    }

    #[test]
    fn test_skip_required_formula() {
        let (mgr, _rx, _clock) = manager();
        let mut sinks = Vec::new();
        for n in 1..=10usize {
            sinks.push(join(&mgr, &format!("l{n}")));
            let required = mgr.get_public_state().skip_votes_required;
            assert_eq!(required, ((n as f64 * 0.5).ceil() as usize).max(1));
        }
    }

    #[test]
    fn test_vote_skip_consensus_with_three_listeners() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (b, _rb) = join(&mgr, "b");
        let (_c, _rc) = join(&mgr, "c");
        mgr.add_to_queue(song("one"), None, true);
        mgr.add_to_queue(song("two"), None, true);

        assert_eq!(mgr.vote_skip(&a), (true, false));
        assert_eq!(mgr.vote_skip(&b), (true, true));

        let state = mgr.get_public_state();
        assert_eq!(state.skip_votes, 0);
        assert_eq!(&*state.current_song.unwrap().id, "two");
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_skip_to_empty_queue_yields_null_song() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        mgr.add_to_queue(song("only"), None, true);
        assert_eq!(mgr.vote_skip(&a), (true, true));
        let state = mgr.get_public_state();
        assert!(state.current_song.is_none());
        assert_eq!(state.skip_votes, 0);
    }

    #[test]
    fn test_duplicate_votes_do_not_double_count() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (_b, _rb) = join(&mgr, "b");
        let (_c, _rc) = join(&mgr, "c");
        mgr.add_to_queue(song("one"), None, true);
        assert_eq!(mgr.vote_skip(&a), (true, false));
        assert_eq!(mgr.vote_skip(&a), (true, false));
        assert_eq!(mgr.get_public_state().skip_votes, 1);
    }

    #[test]
    fn test_leave_shrinks_denominator_and_fires_skip() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (_b, _rb) = join(&mgr, "b");
        let (c, _rc) = join(&mgr, "c");
        mgr.add_to_queue(song("one"), None, true);
        mgr.add_to_queue(song("two"), None, true);

        assert_eq!(mgr.vote_skip(&a), (true, false)); // 1 of 2 required
        mgr.leave(&c); // N=2, required=1, existing vote now suffices
        let state = mgr.get_public_state();
        assert_eq!(&*state.current_song.unwrap().id, "two");
    }

    #[test]
    fn test_vote_from_unknown_listener_rejected() {
        let (mgr, _adj, _clock) = manager();
        let (_a, _ra) = join(&mgr, "a");
        mgr.add_to_queue(song("one"), None, true);
        assert_eq!(mgr.vote_skip(&ListenerId::generate()), (false, false));
        assert_eq!(mgr.get_public_state().skip_votes, 0);
    }

    #[test]
    fn test_vote_skip_not_recorded_without_current_song() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        assert_eq!(mgr.vote_skip(&a), (false, false));
        assert_eq!(mgr.get_public_state().skip_votes, 0);
    }

    #[test]
    fn test_owner_claim_requires_secret_and_transfers() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (b, _rb) = join(&mgr, "b");

        assert!(!mgr.claim_owner(&a, "wrong"));
        assert!(!mgr.is_owner(&a));

        assert!(mgr.claim_owner(&a, "test-secret"));
        assert!(mgr.is_owner(&a));

        // Last correct claim wins.
        assert!(mgr.claim_owner(&b, "test-secret"));
        assert!(mgr.is_owner(&b));
        assert!(!mgr.is_owner(&a));
    }

    #[test]
    fn test_owner_skip_bypasses_threshold() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (b, _rb) = join(&mgr, "b");
        mgr.add_to_queue(song("one"), None, true);
        mgr.add_to_queue(song("two"), None, true);

        assert!(!mgr.owner_skip(&b)); // not owner, no mutation
        assert_eq!(&*mgr.get_public_state().current_song.unwrap().id, "one");

        assert!(mgr.claim_owner(&a, "test-secret"));
        assert!(mgr.owner_skip(&a));
        assert_eq!(&*mgr.get_public_state().current_song.unwrap().id, "two");
    }

    #[test]
    fn test_user_song_enqueued_ahead_of_auto_dj_filler() {
        let (mgr, _adj, _clock) = manager();
        mgr.add_to_queue(song("playing"), None, true); // promoted
        mgr.add_to_queue(song("filler"), None, false);
        mgr.add_to_queue(song("user"), None, true);

        let queue = mgr.get_public_state().queue;
        assert_eq!(&*queue[0].id, "user");
        assert_eq!(&*queue[1].id, "filler");
        assert!(queue[1].is_auto_dj);
    }

    #[test]
    fn test_add_to_empty_station_promotes_immediately() {
        let (mgr, _adj, clock) = manager();
        clock.advance_ms(5_000);
        mgr.add_to_queue(song("first"), None, true);
        let state = mgr.get_public_state();
        assert_eq!(&*state.current_song.unwrap().id, "first");
        assert!(state.queue.is_empty());
        assert_eq!(state.playback_start_time, 1_005_000);
    }

    #[test]
    fn test_requeue_copies_from_history() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        mgr.add_to_queue(song("old"), None, true);
        mgr.play_next(); // "old" -> history, station idle

        assert!(mgr.requeue_from_history(&"old".into(), &a));
        let state = mgr.get_public_state();
        // Copy, not move: history keeps the record.
        assert_eq!(state.history.len(), 1);
        assert_eq!(&*state.current_song.unwrap().id, "old");

        assert!(!mgr.requeue_from_history(&"missing".into(), &a));
    }

    #[test]
    fn test_dj_style_consensus_switches_and_resets() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (b, _rb) = join(&mgr, "b");
        let (_c, _rc) = join(&mgr, "c");

        assert!(mgr.vote_dj_style(&a, DjStyle::Explore));
        let state = mgr.get_public_state();
        assert_eq!(state.dj_style_votes.get(&DjStyle::Explore), Some(&1));
        assert_eq!(state.settings.auto_dj_style, DjStyle::Similar);

        assert!(mgr.vote_dj_style(&b, DjStyle::Explore));
        let state = mgr.get_public_state();
        assert_eq!(state.settings.auto_dj_style, DjStyle::Explore);
        assert!(state.dj_style_votes.is_empty());
    }

    #[test]
    fn test_dj_style_vote_rejected_when_locked() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        mgr.update_settings(SettingsPatch {
            dj_style_locked: Some(true),
            ..Default::default()
        });
        assert!(!mgr.vote_dj_style(&a, DjStyle::Explore));
        assert!(mgr.get_public_state().dj_style_votes.is_empty());
    }

    #[test]
    fn test_revote_moves_single_style_vote() {
        let (mgr, _adj, _clock) = manager();
        let (a, _ra) = join(&mgr, "a");
        let (_b, _rb) = join(&mgr, "b");
        let (_c, _rc) = join(&mgr, "c");
        assert!(mgr.vote_dj_style(&a, DjStyle::Explore));
        assert!(mgr.vote_dj_style(&a, DjStyle::Consistent));
        let votes = mgr.get_public_state().dj_style_votes;
        assert_eq!(votes.get(&DjStyle::Explore), None);
        assert_eq!(votes.get(&DjStyle::Consistent), Some(&1));
    }

    #[test]
    fn test_auto_dj_requested_exactly_once() {
        let (mgr, adj_rx, clock) = manager();
        mgr.add_to_queue(song("playing"), None, true); // 120 s long, queue now empty

        // Far from the end: no request.
        mgr.poll_auto_dj();
        assert!(adj_rx.try_recv().is_err());

        // 110 s in, 10 s remaining <= 15 s pre-gen window.
        clock.advance_ms(110_000);
        mgr.poll_auto_dj();
        let req = adj_rx.try_recv().expect("one auto-dj request");
        assert_eq!(&*req.previous.unwrap().id, "playing");

        // Subsequent polls must not duplicate while the job is outstanding.
        mgr.poll_auto_dj();
        mgr.poll_auto_dj();
        assert!(adj_rx.try_recv().is_err());

        // Job resolves: flag clears, a new window may fire again.
        mgr.deliver_auto_dj_song(song("generated"), None);
        assert!(!mgr.get_public_state().is_auto_generating);
    }

    #[test]
    fn test_auto_dj_delivery_stocks_queue_before_clearing_flag() {
        let (mgr, adj_rx, clock) = manager();
        mgr.add_to_queue(song("playing"), None, true);
        clock.advance_ms(110_000);
        mgr.poll_auto_dj();
        assert!(adj_rx.try_recv().is_ok());

        mgr.deliver_auto_dj_song(song("generated"), None);
        let state = mgr.get_public_state();
        assert!(!state.is_auto_generating);
        assert_eq!(state.queue.len(), 1);

        // The delivered song satisfies the low-water mark; no duplicate.
        mgr.poll_auto_dj();
        assert!(adj_rx.try_recv().is_err());
    }

    #[test]
    fn test_auto_dj_skipped_when_queue_is_stocked() {
        let (mgr, adj_rx, clock) = manager();
        mgr.add_to_queue(song("playing"), None, true);
        mgr.add_to_queue(song("next"), None, true);
        clock.advance_ms(115_000);
        mgr.poll_auto_dj();
        assert!(adj_rx.try_recv().is_err());
    }

    #[test]
    fn test_chat_broadcast_and_bounded_buffer() {
        let clock = Arc::new(ManualClock::new(0));
        let (mgr, _adj) = RadioManager::new(
            RadioSettings::default(),
            "s".to_string(),
            RadioLimits {
                history: 50,
                chat: 3,
            },
            clock,
        );
        let (a, ra) = join(&mgr, "alice");
        let (_b, rb) = join(&mgr, "bob");
        ra.drain().count();
        rb.drain().count();

        for i in 0..5 {
            mgr.broadcast_chat(&a, &format!("msg {i}"));
        }
        mgr.broadcast_chat(&a, "   "); // whitespace-only is dropped

        assert_eq!(events_of(&ra, "chat-message").len(), 5);
        assert_eq!(events_of(&rb, "chat-message").len(), 5);
        let chat = mgr.get_public_state().chat;
        assert_eq!(chat.len(), 3);
        assert_eq!(chat[0].message, "msg 2");
        assert_eq!(chat[0].sender_name, "alice");
    }

    #[test]
    fn test_song_change_broadcast_on_advance() {
        let (mgr, _adj, _clock) = manager();
        let (_a, ra) = join(&mgr, "a");
        ra.drain().count();
        mgr.add_to_queue(song("one"), None, true);
        let changes = events_of(&ra, "song-change");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["payload"]["song"]["id"], "one");
    }

    #[test]
    fn test_public_state_hides_credentials() {
        let (mgr, _adj, _clock) = manager();
        mgr.update_settings(SettingsPatch {
            llm_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        });
        let json = serde_json::to_value(mgr.get_public_state()).unwrap();
        assert!(json["settings"].get("llmApiKey").is_none());
        // but the live settings keep it for the Auto-DJ worker
        assert_eq!(mgr.settings().llm_api_key, "sk-secret");
    }
}
