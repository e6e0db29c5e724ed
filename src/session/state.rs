//! Canonical session state and the pure helpers over it.
//!
//! One instance lives behind the manager's mutex; nothing here does I/O.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::common::{ListenerId, SongId};
use crate::protocol::models::{ChatMessage, DjStyle, PublicListener, RadioSong};
use crate::session::settings::RadioSettings;

/// A connected participant. The sink carries serialized outgoing frames; the
/// WebSocket layer drains it into the socket.
pub struct Listener {
    pub id: ListenerId,
    pub name: String,
    pub sink: flume::Sender<String>,
}

pub struct RadioState {
    pub current_song: Option<RadioSong>,
    /// Unix millis at the moment the current song was promoted. Clients use
    /// this as the playback clock for advisory drift correction.
    pub playback_start_time: u64,
    pub queue: Vec<RadioSong>,
    pub history: VecDeque<RadioSong>,
    pub listeners: HashMap<ListenerId, Listener>,
    pub skip_votes: HashSet<ListenerId>,
    pub dj_style_votes: HashMap<DjStyle, HashSet<ListenerId>>,
    pub owner_id: Option<ListenerId>,
    pub settings: RadioSettings,
    pub chat: VecDeque<ChatMessage>,
    /// Guards the window between a skip decision and the completed
    /// transition so one threshold crossing is never processed twice.
    pub skip_pending: bool,
    /// True while an Auto-DJ generation request is outstanding.
    pub auto_generating: bool,
}

impl RadioState {
    pub fn new(settings: RadioSettings) -> Self {
        Self {
            current_song: None,
            playback_start_time: 0,
            queue: Vec::new(),
            history: VecDeque::new(),
            listeners: HashMap::new(),
            skip_votes: HashSet::new(),
            dj_style_votes: HashMap::new(),
            owner_id: None,
            settings,
            chat: VecDeque::new(),
            skip_pending: false,
            auto_generating: false,
        }
    }

    /// `max(1, ceil(N * percent))`: always at least one vote, even with an
    /// empty roster.
    fn votes_required(&self, percent: f64) -> usize {
        let n = self.listeners.len() as f64;
        ((n * percent).ceil() as usize).max(1)
    }

    pub fn skip_votes_required(&self) -> usize {
        self.votes_required(self.settings.skip_vote_percent)
    }

    pub fn dj_style_votes_required(&self) -> usize {
        self.votes_required(self.settings.dj_style_vote_percent)
    }

    /// User-submitted songs always land ahead of the contiguous Auto-DJ
    /// filler run.
    pub fn user_insert_position(&self) -> usize {
        self.queue
            .iter()
            .position(|s| s.is_auto_dj)
            .unwrap_or(self.queue.len())
    }

    pub fn push_history(&mut self, song: RadioSong, cap: usize) {
        self.history.push_back(song);
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    pub fn push_chat(&mut self, message: ChatMessage, cap: usize) {
        self.chat.push_back(message);
        while self.chat.len() > cap {
            self.chat.pop_front();
        }
    }

    /// Drop every vote cast by `id` (used when the listener disconnects, to
    /// keep vote sets subsets of the roster).
    pub fn purge_votes(&mut self, id: &ListenerId) {
        self.skip_votes.remove(id);
        for votes in self.dj_style_votes.values_mut() {
            votes.remove(id);
        }
    }

    pub fn dj_vote_counts(&self) -> HashMap<DjStyle, usize> {
        self.dj_style_votes
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(style, v)| (*style, v.len()))
            .collect()
    }

    pub fn public_listeners(&self) -> Vec<PublicListener> {
        let mut out: Vec<PublicListener> = self
            .listeners
            .values()
            .map(|l| PublicListener {
                id: l.id.clone(),
                name: l.name.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        out
    }

    pub fn find_in_history(&self, song_id: &SongId) -> Option<&RadioSong> {
        self.history.iter().find(|s| &s.id == song_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, auto_dj: bool) -> RadioSong {
        RadioSong {
            id: id.into(),
            title: id.to_string(),
            lyrics: String::new(),
            style: String::new(),
            cover_url: String::new(),
            audio_url: format!("/audio/{id}.mp3"),
            duration: 120.0,
            creator: None,
            created_at: 0,
            gen_params: None,
            is_auto_dj: auto_dj,
        }
    }

    #[test]
    fn test_votes_required_minimum_one() {
        let state = RadioState::new(RadioSettings::default());
        assert_eq!(state.skip_votes_required(), 1);
    }

    #[test]
    fn test_user_insert_position_skips_ahead_of_filler() {
        let mut state = RadioState::new(RadioSettings::default());
        state.queue.push(song("u1", false));
        state.queue.push(song("a1", true));
        state.queue.push(song("a2", true));
        assert_eq!(state.user_insert_position(), 1);
    }

    #[test]
    fn test_history_ring_drops_oldest() {
        let mut state = RadioState::new(RadioSettings::default());
        for i in 0..5 {
            state.push_history(song(&format!("s{i}"), false), 3);
        }
        assert_eq!(state.history.len(), 3);
        assert_eq!(&*state.history.front().unwrap().id, "s2");
    }
}
