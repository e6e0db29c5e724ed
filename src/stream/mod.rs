//! Audio broadcast pipeline: one continuously-transcoded stream fanned out to
//! every connected client.
//!
//! A poll loop watches the session's current song. On change it kills any
//! in-flight ffmpeg process and starts a new real-time transcode; every
//! stdout chunk goes verbatim to every registered sink. Natural completion
//! (exit 0) advances the session; abnormal exit stalls broadcasting until the
//! session's song changes again.

pub mod fanout;
pub mod transcoder;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tracing::{info, warn};

use crate::common::SongId;
use crate::protocol::models::RadioSong;
use crate::providers::SongStorage;
use crate::session::RadioManager;
use crate::stream::fanout::FanOut;
use crate::stream::transcoder::Transcode;

/// Buffered chunks per client before it counts as stalled (~8 KiB reads,
/// so roughly two seconds of 128 kbps audio).
const CLIENT_BUFFER_CHUNKS: usize = 256;
const READ_BUF_SIZE: usize = 8192;

pub struct Broadcaster {
    fanout: FanOut,
    manager: Arc<RadioManager>,
    storage: Arc<dyn SongStorage>,
    poll_interval: Duration,
}

impl Broadcaster {
    pub fn new(
        manager: Arc<RadioManager>,
        storage: Arc<dyn SongStorage>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            fanout: FanOut::new(CLIENT_BUFFER_CHUNKS),
            manager,
            storage,
            poll_interval,
        })
    }

    pub fn add_client(&self, id: impl Into<String>) -> flume::Receiver<Bytes> {
        self.fanout.add_client(id)
    }

    pub fn remove_client(&self, id: &str) {
        self.fanout.remove_client(id);
    }

    pub fn client_count(&self) -> usize {
        self.fanout.client_count()
    }

    /// Song-change poll loop. Runs for the process lifetime.
    pub async fn run(self: Arc<Self>) {
        info!("Broadcast loop started (poll={:?})", self.poll_interval);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut current_id: Option<SongId> = None;
        let mut active: Option<Transcode> = None;

        loop {
            interval.tick().await;

            // Reap a finished transcode before looking for changes.
            if let Some(transcode) = active.as_mut() {
                if let Some(status) = transcode.try_finished() {
                    active = None;
                    if status.success() {
                        info!("Song finished, advancing");
                        current_id = None;
                        self.manager.play_next();
                    } else {
                        // Stall condition: keep current_id so the same song
                        // is not respawned; recovery comes from the next
                        // session-side transition.
                        warn!("Transcoder exited abnormally: status={}", status);
                    }
                }
            }

            match self.manager.now_playing() {
                Some(song) if current_id.as_ref() != Some(&song.id) => {
                    if let Some(transcode) = active.take() {
                        transcode.stop().await;
                    }
                    current_id = Some(song.id.clone());
                    match self.start_stream(&song) {
                        Ok(transcode) => active = Some(transcode),
                        Err(e) => warn!("Cannot stream song: id={} err={}", song.id, e),
                    }
                }
                None if current_id.is_some() => {
                    info!("No song playing, stopping stream");
                    current_id = None;
                    if let Some(transcode) = active.take() {
                        transcode.stop().await;
                    }
                }
                _ => {}
            }
        }
    }

    fn start_stream(self: &Arc<Self>, song: &RadioSong) -> Result<Transcode, crate::common::RadioError> {
        let path = self
            .storage
            .resolve(&song.audio_url)
            .ok_or_else(|| crate::common::RadioError::SourceNotFound(song.audio_url.clone()))?;
        let (fade_in, fade_out) = self.manager.fade_seconds();
        let (transcode, stdout) = Transcode::spawn(&path, song.duration, fade_in, fade_out)?;
        info!("Streaming: id={} title={}", song.id, song.title);
        tokio::spawn(pump(stdout, self.clone()));
        Ok(transcode)
    }

    /// M3U playlist pointing at the live stream.
    pub fn playlist(&self, base_url: &str) -> String {
        [
            "#EXTM3U",
            "#EXTINF:-1,ACERADIO - AI Music Stream",
            &format!("{base_url}/api/radio/stream"),
        ]
        .join("\n")
    }

    /// Extended variant carrying the current song title.
    pub fn extended_playlist(&self, base_url: &str) -> String {
        let title = match self.manager.now_playing() {
            Some(song) => format!(
                "{} - {}",
                song.title,
                song.creator.as_deref().unwrap_or("Unknown")
            ),
            None => "ACERADIO".to_string(),
        };
        [
            "#EXTM3U".to_string(),
            format!("#EXTINF:-1,{title}"),
            format!("{base_url}/api/radio/stream"),
        ]
        .join("\n")
    }
}

/// Reads transcoded bytes until EOF and fans each chunk out. EOF just ends
/// the pump; completion semantics live with the process exit status.
async fn pump(mut stdout: ChildStdout, broadcaster: Arc<Broadcaster>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                broadcaster.fanout.broadcast(&chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use crate::session::settings::RadioSettings;
    use crate::session::{RadioLimits, RadioManager};

    struct NoStorage;
    impl SongStorage for NoStorage {
        fn resolve(&self, _audio_url: &str) -> Option<std::path::PathBuf> {
            None
        }
    }

    fn broadcaster() -> Arc<Broadcaster> {
        let clock = Arc::new(ManualClock::new(0));
        let (manager, _rx) = RadioManager::new(
            RadioSettings::default(),
            "s".to_string(),
            RadioLimits::default(),
            clock,
        );
        Broadcaster::new(manager, Arc::new(NoStorage), Duration::from_millis(10))
    }

    #[test]
    fn test_playlist_points_at_stream() {
        let b = broadcaster();
        let m3u = b.playlist("http://radio.local:3001");
        assert!(m3u.starts_with("#EXTM3U\n"));
        assert!(m3u.ends_with("http://radio.local:3001/api/radio/stream"));
    }

    #[test]
    fn test_extended_playlist_idle_title() {
        let b = broadcaster();
        assert!(b.extended_playlist("http://x").contains("#EXTINF:-1,ACERADIO"));
    }

    #[test]
    fn test_client_registry_roundtrip() {
        let b = broadcaster();
        let rx = b.add_client("c1");
        assert_eq!(b.client_count(), 1);
        b.remove_client("c1");
        assert_eq!(b.client_count(), 0);
        drop(rx);
    }
}
