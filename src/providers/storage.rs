//! Source-file resolution: audio URL → local decodable path.

use std::path::{Component, Path, PathBuf};

/// Resolves a song's `audio_url` to a local file the transcoder can read.
pub trait SongStorage: Send + Sync {
    fn resolve(&self, audio_url: &str) -> Option<PathBuf>;
}

/// Serves `/audio/...` URLs out of a local directory.
pub struct LocalSongStorage {
    audio_dir: PathBuf,
}

impl LocalSongStorage {
    pub fn new(audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            audio_dir: audio_dir.into(),
        }
    }
}

impl SongStorage for LocalSongStorage {
    fn resolve(&self, audio_url: &str) -> Option<PathBuf> {
        let relative = audio_url.strip_prefix("/audio/")?;
        let relative = Path::new(relative);
        // No escaping the audio dir.
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let full = self.audio_dir.join(relative);
        full.exists().then_some(full)
    }
}
