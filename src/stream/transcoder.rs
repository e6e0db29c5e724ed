//! ffmpeg transcode process: source file → real-time 128 kbps MP3 on stdout,
//! with the station's fade envelope applied.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStdout, Command};
use tracing::info;

use crate::common::RadioError;

/// Songs with an unknown duration are faded as if three minutes long.
pub const DEFAULT_DURATION_SECS: f64 = 180.0;

/// `afade` in/out envelope over the song duration.
pub fn fade_filter(duration_secs: f64, fade_in: f64, fade_out: f64) -> String {
    let duration = if duration_secs > 0.0 {
        duration_secs
    } else {
        DEFAULT_DURATION_SECS
    };
    let fade_out_start = (duration - fade_out).max(0.0);
    format!("afade=t=in:st=0:d={fade_in},afade=t=out:st={fade_out_start}:d={fade_out}")
}

/// `-re` paces reading at native rate so stdout is a real-time stream.
pub fn transcode_args(path: &Path, filter: &str) -> Vec<String> {
    vec![
        "-re".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-af".to_string(),
        filter.to_string(),
        "-acodec".to_string(),
        "libmp3lame".to_string(),
        "-ab".to_string(),
        "128k".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-f".to_string(),
        "mp3".to_string(),
        "-".to_string(),
    ]
}

/// A single in-flight transcode.
pub struct Transcode {
    child: Child,
}

impl Transcode {
    pub fn spawn(
        path: &Path,
        duration_secs: f64,
        fade_in: f64,
        fade_out: f64,
    ) -> Result<(Self, ChildStdout), RadioError> {
        let filter = fade_filter(duration_secs, fade_in, fade_out);
        info!("Spawning transcoder: path={} filter={}", path.display(), filter);
        let mut child = Command::new("ffmpeg")
            .args(transcode_args(path, &filter))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RadioError::Transcode(format!("ffmpeg spawn failed: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RadioError::Transcode("ffmpeg stdout not captured".to_string()))?;
        Ok((Self { child }, stdout))
    }

    /// Non-blocking exit probe. `Some(status)` once the process has ended.
    pub fn try_finished(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Terminate and reap. Used on song change; the killed process's
    /// non-zero exit is deliberately not treated as completion.
    pub async fn stop(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
