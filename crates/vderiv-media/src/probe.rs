//! Source duration probing via ffprobe.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Read a media file's duration in seconds.
///
/// Invokes the probe binary with an argument vector and expects a single
/// numeric value on stdout. Callers treat failure as a degradation of
/// progress reporting, never as a reason to abort a job.
pub async fn probe_duration(program: &str, input: impl AsRef<Path>) -> MediaResult<f64> {
    let input = input.as_ref();

    which::which(program).map_err(|_| MediaError::EncoderNotFound(program.to_string()))?;

    let output = Command::new(program)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::probe_failed(format!(
            "exit {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(0.0);
    }

    text.parse::<f64>()
        .map_err(|_| MediaError::probe_failed(format!("unparseable duration: {text:?}")))
}
