//! Stage command builders.
//!
//! Each builder turns an [`EncodeProfile`] plus input/output paths into one
//! [`EncoderInvocation`]. All paths are passed as argument-vector entries;
//! nothing goes through a shell.

use std::path::Path;
use std::time::Duration;

use vderiv_models::EncodeProfile;

use crate::error::{MediaError, MediaResult};
use crate::supervisor::EncoderInvocation;

/// Flags shared by every ffmpeg stage.
fn base_invocation(program: &str, label: &str, timeout_secs: u64) -> EncoderInvocation {
    EncoderInvocation::new(program, label, Duration::from_secs(timeout_secs)).args([
        "-y",
        "-nostdin",
        "-hide_banner",
        "-loglevel",
        "warning",
    ])
}

/// Poster stage: one still frame near the start of the source.
///
/// The poster can emit no progress lines at all, so no `-progress` pipe is
/// requested; the supervisor's timeout still applies.
pub fn poster_invocation(
    program: &str,
    profile: &EncodeProfile,
    input: &Path,
    output: &Path,
) -> EncoderInvocation {
    base_invocation(program, "poster", profile.poster_timeout_secs)
        // keep probe overhead low for a single frame
        .args(["-probesize", "32k", "-analyzeduration", "0"])
        .arg("-ss")
        .arg(format!("{}", profile.poster_seek))
        .arg("-i")
        .arg(input.to_string_lossy())
        .args(["-frames:v", "1", "-update", "1"])
        .arg("-q:v")
        .arg(profile.poster_quality.to_string())
        .arg(output.to_string_lossy())
}

/// Required rendition stage: H.264 MP4.
pub fn mp4_invocation(
    program: &str,
    profile: &EncodeProfile,
    input: &Path,
    output: &Path,
) -> EncoderInvocation {
    base_invocation(program, "mp4", profile.mp4_timeout_secs)
        .args(["-progress", "pipe:1"])
        .arg("-i")
        .arg(input.to_string_lossy())
        .arg("-vf")
        .arg(profile.video_filter())
        .args(["-c:v", "libx264"])
        .arg("-profile:v")
        .arg(profile.mp4.profile.clone())
        .arg("-preset")
        .arg(profile.mp4.preset.clone())
        .arg("-b:v")
        .arg(profile.mp4.bitrate.clone())
        .arg("-maxrate")
        .arg(profile.mp4.maxrate.clone())
        .arg("-bufsize")
        .arg(profile.mp4.bufsize.clone())
        .arg("-g")
        .arg(profile.gop.to_string())
        .args(["-movflags", "+faststart", "-an"])
        .arg(output.to_string_lossy())
}

/// Optional rendition stage: VP9 WebM.
pub fn webm_invocation(
    program: &str,
    profile: &EncodeProfile,
    input: &Path,
    output: &Path,
) -> EncoderInvocation {
    base_invocation(program, "webm", profile.webm_timeout_secs)
        .args(["-progress", "pipe:1"])
        .arg("-i")
        .arg(input.to_string_lossy())
        .arg("-vf")
        .arg(profile.video_filter())
        .args(["-c:v", "libvpx-vp9"])
        .arg("-deadline")
        .arg(profile.webm.deadline.clone())
        .arg("-cpu-used")
        .arg(profile.webm.cpu_used.to_string())
        .arg("-b:v")
        .arg(profile.webm.bitrate.clone())
        .arg("-maxrate")
        .arg(profile.webm.maxrate.clone())
        .arg("-bufsize")
        .arg(profile.webm.bufsize.clone())
        .args(["-row-mt", "1"])
        .arg("-threads")
        .arg(profile.webm.threads.to_string())
        .arg("-g")
        .arg(profile.gop.to_string())
        .arg("-an")
        .arg(output.to_string_lossy())
}

/// Verify a stage actually produced a non-empty output file.
pub async fn ensure_nonempty(path: &Path) -> MediaResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(MediaError::EmptyOutput(path.to_path_buf())),
    }
}
