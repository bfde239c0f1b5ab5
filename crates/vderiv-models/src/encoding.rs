//! Encode profiles: named output configurations.
//!
//! A profile identifies which encode settings produced a derivative, so
//! settings can evolve under a new slug (`hero_mobile_v1 -> hero_mobile_v2`)
//! without invalidating rows produced under the old one. All tunables live
//! here as explicit configuration; nothing is read from ambient state.

use serde::{Deserialize, Serialize};

/// Profile slug used when the content system does not ask for another.
pub const DEFAULT_PROFILE: &str = "hero_mobile_v1";

/// Progress percentage floor once a job shows signs of life.
pub const PROGRESS_FLOOR: u8 = 5;

/// H.264 settings for the required MP4 rendition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct H264Settings {
    pub bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
    pub preset: String,
    /// H.264 profile (e.g. "main")
    pub profile: String,
}

/// VP9 settings for the optional WebM rendition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vp9Settings {
    pub bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
    pub deadline: String,
    pub cpu_used: u8,
    pub threads: u8,
}

/// One named output configuration covering all stages of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Profile identifier stored on every derivative row
    pub slug: String,
    /// Target width in pixels; height follows the aspect ratio
    pub scale_width: u32,
    /// Target frame rate
    pub fps: u32,
    /// Keyframe interval in frames
    pub gop: u32,
    /// Required rendition settings
    pub mp4: H264Settings,
    /// Optional rendition settings
    pub webm: Vp9Settings,
    /// Seek offset for the poster frame, in seconds
    pub poster_seek: f64,
    /// JPEG quality for the poster (`-q:v`, lower is better)
    pub poster_quality: u8,
    /// Hard wall-clock budget for the poster stage
    pub poster_timeout_secs: u64,
    /// Hard wall-clock budget for the MP4 stage
    pub mp4_timeout_secs: u64,
    /// Hard wall-clock budget for the WebM stage
    pub webm_timeout_secs: u64,
    /// Minimum progress percentage reported while processing
    pub progress_floor: u8,
}

impl EncodeProfile {
    /// The mobile hero profile: 720px wide, 30fps, H.264 main + VP9 realtime.
    pub fn hero_mobile_v1() -> Self {
        Self {
            slug: DEFAULT_PROFILE.to_string(),
            scale_width: 720,
            fps: 30,
            gop: 60,
            mp4: H264Settings {
                bitrate: "1800k".to_string(),
                maxrate: "2200k".to_string(),
                bufsize: "4400k".to_string(),
                preset: "veryfast".to_string(),
                profile: "main".to_string(),
            },
            webm: Vp9Settings {
                bitrate: "1200k".to_string(),
                maxrate: "1500k".to_string(),
                bufsize: "3000k".to_string(),
                deadline: "realtime".to_string(),
                cpu_used: 6,
                threads: 4,
            },
            poster_seek: 0.25,
            poster_quality: 3,
            poster_timeout_secs: 30,
            mp4_timeout_secs: 180,
            webm_timeout_secs: 900,
            progress_floor: PROGRESS_FLOOR,
        }
    }

    /// Look up a built-in profile by slug.
    pub fn by_slug(slug: &str) -> Option<Self> {
        match slug {
            DEFAULT_PROFILE => Some(Self::hero_mobile_v1()),
            _ => None,
        }
    }

    /// FFmpeg video filter for this profile (scale + fps).
    pub fn video_filter(&self) -> String {
        format!("scale={}:-2,fps={}", self.scale_width, self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hero_mobile_v1_settings() {
        let profile = EncodeProfile::hero_mobile_v1();
        assert_eq!(profile.slug, "hero_mobile_v1");
        assert_eq!(profile.video_filter(), "scale=720:-2,fps=30");
        assert_eq!(profile.mp4.bitrate, "1800k");
        assert_eq!(profile.webm.cpu_used, 6);
        assert!(profile.webm_timeout_secs > profile.mp4_timeout_secs);
    }

    #[test]
    fn by_slug_lookup() {
        assert!(EncodeProfile::by_slug("hero_mobile_v1").is_some());
        assert!(EncodeProfile::by_slug("hero_mobile_v9").is_none());
    }
}
