//! External encoder supervision for the vderiv pipeline.
//!
//! This crate provides:
//! - Subprocess supervision with non-blocking output capture, hard
//!   wall-clock timeouts and a diagnostic tail buffer
//! - `out_time_ms=` progress parsing fed to an optional sink
//! - Duration probing via ffprobe
//! - Per-profile stage command builders (poster, MP4, WebM)

pub mod error;
pub mod probe;
pub mod stages;
pub mod supervisor;

pub use error::{MediaError, MediaResult};
pub use probe::probe_duration;
pub use stages::{ensure_nonempty, mp4_invocation, poster_invocation, webm_invocation};
pub use supervisor::{run_encoder, EncoderInvocation, ProgressSink, StageReport};
