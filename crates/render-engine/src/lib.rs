//! SnapEdit Render Engine
//!
//! Encodes edited frames into the final output file.
//!
//! # Pipeline Architecture
//!
//! ```text
//! edited frames (in order) ──► EncodeSink ──► chunked FrameEncoder
//!                                  │              ├── ffmpeg (mp4/webm/gif, + source audio)
//!                                  │              └── image codecs (png/jpeg/webp)
//!                                  ▼
//!                     .<name>.<uuid>.partial ──rename──► output
//! ```
//!
//! The destination only ever appears complete; failed or cancelled jobs
//! leave no partial file behind.

pub mod encoder;
pub mod ffmpeg;
pub mod settings;
pub mod sink;

pub use encoder::{FrameEncoder, StillImageEncoder};
pub use ffmpeg::{FfmpegEncoder, VideoEncodeParams};
pub use settings::{ExportSettings, OutputFormat, StillFormat, VideoFormat};
pub use sink::{temp_path_for, EncodeSink, SinkLimits};
