//! SnapEdit Frame Source
//!
//! Turns an input photo or video into a lazy, forward-only stream of
//! timestamped frames.
//!
//! # Architecture
//!
//! ```text
//! photo.jpg ── StillImageDecoder ──┐
//!                                  ├── FrameSource ── Frame(0), Frame(1), ...
//! clip.mp4 ─── FfmpegDecoder ──────┘        │
//!                                     in-flight gate
//!                                  (blocks until frames drop)
//! ```
//!
//! Decoders own native resources (the ffmpeg child process); the source
//! releases them on exhaustion, on `close()`, and on drop.

pub mod decoder;
pub mod probe;
pub mod source;

pub use decoder::{load_image, FfmpegDecoder, FrameDecoder, RawFrame, StillImageDecoder};
pub use probe::probe_asset;
pub use source::FrameSource;
