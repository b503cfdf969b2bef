//! SnapEdit Media Model
//!
//! Defines the data contracts passed between pipeline stages:
//! - **Asset:** The input photo or video and its stream properties
//! - **Frame:** One decoded raster with timestamp and sequence index
//! - **Inference:** Per-frame masks or labelled regions with confidence
//! - **Edit:** The user-chosen operation applied to every frame of a job
//!
//! Mask values and confidences are normalized to `[0.0, 1.0]`; region
//! coordinates are in frame pixels.

pub mod asset;
pub mod edit;
pub mod frame;
pub mod inference;

pub use asset::*;
pub use edit::*;
pub use frame::*;
pub use inference::*;
