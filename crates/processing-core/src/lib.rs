//! SnapEdit Processing Core: the edit compositor
//!
//! Turns a decoded frame plus its inference result into an edited frame:
//! - **Background:** Remove (to transparent or a solid colour) or blur
//! - **Style:** Colour adjustments and tints for the whole frame, the
//!   subject, or the background
//! - **Regions:** Pixelate detected boxes such as faces
//!
//! This crate is pure computation with no I/O. Identical inputs always
//! produce byte-identical frames.

pub mod compositor;
pub mod filters;

pub use compositor::{effective_output, EditCompositor};
