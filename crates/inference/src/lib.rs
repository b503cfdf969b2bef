//! SnapEdit Inference
//!
//! On-device model inference for the edit pipeline:
//! - **Manifests:** Bundled model descriptors with tensor shapes and layouts
//! - **Registry:** Lazy, reference-counted model loading shared across jobs
//! - **Engine:** Per-frame preprocessing, timed invocation, and
//!   postprocessing back to frame-pixel space
//!
//! Backends are pluggable through [`ModelBackend`]; the ONNX Runtime
//! backend is available with the `onnx` feature.

pub mod backend;
pub mod engine;
pub mod manifest;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod postprocess;
pub mod preprocess;
pub mod registry;
pub mod store;

pub use backend::{default_backend, ModelBackend, ModelSession};
pub use engine::InferenceEngine;
pub use manifest::*;
pub use registry::{LoadedModel, ModelRegistry};
pub use store::{DirectoryModelStore, ModelStore};
