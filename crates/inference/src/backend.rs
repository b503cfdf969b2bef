//! Inference backend traits.

use std::path::Path;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayView4};
use snapedit_common::error::{SnapEditError, SnapEditResult};

use crate::manifest::ModelManifest;

/// A ready-to-invoke model instance.
///
/// `run` may block on hardware-accelerated compute; callers invoke it from
/// blocking worker threads.
pub trait ModelSession: Send + Sync {
    /// Run the model on one preprocessed input tensor.
    fn run(&self, input: ArrayView4<'_, f32>) -> SnapEditResult<ArrayD<f32>>;
}

/// Trait for model runtimes (ONNX Runtime, test fakes).
pub trait ModelBackend: Send + Sync {
    /// Load the weights at `model_path`. Blocking.
    fn load(
        &self,
        manifest: &ModelManifest,
        model_path: &Path,
    ) -> SnapEditResult<Arc<dyn ModelSession>>;

    /// Backend name.
    fn name(&self) -> &str;
}

/// Backend used when no runtime was compiled in.
#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl ModelBackend for UnavailableBackend {
    fn load(
        &self,
        manifest: &ModelManifest,
        _model_path: &Path,
    ) -> SnapEditResult<Arc<dyn ModelSession>> {
        Err(SnapEditError::model_load(format!(
            "cannot load {}: built without an inference runtime (enable the `onnx` feature)",
            manifest.id
        )))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Best backend available in this build.
pub fn default_backend() -> Arc<dyn ModelBackend> {
    #[cfg(feature = "onnx")]
    {
        Arc::new(crate::onnx::OnnxBackend::new())
    }
    #[cfg(not(feature = "onnx"))]
    {
        Arc::new(UnavailableBackend)
    }
}
