//! ONNX Runtime backend.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::{ArrayD, ArrayView4, IxDyn};
use ort::session::Session;
use ort::value::TensorRef;
use snapedit_common::error::{SnapEditError, SnapEditResult};

use crate::backend::{ModelBackend, ModelSession};
use crate::manifest::ModelManifest;

/// Loads bundled `.onnx` models with CPU execution.
#[derive(Debug, Default)]
pub struct OnnxBackend;

impl OnnxBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ModelBackend for OnnxBackend {
    fn load(
        &self,
        manifest: &ModelManifest,
        model_path: &Path,
    ) -> SnapEditResult<Arc<dyn ModelSession>> {
        if !model_path.is_file() {
            return Err(SnapEditError::model_load(format!(
                "model file missing: {}",
                model_path.display()
            )));
        }
        tracing::info!(model_id = %manifest.id, path = %model_path.display(), "Loading ONNX model");

        let session = Session::builder()
            .map_err(|e| SnapEditError::model_load(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| SnapEditError::model_load(e.to_string()))?;

        Ok(Arc::new(OnnxSession {
            session: Mutex::new(session),
        }))
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// `Session::run` needs `&mut self`, so calls are serialized per model.
struct OnnxSession {
    session: Mutex<Session>,
}

impl ModelSession for OnnxSession {
    fn run(&self, input: ArrayView4<'_, f32>) -> SnapEditResult<ArrayD<f32>> {
        let tensor = TensorRef::from_array_view(input)
            .map_err(|e| SnapEditError::inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| SnapEditError::inference("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| SnapEditError::inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SnapEditError::inference(format!("Failed to extract tensor: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();

        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|e| {
            SnapEditError::inference(format!("output tensor {dims:?} is malformed: {e}"))
        })
    }
}
