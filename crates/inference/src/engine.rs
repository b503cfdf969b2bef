//! Per-frame model invocation with timeout and retry.

use std::sync::Arc;
use std::time::Duration;

use snapedit_common::config::PipelineConfig;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{Frame, InferenceResult};

use crate::postprocess::decode_output;
use crate::preprocess::prepare;
use crate::registry::LoadedModel;

/// Runs one model over one frame.
///
/// Holds no per-frame state, so one engine can serve every inference
/// worker of a job.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    timeout: Duration,
    retries: u32,
}

impl InferenceEngine {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.inference_timeout_ms),
            config.inference_retries,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Segment or detect on `frame`.
    ///
    /// Timeouts are retried up to `retries` more times before failing with
    /// `InferenceTimeout`. Any other failure is returned immediately.
    pub async fn infer(&self, frame: &Frame, model: &LoadedModel) -> SnapEditResult<InferenceResult> {
        // Fail fast before spending time on preprocessing.
        model.session()?;
        let manifest = model.manifest();
        let prepared = prepare(frame, manifest)?;
        let window = prepared.window;
        let tensor = Arc::new(prepared.tensor);

        let mut attempts = 0u32;
        let raw = loop {
            attempts += 1;
            let session = model.session()?;
            let input = tensor.clone();
            let call = tokio::task::spawn_blocking(move || session.run(input.view()));

            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(result)) => break result?,
                Ok(Err(join)) => {
                    return Err(SnapEditError::inference(format!(
                        "{}: inference task failed: {join}",
                        model.id()
                    )))
                }
                Err(_) if attempts <= self.retries => {
                    tracing::warn!(
                        model_id = %model.id(),
                        frame = frame.index,
                        attempt = attempts,
                        "Inference timed out, retrying"
                    );
                }
                Err(_) => {
                    return Err(SnapEditError::InferenceTimeout {
                        attempts,
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                }
            }
        };

        let (output, confidence) = decode_output(&raw, manifest, frame.width, frame.height, window)?;
        tracing::trace!(
            model_id = %model.id(),
            frame = frame.index,
            confidence,
            output = output.kind_name(),
            "Frame inferred"
        );
        Ok(InferenceResult::new(frame.index, output, confidence))
    }
}
