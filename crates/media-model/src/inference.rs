//! Per-frame inference outputs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snapedit_common::error::{SnapEditError, SnapEditResult};

/// Per-pixel foreground probability in frame space.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    values: Vec<f32>,
}

impl Mask {
    /// Build a mask; every value must be finite and is clamped to [0, 1].
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> SnapEditResult<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(SnapEditError::TensorShapeMismatch {
                expected: vec![height as usize, width as usize],
                actual: vec![values.len()],
            });
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(SnapEditError::inference(format!(
                "mask value at {pos} is not finite"
            )));
        }
        let values = values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Uniform mask.
    pub fn uniform(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            values: vec![value.clamp(0.0, 1.0); width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mean distance from the 0.5 decision boundary, scaled to [0, 1].
    pub fn decisiveness(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .values
            .iter()
            .map(|v| (2.0 * *v as f64 - 1.0).abs())
            .sum();
        (sum / self.values.len() as f64) as f32
    }

    /// Hard 0/1 mask at `threshold`.
    pub fn binarized(&self, threshold: f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            values: self
                .values
                .iter()
                .map(|v| if *v >= threshold { 1.0 } else { 0.0 })
                .collect(),
        }
    }
}

/// A labelled box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: u32,
    pub score: f32,
}

impl Region {
    /// Clip to the frame and return integer pixel bounds `(x0, y0, x1, y1)`,
    /// or `None` when nothing remains.
    pub fn pixel_bounds(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(frame_width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(frame_height);
        if x0 >= x1 || y0 >= y1 {
            None
        } else {
            Some((x0, y0, x1, y1))
        }
    }
}

/// Model output, shared cheaply so a later frame can reuse it as fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
    Mask(Arc<Mask>),
    Regions(Arc<Vec<Region>>),
}

impl InferenceOutput {
    pub fn as_mask(&self) -> Option<&Mask> {
        match self {
            InferenceOutput::Mask(mask) => Some(mask),
            InferenceOutput::Regions(_) => None,
        }
    }

    pub fn as_regions(&self) -> Option<&[Region]> {
        match self {
            InferenceOutput::Regions(regions) => Some(regions),
            InferenceOutput::Mask(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            InferenceOutput::Mask(_) => "mask",
            InferenceOutput::Regions(_) => "regions",
        }
    }
}

/// Result of running a model on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    /// Sequence index of the frame that produced this result.
    pub index: u64,

    /// Model output; `None` when the edit needs no model or inference gave up.
    pub output: Option<InferenceOutput>,

    /// Confidence in [0, 1].
    pub confidence: f32,

    /// Inference exhausted its timeout retries for this frame.
    pub degraded: bool,

    /// Effective output of the previous frame, attached in sequence order.
    pub fallback: Option<InferenceOutput>,
}

impl InferenceResult {
    pub fn new(index: u64, output: InferenceOutput, confidence: f32) -> Self {
        Self {
            index,
            output: Some(output),
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            degraded: false,
            fallback: None,
        }
    }

    /// Result for edits that do not consult a model.
    pub fn passthrough(index: u64) -> Self {
        Self {
            index,
            output: None,
            confidence: 1.0,
            degraded: false,
            fallback: None,
        }
    }

    /// Result for a frame whose inference timed out on every attempt.
    pub fn degraded(index: u64) -> Self {
        Self {
            index,
            output: None,
            confidence: 0.0,
            degraded: true,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Option<InferenceOutput>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Whether this result should drive the edit directly.
    pub fn is_trusted(&self, threshold: f32) -> bool {
        !self.degraded && self.output.is_some() && self.confidence >= threshold
    }
}
