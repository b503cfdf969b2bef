//! Bundled model descriptors (`<model_id>/manifest.json`).

use serde::{Deserialize, Serialize};
use snapedit_common::error::{SnapEditError, SnapEditResult};

/// What the model's output tensor means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Per-pixel probability map; exactly two output dims > 1 (height, width).
    Segmentation,
    /// Rows of `[ymin, xmin, ymax, xmax, score, class]`, normalized to the input.
    Detection,
}

/// Memory layout of the 4-D input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nchw,
    Nhwc,
}

/// How a frame is fitted to the model's square or rectangular input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Scale each axis independently.
    #[default]
    Stretch,
    /// Crop the centred square of the shorter side, then scale.
    CenterCrop,
}

/// Which class a segmentation value is the probability of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskSemantics {
    #[default]
    Foreground,
    Background,
}

/// Describes one bundled, pre-converted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Stable identifier, also the asset directory name.
    pub id: String,

    /// Model file relative to the manifest directory.
    pub file: String,

    pub kind: ModelKind,

    /// Input tensor shape, batch first (e.g. `[1, 3, 257, 257]`).
    pub input_shape: Vec<usize>,

    #[serde(default)]
    pub layout: TensorLayout,

    /// Output tensor shape, batch first.
    pub output_shape: Vec<usize>,

    #[serde(default)]
    pub resize: ResizeMode,

    /// Per-channel normalization `(v - mean) / std` on 0..255 values.
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],

    #[serde(default)]
    pub mask_semantics: MaskSemantics,

    /// Detections below this score are discarded.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

fn default_mean() -> [f32; 3] {
    [127.5; 3]
}

fn default_std() -> [f32; 3] {
    [127.5; 3]
}

fn default_score_threshold() -> f32 {
    0.6
}

impl ModelManifest {
    /// Spatial input size `(height, width)`.
    pub fn input_size(&self) -> (usize, usize) {
        match self.layout {
            TensorLayout::Nchw => (self.input_shape[2], self.input_shape[3]),
            TensorLayout::Nhwc => (self.input_shape[1], self.input_shape[2]),
        }
    }

    /// Segmentation map size `(height, width)`.
    pub fn mask_size(&self) -> Option<(usize, usize)> {
        let dims: Vec<usize> = self
            .output_shape
            .iter()
            .copied()
            .filter(|d| *d > 1)
            .collect();
        match dims.as_slice() {
            [h, w] => Some((*h, *w)),
            _ => None,
        }
    }

    pub fn output_len(&self) -> usize {
        self.output_shape.iter().product()
    }

    pub fn validate(&self) -> SnapEditResult<()> {
        if self.id.trim().is_empty() || self.file.trim().is_empty() {
            return Err(SnapEditError::model_load("manifest needs an id and a file"));
        }
        if self.input_shape.len() != 4 || self.input_shape.iter().any(|d| *d == 0) {
            return Err(SnapEditError::model_load(format!(
                "{}: input_shape must be 4-D and non-empty, got {:?}",
                self.id, self.input_shape
            )));
        }
        let channels = match self.layout {
            TensorLayout::Nchw => self.input_shape[1],
            TensorLayout::Nhwc => self.input_shape[3],
        };
        if channels != 3 || self.input_shape[0] != 1 {
            return Err(SnapEditError::model_load(format!(
                "{}: expected a single RGB input, got {:?}",
                self.id, self.input_shape
            )));
        }
        if self.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(SnapEditError::model_load(format!(
                "{}: normalization std must be non-zero",
                self.id
            )));
        }
        if self.output_shape.is_empty() || self.output_shape.iter().any(|d| *d == 0) {
            return Err(SnapEditError::model_load(format!(
                "{}: output_shape must be non-empty",
                self.id
            )));
        }
        match self.kind {
            ModelKind::Segmentation if self.mask_size().is_none() => {
                Err(SnapEditError::model_load(format!(
                    "{}: segmentation output must have exactly two spatial dims, got {:?}",
                    self.id, self.output_shape
                )))
            }
            ModelKind::Detection if self.output_shape.last() != Some(&6) => {
                Err(SnapEditError::model_load(format!(
                    "{}: detection rows must have 6 values, got {:?}",
                    self.id, self.output_shape
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) fn segmentation_manifest(id: &str, size: usize) -> ModelManifest {
    ModelManifest {
        id: id.to_string(),
        file: "model.onnx".to_string(),
        kind: ModelKind::Segmentation,
        input_shape: vec![1, 3, size, size],
        layout: TensorLayout::Nchw,
        output_shape: vec![1, size, size],
        resize: ResizeMode::Stretch,
        mean: default_mean(),
        std: default_std(),
        mask_semantics: MaskSemantics::Foreground,
        score_threshold: default_score_threshold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_from_json() {
        let json = r#"{
            "id": "selfie",
            "file": "selfie.onnx",
            "kind": "segmentation",
            "input_shape": [1, 257, 257, 3],
            "layout": "nhwc",
            "output_shape": [1, 257, 257, 1],
            "mask_semantics": "background"
        }"#;
        let manifest: ModelManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.input_size(), (257, 257));
        assert_eq!(manifest.mask_size(), Some((257, 257)));
        assert_eq!(manifest.mean, [127.5; 3]);
        assert_eq!(manifest.resize, ResizeMode::Stretch);
        assert_eq!(manifest.mask_semantics, MaskSemantics::Background);
    }

    #[test]
    fn test_detection_requires_six_values() {
        let mut manifest = segmentation_manifest("faces", 8);
        manifest.kind = ModelKind::Detection;
        manifest.output_shape = vec![1, 10, 4];
        assert!(manifest.validate().is_err());
        manifest.output_shape = vec![1, 10, 6];
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_rgb_input() {
        let mut manifest = segmentation_manifest("gray", 8);
        manifest.input_shape = vec![1, 1, 8, 8];
        assert!(manifest.validate().is_err());
    }
}
