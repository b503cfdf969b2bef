//! Edit specifications.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snapedit_common::error::{SnapEditError, SnapEditResult};

/// Straight-alpha RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_opaque(&self) -> bool {
        self.a == 255
    }

    /// Parse `#rrggbb` or `#rrggbbaa`.
    pub fn parse_hex(input: &str) -> SnapEditResult<Self> {
        let hex = input.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(SnapEditError::config(format!("invalid colour: {input}")));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| SnapEditError::config(format!("invalid colour: {input}")))
        };
        match hex.len() {
            6 => Ok(Self::rgba(channel(0)?, channel(2)?, channel(4)?, 255)),
            8 => Ok(Self::rgba(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => Err(SnapEditError::config(format!("invalid colour: {input}"))),
        }
    }
}

/// Which part of the frame an adjustment touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditTarget {
    /// Entire frame; no model needed.
    #[default]
    Whole,
    /// Pixels the mask marks as subject.
    Foreground,
    /// Pixels the mask marks as background.
    Background,
}

/// Colour adjustments. Neutral values leave pixels unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorAdjustments {
    /// Additive brightness in [-1, 1].
    pub brightness: f32,
    /// Contrast multiplier around mid-grey (1 = neutral).
    pub contrast: f32,
    /// Saturation multiplier (1 = neutral, 0 = greyscale).
    pub saturation: f32,
    /// Exposure in stops-like units; applied as gamma `1 / (1 + exposure)`.
    pub exposure: f32,
    /// Warm (+) / cool (-) shift in [-1, 1].
    pub temperature: f32,
    /// Magenta (+) / green (-) shift in [-1, 1].
    pub tint: f32,
}

impl Default for ColorAdjustments {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            exposure: 0.0,
            temperature: 0.0,
            tint: 0.0,
        }
    }
}

impl ColorAdjustments {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    fn validate(&self) -> SnapEditResult<()> {
        let values = [
            self.brightness,
            self.contrast,
            self.saturation,
            self.exposure,
            self.temperature,
            self.tint,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SnapEditError::config("colour adjustments must be finite"));
        }
        if self.exposure <= -1.0 {
            return Err(SnapEditError::config("exposure must be greater than -1"));
        }
        if self.contrast < 0.0 || self.saturation < 0.0 {
            return Err(SnapEditError::config(
                "contrast and saturation must be non-negative",
            ));
        }
        Ok(())
    }
}

/// The edit applied to every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    /// Replace background pixels with a colour (transparent by default).
    RemoveBackground {
        #[serde(default = "transparent")]
        replacement: Color,
    },
    /// Box-blur background pixels.
    BlurBackground { radius: u32 },
    /// Colour grade the chosen target.
    StyleFilter {
        #[serde(default)]
        adjustments: ColorAdjustments,
        #[serde(default)]
        target: EditTarget,
    },
    /// Blend a colour over the chosen target.
    Tint {
        color: Color,
        opacity: f32,
        #[serde(default)]
        target: EditTarget,
    },
    /// Pixelate detected regions (e.g. faces).
    PixelateRegions { block_size: u32 },
    /// Draw an image (sticker) over the frame.
    Overlay(OverlaySpec),
}

fn transparent() -> Color {
    Color::TRANSPARENT
}

/// Placement of an overlay image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySpec {
    /// PNG/JPEG/WebP image; its alpha channel is honoured.
    pub image: PathBuf,
    /// Top-left corner as a fraction of the frame width.
    #[serde(default)]
    pub x: f32,
    /// Top-left corner as a fraction of the frame height.
    #[serde(default)]
    pub y: f32,
    /// Multiplier on the image's own pixel size.
    #[serde(default = "unit")]
    pub scale: f32,
    #[serde(default = "unit")]
    pub opacity: f32,
    /// Hide the overlay where the mask marks the subject.
    #[serde(default)]
    pub behind_subject: bool,
}

fn unit() -> f32 {
    1.0
}

impl OverlaySpec {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            opacity: 1.0,
            behind_subject: false,
        }
    }

    fn validate(&self) -> SnapEditResult<()> {
        if !(self.x.is_finite() && self.y.is_finite()) {
            return Err(SnapEditError::config("overlay position must be finite"));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(SnapEditError::config("overlay scale must be positive"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(SnapEditError::config("overlay opacity must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Half-open `[start_ms, end_ms)` window of the clip an edit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub start_ms: u64,
    /// Open-ended when unset.
    #[serde(default)]
    pub end_ms: Option<u64>,
}

impl TimeRange {
    pub fn new(start_ms: u64, end_ms: Option<u64>) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn contains(&self, pts_ns: u64) -> bool {
        let ms = pts_ns / 1_000_000;
        ms >= self.start_ms && self.end_ms.map_or(true, |end| ms < end)
    }
}

/// What a model has to produce for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRequirement {
    None,
    Mask,
    Regions,
}

impl EditOperation {
    pub fn requirement(&self) -> ModelRequirement {
        match self {
            EditOperation::RemoveBackground { .. } | EditOperation::BlurBackground { .. } => {
                ModelRequirement::Mask
            }
            EditOperation::StyleFilter { target, .. } | EditOperation::Tint { target, .. } => {
                if *target == EditTarget::Whole {
                    ModelRequirement::None
                } else {
                    ModelRequirement::Mask
                }
            }
            EditOperation::PixelateRegions { .. } => ModelRequirement::Regions,
            EditOperation::Overlay(overlay) => {
                if overlay.behind_subject {
                    ModelRequirement::Mask
                } else {
                    ModelRequirement::None
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EditOperation::RemoveBackground { .. } => "remove_background",
            EditOperation::BlurBackground { .. } => "blur_background",
            EditOperation::StyleFilter { .. } => "style_filter",
            EditOperation::Tint { .. } => "tint",
            EditOperation::PixelateRegions { .. } => "pixelate_regions",
            EditOperation::Overlay(_) => "overlay",
        }
    }
}

/// What to do with a frame whose inference is not trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Pass the frame through unedited.
    #[default]
    SkipEdit,
    /// Use the previous frame's effective mask/regions.
    ReusePreviousMask,
}

/// User-chosen operation and parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditSpec {
    /// Model that drives the edit; required unless the operation is model-free.
    #[serde(default)]
    pub model_id: Option<String>,

    pub operation: EditOperation,

    /// Results below this confidence use the fallback policy.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default)]
    pub fallback: FallbackPolicy,

    /// Binarize masks at this value instead of blending softly.
    #[serde(default)]
    pub mask_threshold: Option<f32>,

    /// Part of the clip to edit; the whole clip when unset.
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

impl EditSpec {
    pub fn new(operation: EditOperation) -> Self {
        Self {
            model_id: None,
            operation,
            confidence_threshold: default_confidence_threshold(),
            fallback: FallbackPolicy::default(),
            mask_threshold: None,
            time_range: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Whether the frame at `pts_ns` gets edited.
    pub fn is_active_at(&self, pts_ns: u64) -> bool {
        self.time_range.map_or(true, |range| range.contains(pts_ns))
    }

    /// Model the pipeline must load, if the operation consults one.
    pub fn required_model(&self) -> Option<&str> {
        match self.operation.requirement() {
            ModelRequirement::None => None,
            _ => self.model_id.as_deref(),
        }
    }

    /// Check parameters once before a run starts.
    pub fn validate(&self) -> SnapEditResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SnapEditError::config(
                "confidence_threshold must be within [0, 1]",
            ));
        }
        if let Some(t) = self.mask_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(SnapEditError::config("mask_threshold must be within [0, 1]"));
            }
        }
        if self.operation.requirement() != ModelRequirement::None && self.model_id.is_none() {
            return Err(SnapEditError::config(format!(
                "{} requires a model_id",
                self.operation.name()
            )));
        }
        if let Some(TimeRange {
            start_ms,
            end_ms: Some(end_ms),
        }) = self.time_range
        {
            if end_ms <= start_ms {
                return Err(SnapEditError::config("time_range end must be after its start"));
            }
        }
        match &self.operation {
            EditOperation::BlurBackground { radius } if *radius == 0 => {
                Err(SnapEditError::config("blur radius must be at least 1"))
            }
            EditOperation::PixelateRegions { block_size } if *block_size < 2 => {
                Err(SnapEditError::config("pixelate block_size must be at least 2"))
            }
            EditOperation::Tint { opacity, .. } if !(0.0..=1.0).contains(opacity) => {
                Err(SnapEditError::config("tint opacity must be within [0, 1]"))
            }
            EditOperation::StyleFilter { adjustments, .. } => adjustments.validate(),
            EditOperation::Overlay(overlay) => overlay.validate(),
            _ => Ok(()),
        }
    }
}
