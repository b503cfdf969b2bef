//! Applies an [`EditSpec`] to one frame using its inference result.

use std::sync::Arc;

use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{
    EditOperation, EditSpec, EditTarget, FallbackPolicy, Frame, InferenceOutput, InferenceResult,
    Mask, MediaKind, ModelRequirement, OverlaySpec,
};

use crate::filters::{self, Placement, Weights};

/// Largest overlay side after scaling.
const MAX_OVERLAY_SIDE: u32 = 16_384;

/// The model output an edit should actually use for a frame.
///
/// Trusted results use their own output. Untrusted (low-confidence or
/// degraded) results follow the edit's fallback policy: `SkipEdit` yields
/// nothing, `ReusePreviousMask` yields the attached fallback if any.
pub fn effective_output<'a>(
    result: &'a InferenceResult,
    spec: &EditSpec,
) -> Option<&'a InferenceOutput> {
    if result.is_trusted(spec.confidence_threshold) {
        return result.output.as_ref();
    }
    match spec.fallback {
        FallbackPolicy::SkipEdit => None,
        FallbackPolicy::ReusePreviousMask => result.fallback.as_ref(),
    }
}

/// Overlay pixels already scaled for drawing.
#[derive(Debug)]
struct ScaledOverlay {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Pure per-frame compositor.
///
/// The output kind matters because video encoders carry no alpha channel.
/// Clones share the loaded overlay image.
#[derive(Debug, Clone)]
pub struct EditCompositor {
    output: MediaKind,
    overlay: Option<Arc<ScaledOverlay>>,
}

impl EditCompositor {
    pub fn new(output: MediaKind) -> Self {
        Self {
            output,
            overlay: None,
        }
    }

    /// Attach the overlay image, scaled once by `spec.scale`.
    pub fn with_overlay(mut self, image: Frame, spec: &OverlaySpec) -> SnapEditResult<Self> {
        let image = image.into_rgba();
        let scaled = |side: u32| (side as f64 * spec.scale as f64).round().max(1.0);
        let (width, height) = (scaled(image.width), scaled(image.height));
        if width > MAX_OVERLAY_SIDE as f64 || height > MAX_OVERLAY_SIDE as f64 {
            return Err(SnapEditError::incompatible_edit(format!(
                "overlay scaled to {width}x{height} exceeds {MAX_OVERLAY_SIDE} pixels per side"
            )));
        }
        let (width, height) = (width as u32, height as u32);
        let data = if (width, height) == (image.width, image.height) {
            image.data
        } else {
            filters::resize_nearest(&image.data, (image.width, image.height), (width, height))
        };
        self.overlay = Some(Arc::new(ScaledOverlay {
            width,
            height,
            data,
        }));
        Ok(self)
    }

    /// Compositor for a single still image.
    pub fn for_image() -> Self {
        Self::new(MediaKind::Image)
    }

    /// Reject specs this output can never satisfy, before any frame is decoded.
    pub fn check_spec(&self, spec: &EditSpec) -> SnapEditResult<()> {
        if let EditOperation::RemoveBackground { replacement } = &spec.operation {
            if self.output == MediaKind::Video && !replacement.is_opaque() {
                return Err(SnapEditError::incompatible_edit(
                    "video output has no alpha channel; remove_background needs an opaque replacement colour",
                ));
            }
        }
        Ok(())
    }

    /// Apply `spec` to `frame`. The frame keeps its index and timestamp.
    pub fn apply(
        &self,
        frame: Frame,
        result: &InferenceResult,
        spec: &EditSpec,
    ) -> SnapEditResult<Frame> {
        self.check_spec(spec)?;
        let expected = frame.pixel_count() * frame.format.bytes_per_pixel();
        if frame.data.len() != expected {
            return Err(SnapEditError::incompatible_edit(format!(
                "frame {} holds {} bytes, expected {expected} for {:?}",
                frame.index,
                frame.data.len(),
                frame.format
            )));
        }
        if result.index != frame.index {
            return Err(SnapEditError::invalid_state(format!(
                "result for frame {} paired with frame {}",
                result.index, frame.index
            )));
        }
        if !spec.is_active_at(frame.pts_ns) {
            return Ok(frame.into_rgba());
        }

        let mut frame = frame.into_rgba();
        let requirement = spec.operation.requirement();
        let output = match requirement {
            ModelRequirement::None => None,
            _ => match effective_output(result, spec) {
                Some(output) => Some(output),
                None => {
                    tracing::trace!(
                        frame = frame.index,
                        confidence = result.confidence,
                        degraded = result.degraded,
                        "Edit skipped for frame"
                    );
                    return Ok(frame);
                }
            },
        };

        match (requirement, output) {
            (ModelRequirement::None, _) => self.apply_whole(&mut frame, &spec.operation)?,
            (ModelRequirement::Mask, Some(output)) => {
                let mask = mask_for(&frame, output, spec)?;
                self.apply_masked(&mut frame, &mask, &spec.operation)?;
            }
            (ModelRequirement::Regions, Some(output)) => {
                let regions = output.as_regions().ok_or_else(|| {
                    SnapEditError::incompatible_edit(format!(
                        "{} needs detected regions, got a {}",
                        spec.operation.name(),
                        output.kind_name()
                    ))
                })?;
                if let EditOperation::PixelateRegions { block_size } = spec.operation {
                    filters::pixelate(&mut frame.data, frame.width, frame.height, regions, block_size);
                }
            }
            (_, None) => {}
        }
        Ok(frame)
    }

    fn apply_whole(&self, frame: &mut Frame, operation: &EditOperation) -> SnapEditResult<()> {
        match operation {
            EditOperation::StyleFilter { adjustments, .. } => {
                filters::style_filter(&mut frame.data, adjustments, None)
            }
            EditOperation::Tint { color, opacity, .. } => {
                filters::tint(&mut frame.data, *color, *opacity, None)
            }
            EditOperation::Overlay(spec) => self.draw_overlay(frame, spec, None)?,
            _ => {}
        }
        Ok(())
    }

    fn apply_masked(
        &self,
        frame: &mut Frame,
        mask: &Mask,
        operation: &EditOperation,
    ) -> SnapEditResult<()> {
        let values = mask.values();
        let foreground = |i: usize| values[i];
        let background = |i: usize| 1.0 - values[i];
        let select = |target: &EditTarget| match target {
            EditTarget::Background => true,
            EditTarget::Whole | EditTarget::Foreground => false,
        };

        match operation {
            EditOperation::RemoveBackground { replacement } => {
                filters::remove_background(&mut frame.data, mask, *replacement)
            }
            EditOperation::BlurBackground { radius } => {
                let blurred = filters::box_blur(
                    &frame.data,
                    frame.width as usize,
                    frame.height as usize,
                    *radius as usize,
                );
                filters::blend_from(&mut frame.data, &blurred, &background);
            }
            EditOperation::StyleFilter {
                adjustments,
                target,
            } => {
                let weights: &dyn Fn(usize) -> f32 = if select(target) {
                    &background
                } else {
                    &foreground
                };
                filters::style_filter(&mut frame.data, adjustments, Some(weights))
            }
            EditOperation::Tint {
                color,
                opacity,
                target,
            } => {
                let weights: &dyn Fn(usize) -> f32 = if select(target) {
                    &background
                } else {
                    &foreground
                };
                filters::tint(&mut frame.data, *color, *opacity, Some(weights))
            }
            EditOperation::Overlay(spec) => {
                let hidden: &dyn Fn(usize) -> f32 = &foreground;
                self.draw_overlay(frame, spec, Some(hidden))?
            }
            EditOperation::PixelateRegions { .. } => {}
        }
        Ok(())
    }

    /// Draw the loaded overlay; `hidden` marks pixels that stay in front of it.
    fn draw_overlay(
        &self,
        frame: &mut Frame,
        spec: &OverlaySpec,
        hidden: Weights<'_>,
    ) -> SnapEditResult<()> {
        let overlay = self.overlay.as_ref().ok_or_else(|| {
            SnapEditError::invalid_state(format!(
                "overlay {} was never loaded",
                spec.image.display()
            ))
        })?;
        let placement = Placement {
            left: (spec.x as f64 * frame.width as f64).round() as i64,
            top: (spec.y as f64 * frame.height as f64).round() as i64,
            opacity: spec.opacity,
        };
        filters::draw_overlay(
            &mut frame.data,
            (frame.width, frame.height),
            &overlay.data,
            (overlay.width, overlay.height),
            &placement,
            hidden,
        );
        Ok(())
    }
}

fn mask_for(frame: &Frame, output: &InferenceOutput, spec: &EditSpec) -> SnapEditResult<Mask> {
    let mask = output.as_mask().ok_or_else(|| {
        SnapEditError::incompatible_edit(format!(
            "{} needs a segmentation mask, got {}",
            spec.operation.name(),
            output.kind_name()
        ))
    })?;
    if mask.width != frame.width || mask.height != frame.height {
        return Err(SnapEditError::incompatible_edit(format!(
            "mask is {}x{} but frame {} is {}x{}",
            mask.width, mask.height, frame.index, frame.width, frame.height
        )));
    }
    Ok(match spec.mask_threshold {
        Some(threshold) => mask.binarized(threshold),
        None => mask.clone(),
    })
}
