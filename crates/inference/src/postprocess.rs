//! Raw model output -> frame-space [`InferenceOutput`].

use std::sync::Arc;

use ndarray::ArrayD;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{InferenceOutput, Mask, Region};

use crate::manifest::{MaskSemantics, ModelKind, ModelManifest};
use crate::preprocess::CropWindow;

const DETECTION_ROW: usize = 6;

/// Decode `raw` for a `frame_width` x `frame_height` frame whose `window`
/// was fed to the model. Returns the output and its confidence.
pub fn decode_output(
    raw: &ArrayD<f32>,
    manifest: &ModelManifest,
    frame_width: u32,
    frame_height: u32,
    window: CropWindow,
) -> SnapEditResult<(InferenceOutput, f32)> {
    if raw.len() != manifest.output_len() {
        return Err(SnapEditError::TensorShapeMismatch {
            expected: manifest.output_shape.clone(),
            actual: raw.shape().to_vec(),
        });
    }
    if let Some(pos) = raw.iter().position(|v| !v.is_finite()) {
        return Err(SnapEditError::inference(format!(
            "{}: output value at {pos} is not finite",
            manifest.id
        )));
    }
    let values: Vec<f32> = raw.iter().copied().collect();

    match manifest.kind {
        ModelKind::Segmentation => {
            let mask = decode_mask(&values, manifest, frame_width, frame_height, window)?;
            let confidence = mask.decisiveness();
            Ok((InferenceOutput::Mask(Arc::new(mask)), confidence))
        }
        ModelKind::Detection => {
            let regions = decode_regions(&values, manifest.score_threshold, window);
            let confidence = regions
                .iter()
                .map(|r| r.score)
                .fold(0.0f32, f32::max)
                .clamp(0.0, 1.0);
            Ok((InferenceOutput::Regions(Arc::new(regions)), confidence))
        }
    }
}

fn decode_mask(
    values: &[f32],
    manifest: &ModelManifest,
    frame_width: u32,
    frame_height: u32,
    window: CropWindow,
) -> SnapEditResult<Mask> {
    let (mask_h, mask_w) = manifest.mask_size().ok_or_else(|| {
        SnapEditError::TensorShapeMismatch {
            expected: manifest.output_shape.clone(),
            actual: vec![values.len()],
        }
    })?;
    let source: Vec<f32> = values
        .iter()
        .map(|v| match manifest.mask_semantics {
            MaskSemantics::Foreground => v.clamp(0.0, 1.0),
            MaskSemantics::Background => (1.0 - v).clamp(0.0, 1.0),
        })
        .collect();

    let scale_x = mask_w as f32 / window.width.max(1) as f32;
    let scale_y = mask_h as f32 / window.height.max(1) as f32;
    let mut out = Vec::with_capacity(frame_width as usize * frame_height as usize);
    for y in 0..frame_height {
        for x in 0..frame_width {
            if !window.contains(x, y) {
                out.push(0.0);
                continue;
            }
            let u = ((x - window.x) as f32 + 0.5) * scale_x - 0.5;
            let v = ((y - window.y) as f32 + 0.5) * scale_y - 0.5;
            out.push(bilinear(&source, mask_w, mask_h, u, v));
        }
    }
    Mask::new(frame_width, frame_height, out)
}

fn bilinear(src: &[f32], width: usize, height: usize, u: f32, v: f32) -> f32 {
    let u = u.clamp(0.0, (width - 1) as f32);
    let v = v.clamp(0.0, (height - 1) as f32);
    let x0 = u.floor() as usize;
    let y0 = v.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = u - x0 as f32;
    let fy = v - y0 as f32;

    let top = src[y0 * width + x0] * (1.0 - fx) + src[y0 * width + x1] * fx;
    let bottom = src[y1 * width + x0] * (1.0 - fx) + src[y1 * width + x1] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Rows are `[ymin, xmin, ymax, xmax, score, class]`, normalized to the window.
fn decode_regions(values: &[f32], score_threshold: f32, window: CropWindow) -> Vec<Region> {
    let (wx, wy) = (window.x as f32, window.y as f32);
    let (ww, wh) = (window.width as f32, window.height as f32);

    values
        .chunks_exact(DETECTION_ROW)
        .filter(|row| row[4] >= score_threshold)
        .filter_map(|row| {
            let (ymin, xmin) = (row[0].clamp(0.0, 1.0), row[1].clamp(0.0, 1.0));
            let (ymax, xmax) = (row[2].clamp(0.0, 1.0), row[3].clamp(0.0, 1.0));
            if xmax <= xmin || ymax <= ymin {
                return None;
            }
            Some(Region {
                x: wx + xmin * ww,
                y: wy + ymin * wh,
                width: (xmax - xmin) * ww,
                height: (ymax - ymin) * wh,
                label: row[5].max(0.0) as u32,
                score: row[4].clamp(0.0, 1.0),
            })
        })
        .collect()
}
