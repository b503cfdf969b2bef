//! Pixel kernels over straight-alpha RGBA8 buffers.
//!
//! Every kernel is deterministic: the same buffer and parameters always
//! produce the same bytes.

use snapedit_media_model::{Color, ColorAdjustments, Mask, Region};

const RED_LUMA: f32 = 0.299;
const GREEN_LUMA: f32 = 0.587;
const BLUE_LUMA: f32 = 0.114;

/// Temperature and tint shift at full strength, in normalized units.
const SHIFT_SCALE: f32 = 0.1;

fn lerp_u8(from: u8, to: u8, weight: f32) -> u8 {
    let value = from as f32 + (to as f32 - from as f32) * weight;
    value.round().clamp(0.0, 255.0) as u8
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Per-pixel blend weight; `None` means the whole frame at full strength.
pub(crate) type Weights<'a> = Option<&'a dyn Fn(usize) -> f32>;

fn weight_at(weights: Weights<'_>, pixel: usize) -> f32 {
    weights.map_or(1.0, |w| w(pixel))
}

/// Colour grade one pixel's RGB.
pub fn adjust_pixel(rgb: [u8; 3], adj: &ColorAdjustments) -> [u8; 3] {
    let mut c = rgb.map(|v| v as f32 / 255.0);

    for v in c.iter_mut() {
        *v += adj.brightness;
        *v = (*v - 0.5) * adj.contrast + 0.5;
    }

    let luma = RED_LUMA * c[0] + GREEN_LUMA * c[1] + BLUE_LUMA * c[2];
    for v in c.iter_mut() {
        *v = luma + (*v - luma) * adj.saturation;
    }

    if adj.exposure != 0.0 {
        let gamma = 1.0 / (1.0 + adj.exposure);
        for v in c.iter_mut() {
            *v = v.max(0.0).powf(gamma);
        }
    }

    c[0] += adj.temperature * SHIFT_SCALE;
    c[2] -= adj.temperature * SHIFT_SCALE;
    c[1] -= adj.tint * SHIFT_SCALE;

    c.map(to_u8)
}

pub(crate) fn style_filter(data: &mut [u8], adj: &ColorAdjustments, weights: Weights<'_>) {
    if adj.is_neutral() {
        return;
    }
    for (i, px) in data.chunks_exact_mut(4).enumerate() {
        let w = weight_at(weights, i);
        if w <= 0.0 {
            continue;
        }
        let graded = adjust_pixel([px[0], px[1], px[2]], adj);
        for c in 0..3 {
            px[c] = lerp_u8(px[c], graded[c], w);
        }
    }
}

pub(crate) fn tint(data: &mut [u8], color: Color, opacity: f32, weights: Weights<'_>) {
    let target = [color.r, color.g, color.b];
    for (i, px) in data.chunks_exact_mut(4).enumerate() {
        let w = weight_at(weights, i) * opacity;
        if w <= 0.0 {
            continue;
        }
        for c in 0..3 {
            px[c] = lerp_u8(px[c], target[c], w);
        }
    }
}

/// Keep foreground, fade background towards `replacement`.
pub(crate) fn remove_background(data: &mut [u8], mask: &Mask, replacement: Color) {
    let repl = [replacement.r, replacement.g, replacement.b];
    let repl_a = replacement.a as f32 / 255.0;

    for (px, m) in data.chunks_exact_mut(4).zip(mask.values()) {
        let m = *m;
        if m >= 1.0 {
            continue;
        }
        let src_a = px[3] as f32 / 255.0;
        let fg = src_a * m;
        let bg = repl_a * (1.0 - m);
        let alpha = fg + bg;
        if alpha <= 0.0 {
            px.copy_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        for c in 0..3 {
            let value = (px[c] as f32 * fg + repl[c] as f32 * bg) / alpha;
            px[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        px[3] = to_u8(alpha);
    }
}

/// Separable box blur with clamped edges.
///
/// Radii past the longer side are clamped to it.
pub fn box_blur(data: &[u8], width: usize, height: usize, radius: usize) -> Vec<u8> {
    if radius == 0 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let radius = radius.min(width.max(height));
    let horizontal = blur_pass(data, width, height, radius, true);
    blur_pass(&horizontal, width, height, radius, false)
}

fn blur_pass(src: &[u8], width: usize, height: usize, radius: usize, horizontal: bool) -> Vec<u8> {
    let mut out = vec![0u8; src.len()];
    let (lines, len) = if horizontal {
        (height, width)
    } else {
        (width, height)
    };
    let at = |line: usize, pos: usize| {
        if horizontal {
            (line * width + pos) * 4
        } else {
            (pos * width + line) * 4
        }
    };
    let window = (2 * radius + 1) as u64;

    for line in 0..lines {
        let mut sums = [0u64; 4];
        // Window centred on position 0, edges clamped.
        for k in 0..=2 * radius {
            let pos = k.saturating_sub(radius).min(len - 1);
            let base = at(line, pos);
            for c in 0..4 {
                sums[c] += src[base + c] as u64;
            }
        }
        for pos in 0..len {
            let base = at(line, pos);
            for c in 0..4 {
                out[base + c] = ((sums[c] + window / 2) / window) as u8;
            }
            let leaving = at(line, pos.saturating_sub(radius));
            let entering = at(line, (pos + radius + 1).min(len - 1));
            for c in 0..4 {
                sums[c] = sums[c] + src[entering + c] as u64 - src[leaving + c] as u64;
            }
        }
    }
    out
}

/// Nearest-neighbour resample of an RGBA buffer.
pub(crate) fn resize_nearest(
    src: &[u8],
    (width, height): (u32, u32),
    (to_width, to_height): (u32, u32),
) -> Vec<u8> {
    let mut out = Vec::with_capacity(to_width as usize * to_height as usize * 4);
    for dy in 0..to_height as u64 {
        let sy = (dy * height as u64 / to_height as u64) as usize;
        for dx in 0..to_width as u64 {
            let sx = (dx * width as u64 / to_width as u64) as usize;
            let base = (sy * width as usize + sx) * 4;
            out.extend_from_slice(&src[base..base + 4]);
        }
    }
    out
}

/// Where an overlay lands on the frame.
pub(crate) struct Placement {
    pub left: i64,
    pub top: i64,
    pub opacity: f32,
}

/// Source-over blend of an RGBA `overlay` onto `data`, clipped to the frame.
///
/// `hidden` gives the per-pixel share of the frame that covers the overlay.
pub(crate) fn draw_overlay(
    data: &mut [u8],
    (width, height): (u32, u32),
    overlay: &[u8],
    (ov_width, ov_height): (u32, u32),
    placement: &Placement,
    hidden: Weights<'_>,
) {
    for oy in 0..ov_height as i64 {
        let fy = placement.top + oy;
        if fy < 0 || fy >= height as i64 {
            continue;
        }
        for ox in 0..ov_width as i64 {
            let fx = placement.left + ox;
            if fx < 0 || fx >= width as i64 {
                continue;
            }
            let i = fy as usize * width as usize + fx as usize;
            let src = &overlay[(oy as usize * ov_width as usize + ox as usize) * 4..][..4];
            let mut sa = src[3] as f32 / 255.0 * placement.opacity;
            if let Some(hidden) = hidden {
                sa *= 1.0 - hidden(i);
            }
            if sa <= 0.0 {
                continue;
            }
            let px = &mut data[i * 4..i * 4 + 4];
            let da = px[3] as f32 / 255.0;
            let alpha = sa + da * (1.0 - sa);
            for c in 0..3 {
                let value = (src[c] as f32 * sa + px[c] as f32 * da * (1.0 - sa)) / alpha;
                px[c] = value.round().clamp(0.0, 255.0) as u8;
            }
            px[3] = to_u8(alpha);
        }
    }
}

/// Blend `other` over `data` where the weight is high.
pub(crate) fn blend_from(data: &mut [u8], other: &[u8], weights: &dyn Fn(usize) -> f32) {
    for (i, (px, src)) in data
        .chunks_exact_mut(4)
        .zip(other.chunks_exact(4))
        .enumerate()
    {
        let w = weights(i);
        if w <= 0.0 {
            continue;
        }
        for c in 0..4 {
            px[c] = lerp_u8(px[c], src[c], w);
        }
    }
}

/// Replace each region with `block_size` square cells of their mean colour.
pub(crate) fn pixelate(data: &mut [u8], width: u32, height: u32, regions: &[Region], block_size: u32) {
    let block = block_size.max(1);
    for region in regions {
        let Some((x0, y0, x1, y1)) = region.pixel_bounds(width, height) else {
            continue;
        };
        let mut by = y0;
        while by < y1 {
            let by_end = (by + block).min(y1);
            let mut bx = x0;
            while bx < x1 {
                let bx_end = (bx + block).min(x1);
                fill_block_mean(data, width, (bx, by, bx_end, by_end));
                bx = bx_end;
            }
            by = by_end;
        }
    }
}

fn fill_block_mean(data: &mut [u8], width: u32, (x0, y0, x1, y1): (u32, u32, u32, u32)) {
    let mut sums = [0u64; 4];
    let count = ((x1 - x0) * (y1 - y0)) as u64;
    for y in y0..y1 {
        for x in x0..x1 {
            let base = ((y * width + x) * 4) as usize;
            for c in 0..4 {
                sums[c] += data[base + c] as u64;
            }
        }
    }
    let mean = sums.map(|s| ((s + count / 2) / count) as u8);
    for y in y0..y1 {
        for x in x0..x1 {
            let base = ((y * width + x) * 4) as usize;
            data[base..base + 4].copy_from_slice(&mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_adjustments_are_identity() {
        let adj = ColorAdjustments::default();
        for rgb in [[0, 0, 0], [12, 200, 99], [255, 255, 255]] {
            assert_eq!(adjust_pixel(rgb, &adj), rgb);
        }
    }

    #[test]
    fn test_saturation_zero_is_grey() {
        let adj = ColorAdjustments {
            saturation: 0.0,
            ..ColorAdjustments::default()
        };
        let [r, g, b] = adjust_pixel([200, 40, 90], &adj);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn test_positive_exposure_brightens() {
        let adj = ColorAdjustments {
            exposure: 1.0,
            ..ColorAdjustments::default()
        };
        let [r, _, _] = adjust_pixel([64, 64, 64], &adj);
        assert!(r > 64);
    }

    #[test]
    fn test_warm_temperature_shifts_red_up_blue_down() {
        let adj = ColorAdjustments {
            temperature: 1.0,
            ..ColorAdjustments::default()
        };
        let [r, g, b] = adjust_pixel([128, 128, 128], &adj);
        assert!(r > 128 && b < 128);
        assert_eq!(g, 128);
    }

    #[test]
    fn test_box_blur_uniform_is_unchanged() {
        let data = vec![7u8; 5 * 3 * 4];
        assert_eq!(box_blur(&data, 5, 3, 2), data);
    }

    #[test]
    fn test_box_blur_spreads_single_pixel() {
        let mut data = vec![0u8; 12];
        data[4..8].copy_from_slice(&[255, 255, 255, 255]);
        let out = box_blur(&data, 3, 1, 1);
        assert_eq!(out[0], 85);
        assert_eq!(out[4], 85);
        assert_eq!(out[8], 85);
    }

    #[test]
    fn test_box_blur_huge_radius_is_clamped() {
        assert_eq!(box_blur(&[255; 4], 1, 1, 9_000_000), vec![255; 4]);

        let row = [0, 0, 0, 255, 90, 90, 90, 255, 180, 180, 180, 255];
        assert_eq!(
            box_blur(&row, 3, 1, usize::MAX / 2),
            box_blur(&row, 3, 1, 3)
        );
    }

    #[test]
    fn test_resize_nearest_doubles_pixels() {
        let src = [1, 1, 1, 255, 2, 2, 2, 255];
        let out = resize_nearest(&src, (2, 1), (4, 2));
        assert_eq!(out.len(), 4 * 2 * 4);
        assert_eq!(&out[0..8], &[1, 1, 1, 255, 1, 1, 1, 255]);
        assert_eq!(&out[24..32], &[2, 2, 2, 255, 2, 2, 2, 255]);
    }

    #[test]
    fn test_draw_overlay_clips_and_blends() {
        let mut data = vec![0u8; 12];
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        let overlay = [255, 255, 255, 255, 255, 0, 0, 128];
        let placement = Placement {
            left: 1,
            top: 0,
            opacity: 1.0,
        };
        draw_overlay(&mut data, (3, 1), &overlay, (2, 1), &placement, None);
        assert_eq!(&data[0..4], &[0, 0, 0, 255]);
        assert_eq!(&data[4..8], &[255, 255, 255, 255]);
        assert_eq!(&data[8..12], &[128, 0, 0, 255]);

        // Entirely off-frame overlays touch nothing.
        let before = data.clone();
        let away = Placement {
            left: -5,
            top: 0,
            opacity: 1.0,
        };
        draw_overlay(&mut data, (3, 1), &overlay, (2, 1), &away, None);
        assert_eq!(data, before);
    }

    #[test]
    fn test_pixelate_averages_block() {
        // 2x1 frame, black and white, one region covering both.
        let mut data = vec![0, 0, 0, 255, 255, 255, 255, 255];
        let region = Region {
            x: 0.0,
            y: 0.0,
            width: 2.0,
            height: 1.0,
            label: 0,
            score: 1.0,
        };
        pixelate(&mut data, 2, 1, &[region], 2);
        assert_eq!(&data[0..4], &[128, 128, 128, 255]);
        assert_eq!(&data[4..8], &[128, 128, 128, 255]);
    }

    #[test]
    fn test_remove_background_transparent() {
        let mut data = vec![10, 20, 30, 255, 10, 20, 30, 255];
        let mask = Mask::new(2, 1, vec![1.0, 0.0]).unwrap();
        remove_background(&mut data, &mask, Color::TRANSPARENT);
        assert_eq!(&data[0..4], &[10, 20, 30, 255]);
        assert_eq!(&data[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_remove_background_opaque_replacement() {
        let mut data = vec![0, 0, 0, 255];
        let mask = Mask::new(1, 1, vec![0.5]).unwrap();
        remove_background(&mut data, &mask, Color::WHITE);
        assert_eq!(data, vec![128, 128, 128, 255]);
    }
}
