//! Frame -> model input tensor.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{Frame, PixelFormat};

use crate::manifest::{ModelManifest, ResizeMode, TensorLayout};

/// Part of the frame that was fed to the model, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Centred square of the shorter side.
    pub fn center_square(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x: (width - side) / 2,
            y: (height - side) / 2,
            width: side,
            height: side,
        }
    }

    pub fn for_mode(mode: ResizeMode, width: u32, height: u32) -> Self {
        match mode {
            ResizeMode::Stretch => Self::full(width, height),
            ResizeMode::CenterCrop => Self::center_square(width, height),
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Normalized input tensor plus the window it was taken from.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub tensor: Array4<f32>,
    pub window: CropWindow,
}

fn to_rgb(frame: &Frame) -> SnapEditResult<RgbImage> {
    let rgb = match frame.format {
        PixelFormat::Rgb8 => frame.data.clone(),
        PixelFormat::Rgba8 => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };
    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
        SnapEditError::TensorShapeMismatch {
            expected: vec![frame.height as usize, frame.width as usize, 3],
            actual: vec![frame.data.len()],
        }
    })
}

/// Resize, lay out and normalize `frame` for `manifest`'s input tensor.
pub fn prepare(frame: &Frame, manifest: &ModelManifest) -> SnapEditResult<PreparedInput> {
    if frame.width == 0 || frame.height == 0 {
        return Err(SnapEditError::TensorShapeMismatch {
            expected: manifest.input_shape.clone(),
            actual: vec![frame.height as usize, frame.width as usize],
        });
    }
    let (in_h, in_w) = manifest.input_size();
    let window = CropWindow::for_mode(manifest.resize, frame.width, frame.height);

    let mut image = to_rgb(frame)?;
    if window != CropWindow::full(frame.width, frame.height) {
        image = imageops::crop_imm(&image, window.x, window.y, window.width, window.height)
            .to_image();
    }
    let resized = imageops::resize(&image, in_w as u32, in_h as u32, FilterType::Triangle);

    let mut tensor = match manifest.layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, in_h, in_w)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, in_h, in_w, 3)),
    };
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = (pixel[c] as f32 - manifest.mean[c]) / manifest.std[c];
            match manifest.layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
            }
        }
    }

    Ok(PreparedInput { tensor, window })
}
