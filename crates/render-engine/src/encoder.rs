//! Encoder backends behind the encode sink.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, RgbaImage};
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::Frame;

use crate::settings::StillFormat;

/// Trait for encoding backends (ffmpeg, image codecs, test fakes).
///
/// Encoders write to the path they were created with; the sink owns
/// promoting that file to the destination.
pub trait FrameEncoder: Send {
    /// Frames the encoder would like per `write_chunk` call.
    fn preferred_chunk(&self) -> usize {
        1
    }

    /// Encode a run of consecutive frames. Returns how many were consumed,
    /// which may be fewer than offered when the encoder is backed up.
    fn write_chunk(&mut self, frames: &[Frame]) -> SnapEditResult<usize>;

    /// Flush and close the output file.
    fn finish(&mut self) -> SnapEditResult<()>;

    /// Stop immediately; the output file is discarded by the caller.
    fn abort(&mut self);

    /// Backend name.
    fn name(&self) -> &str;
}

/// Writes exactly one frame as png, jpeg or webp.
pub struct StillImageEncoder {
    path: PathBuf,
    format: StillFormat,
    jpeg_quality: u8,
    frame: Option<Frame>,
}

impl StillImageEncoder {
    pub fn new(path: impl Into<PathBuf>, format: StillFormat, jpeg_quality: u8) -> Self {
        Self {
            path: path.into(),
            format,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            frame: None,
        }
    }

    fn encode(&self, frame: Frame, path: &Path) -> SnapEditResult<()> {
        let frame = frame.into_rgba();
        let (width, height) = (frame.width, frame.height);
        let image = RgbaImage::from_raw(width, height, frame.data.clone()).ok_or_else(|| {
            SnapEditError::encode(format!(
                "frame {} does not hold {width}x{height} RGBA pixels",
                frame.index
            ))
        })?;

        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        let result = match self.format {
            StillFormat::Png => image.write_with_encoder(PngEncoder::new(writer)),
            StillFormat::Webp => image.write_with_encoder(WebPEncoder::new_lossless(writer)),
            StillFormat::Jpeg => DynamicImage::ImageRgba8(image)
                .to_rgb8()
                .write_with_encoder(JpegEncoder::new_with_quality(writer, self.jpeg_quality)),
        };
        result.map_err(|e| SnapEditError::encode(format!("Failed to encode {:?}: {e}", self.format)))
    }
}

impl FrameEncoder for StillImageEncoder {
    fn write_chunk(&mut self, frames: &[Frame]) -> SnapEditResult<usize> {
        if frames.is_empty() {
            return Ok(0);
        }
        if self.frame.is_some() || frames.len() > 1 {
            return Err(SnapEditError::encode(
                "still image output takes exactly one frame",
            ));
        }
        self.frame = Some(frames[0].clone());
        Ok(1)
    }

    fn finish(&mut self) -> SnapEditResult<()> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| SnapEditError::encode("no frame was submitted for the still image"))?;
        let path = self.path.clone();
        self.encode(frame, &path)?;
        tracing::debug!(path = %path.display(), format = ?self.format, "Still image written");
        Ok(())
    }

    fn abort(&mut self) {
        self.frame = None;
    }

    fn name(&self) -> &str {
        "still-image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_roundtrip_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut encoder = StillImageEncoder::new(&path, StillFormat::Png, 90);
        let frame = Frame::filled(0, 0, 3, 2, [10, 20, 30, 0]);
        assert_eq!(encoder.write_chunk(&[frame]).unwrap(), 1);
        encoder.finish().unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [10, 20, 30, 0]);
    }

    #[test]
    fn test_jpeg_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        let mut encoder = StillImageEncoder::new(&path, StillFormat::Jpeg, 80);
        encoder
            .write_chunk(&[Frame::filled(0, 0, 8, 8, [200, 100, 50, 255])])
            .unwrap();
        encoder.finish().unwrap();
        assert_eq!(image::image_dimensions(&path).unwrap(), (8, 8));
    }

    #[test]
    fn test_second_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = StillImageEncoder::new(dir.path().join("x.png"), StillFormat::Png, 90);
        encoder
            .write_chunk(&[Frame::filled(0, 0, 1, 1, [0; 4])])
            .unwrap();
        assert!(encoder
            .write_chunk(&[Frame::filled(1, 0, 1, 1, [0; 4])])
            .is_err());
    }

    #[test]
    fn test_finish_without_frame_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = StillImageEncoder::new(dir.path().join("x.png"), StillFormat::Png, 90);
        assert!(encoder.finish().is_err());
    }
}
