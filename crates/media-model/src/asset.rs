//! Input media descriptors.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Whether an asset is a single still image or a frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v", "3gp", "gif"];

impl MediaKind {
    /// Guess the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// An opened input. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Location of the source file.
    pub path: PathBuf,

    /// Still image or video.
    pub kind: MediaKind,

    /// Duration in seconds (0 for images).
    pub duration_secs: f64,

    /// Frame rate (0 for images).
    pub fps: f64,

    /// Resolution in pixels.
    pub width: u32,
    pub height: u32,

    /// Frames the decoder is expected to produce (1 for images).
    pub frame_count: u64,

    /// Whether the container carries an audio stream.
    #[serde(default)]
    pub has_audio: bool,
}

impl MediaAsset {
    /// Describe a still image.
    pub fn image(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            kind: MediaKind::Image,
            duration_secs: 0.0,
            fps: 0.0,
            width,
            height,
            frame_count: 1,
            has_audio: false,
        }
    }

    /// Describe a video stream.
    pub fn video(
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        fps: f64,
        frame_count: u64,
    ) -> Self {
        let duration_secs = if fps > 0.0 {
            frame_count as f64 / fps
        } else {
            0.0
        };
        Self {
            path: path.into(),
            kind: MediaKind::Video,
            duration_secs,
            fps,
            width,
            height,
            frame_count,
            has_audio: false,
        }
    }

    /// Mark the asset as carrying an audio stream.
    pub fn with_audio(mut self, has_audio: bool) -> Self {
        self.has_audio = has_audio;
        self
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }

    /// Raw RGBA8 bytes for one full frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(
            MediaKind::from_path(Path::new("a/b/photo.JPG")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("clip.mp4")),
            Some(MediaKind::Video)
        );
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_video_duration_from_frames() {
        let asset = MediaAsset::video("clip.mp4", 64, 48, 25.0, 50);
        assert!((asset.duration_secs - 2.0).abs() < 1e-9);
        assert_eq!(asset.frame_bytes(), 64 * 48 * 4);
        assert!(!asset.is_image());
    }

    #[test]
    fn test_image_has_single_frame() {
        let asset = MediaAsset::image("photo.png", 10, 10);
        assert_eq!(asset.frame_count, 1);
        assert_eq!(asset.duration_secs, 0.0);
        assert!(asset.is_image());
    }
}
