//! Output formats and export settings.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snapedit_common::config::ExportDefaults;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::MediaKind;

/// Video container/codec pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    #[serde(rename = "mp4-h264")]
    Mp4H264,
    #[serde(rename = "mp4-h265")]
    Mp4H265,
    #[serde(rename = "webm")]
    Webm,
    #[serde(rename = "gif")]
    Gif,
}

impl VideoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoFormat::Mp4H264 => "mp4-h264",
            VideoFormat::Mp4H265 => "mp4-h265",
            VideoFormat::Webm => "webm",
            VideoFormat::Gif => "gif",
        }
    }

    /// ffmpeg muxer name.
    pub fn muxer(&self) -> &'static str {
        match self {
            VideoFormat::Mp4H264 | VideoFormat::Mp4H265 => "mp4",
            VideoFormat::Webm => "webm",
            VideoFormat::Gif => "gif",
        }
    }

    pub fn supports_audio(&self) -> bool {
        !matches!(self, VideoFormat::Gif)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoFormat {
    type Err = SnapEditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4-h264" | "mp4" | "h264" => Ok(VideoFormat::Mp4H264),
            "mp4-h265" | "h265" | "hevc" => Ok(VideoFormat::Mp4H265),
            "webm" => Ok(VideoFormat::Webm),
            "gif" => Ok(VideoFormat::Gif),
            other => Err(SnapEditError::unsupported_format(format!(
                "unknown video format: {other}"
            ))),
        }
    }
}

/// Still image codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StillFormat {
    Png,
    Jpeg,
    Webp,
}

impl StillFormat {
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, StillFormat::Jpeg)
    }
}

/// What the encode sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "format", rename_all = "lowercase")]
pub enum OutputFormat {
    Still(StillFormat),
    Video(VideoFormat),
}

impl OutputFormat {
    /// Pick the output format from the destination extension.
    ///
    /// Photos must be written as still images and videos as videos. For
    /// `.mp4` destinations the configured codec decides between H.264 and
    /// H.265.
    pub fn for_destination(
        destination: &Path,
        source: MediaKind,
        settings: &ExportSettings,
    ) -> SnapEditResult<Self> {
        let ext = destination
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let format = match ext.as_str() {
            "png" => OutputFormat::Still(StillFormat::Png),
            "jpg" | "jpeg" => OutputFormat::Still(StillFormat::Jpeg),
            "webp" => OutputFormat::Still(StillFormat::Webp),
            "mp4" | "m4v" | "mov" => match settings.video_format {
                VideoFormat::Mp4H265 => OutputFormat::Video(VideoFormat::Mp4H265),
                _ => OutputFormat::Video(VideoFormat::Mp4H264),
            },
            "webm" => OutputFormat::Video(VideoFormat::Webm),
            "gif" => OutputFormat::Video(VideoFormat::Gif),
            other => {
                return Err(SnapEditError::unsupported_format(format!(
                    "cannot write output with extension {other:?}"
                )))
            }
        };

        match (source, format) {
            (MediaKind::Image, OutputFormat::Still(_)) | (MediaKind::Video, OutputFormat::Video(_)) => {
                Ok(format)
            }
            (MediaKind::Image, OutputFormat::Video(_)) => Err(SnapEditError::unsupported_format(
                "a photo must be exported as png, jpeg or webp",
            )),
            (MediaKind::Video, OutputFormat::Still(_)) => Err(SnapEditError::unsupported_format(
                "a video must be exported as mp4, webm or gif",
            )),
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            OutputFormat::Still(_) => MediaKind::Image,
            OutputFormat::Video(_) => MediaKind::Video,
        }
    }
}

/// Encoder parameters for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub video_format: VideoFormat,
    pub bitrate_kbps: u32,
    pub include_audio: bool,
    pub jpeg_quality: u8,
    /// Short side of video outputs; `None` keeps the source size.
    #[serde(default)]
    pub resolution: Option<u32>,
    /// Video output frame rate; `None` keeps the source rate.
    #[serde(default)]
    pub framerate: Option<f64>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            video_format: VideoFormat::Mp4H264,
            bitrate_kbps: 5000,
            include_audio: true,
            jpeg_quality: 90,
            resolution: None,
            framerate: None,
        }
    }
}

impl ExportSettings {
    pub fn from_defaults(defaults: &ExportDefaults) -> SnapEditResult<Self> {
        if !(1..=100).contains(&defaults.jpeg_quality) {
            return Err(SnapEditError::config("jpeg_quality must be within [1, 100]"));
        }
        if let Some(resolution) = defaults.resolution {
            if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&resolution) {
                return Err(SnapEditError::config(format!(
                    "resolution must be within [{MIN_RESOLUTION}, {MAX_RESOLUTION}]"
                )));
            }
        }
        if let Some(fps) = defaults.framerate {
            if !fps.is_finite() || fps <= 0.0 || fps > MAX_FRAMERATE {
                return Err(SnapEditError::config(format!(
                    "framerate must be within (0, {MAX_FRAMERATE}]"
                )));
            }
        }
        Ok(Self {
            video_format: defaults.video_format.parse()?,
            bitrate_kbps: defaults.bitrate_kbps,
            include_audio: defaults.include_audio,
            jpeg_quality: defaults.jpeg_quality,
            resolution: defaults.resolution,
            framerate: defaults.framerate,
        })
    }

    /// Encoded size for a `width` x `height` source.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self.resolution {
            Some(target) => scaled_size(width, height, target),
            None => (width, height),
        }
    }
}

const MIN_RESOLUTION: u32 = 16;
const MAX_RESOLUTION: u32 = 4320;
const MAX_FRAMERATE: f64 = 240.0;

/// Scale so the short side becomes `target`, keeping the aspect ratio.
///
/// The long side is rounded up to an even value for yuv420p encoders.
pub fn scaled_size(width: u32, height: u32, target: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let target = target & !1;
    let long = |long: u32, short: u32| {
        let scaled = (target as u64 * long as u64 / short as u64) as u32;
        scaled + scaled % 2
    };
    if width >= height {
        (long(width, height), target)
    } else {
        (target, long(height, width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        let settings = ExportSettings::default();
        assert_eq!(
            OutputFormat::for_destination(Path::new("out.PNG"), MediaKind::Image, &settings)
                .unwrap(),
            OutputFormat::Still(StillFormat::Png)
        );
        assert_eq!(
            OutputFormat::for_destination(Path::new("out.webm"), MediaKind::Video, &settings)
                .unwrap(),
            OutputFormat::Video(VideoFormat::Webm)
        );
    }

    #[test]
    fn test_mp4_follows_configured_codec() {
        let settings = ExportSettings {
            video_format: VideoFormat::Mp4H265,
            ..ExportSettings::default()
        };
        assert_eq!(
            OutputFormat::for_destination(Path::new("clip.mp4"), MediaKind::Video, &settings)
                .unwrap(),
            OutputFormat::Video(VideoFormat::Mp4H265)
        );
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let settings = ExportSettings::default();
        assert!(
            OutputFormat::for_destination(Path::new("photo.mp4"), MediaKind::Image, &settings)
                .is_err()
        );
        assert!(
            OutputFormat::for_destination(Path::new("clip.png"), MediaKind::Video, &settings)
                .is_err()
        );
        assert!(
            OutputFormat::for_destination(Path::new("clip.txt"), MediaKind::Video, &settings)
                .is_err()
        );
    }

    #[test]
    fn test_settings_from_config_defaults() {
        let settings = ExportSettings::from_defaults(&ExportDefaults::default()).unwrap();
        assert_eq!(settings, ExportSettings::default());

        let bad = ExportDefaults {
            video_format: "avi".to_string(),
            ..ExportDefaults::default()
        };
        assert!(ExportSettings::from_defaults(&bad).is_err());
    }

    #[test]
    fn test_scaled_size_keeps_aspect_and_even_sides() {
        assert_eq!(scaled_size(1920, 1080, 720), (1280, 720));
        assert_eq!(scaled_size(1080, 1920, 720), (720, 1280));
        assert_eq!(scaled_size(640, 480, 1080), (1440, 1080));
        assert_eq!(scaled_size(999, 666, 721), (1080, 720));
        assert_eq!(scaled_size(500, 500, 720), (720, 720));
    }

    #[test]
    fn test_output_size_and_rate_validation() {
        let defaults = ExportDefaults {
            resolution: Some(720),
            framerate: Some(24.0),
            ..ExportDefaults::default()
        };
        let settings = ExportSettings::from_defaults(&defaults).unwrap();
        assert_eq!(settings.output_size(1920, 1080), (1280, 720));
        assert_eq!(ExportSettings::default().output_size(1920, 1080), (1920, 1080));

        let tiny = ExportDefaults {
            resolution: Some(4),
            ..ExportDefaults::default()
        };
        assert!(ExportSettings::from_defaults(&tiny).is_err());
        let zero_rate = ExportDefaults {
            framerate: Some(0.0),
            ..ExportDefaults::default()
        };
        assert!(ExportSettings::from_defaults(&zero_rate).is_err());
    }

    #[test]
    fn test_video_format_serde_names() {
        let json = serde_json::to_string(&VideoFormat::Mp4H264).unwrap();
        assert_eq!(json, "\"mp4-h264\"");
        assert_eq!("GIF".parse::<VideoFormat>().unwrap(), VideoFormat::Gif);
    }
}
