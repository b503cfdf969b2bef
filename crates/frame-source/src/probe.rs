//! Media probing: builds a [`MediaAsset`] from a file on disk.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use snapedit_common::clock::FrameClock;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{MediaAsset, MediaKind};

/// Inspect `path` and describe it.
///
/// Stills are probed with the `image` crate; videos with `ffprobe`.
pub fn probe_asset(path: &Path) -> SnapEditResult<MediaAsset> {
    if !path.exists() {
        return Err(SnapEditError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match MediaKind::from_path(path) {
        Some(MediaKind::Image) => probe_image(path),
        Some(MediaKind::Video) => probe_video(path),
        None => Err(SnapEditError::unsupported_format(format!(
            "unrecognized media extension: {}",
            path.display()
        ))),
    }
}

fn probe_image(path: &Path) -> SnapEditResult<MediaAsset> {
    let (width, height) = image::image_dimensions(path).map_err(crate::decoder::map_image_error)?;
    if width == 0 || height == 0 {
        return Err(SnapEditError::corrupt_media(format!(
            "{} has empty dimensions",
            path.display()
        )));
    }
    tracing::debug!(path = %path.display(), width, height, "Probed still image");
    Ok(MediaAsset::image(path, width, height))
}

fn probe_video(path: &Path) -> SnapEditResult<MediaAsset> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,width,height,avg_frame_rate,r_frame_rate,nb_frames,duration:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| SnapEditError::unsupported_format(format!("ffprobe unavailable: {e}")))?;

    if !output.status.success() {
        return Err(SnapEditError::corrupt_media(format!(
            "ffprobe rejected {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    let asset = parse_ffprobe_json(path, &raw)?;
    tracing::debug!(
        path = %path.display(),
        width = asset.width,
        height = asset.height,
        fps = asset.fps,
        frames = asset.frame_count,
        has_audio = asset.has_audio,
        "Probed video"
    );
    Ok(asset)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Build an asset from `ffprobe -of json` output.
pub fn parse_ffprobe_json(path: &Path, json: &str) -> SnapEditResult<MediaAsset> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| SnapEditError::corrupt_media(format!("unreadable ffprobe output: {e}")))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| {
            SnapEditError::unsupported_format(format!("{} has no video stream", path.display()))
        })?;
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(SnapEditError::corrupt_media(format!(
                "{} reports no frame size",
                path.display()
            )))
        }
    };

    let fps = [video.avg_frame_rate.as_deref(), video.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(parse_rational)
        .find(|fps| *fps > 0.0)
        .ok_or_else(|| {
            SnapEditError::corrupt_media(format!("{} reports no frame rate", path.display()))
        })?;

    let duration_secs = video
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| FrameClock::new(fps).frame_count(duration_secs));

    let mut asset = MediaAsset::video(path, width, height, fps, frame_count).with_audio(has_audio);
    if duration_secs > 0.0 {
        asset.duration_secs = duration_secs;
    }
    Ok(asset)
}

/// Parse `"30000/1001"` or `"25"`.
fn parse_rational(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => value.trim().parse::<f64>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert!((parse_rational("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rational("25"), Some(25.0));
        assert_eq!(parse_rational("0/0"), None);
    }

    #[test]
    fn test_parse_ffprobe_json_with_audio() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "avg_frame_rate": "30/1", "r_frame_rate": "30/1",
                 "nb_frames": "90", "duration": "3.000000"},
                {"codec_type": "audio", "duration": "3.01"}
            ],
            "format": {"duration": "3.01"}
        }"#;
        let asset = parse_ffprobe_json(Path::new("clip.mp4"), json).unwrap();
        assert_eq!(asset.width, 1280);
        assert_eq!(asset.frame_count, 90);
        assert!(asset.has_audio);
        assert!((asset.fps - 30.0).abs() < 1e-9);
        assert!((asset.duration_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ffprobe_estimates_frames_from_duration() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 64, "height": 64,
                         "avg_frame_rate": "0/0", "r_frame_rate": "25/1"}],
            "format": {"duration": "2.0"}
        }"#;
        let asset = parse_ffprobe_json(Path::new("clip.webm"), json).unwrap();
        assert_eq!(asset.frame_count, 50);
        assert!(!asset.has_audio);
    }

    #[test]
    fn test_parse_ffprobe_without_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
        let err = parse_ffprobe_json(Path::new("song.mp4"), json).unwrap_err();
        assert_eq!(err.kind(), snapedit_common::ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_probe_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let err = probe_asset(&path).unwrap_err();
        assert_eq!(err.kind(), snapedit_common::ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_probe_still_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        image::RgbaImage::new(7, 3).save(&path).unwrap();
        let asset = probe_asset(&path).unwrap();
        assert_eq!((asset.width, asset.height), (7, 3));
        assert!(asset.is_image());
    }
}
