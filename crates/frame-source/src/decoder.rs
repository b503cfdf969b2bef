//! Native decoders behind the frame source.

use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{Frame, MediaAsset, PixelFormat};

/// Undecorated pixels from a decoder; the source stamps index and PTS.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Trait for decoding backends (ffmpeg, image codecs, test fakes).
pub trait FrameDecoder: Send {
    /// Decode the next frame, or `None` at end of stream.
    fn decode_next(&mut self) -> SnapEditResult<Option<RawFrame>>;

    /// Release native resources. Must be safe to call more than once.
    fn close(&mut self);

    /// Backend name.
    fn name(&self) -> &str;
}

pub(crate) fn map_image_error(err: image::ImageError) -> SnapEditError {
    match err {
        image::ImageError::Unsupported(e) => SnapEditError::unsupported_format(e.to_string()),
        image::ImageError::IoError(e) if e.kind() == IoErrorKind::UnexpectedEof => {
            SnapEditError::corrupt_media(format!("truncated image: {e}"))
        }
        image::ImageError::IoError(e) => SnapEditError::Io(e),
        other => SnapEditError::corrupt_media(other.to_string()),
    }
}

/// Decodes a still image into exactly one RGBA frame.
pub struct StillImageDecoder {
    path: PathBuf,
    done: bool,
}

impl StillImageDecoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            done: false,
        }
    }
}

impl FrameDecoder for StillImageDecoder {
    fn decode_next(&mut self) -> SnapEditResult<Option<RawFrame>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let image = image::open(&self.path).map_err(map_image_error)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Some(RawFrame {
            width,
            height,
            format: PixelFormat::Rgba8,
            data: image.into_raw(),
        }))
    }

    fn close(&mut self) {
        self.done = true;
    }

    fn name(&self) -> &str {
        "image"
    }
}

/// Decode a standalone image (an overlay or sticker) into an RGBA frame.
pub fn load_image(path: &Path) -> SnapEditResult<Frame> {
    if !path.exists() {
        return Err(SnapEditError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = StillImageDecoder::new(path)
        .decode_next()?
        .ok_or_else(|| SnapEditError::corrupt_media(format!("{} is empty", path.display())))?;
    Frame::new(0, 0, raw.width, raw.height, raw.format, raw.data)
}

/// Decodes a video through an `ffmpeg` child process emitting raw RGBA.
pub struct FfmpegDecoder {
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl FfmpegDecoder {
    /// Spawn ffmpeg for `asset`. Frames are scaled to the probed resolution
    /// and resampled to a constant `asset.fps`, so frame `i` sits at `i / fps`.
    pub fn spawn(asset: &MediaAsset) -> SnapEditResult<Self> {
        let args = decode_args(&asset.path, asset.width, asset.height, asset.fps);
        tracing::debug!(args = ?args, "Spawning ffmpeg decoder");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SnapEditError::unsupported_format(format!("Failed to start ffmpeg decoder: {e}"))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SnapEditError::corrupt_media("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SnapEditError::corrupt_media("Failed to capture ffmpeg stderr"))?;

        // Drain stderr so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        tracing::info!(
            pid = child.id(),
            path = %asset.path.display(),
            width = asset.width,
            height = asset.height,
            "ffmpeg decoder started"
        );

        Ok(Self {
            child: Some(child),
            stdout: Some(BufReader::new(stdout)),
            stderr_task: Some(stderr_task),
            width: asset.width,
            height: asset.height,
            frames_read: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Wait for the child after stdout hit EOF and surface decoder failures.
    fn finish_stream(&mut self) -> SnapEditResult<()> {
        self.stdout = None;
        let status = match self.child.take() {
            Some(mut child) => child
                .wait()
                .map_err(|e| SnapEditError::corrupt_media(format!("Failed to wait on ffmpeg: {e}")))?,
            None => return Ok(()),
        };
        let stderr_output = self
            .stderr_task
            .take()
            .and_then(|task| task.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(SnapEditError::corrupt_media(format!(
                "ffmpeg decode failed (status {status}) after {} frame(s): {}",
                self.frames_read,
                stderr_output.trim()
            )));
        }
        if self.frames_read == 0 {
            return Err(SnapEditError::corrupt_media(format!(
                "ffmpeg produced no frames: {}",
                stderr_output.trim()
            )));
        }
        tracing::debug!(frames = self.frames_read, "ffmpeg decoder reached end of stream");
        Ok(())
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn decode_next(&mut self) -> SnapEditResult<Option<RawFrame>> {
        let frame_len = self.frame_len();
        let Some(reader) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; frame_len];
        let filled = read_full(reader, &mut data)?;
        if filled == 0 {
            self.finish_stream()?;
            return Ok(None);
        }
        if filled < frame_len {
            self.close();
            return Err(SnapEditError::corrupt_media(format!(
                "truncated frame {}: {filled} of {frame_len} bytes",
                self.frames_read
            )));
        }

        self.frames_read += 1;
        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba8,
            data,
        }))
    }

    fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                tracing::debug!(error = %err, "ffmpeg decoder already exited");
            }
            let _ = child.wait();
            tracing::debug!(frames = self.frames_read, "ffmpeg decoder closed early");
        }
        if let Some(task) = self.stderr_task.take() {
            let _ = task.join();
        }
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> SnapEditResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(SnapEditError::corrupt_media(format!(
                    "Failed reading decoded frames: {e}"
                )))
            }
        }
    }
    Ok(filled)
}

fn decode_args(path: &Path, width: u32, height: u32, fps: f64) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-i",
    ]
    .map(String::from)
    .to_vec();
    args.push(path.display().to_string());
    args.extend(["-map", "0:v:0", "-fps_mode"].map(String::from));
    if fps.is_finite() && fps > 0.0 {
        args.extend(["cfr".to_string(), "-r".to_string(), format!("{fps}")]);
    } else {
        args.push("passthrough".to_string());
    }
    args.push("-vf".to_string());
    args.push(format!("scale={width}:{height}"));
    args.extend(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"].map(String::from));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_args_request_rgba_pipe() {
        let args = decode_args(Path::new("/tmp/clip.mp4"), 320, 240, 29.97);
        assert!(args.windows(2).any(|w| w[0] == "-pix_fmt" && w[1] == "rgba"));
        assert!(args.contains(&"scale=320:240".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
        // Variable frame rate input is resampled to the probed rate.
        assert!(args.windows(2).any(|w| w[0] == "-fps_mode" && w[1] == "cfr"));
        assert!(args.windows(2).any(|w| w[0] == "-r" && w[1] == "29.97"));
    }

    #[test]
    fn test_decode_args_without_rate_keep_source_timing() {
        let args = decode_args(Path::new("/tmp/clip.mp4"), 320, 240, 0.0);
        assert!(args.windows(2).any(|w| w[0] == "-fps_mode" && w[1] == "passthrough"));
        assert!(!args.iter().any(|a| a == "-r"));
    }

    #[test]
    fn test_read_full_reports_short_reads() {
        let mut reader = std::io::Cursor::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 5];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_still_image_yields_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([9, 8, 7, 255]))
            .save(&path)
            .unwrap();

        let mut decoder = StillImageDecoder::new(&path);
        let frame = decoder.decode_next().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(&frame.data[..4], &[9, 8, 7, 255]);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_image_maps_to_corrupt_media() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really").unwrap();

        let err = StillImageDecoder::new(&path).decode_next().unwrap_err();
        assert!(matches!(
            err.kind(),
            snapedit_common::ErrorKind::CorruptMedia | snapedit_common::ErrorKind::Io
        ));
    }

    #[test]
    fn test_load_image_as_rgba_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sticker.png");
        image::RgbaImage::from_pixel(2, 3, image::Rgba([200, 10, 10, 128]))
            .save(&path)
            .unwrap();

        let frame = load_image(&path).unwrap();
        assert_eq!((frame.width, frame.height), (2, 3));
        assert_eq!(frame.rgba_at(1, 2), [200, 10, 10, 128]);

        let err = load_image(&dir.path().join("missing.png")).unwrap_err();
        assert_eq!(err.kind(), snapedit_common::ErrorKind::FileNotFound);
    }
}
