//! ffmpeg-backed video encoder.
//!
//! Raw RGBA frames are piped to ffmpeg's stdin; ffmpeg muxes the encoded
//! stream (plus the source audio track, when requested) into the output.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{Frame, PixelFormat};

use crate::encoder::FrameEncoder;
use crate::settings::{ExportSettings, VideoFormat};

/// Frames per `write_chunk` call ffmpeg is fed.
const FFMPEG_CHUNK: usize = 8;

/// Geometry and options for one ffmpeg encode.
#[derive(Debug, Clone)]
pub struct VideoEncodeParams {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: VideoFormat,
    pub settings: ExportSettings,
    /// Source file to take the audio track from.
    pub audio_source: Option<PathBuf>,
}

pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_task: Option<JoinHandle<String>>,
    frame_len: usize,
    frames_written: u64,
    output: PathBuf,
}

impl FfmpegEncoder {
    /// Whether `ffmpeg` can be launched on this system.
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub fn spawn(params: &VideoEncodeParams) -> SnapEditResult<Self> {
        if params.width == 0 || params.height == 0 || params.fps <= 0.0 {
            return Err(SnapEditError::encode(format!(
                "invalid video geometry {}x{} @ {} fps",
                params.width, params.height, params.fps
            )));
        }
        let args = encode_args(params);
        tracing::debug!(args = ?args, "Running ffmpeg encoder");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SnapEditError::encode(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            format = %params.format,
            width = params.width,
            height = params.height,
            fps = params.fps,
            "ffmpeg encoder started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SnapEditError::encode("Failed to capture ffmpeg stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SnapEditError::encode("Failed to capture ffmpeg stderr"))?;

        // Drain stderr so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        Ok(Self {
            child: Some(child),
            stdin: Some(BufWriter::new(stdin)),
            stderr_task: Some(stderr_task),
            frame_len: params.width as usize * params.height as usize * 4,
            frames_written: 0,
            output: params.output.clone(),
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn stderr_output(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }

    /// Reap ffmpeg after a failed write and report what it said.
    fn fail(&mut self, context: String) -> SnapEditError {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let stderr = self.stderr_output();
        SnapEditError::encode(format!("{context}: {}", stderr.trim()))
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn preferred_chunk(&self) -> usize {
        FFMPEG_CHUNK
    }

    fn write_chunk(&mut self, frames: &[Frame]) -> SnapEditResult<usize> {
        for frame in frames {
            if frame.format != PixelFormat::Rgba8 || frame.data.len() != self.frame_len {
                return Err(SnapEditError::encode(format!(
                    "frame {} is not {} bytes of RGBA",
                    frame.index, self.frame_len
                )));
            }
            let Some(stdin) = self.stdin.as_mut() else {
                return Err(SnapEditError::invalid_state("ffmpeg encoder already closed"));
            };
            if let Err(e) = stdin.write_all(&frame.data) {
                return Err(self.fail(format!("ffmpeg stopped accepting frames ({e})")));
            }
            self.frames_written += 1;
        }
        Ok(frames.len())
    }

    fn finish(&mut self) -> SnapEditResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.flush() {
                return Err(self.fail(format!("Failed to flush frames to ffmpeg ({e})")));
            }
        }
        let Some(mut child) = self.child.take() else {
            return Err(SnapEditError::invalid_state("ffmpeg encoder already closed"));
        };
        let status = child
            .wait()
            .map_err(|e| SnapEditError::encode(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr = self.stderr_output();

        if !status.success() {
            return Err(SnapEditError::encode(format!(
                "ffmpeg encode failed (status {status}): {}",
                stderr.trim()
            )));
        }
        tracing::info!(
            frames = self.frames_written,
            output = %self.output.display(),
            "ffmpeg encoder finished"
        );
        Ok(())
    }

    fn abort(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(frames = self.frames_written, "ffmpeg encoder aborted");
        }
        let _ = self.stderr_output();
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

pub(crate) fn encode_args(params: &VideoEncodeParams) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}x{}", params.width, params.height));
    args.push("-r".to_string());
    args.push(format!("{}", params.fps));
    args.push("-i".to_string());
    args.push("pipe:0".to_string());

    let audio = params
        .audio_source
        .as_deref()
        .filter(|_| params.settings.include_audio && params.format.supports_audio());
    if let Some(source) = audio {
        args.push("-i".to_string());
        args.push(path_arg(source));
    }

    args.push("-map".to_string());
    args.push("0:v:0".to_string());
    if audio.is_some() {
        args.push("-map".to_string());
        // Trailing `?` keeps sources without audio encodable.
        args.push("1:a:0?".to_string());
    }

    let (out_width, out_height) = params.settings.output_size(params.width, params.height);
    let scale = ((out_width, out_height) != (params.width, params.height))
        .then(|| format!("scale={out_width}:{out_height}"));
    args.extend(codec_args(
        params.format,
        params.settings.bitrate_kbps,
        audio.is_some(),
        scale.as_deref(),
    ));
    if let Some(fps) = params.settings.framerate {
        args.push("-r".to_string());
        args.push(format!("{fps}"));
    }
    if audio.is_some() {
        args.push("-shortest".to_string());
    }

    args.push("-f".to_string());
    args.push(params.format.muxer().to_string());
    args.push(path_arg(&params.output));
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn codec_args(format: VideoFormat, bitrate_kbps: u32, audio: bool, scale: Option<&str>) -> Vec<String> {
    let video_bitrate = format!("{}k", bitrate_kbps.max(500));
    if format == VideoFormat::Gif {
        let palette = "split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse";
        let filter = match scale {
            Some(scale) => format!("{scale},{palette}"),
            None => palette.to_string(),
        };
        return vec!["-vf".to_string(), filter];
    }
    let mut args: Vec<&str> = match scale {
        Some(scale) => vec!["-vf", scale],
        None => Vec::new(),
    };
    args.extend(match format {
        VideoFormat::Mp4H264 => vec![
            "-c:v", "libx264", "-preset", "medium", "-profile:v", "high", "-pix_fmt", "yuv420p",
        ],
        VideoFormat::Mp4H265 => vec!["-c:v", "libx265", "-preset", "medium", "-pix_fmt", "yuv420p"],
        VideoFormat::Webm => vec!["-c:v", "libvpx-vp9", "-pix_fmt", "yuva420p"],
        VideoFormat::Gif => Vec::new(),
    });
    args.push("-b:v");
    args.push(&video_bitrate);

    match (format, audio) {
        (VideoFormat::Webm, true) => args.extend(["-c:a", "libopus", "-b:a", "128k"]),
        (_, true) => args.extend(["-c:a", "aac", "-b:a", "192k"]),
        (_, false) => args.push("-an"),
    }
    if matches!(format, VideoFormat::Mp4H264 | VideoFormat::Mp4H265) {
        args.extend(["-movflags", "+faststart"]);
    }
    args.into_iter().map(str::to_string).collect()
}
