//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SnapEditError, SnapEditResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding bundled model assets (`<model_id>/manifest.json`).
    pub models_dir: PathBuf,

    /// Pipeline scheduling parameters.
    pub pipeline: PipelineConfig,

    /// Default export parameters.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Scheduling, buffering, and timeout parameters for edit jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each bounded queue between stages.
    pub queue_depth: usize,

    /// Parallel inference workers per job.
    pub inference_workers: usize,

    /// Parallel compositor workers per job.
    pub compositor_workers: usize,

    /// Jobs allowed to run at once; the rest wait as Pending.
    pub max_concurrent_jobs: usize,

    /// Decoded frames allowed to be alive at once per job.
    pub max_in_flight_frames: usize,

    /// Per-call inference timeout in milliseconds.
    pub inference_timeout_ms: u64,

    /// Local retries after an inference timeout.
    pub inference_retries: u32,

    /// Consecutive frames whose inference timed out before the job fails.
    pub max_consecutive_inference_failures: u32,

    /// Frames handed to the encoder per write.
    pub encoder_chunk_frames: usize,

    /// Frames the encode sink may hold before reporting itself full.
    pub encoder_buffer_frames: usize,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Video container/codec, e.g. "mp4-h264", "mp4-h265", "webm", "gif".
    pub video_format: String,

    /// Target video bitrate.
    pub bitrate_kbps: u32,

    /// Copy the source audio track into video outputs.
    pub include_audio: bool,

    /// JPEG quality for still outputs [1, 100].
    pub jpeg_quality: u8,

    /// Short side of video outputs in pixels (720, 1080, 2160); source size when unset.
    pub resolution: Option<u32>,

    /// Video output frame rate; source rate when unset.
    pub framerate: Option<f64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "snapedit_pipeline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            pipeline: PipelineConfig::default(),
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            inference_workers: 2,
            compositor_workers: 2,
            max_concurrent_jobs: 2,
            max_in_flight_frames: 8,
            inference_timeout_ms: 2000,
            inference_retries: 2,
            max_consecutive_inference_failures: 3,
            encoder_chunk_frames: 8,
            encoder_buffer_frames: 32,
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            video_format: "mp4-h264".to_string(),
            bitrate_kbps: 5000,
            include_audio: true,
            jpeg_quality: 90,
            resolution: None,
            framerate: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Reject configurations that would deadlock or never make progress.
    pub fn validate(&self) -> SnapEditResult<()> {
        let positive = [
            ("queue_depth", self.queue_depth),
            ("inference_workers", self.inference_workers),
            ("compositor_workers", self.compositor_workers),
            ("max_concurrent_jobs", self.max_concurrent_jobs),
            ("max_in_flight_frames", self.max_in_flight_frames),
            ("encoder_chunk_frames", self.encoder_chunk_frames),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SnapEditError::config(format!("{name} must be at least 1")));
            }
        }
        if self.inference_timeout_ms == 0 {
            return Err(SnapEditError::config(
                "inference_timeout_ms must be at least 1",
            ));
        }
        if self.encoder_buffer_frames < self.encoder_chunk_frames {
            return Err(SnapEditError::config(
                "encoder_buffer_frames must be >= encoder_chunk_frames",
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from a specific file, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to a specific file.
    pub fn save_to(&self, config_path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("snapedit").join("config.json")
}

/// Default bundled model directory.
fn default_models_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("snapedit").join("models")
}
