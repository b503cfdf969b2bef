//! Error types shared across SnapEdit crates.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for SnapEdit operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapEditError {
    #[error("Unsupported format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Corrupt media: {message}")]
    CorruptMedia { message: String },

    #[error("Model load error: {message}")]
    ModelLoad { message: String },

    #[error("Model not loaded: {model_id}")]
    ModelNotLoaded { model_id: String },

    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    TensorShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Inference timed out after {attempts} attempt(s) of {timeout_ms}ms")]
    InferenceTimeout { attempts: u32, timeout_ms: u64 },

    #[error("Inference failed: {message}")]
    InferenceFailed { message: String },

    #[error("Edit is incompatible with this asset: {message}")]
    IncompatibleEditForAsset { message: String },

    #[error("Out-of-order frame: expected index {expected}, got {actual}")]
    OutOfOrderFrame { expected: u64, actual: u64 },

    #[error("Encoder full: {buffered} frame(s) already buffered")]
    EncoderFull { buffered: usize },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SnapEditError.
pub type SnapEditResult<T> = Result<T, SnapEditError>;

/// Stable error code reported to the UI layer alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptMedia,
    ModelLoadError,
    ModelNotLoaded,
    TensorShapeMismatch,
    InferenceTimeout,
    InferenceFailed,
    IncompatibleEditForAsset,
    OutOfOrderFrame,
    EncoderFull,
    EncodeError,
    Config,
    InvalidState,
    FileNotFound,
    Cancelled,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptMedia => "corrupt_media",
            ErrorKind::ModelLoadError => "model_load_error",
            ErrorKind::ModelNotLoaded => "model_not_loaded",
            ErrorKind::TensorShapeMismatch => "tensor_shape_mismatch",
            ErrorKind::InferenceTimeout => "inference_timeout",
            ErrorKind::InferenceFailed => "inference_failed",
            ErrorKind::IncompatibleEditForAsset => "incompatible_edit_for_asset",
            ErrorKind::OutOfOrderFrame => "out_of_order_frame",
            ErrorKind::EncoderFull => "encoder_full",
            ErrorKind::EncodeError => "encode_error",
            ErrorKind::Config => "config",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SnapEditError {
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: msg.into(),
        }
    }

    pub fn corrupt_media(msg: impl Into<String>) -> Self {
        Self::CorruptMedia {
            message: msg.into(),
        }
    }

    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad {
            message: msg.into(),
        }
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::InferenceFailed {
            message: msg.into(),
        }
    }

    pub fn incompatible_edit(msg: impl Into<String>) -> Self {
        Self::IncompatibleEditForAsset {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    /// Stable code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::CorruptMedia { .. } => ErrorKind::CorruptMedia,
            Self::ModelLoad { .. } => ErrorKind::ModelLoadError,
            Self::ModelNotLoaded { .. } => ErrorKind::ModelNotLoaded,
            Self::TensorShapeMismatch { .. } => ErrorKind::TensorShapeMismatch,
            Self::InferenceTimeout { .. } => ErrorKind::InferenceTimeout,
            Self::InferenceFailed { .. } => ErrorKind::InferenceFailed,
            Self::IncompatibleEditForAsset { .. } => ErrorKind::IncompatibleEditForAsset,
            Self::OutOfOrderFrame { .. } => ErrorKind::OutOfOrderFrame,
            Self::EncoderFull { .. } => ErrorKind::EncoderFull,
            Self::Encode { .. } => ErrorKind::EncodeError,
            Self::Config { .. } => ErrorKind::Config,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Only inference timeouts are retried, and only inside the inference stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InferenceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_maps_taxonomy() {
        assert_eq!(
            SnapEditError::corrupt_media("truncated").kind(),
            ErrorKind::CorruptMedia
        );
        assert_eq!(
            SnapEditError::OutOfOrderFrame {
                expected: 3,
                actual: 5
            }
            .kind(),
            ErrorKind::OutOfOrderFrame
        );
        assert_eq!(SnapEditError::encode("x").kind().as_str(), "encode_error");
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        let timeout = SnapEditError::InferenceTimeout {
            attempts: 1,
            timeout_ms: 10,
        };
        assert!(timeout.is_retryable());
        assert!(!SnapEditError::inference("NaN in output").is_retryable());
        assert!(!SnapEditError::EncoderFull { buffered: 4 }.is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::IncompatibleEditForAsset).unwrap();
        assert_eq!(json, "\"incompatible_edit_for_asset\"");
    }
}
