//! Ordered, atomic encode sink.
//!
//! Frames are written to a hidden temporary file next to the destination
//! and only renamed onto it by [`EncodeSink::finish`]. Aborting, failing or
//! dropping the sink removes the temporary, so a destination either holds a
//! complete output or is left untouched.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use snapedit_common::config::PipelineConfig;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{Frame, MediaAsset};

use crate::encoder::{FrameEncoder, StillImageEncoder};
use crate::ffmpeg::{FfmpegEncoder, VideoEncodeParams};
use crate::settings::{ExportSettings, OutputFormat};

/// Sink sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkLimits {
    /// Frames handed to the encoder per call, capped by its own preference.
    pub chunk_frames: usize,
    /// Frames the sink buffers before `submit` reports `EncoderFull`.
    pub buffer_frames: usize,
}

impl SinkLimits {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            chunk_frames: config.encoder_chunk_frames.max(1),
            buffer_frames: config.encoder_buffer_frames.max(1),
        }
    }
}

impl Default for SinkLimits {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Open,
    Committed,
    Discarded,
}

/// Temporary path in the destination's directory, so the final rename
/// never crosses filesystems.
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let temp = format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple());
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(temp),
        _ => PathBuf::from(temp),
    }
}

pub struct EncodeSink {
    encoder: Box<dyn FrameEncoder>,
    temp_path: PathBuf,
    destination: PathBuf,
    pending: VecDeque<Frame>,
    next_index: u64,
    chunk: usize,
    capacity: usize,
    state: SinkState,
}

impl EncodeSink {
    /// Open the encoder that matches `destination` for frames of `asset`.
    pub fn create(
        destination: impl Into<PathBuf>,
        asset: &MediaAsset,
        settings: &ExportSettings,
        limits: SinkLimits,
    ) -> SnapEditResult<Self> {
        let destination = destination.into();
        let format = OutputFormat::for_destination(&destination, asset.kind, settings)?;
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(SnapEditError::FileNotFound {
                    path: parent.to_path_buf(),
                });
            }
        }
        let temp_path = temp_path_for(&destination);

        let encoder: Box<dyn FrameEncoder> = match format {
            OutputFormat::Still(still) => Box::new(StillImageEncoder::new(
                &temp_path,
                still,
                settings.jpeg_quality,
            )),
            OutputFormat::Video(video) => Box::new(FfmpegEncoder::spawn(&VideoEncodeParams {
                output: temp_path.clone(),
                width: asset.width,
                height: asset.height,
                fps: asset.fps,
                format: video,
                settings: settings.clone(),
                audio_source: asset.has_audio.then(|| asset.path.clone()),
            })?),
        };
        Ok(Self::with_encoder(encoder, temp_path, destination, limits))
    }

    /// Wrap an already constructed encoder writing to `temp_path`.
    pub fn with_encoder(
        encoder: Box<dyn FrameEncoder>,
        temp_path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        limits: SinkLimits,
    ) -> Self {
        let chunk = limits.chunk_frames.min(encoder.preferred_chunk()).max(1);
        let capacity = limits.buffer_frames.max(chunk);
        let destination = destination.into();
        tracing::debug!(
            backend = encoder.name(),
            destination = %destination.display(),
            chunk,
            capacity,
            "Encode sink opened"
        );
        Self {
            encoder,
            temp_path: temp_path.into(),
            destination,
            pending: VecDeque::with_capacity(capacity),
            next_index: 0,
            chunk,
            capacity,
            state: SinkState::Open,
        }
    }

    /// Accept the next frame in sequence.
    pub fn submit(&mut self, frame: Frame) -> SnapEditResult<()> {
        self.ensure_open()?;
        if frame.index != self.next_index {
            return Err(SnapEditError::OutOfOrderFrame {
                expected: self.next_index,
                actual: frame.index,
            });
        }
        if self.pending.len() >= self.capacity {
            self.flush(false)?;
            if self.pending.len() >= self.capacity {
                return Err(SnapEditError::EncoderFull {
                    buffered: self.pending.len(),
                });
            }
        }

        self.pending.push_back(frame.into_rgba());
        self.next_index += 1;
        if self.pending.len() >= self.chunk {
            self.flush(false)?;
        }
        Ok(())
    }

    /// Frames accepted so far.
    pub fn frames_accepted(&self) -> u64 {
        self.next_index
    }

    /// Frames accepted but not yet handed to the encoder.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush, close the encoder and move the output into place.
    pub fn finish(mut self) -> SnapEditResult<PathBuf> {
        self.ensure_open()?;
        if let Err(err) = self.commit() {
            self.discard();
            return Err(err);
        }
        self.state = SinkState::Committed;
        tracing::info!(
            backend = self.encoder.name(),
            frames = self.next_index,
            output = %self.destination.display(),
            "Encoder committed"
        );
        Ok(self.destination.clone())
    }

    /// Stop encoding and delete the partial output.
    pub fn abort(mut self) {
        self.discard();
    }

    fn commit(&mut self) -> SnapEditResult<()> {
        if self.next_index == 0 {
            return Err(SnapEditError::encode("no frames were submitted"));
        }
        self.flush(true)?;
        if !self.pending.is_empty() {
            return Err(SnapEditError::encode(format!(
                "encoder stopped accepting frames with {} still buffered",
                self.pending.len()
            )));
        }
        self.encoder.finish()?;
        std::fs::rename(&self.temp_path, &self.destination).map_err(|e| {
            SnapEditError::encode(format!(
                "Failed to move {} to {}: {e}",
                self.temp_path.display(),
                self.destination.display()
            ))
        })
    }

    /// Hand full chunks (or everything, when `drain`) to the encoder.
    fn flush(&mut self, drain: bool) -> SnapEditResult<()> {
        while self.pending.len() >= self.chunk || (drain && !self.pending.is_empty()) {
            let take = self.chunk.min(self.pending.len());
            let batch: Vec<Frame> = self.pending.drain(..take).collect();
            let consumed = match self.encoder.write_chunk(&batch) {
                Ok(consumed) => consumed.min(batch.len()),
                Err(err) => {
                    self.discard();
                    return Err(err);
                }
            };
            // Put back what the encoder did not take, keeping order.
            for frame in batch.into_iter().skip(consumed).rev() {
                self.pending.push_front(frame);
            }
            if consumed == 0 {
                break;
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> SnapEditResult<()> {
        match self.state {
            SinkState::Open => Ok(()),
            SinkState::Committed => Err(SnapEditError::invalid_state("encode sink already finished")),
            SinkState::Discarded => Err(SnapEditError::invalid_state("encode sink was aborted")),
        }
    }

    fn discard(&mut self) {
        if self.state != SinkState::Open {
            return;
        }
        self.state = SinkState::Discarded;
        self.pending.clear();
        self.encoder.abort();
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.temp_path.display(),
                error = %e,
                "Failed to remove partial output"
            ),
        }
        tracing::info!(
            backend = self.encoder.name(),
            frames = self.next_index,
            destination = %self.destination.display(),
            "Encoder output discarded"
        );
    }
}

impl Drop for EncodeSink {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Appends each frame's first byte to the output file.
    struct ByteEncoder {
        path: PathBuf,
        chunks: Arc<Mutex<Vec<usize>>>,
        accept: usize,
        fail_finish: bool,
    }

    impl FrameEncoder for ByteEncoder {
        fn preferred_chunk(&self) -> usize {
            4
        }

        fn write_chunk(&mut self, frames: &[Frame]) -> SnapEditResult<usize> {
            let take = frames.len().min(self.accept);
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            for frame in &frames[..take] {
                file.write_all(&frame.data[..1])?;
            }
            self.chunks.lock().unwrap().push(take);
            Ok(take)
        }

        fn finish(&mut self) -> SnapEditResult<()> {
            if self.fail_finish {
                Err(SnapEditError::encode("boom"))
            } else {
                Ok(())
            }
        }

        fn abort(&mut self) {}

        fn name(&self) -> &str {
            "bytes"
        }
    }

    fn open_sink(dir: &Path, accept: usize, fail_finish: bool) -> (EncodeSink, Arc<Mutex<Vec<usize>>>) {
        let destination = dir.join("out.bin");
        let temp = temp_path_for(&destination);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let encoder = ByteEncoder {
            path: temp.clone(),
            chunks: chunks.clone(),
            accept,
            fail_finish,
        };
        let limits = SinkLimits {
            chunk_frames: 8,
            buffer_frames: 6,
        };
        (
            EncodeSink::with_encoder(Box::new(encoder), temp, destination, limits),
            chunks,
        )
    }

    fn frame(index: u64) -> Frame {
        Frame::filled(index, 0, 1, 1, [index as u8, 0, 0, 255])
    }

    #[test]
    fn test_in_order_frames_commit_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, chunks) = open_sink(dir.path(), usize::MAX, false);
        let temp = sink.temp_path().to_path_buf();
        for i in 0..10 {
            sink.submit(frame(i)).unwrap();
        }
        assert!(!dir.path().join("out.bin").exists());

        let out = sink.finish().unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), (0..10).collect::<Vec<u8>>());
        assert!(!temp.exists());
        // Chunk size is the smaller of the configured and preferred sizes.
        assert_eq!(*chunks.lock().unwrap(), vec![4, 4, 2]);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, _) = open_sink(dir.path(), usize::MAX, false);
        let err = sink.submit(frame(1)).unwrap_err();
        assert!(matches!(
            err,
            SnapEditError::OutOfOrderFrame {
                expected: 0,
                actual: 1
            }
        ));
        sink.submit(frame(0)).unwrap();
        assert!(sink.submit(frame(0)).is_err());
        sink.submit(frame(1)).unwrap();
    }

    #[test]
    fn test_full_when_encoder_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, _) = open_sink(dir.path(), 0, false);
        for i in 0..6 {
            sink.submit(frame(i)).unwrap();
        }
        let err = sink.submit(frame(6)).unwrap_err();
        assert_eq!(err.kind(), snapedit_common::ErrorKind::EncoderFull);
        assert_eq!(sink.buffered(), 6);
    }

    #[test]
    fn test_abort_and_drop_remove_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, _) = open_sink(dir.path(), usize::MAX, false);
        let temp = sink.temp_path().to_path_buf();
        for i in 0..5 {
            sink.submit(frame(i)).unwrap();
        }
        assert!(temp.exists());
        sink.abort();
        assert!(!temp.exists());
        assert!(!dir.path().join("out.bin").exists());

        let (mut dropped, _) = open_sink(dir.path(), usize::MAX, false);
        let temp = dropped.temp_path().to_path_buf();
        for i in 0..5 {
            dropped.submit(frame(i)).unwrap();
        }
        drop(dropped);
        assert!(!temp.exists());
    }

    #[test]
    fn test_failed_finish_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, _) = open_sink(dir.path(), usize::MAX, true);
        let temp = sink.temp_path().to_path_buf();
        for i in 0..3 {
            sink.submit(frame(i)).unwrap();
        }
        assert!(sink.finish().is_err());
        assert!(!temp.exists());
        assert!(!dir.path().join("out.bin").exists());
    }

    #[test]
    fn test_finish_without_frames_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _) = open_sink(dir.path(), usize::MAX, false);
        assert!(sink.finish().is_err());
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path_for(Path::new("/videos/clip.mp4"));
        assert_eq!(temp.parent(), Some(Path::new("/videos")));
        let name = temp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".clip.mp4."));
        assert!(name.ends_with(".partial"));
    }

    #[test]
    fn test_still_image_sink_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("photo.png");
        let asset = MediaAsset::image(dir.path().join("in.png"), 2, 2);
        let mut sink = EncodeSink::create(
            &destination,
            &asset,
            &ExportSettings::default(),
            SinkLimits::default(),
        )
        .unwrap();
        sink.submit(Frame::filled(0, 0, 2, 2, [1, 2, 3, 255])).unwrap();
        assert_eq!(sink.finish().unwrap(), destination);
        assert_eq!(image::image_dimensions(&destination).unwrap(), (2, 2));
    }
}
