//! Scripted decoders, recording encoders and fake models for job tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndarray::{ArrayD, ArrayView4, IxDyn};
use snapedit_common::config::PipelineConfig;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_frame_source::{FrameDecoder, FrameSource, RawFrame};
use snapedit_inference::{ModelBackend, ModelManifest, ModelRegistry, ModelSession, ModelStore};
use snapedit_media_model::{Frame, MediaAsset, PixelFormat};
use snapedit_pipeline::{JobEvent, JobId, PipelineScheduler, StageFactory};
use snapedit_render_engine::{
    temp_path_for, EncodeSink, ExportSettings, FrameEncoder, SinkLimits,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SIZE: u32 = 8;

/// Frame `i` is solid `[i, 10 * i, 0, 255]`, so both the encoder and the fake
/// model can tell which frame they were handed.
pub fn pixel_for(index: u64) -> [u8; 4] {
    [index as u8, (index * 10).min(250) as u8, 0, 255]
}

/// Behaviour of the fake decoder and encoder for one test.
#[derive(Clone, Default)]
pub struct Script {
    pub frames: u64,
    pub decode_delay: Duration,
    pub fail_decode_at: Option<u64>,
    pub fail_encoder_finish: bool,
    pub finish_delay: Duration,
}

struct ScriptedDecoder {
    script: Script,
    next: u64,
    closed: Arc<AtomicBool>,
}

impl FrameDecoder for ScriptedDecoder {
    fn decode_next(&mut self) -> SnapEditResult<Option<RawFrame>> {
        if self.next >= self.script.frames {
            return Ok(None);
        }
        if self.script.fail_decode_at == Some(self.next) {
            return Err(SnapEditError::corrupt_media(format!(
                "bad packet at frame {}",
                self.next
            )));
        }
        if !self.script.decode_delay.is_zero() {
            std::thread::sleep(self.script.decode_delay);
        }
        let pixel = pixel_for(self.next);
        self.next += 1;
        Ok(Some(RawFrame {
            width: SIZE,
            height: SIZE,
            format: PixelFormat::Rgba8,
            data: pixel.repeat((SIZE * SIZE) as usize),
        }))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Writes each frame's first pixel to the temp file and keeps a copy.
struct RecordingEncoder {
    path: PathBuf,
    frames: Arc<Mutex<Vec<Frame>>>,
    fail_finish: bool,
    finish_delay: Duration,
    finishing: Arc<AtomicBool>,
}

impl FrameEncoder for RecordingEncoder {
    fn preferred_chunk(&self) -> usize {
        3
    }

    fn write_chunk(&mut self, frames: &[Frame]) -> SnapEditResult<usize> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for frame in frames {
            file.write_all(&frame.data[..4])?;
            self.frames.lock().unwrap().push(frame.clone());
        }
        Ok(frames.len())
    }

    fn finish(&mut self) -> SnapEditResult<()> {
        self.finishing.store(true, Ordering::SeqCst);
        if !self.finish_delay.is_zero() {
            std::thread::sleep(self.finish_delay);
        }
        if self.fail_finish {
            return Err(SnapEditError::encode("muxer rejected the stream"));
        }
        Ok(())
    }

    fn abort(&mut self) {}

    fn name(&self) -> &str {
        "recording"
    }
}

/// Stage factory with scripted endpoints.
#[derive(Clone, Default)]
pub struct FakeStages {
    pub script: Script,
    pub encoded: Arc<Mutex<Vec<Frame>>>,
    pub decoder_closed: Arc<AtomicBool>,
    pub temp_paths: Arc<Mutex<Vec<PathBuf>>>,
    /// Set once the encoder starts finishing.
    pub finishing: Arc<AtomicBool>,
    /// Served in place of reading an overlay image from disk.
    pub overlay: Option<Frame>,
}

impl FakeStages {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn encoded_indices(&self) -> Vec<u64> {
        self.encoded.lock().unwrap().iter().map(|f| f.index).collect()
    }

    pub fn encoded_frame(&self, index: u64) -> Frame {
        self.encoded
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.index == index)
            .cloned()
            .unwrap()
    }

    pub fn leftover_temp_files(&self) -> Vec<PathBuf> {
        self.temp_paths
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.exists())
            .cloned()
            .collect()
    }
}

impl StageFactory for FakeStages {
    fn open_source(&self, asset: &MediaAsset, max_in_flight: usize) -> SnapEditResult<FrameSource> {
        let decoder = ScriptedDecoder {
            script: self.script.clone(),
            next: 0,
            closed: self.decoder_closed.clone(),
        };
        Ok(FrameSource::with_decoder(asset, Box::new(decoder), max_in_flight))
    }

    fn open_sink(
        &self,
        destination: &Path,
        _asset: &MediaAsset,
        _settings: &ExportSettings,
        limits: SinkLimits,
    ) -> SnapEditResult<EncodeSink> {
        let temp = temp_path_for(destination);
        self.temp_paths.lock().unwrap().push(temp.clone());
        let encoder = RecordingEncoder {
            path: temp.clone(),
            frames: self.encoded.clone(),
            fail_finish: self.script.fail_encoder_finish,
            finish_delay: self.script.finish_delay,
            finishing: self.finishing.clone(),
        };
        Ok(EncodeSink::with_encoder(
            Box::new(encoder),
            temp,
            destination,
            limits,
        ))
    }

    fn load_overlay(&self, path: &Path) -> SnapEditResult<Frame> {
        match &self.overlay {
            Some(frame) => Ok(frame.clone()),
            None => snapedit_frame_source::load_image(path),
        }
    }
}

/// Segmentation model whose mask for frame `i` marks columns `x <= i` as
/// foreground. Frames listed in `unsure` get a flat 0.65 mask (confidence
/// 0.3); frames in `stall` sleep past any reasonable timeout.
#[derive(Default)]
pub struct ColumnModel {
    pub unsure: Vec<u64>,
    pub stall: Vec<u64>,
    pub stall_for: Duration,
}

impl ModelSession for ColumnModel {
    fn run(&self, input: ArrayView4<'_, f32>) -> SnapEditResult<ArrayD<f32>> {
        // Green channel carries 10 * index; inputs are (v - 127.5) / 127.5.
        let green = input[[0, 1, 0, 0]] * 127.5 + 127.5;
        let index = (green / 10.0).round() as u64;
        if self.stall.contains(&index) {
            std::thread::sleep(self.stall_for);
        }
        let side = SIZE as usize;
        let mut out = ArrayD::<f32>::zeros(IxDyn(&[1, 1, side, side]));
        for y in 0..side {
            for x in 0..side {
                out[[0, 0, y, x]] = if self.unsure.contains(&index) {
                    0.65
                } else if x as u64 <= index {
                    1.0
                } else {
                    0.0
                };
            }
        }
        Ok(out)
    }
}

pub struct FakeBackend {
    session: Arc<ColumnModel>,
    pub loads: AtomicUsize,
}

impl FakeBackend {
    pub fn new(model: ColumnModel) -> Self {
        Self {
            session: Arc::new(model),
            loads: AtomicUsize::new(0),
        }
    }
}

impl ModelBackend for FakeBackend {
    fn load(&self, _manifest: &ModelManifest, _path: &Path) -> SnapEditResult<Arc<dyn ModelSession>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.clone())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// In-memory manifests.
pub struct MemoryStore {
    manifests: HashMap<String, ModelManifest>,
}

impl MemoryStore {
    pub fn with_columns_model() -> Self {
        let manifest: ModelManifest = serde_json::from_value(serde_json::json!({
            "id": "columns",
            "file": "columns.onnx",
            "kind": "segmentation",
            "input_shape": [1, 3, SIZE, SIZE],
            "output_shape": [1, 1, SIZE, SIZE]
        }))
        .unwrap();
        let mut manifests = HashMap::new();
        manifests.insert(manifest.id.clone(), manifest);
        Self { manifests }
    }
}

impl ModelStore for MemoryStore {
    fn manifest(&self, model_id: &str) -> SnapEditResult<ModelManifest> {
        self.manifests
            .get(model_id)
            .cloned()
            .ok_or_else(|| SnapEditError::model_load(format!("unknown model {model_id}")))
    }

    fn model_path(&self, manifest: &ModelManifest) -> PathBuf {
        PathBuf::from("/models").join(&manifest.id).join(&manifest.file)
    }

    fn list(&self) -> SnapEditResult<Vec<String>> {
        let mut ids: Vec<String> = self.manifests.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

pub fn registry(model: ColumnModel) -> (Arc<ModelRegistry>, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::new(model));
    let registry = ModelRegistry::new(Arc::new(MemoryStore::with_columns_model()), backend.clone());
    (Arc::new(registry), backend)
}

pub fn scheduler(
    registry: Arc<ModelRegistry>,
    config: PipelineConfig,
    stages: &FakeStages,
) -> (PipelineScheduler, UnboundedReceiver<JobEvent>) {
    snapedit_common::logging::init_test_logging();
    PipelineScheduler::with_stages(
        registry,
        config,
        ExportSettings::default(),
        Arc::new(stages.clone()),
    )
    .unwrap()
}

pub fn video(frames: u64) -> MediaAsset {
    MediaAsset::video("/in/clip.mp4", SIZE, SIZE, 30.0, frames)
}

/// Collect events for `job` until its terminal event arrives.
pub async fn wait_terminal(
    events: &mut UnboundedReceiver<JobEvent>,
    job: JobId,
) -> (JobEvent, Vec<JobEvent>) {
    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("job did not finish in time")
            .expect("event channel closed");
        if event.job_id() != job {
            continue;
        }
        if event.is_terminal() {
            return (event, progress);
        }
        progress.push(event);
    }
}
