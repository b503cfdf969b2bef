//! Stage wiring for a single job.
//!
//! ```text
//! decode ──► inference x N ──► linker ──► compositor x M ──► encoder
//! (blocking)  (timeout+retry)   (in order,    (blocking)       (blocking,
//!                                fallback)                      in order)
//! ```
//!
//! Every arrow is a bounded channel of `queue_depth`. A stage that fails
//! records its error in [`JobControl`] and returns; the first error wins
//! and every other stage stops at its next frame boundary.

use std::sync::{Arc, Mutex};

use snapedit_common::config::PipelineConfig;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_frame_source::FrameSource;
use snapedit_inference::{InferenceEngine, LoadedModel, ModelKind, ModelRegistry};
use snapedit_media_model::{
    EditOperation, EditSpec, Frame, InferenceOutput, InferenceResult, MediaAsset,
    ModelRequirement,
};
use snapedit_processing_core::{effective_output, EditCompositor};
use snapedit_render_engine::{EncodeSink, ExportSettings, SinkLimits};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::events::Stage;
use crate::job::{JobId, JobRequest};
use crate::progress::ProgressTracker;
use crate::reorder::ReorderBuffer;
use crate::stages::StageFactory;

type Tagged = (Frame, InferenceResult);
type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// Everything a job run needs, owned by the job task.
pub(crate) struct JobContext {
    pub job_id: JobId,
    pub request: JobRequest,
    pub config: PipelineConfig,
    pub settings: ExportSettings,
    pub registry: Arc<ModelRegistry>,
    pub stages: Arc<dyn StageFactory>,
    pub cancel: CancelToken,
    pub progress: Arc<ProgressTracker>,
}

/// First-error-wins failure slot plus the stop signal shared by all stages.
struct JobControl {
    cancel: CancelToken,
    halt: CancelToken,
    error: Mutex<Option<SnapEditError>>,
}

impl JobControl {
    fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            halt: CancelToken::new(),
            error: Mutex::new(None),
        }
    }

    fn should_stop(&self) -> bool {
        self.halt.is_cancelled() || self.cancel.is_cancelled()
    }

    fn fail(&self, err: SnapEditError) {
        let mut slot = match self.error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            tracing::debug!(error = %err, "Stage failed, stopping job");
            *slot = Some(err);
        }
        self.halt.cancel();
    }

    fn take_error(&self) -> Option<SnapEditError> {
        match self.error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Sizing derived from the pipeline config for one job.
fn sink_limits(config: &PipelineConfig) -> SinkLimits {
    let limits = SinkLimits::from_config(config);
    // Frames buffered in the sink still hold decoder slots.
    SinkLimits {
        chunk_frames: limits.chunk_frames.min(config.max_in_flight_frames.max(1)),
        ..limits
    }
}

/// Check the edit against the asset and model before any frame is decoded.
fn check_model(edit: &EditSpec, model: &LoadedModel) -> SnapEditResult<()> {
    let kind = model.manifest().kind;
    let compatible = match edit.operation.requirement() {
        ModelRequirement::None => true,
        ModelRequirement::Mask => kind == ModelKind::Segmentation,
        ModelRequirement::Regions => kind == ModelKind::Detection,
    };
    if !compatible {
        return Err(SnapEditError::incompatible_edit(format!(
            "{} cannot use {:?} model {}",
            edit.operation.name(),
            kind,
            model.id()
        )));
    }
    Ok(())
}

/// Run every stage to completion and hand back the sink ready to commit.
///
/// Returns `Cancelled` when the token fired; the sink has been aborted on
/// every error path.
pub(crate) async fn run_job(ctx: JobContext) -> SnapEditResult<EncodeSink> {
    let JobContext {
        job_id,
        request,
        config,
        settings,
        registry,
        stages,
        cancel,
        progress,
    } = ctx;
    let JobRequest { asset, edit, output } = request;

    edit.validate()?;
    let mut compositor = EditCompositor::new(asset.kind);
    compositor.check_spec(&edit)?;
    if let EditOperation::Overlay(overlay) = &edit.operation {
        let stages = stages.clone();
        let path = overlay.image.clone();
        let image = tokio::task::spawn_blocking(move || stages.load_overlay(&path))
            .await
            .map_err(|e| SnapEditError::invalid_state(format!("overlay task failed: {e}")))??;
        compositor = compositor.with_overlay(image, overlay)?;
    }

    let model = match edit.required_model() {
        Some(model_id) => {
            let model = registry.acquire(model_id).await?;
            check_model(&edit, &model)?;
            Some(Arc::new(model))
        }
        None => None,
    };

    let (source, sink) = {
        let asset = asset.clone();
        let stages = stages.clone();
        let settings = settings.clone();
        let limits = sink_limits(&config);
        let max_in_flight = config.max_in_flight_frames;
        tokio::task::spawn_blocking(move || -> SnapEditResult<_> {
            let source = stages.open_source(&asset, max_in_flight)?;
            let sink = stages.open_sink(&output, &asset, &settings, limits)?;
            Ok((source, sink))
        })
        .await
        .map_err(|e| SnapEditError::invalid_state(format!("open task failed: {e}")))??
    };

    if cancel.is_cancelled() {
        return Err(SnapEditError::Cancelled);
    }
    tracing::info!(
        job_id = %job_id,
        source = %asset.path.display(),
        destination = %sink.destination().display(),
        model_id = edit.required_model().unwrap_or("none"),
        "Job stages started"
    );

    let control = Arc::new(JobControl::new(cancel));
    let edit = Arc::new(edit);
    let depth = config.queue_depth.max(1);
    let max_gap = config.max_in_flight_frames.max(1);

    let (decoded_tx, decoded_rx) = mpsc::channel::<Frame>(depth);
    let (inferred_tx, inferred_rx) = mpsc::channel::<Tagged>(depth);
    let (linked_tx, linked_rx) = mpsc::channel::<Tagged>(depth);
    let (edited_tx, edited_rx) = mpsc::channel::<Frame>(depth);

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    tasks.push(("decode", {
        let control = control.clone();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || decode_stage(source, decoded_tx, &control, &progress))
    }));

    let engine = InferenceEngine::from_config(&config);
    let decoded_rx: SharedReceiver<Frame> = Arc::new(tokio::sync::Mutex::new(decoded_rx));
    for _ in 0..config.inference_workers.max(1) {
        let worker = inference_worker(
            decoded_rx.clone(),
            inferred_tx.clone(),
            engine.clone(),
            model.clone(),
            edit.clone(),
            control.clone(),
            progress.clone(),
        );
        tasks.push(("inference", tokio::spawn(worker)));
    }
    drop(decoded_rx);
    drop(inferred_tx);

    let timeout = (config.inference_retries + 1, config.inference_timeout_ms);
    tasks.push((
        "link",
        tokio::spawn(link_stage(
            inferred_rx,
            linked_tx,
            edit.clone(),
            max_gap,
            config.max_consecutive_inference_failures,
            timeout,
            control.clone(),
        )),
    ));

    let linked_rx: SharedReceiver<Tagged> = Arc::new(tokio::sync::Mutex::new(linked_rx));
    for _ in 0..config.compositor_workers.max(1) {
        let worker = compositor_worker(
            linked_rx.clone(),
            edited_tx.clone(),
            compositor.clone(),
            edit.clone(),
            control.clone(),
            progress.clone(),
        );
        tasks.push(("compositor", tokio::spawn(worker)));
    }
    drop(linked_rx);
    drop(edited_tx);

    let encoder = {
        let control = control.clone();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || {
            encode_stage(sink, edited_rx, max_gap, &control, &progress)
        })
    };

    for (name, task) in tasks {
        if let Err(e) = task.await {
            control.fail(SnapEditError::invalid_state(format!(
                "{name} stage stopped abnormally: {e}"
            )));
        }
    }
    let sink = match encoder.await {
        Ok(sink) => sink,
        Err(e) => {
            control.fail(SnapEditError::invalid_state(format!(
                "encode stage stopped abnormally: {e}"
            )));
            None
        }
    };

    if let Some(model) = model.and_then(Arc::into_inner) {
        registry.release(model);
    }

    if control.cancel.is_cancelled() {
        return Err(SnapEditError::Cancelled);
    }
    if let Some(err) = control.take_error() {
        return Err(err);
    }
    sink.ok_or_else(|| SnapEditError::invalid_state("encoder finished without a sink"))
}

fn decode_stage(
    mut source: FrameSource,
    tx: mpsc::Sender<Frame>,
    control: &JobControl,
    progress: &ProgressTracker,
) {
    let stop = || control.should_stop();
    while !stop() {
        let frame = match source.next_until(&stop) {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(SnapEditError::Cancelled) => break,
            Err(err) => {
                tracing::warn!(
                    frames = source.frames_emitted(),
                    error = %err,
                    "Decoding stopped early"
                );
                control.fail(err);
                break;
            }
        };
        progress.advance(Stage::Decoding);
        if tx.blocking_send(frame).is_err() {
            break;
        }
    }
    source.close();
}

async fn inference_worker(
    rx: SharedReceiver<Frame>,
    tx: mpsc::Sender<Tagged>,
    engine: InferenceEngine,
    model: Option<Arc<LoadedModel>>,
    edit: Arc<EditSpec>,
    control: Arc<JobControl>,
    progress: Arc<ProgressTracker>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(frame) = next else { break };
        if control.should_stop() {
            break;
        }
        let active = model.as_ref().filter(|_| edit.is_active_at(frame.pts_ns));
        let result = match active {
            None => InferenceResult::passthrough(frame.index),
            Some(model) => match engine.infer(&frame, model).await {
                Ok(result) => result,
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        frame = frame.index,
                        model_id = model.id(),
                        error = %err,
                        "Inference gave up on frame"
                    );
                    InferenceResult::degraded(frame.index)
                }
                Err(err) => {
                    control.fail(err);
                    break;
                }
            },
        };
        progress.advance(Stage::Inferring);
        if tx.send((frame, result)).await.is_err() {
            break;
        }
    }
}

/// Restores sequence order, attaches the previous frame's effective output
/// and enforces the consecutive degraded-frame limit.
async fn link_stage(
    mut rx: mpsc::Receiver<Tagged>,
    tx: mpsc::Sender<Tagged>,
    edit: Arc<EditSpec>,
    max_gap: usize,
    max_degraded: u32,
    (attempts, timeout_ms): (u32, u64),
    control: Arc<JobControl>,
) {
    let mut reorder = ReorderBuffer::new(max_gap);
    let mut previous: Option<InferenceOutput> = None;
    let mut degraded_run = 0u32;

    while let Some((frame, result)) = rx.recv().await {
        if control.should_stop() {
            return;
        }
        if let Err(err) = reorder.insert(frame.index, (frame, result)) {
            control.fail(err);
            return;
        }
        for (frame, result) in reorder.drain_ready() {
            if !edit.is_active_at(frame.pts_ns) {
                if tx.send((frame, result)).await.is_err() {
                    return;
                }
                continue;
            }
            let result = result.with_fallback(previous.take());
            if result.degraded {
                degraded_run += 1;
                if degraded_run > max_degraded {
                    control.fail(SnapEditError::InferenceTimeout {
                        attempts,
                        timeout_ms,
                    });
                    return;
                }
            } else {
                degraded_run = 0;
            }
            previous = effective_output(&result, &edit).cloned();
            if tx.send((frame, result)).await.is_err() {
                return;
            }
        }
    }
    if !reorder.is_empty() && !control.should_stop() {
        control.fail(SnapEditError::invalid_state(format!(
            "{} inference result(s) never became contiguous at {}",
            reorder.len(),
            reorder.next_expected()
        )));
    }
}

async fn compositor_worker(
    rx: SharedReceiver<Tagged>,
    tx: mpsc::Sender<Frame>,
    compositor: EditCompositor,
    edit: Arc<EditSpec>,
    control: Arc<JobControl>,
    progress: Arc<ProgressTracker>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some((frame, result)) = next else { break };
        if control.should_stop() {
            break;
        }
        let edit = edit.clone();
        let compositor = compositor.clone();
        let edited = tokio::task::spawn_blocking(move || compositor.apply(frame, &result, &edit))
            .await
            .unwrap_or_else(|e| {
                Err(SnapEditError::invalid_state(format!(
                    "compositor task stopped abnormally: {e}"
                )))
            });
        let frame = match edited {
            Ok(frame) => frame,
            Err(err) => {
                control.fail(err);
                break;
            }
        };
        progress.advance(Stage::Compositing);
        if tx.send(frame).await.is_err() {
            break;
        }
    }
}

/// Feeds the sink strictly in order. Returns the sink only when every frame
/// was accepted and nothing asked the job to stop.
fn encode_stage(
    mut sink: EncodeSink,
    mut rx: mpsc::Receiver<Frame>,
    max_gap: usize,
    control: &JobControl,
    progress: &ProgressTracker,
) -> Option<EncodeSink> {
    let mut reorder = ReorderBuffer::new(max_gap);
    while let Some(frame) = rx.blocking_recv() {
        if control.should_stop() {
            break;
        }
        if let Err(err) = reorder.insert(frame.index, frame) {
            control.fail(err);
            break;
        }
        for frame in reorder.drain_ready() {
            if let Err(err) = sink.submit(frame) {
                control.fail(err);
                break;
            }
            progress.advance(Stage::Encoding);
        }
    }
    drop(rx);

    if control.should_stop() {
        sink.abort();
        return None;
    }
    if !reorder.is_empty() {
        control.fail(SnapEditError::invalid_state(format!(
            "{} edited frame(s) never became contiguous at {}",
            reorder.len(),
            reorder.next_expected()
        )));
        sink.abort();
        return None;
    }
    if sink.frames_accepted() == 0 {
        control.fail(SnapEditError::corrupt_media("the input produced no frames"));
        sink.abort();
        return None;
    }
    Some(sink)
}

/// Frames a job is expected to produce, for progress.
pub(crate) fn expected_frames(asset: &MediaAsset) -> u64 {
    asset.frame_count.max(1)
}
