//! Job scheduler.
//!
//! `submit` and `cancel` never block: each job runs on its own Tokio task,
//! waits as Pending for one of `max_concurrent_jobs` run slots, then drives
//! its stages. Every job ends with exactly one terminal [`JobEvent`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use snapedit_common::config::PipelineConfig;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_inference::ModelRegistry;
use snapedit_render_engine::{EncodeSink, ExportSettings};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use crate::cancel::CancelToken;
use crate::events::JobEvent;
use crate::job::{JobError, JobId, JobRequest, JobSnapshot, JobState};
use crate::progress::ProgressTracker;
use crate::run::{expected_frames, run_job, JobContext};
use crate::stages::{NativeStages, StageFactory};

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancelToken,
    /// Set once the output is being moved into place; cancel no longer applies.
    committing: bool,
}

enum Outcome {
    Completed(PathBuf),
    Failed(SnapEditError),
    Cancelled,
}

struct SchedulerInner {
    config: PipelineConfig,
    settings: ExportSettings,
    registry: Arc<ModelRegistry>,
    stages: Arc<dyn StageFactory>,
    permits: Arc<Semaphore>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    events: UnboundedSender<JobEvent>,
}

/// Runs edit jobs against a shared model registry.
#[derive(Clone)]
pub struct PipelineScheduler {
    inner: Arc<SchedulerInner>,
}

impl PipelineScheduler {
    /// Scheduler with native decoders and encoders and default export settings.
    pub fn new(
        registry: Arc<ModelRegistry>,
        config: PipelineConfig,
    ) -> SnapEditResult<(Self, UnboundedReceiver<JobEvent>)> {
        Self::with_stages(
            registry,
            config,
            ExportSettings::default(),
            Arc::new(NativeStages),
        )
    }

    pub fn with_stages(
        registry: Arc<ModelRegistry>,
        config: PipelineConfig,
        settings: ExportSettings,
        stages: Arc<dyn StageFactory>,
    ) -> SnapEditResult<(Self, UnboundedReceiver<JobEvent>)> {
        config.validate()?;
        let (events, rx) = mpsc::unbounded_channel();
        let inner = SchedulerInner {
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            settings,
            registry,
            stages,
            jobs: Mutex::new(HashMap::new()),
            events,
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            rx,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.inner.registry
    }

    /// Queue a job. Must be called from within a Tokio runtime.
    pub fn submit(&self, request: JobRequest) -> JobId {
        let id = JobId::new();
        let cancel = CancelToken::new();
        {
            let mut jobs = self.inner.lock_jobs();
            jobs.insert(
                id,
                JobEntry {
                    snapshot: JobSnapshot::pending(id, &request),
                    cancel: cancel.clone(),
                    committing: false,
                },
            );
        }
        tracing::info!(
            job_id = %id,
            source = %request.asset.path.display(),
            destination = %request.output.display(),
            operation = request.edit.operation.name(),
            "Job submitted"
        );
        tokio::spawn(drive(self.inner.clone(), id, request, cancel));
        id
    }

    /// Ask a job to stop at its next frame boundary.
    ///
    /// Refused once the job is committing its output: this returns false and
    /// the job still completes with no `Cancelled` event. Unknown and finished
    /// jobs also return false.
    pub fn cancel(&self, id: JobId) -> bool {
        let jobs = self.inner.lock_jobs();
        match jobs.get(&id) {
            Some(entry) if !entry.snapshot.state.is_terminal() && !entry.committing => {
                if entry.cancel.cancel() {
                    tracing::info!(job_id = %id, state = %entry.snapshot.state, "Job cancel requested");
                }
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.inner
            .lock_jobs()
            .get(&id)
            .map(|entry| entry.snapshot.clone())
    }

    /// All known jobs, oldest first.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .inner
            .lock_jobs()
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        jobs.sort_by_key(|job| job.submitted_at);
        jobs
    }

    /// Drop the retained status of a finished job.
    pub fn forget(&self, id: JobId) -> bool {
        let mut jobs = self.inner.lock_jobs();
        match jobs.get(&id) {
            Some(entry) if entry.snapshot.state.is_terminal() => {
                jobs.remove(&id);
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("config", &self.inner.config)
            .field("jobs", &self.inner.lock_jobs().len())
            .finish()
    }
}

impl SchedulerInner {
    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        match self.jobs.lock() {
            Ok(jobs) => jobs,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pending -> Running, unless the job was cancelled while waiting.
    fn start(&self, id: JobId) -> bool {
        let mut jobs = self.lock_jobs();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if entry.cancel.is_cancelled() {
            return false;
        }
        match entry.snapshot.transition(JobState::Running) {
            Ok(()) => {
                tracing::info!(job_id = %id, "Job started");
                true
            }
            Err(err) => {
                tracing::warn!(job_id = %id, error = %err, "Job could not start");
                false
            }
        }
    }

    /// Move the finished output into place unless cancel won the race.
    async fn commit(&self, id: JobId, sink: EncodeSink, progress: &ProgressTracker) -> Outcome {
        let cancelled = {
            let mut jobs = self.lock_jobs();
            match jobs.get_mut(&id) {
                Some(entry) if !entry.cancel.is_cancelled() => {
                    entry.committing = true;
                    entry.snapshot.frames_encoded = sink.frames_accepted();
                    false
                }
                _ => true,
            }
        };
        if cancelled {
            let _ = tokio::task::spawn_blocking(move || sink.abort()).await;
            return Outcome::Cancelled;
        }

        progress.finalizing();
        match tokio::task::spawn_blocking(move || sink.finish()).await {
            Ok(Ok(path)) => Outcome::Completed(path),
            Ok(Err(err)) => Outcome::Failed(err),
            Err(e) => Outcome::Failed(SnapEditError::invalid_state(format!(
                "commit task stopped abnormally: {e}"
            ))),
        }
    }

    /// Record the terminal state and emit the one terminal event.
    fn finish(&self, id: JobId, outcome: Outcome) {
        let mut jobs = self.lock_jobs();
        let Some(entry) = jobs.get_mut(&id) else {
            return;
        };
        let (state, event) = match outcome {
            Outcome::Completed(output) => {
                entry.snapshot.output = Some(output.clone());
                (JobState::Completed, JobEvent::Completed { job_id: id, output })
            }
            Outcome::Failed(err) => {
                let error = JobError::from(&err);
                entry.snapshot.last_error = Some(error.clone());
                (
                    JobState::Failed,
                    JobEvent::Failed {
                        job_id: id,
                        kind: error.kind,
                        message: error.message,
                    },
                )
            }
            Outcome::Cancelled => (JobState::Cancelled, JobEvent::Cancelled { job_id: id }),
        };
        if let Err(err) = entry.snapshot.transition(state) {
            tracing::warn!(job_id = %id, error = %err, "Dropping duplicate terminal state");
            return;
        }
        entry.committing = false;

        let snapshot = &entry.snapshot;
        let elapsed_ms = snapshot
            .started_at
            .zip(snapshot.finished_at)
            .map(|(start, end)| (end - start).num_milliseconds())
            .unwrap_or(0);
        match &snapshot.last_error {
            Some(error) if state == JobState::Failed => tracing::warn!(
                job_id = %id,
                kind = %error.kind,
                error = %error.message,
                elapsed_ms,
                "Job failed"
            ),
            _ => tracing::info!(
                job_id = %id,
                state = %state,
                frames = snapshot.frames_encoded,
                elapsed_ms,
                "Job finished"
            ),
        }
        let _ = self.events.send(event);
    }
}

async fn drive(inner: Arc<SchedulerInner>, id: JobId, request: JobRequest, cancel: CancelToken) {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = inner.permits.clone().acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        inner.finish(id, Outcome::Cancelled);
        return;
    };
    if !inner.start(id) {
        inner.finish(id, Outcome::Cancelled);
        return;
    }

    let progress = Arc::new(ProgressTracker::new(
        id,
        expected_frames(&request.asset),
        inner.events.clone(),
    ));
    let ctx = JobContext {
        job_id: id,
        request,
        config: inner.config.clone(),
        settings: inner.settings.clone(),
        registry: inner.registry.clone(),
        stages: inner.stages.clone(),
        cancel,
        progress: progress.clone(),
    };

    let outcome = match run_job(ctx).await {
        Ok(sink) => inner.commit(id, sink, &progress).await,
        Err(SnapEditError::Cancelled) => Outcome::Cancelled,
        Err(err) => Outcome::Failed(err),
    };
    inner.finish(id, outcome);
}
