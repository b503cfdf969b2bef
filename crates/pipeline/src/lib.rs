//! SnapEdit Pipeline
//!
//! Orchestrates edit jobs end to end:
//! - **Jobs:** Request, state machine, and retained status snapshots
//! - **Scheduler:** Bounded job concurrency with non-blocking submit/cancel
//! - **Stages:** Decode, inference, in-order linking, compositing, and
//!   in-order encoding connected by bounded channels
//! - **Events:** Throttled progress plus exactly one terminal notification
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(registry: std::sync::Arc<snapedit_inference::ModelRegistry>) -> snapedit_common::SnapEditResult<()> {
//! use snapedit_common::PipelineConfig;
//! use snapedit_media_model::{EditOperation, EditSpec, MediaAsset};
//! use snapedit_pipeline::{JobEvent, JobRequest, PipelineScheduler};
//!
//! let (scheduler, mut events) = PipelineScheduler::new(registry, PipelineConfig::default())?;
//! let edit = EditSpec::new(EditOperation::BlurBackground { radius: 12 }).with_model("selfie-seg");
//! let asset = MediaAsset::image("portrait.jpg", 1080, 1350);
//! scheduler.submit(JobRequest::new(asset, edit, "portrait-blurred.png"));
//!
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod events;
pub mod job;
pub mod progress;
pub mod reorder;
mod run;
pub mod scheduler;
pub mod stages;

pub use cancel::CancelToken;
pub use events::{JobEvent, Stage};
pub use job::{JobError, JobId, JobRequest, JobSnapshot, JobState};
pub use reorder::ReorderBuffer;
pub use scheduler::PipelineScheduler;
pub use stages::{NativeStages, StageFactory};
