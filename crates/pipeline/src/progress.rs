//! Progress accounting shared by the stages of one job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use snapedit_common::clock::ProgressThrottle;
use tokio::sync::mpsc::UnboundedSender;

use crate::events::{JobEvent, Stage};
use crate::job::JobId;

/// Percent step between reported progress events.
const REPORT_STEP: f64 = 1.0;

const COUNTED: [Stage; 4] = [
    Stage::Decoding,
    Stage::Inferring,
    Stage::Compositing,
    Stage::Encoding,
];

/// Counts frames through each stage and emits throttled `Progress` events.
///
/// Percent is the share of (frame, stage) steps done, held below 100 until
/// the job reaches [`Stage::Finalizing`].
pub struct ProgressTracker {
    job_id: JobId,
    total: u64,
    done: [AtomicU64; 4],
    throttle: Mutex<ProgressThrottle>,
    events: UnboundedSender<JobEvent>,
}

impl ProgressTracker {
    /// `expected_frames` is an estimate for video; counts past it are clamped.
    pub fn new(job_id: JobId, expected_frames: u64, events: UnboundedSender<JobEvent>) -> Self {
        Self {
            job_id,
            total: expected_frames.max(1),
            done: Default::default(),
            throttle: Mutex::new(ProgressThrottle::new(REPORT_STEP)),
            events,
        }
    }

    /// Record one more frame through `stage`.
    pub fn advance(&self, stage: Stage) {
        if let Some(slot) = COUNTED.iter().position(|s| *s == stage) {
            self.done[slot].fetch_add(1, Ordering::Relaxed);
        }
        let (percent, current) = self.current();
        self.emit(percent, current);
    }

    /// Report the commit step.
    pub fn finalizing(&self) {
        self.emit(100.0, Stage::Finalizing);
    }

    pub fn frames_through(&self, stage: Stage) -> u64 {
        COUNTED
            .iter()
            .position(|s| *s == stage)
            .map(|slot| self.done[slot].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current percent and the earliest stage that is still working.
    pub fn current(&self) -> (f64, Stage) {
        let counts: Vec<u64> = self
            .done
            .iter()
            .map(|c| c.load(Ordering::Relaxed).min(self.total))
            .collect();
        let steps: u64 = counts.iter().sum();
        let percent = (steps as f64 / (self.total * COUNTED.len() as u64) as f64 * 100.0).min(99.0);
        let stage = COUNTED
            .iter()
            .zip(&counts)
            .find(|(_, count)| **count < self.total)
            .map(|(stage, _)| *stage)
            .unwrap_or(Stage::Encoding);
        (percent, stage)
    }

    fn emit(&self, percent: f64, stage: Stage) {
        let report = match self.throttle.lock() {
            Ok(mut throttle) => throttle.should_report(percent),
            Err(poisoned) => poisoned.into_inner().should_report(percent),
        };
        if report {
            let _ = self.events.send(JobEvent::Progress {
                job_id: self.job_id,
                percent,
                stage,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<(f64, Stage)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEvent::Progress { percent, stage, .. } = event {
                out.push((percent, stage));
            }
        }
        out
    }

    #[test]
    fn test_percent_and_stage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(JobId::new(), 2, tx);
        tracker.advance(Stage::Decoding);
        tracker.advance(Stage::Decoding);
        assert_eq!(tracker.current(), (25.0, Stage::Inferring));

        for stage in [Stage::Inferring, Stage::Compositing, Stage::Encoding] {
            tracker.advance(stage);
            tracker.advance(stage);
        }
        // Never 100 before finalizing.
        assert_eq!(tracker.current(), (99.0, Stage::Encoding));
        tracker.finalizing();

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&(12.5, Stage::Decoding)));
        assert_eq!(events.last(), Some(&(100.0, Stage::Finalizing)));
        assert!(events.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_underestimated_frame_count_is_clamped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(JobId::new(), 1, tx);
        for _ in 0..5 {
            tracker.advance(Stage::Decoding);
        }
        assert_eq!(tracker.current().0, 25.0);
        assert_eq!(tracker.frames_through(Stage::Decoding), 5);
    }

    #[test]
    fn test_throttled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::new(JobId::new(), 1000, tx);
        for _ in 0..1000 {
            tracker.advance(Stage::Decoding);
        }
        let events = drain(&mut rx);
        assert!(events.len() <= 27, "{} events", events.len());
    }
}
