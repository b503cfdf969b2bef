//! Bounded, timestamped frame streams.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use snapedit_common::clock::FrameClock;
use snapedit_common::error::{SnapEditError, SnapEditResult};
use snapedit_media_model::{Frame, FrameTicket, MediaAsset, MediaKind, TicketRelease};

use crate::decoder::{FfmpegDecoder, FrameDecoder, StillImageDecoder};

const GATE_POLL: Duration = Duration::from_millis(25);

/// Counts decoded frames that are still alive somewhere in the pipeline.
#[derive(Debug)]
struct InFlightGate {
    live: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl InFlightGate {
    fn new(limit: usize) -> Self {
        Self {
            live: Mutex::new(0),
            freed: Condvar::new(),
            limit: limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve a slot, waiting while the limit is reached.
    /// Returns `false` if `stop` fired while waiting.
    fn reserve(&self, stop: &dyn Fn() -> bool) -> bool {
        let mut live = self.lock();
        while *live >= self.limit {
            if stop() {
                return false;
            }
            live = self
                .freed
                .wait_timeout(live, GATE_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        *live += 1;
        true
    }

    fn live(&self) -> usize {
        *self.lock()
    }
}

impl TicketRelease for InFlightGate {
    fn release(&self) {
        let mut live = self.lock();
        *live = live.saturating_sub(1);
        self.freed.notify_one();
    }
}

/// Lazy, finite, forward-only stream of frames for one asset.
///
/// At most `max_in_flight` frames from this source can be alive at once;
/// `next` blocks until a previously emitted frame is dropped. Re-reading
/// requires opening a new source.
pub struct FrameSource {
    decoder: Option<Box<dyn FrameDecoder>>,
    gate: Arc<InFlightGate>,
    clock: FrameClock,
    kind: MediaKind,
    next_index: u64,
}

impl FrameSource {
    /// Open the native decoder that matches the asset kind.
    pub fn open(asset: &MediaAsset, max_in_flight: usize) -> SnapEditResult<Self> {
        let decoder: Box<dyn FrameDecoder> = match asset.kind {
            MediaKind::Image => {
                if !asset.path.exists() {
                    return Err(SnapEditError::FileNotFound {
                        path: asset.path.clone(),
                    });
                }
                Box::new(StillImageDecoder::new(&asset.path))
            }
            MediaKind::Video => {
                if asset.width == 0 || asset.height == 0 {
                    return Err(SnapEditError::corrupt_media(
                        "video asset has no resolution; probe it first",
                    ));
                }
                Box::new(FfmpegDecoder::spawn(asset)?)
            }
        };
        Ok(Self::with_decoder(asset, decoder, max_in_flight))
    }

    /// Wrap an already constructed decoder.
    pub fn with_decoder(
        asset: &MediaAsset,
        decoder: Box<dyn FrameDecoder>,
        max_in_flight: usize,
    ) -> Self {
        tracing::debug!(
            backend = decoder.name(),
            path = %asset.path.display(),
            max_in_flight,
            "Frame source opened"
        );
        let clock = match asset.kind {
            MediaKind::Image => FrameClock::still(),
            MediaKind::Video => FrameClock::new(asset.fps),
        };
        Self {
            decoder: Some(decoder),
            gate: Arc::new(InFlightGate::new(max_in_flight)),
            clock,
            kind: asset.kind,
            next_index: 0,
        }
    }

    /// Next frame, or `None` once the stream is exhausted.
    pub fn next(&mut self) -> SnapEditResult<Option<Frame>> {
        self.next_until(&|| false)
    }

    /// Like [`next`](Self::next), but gives up with `Cancelled` if `stop`
    /// fires while waiting for an in-flight slot.
    pub fn next_until(&mut self, stop: &dyn Fn() -> bool) -> SnapEditResult<Option<Frame>> {
        if self.decoder.is_none() {
            return Ok(None);
        }
        if self.kind == MediaKind::Image && self.next_index >= 1 {
            self.close();
            return Ok(None);
        }
        if !self.gate.reserve(stop) {
            return Err(SnapEditError::Cancelled);
        }
        // The slot is owned by the ticket from here on, so every exit path
        // below returns it.
        let ticket = FrameTicket::new(self.gate.clone());

        let decoded = match self.decoder.as_mut() {
            Some(decoder) => decoder.decode_next(),
            None => Ok(None),
        };
        let raw = match decoded {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.close();
                return Ok(None);
            }
            Err(err) => {
                self.close();
                return Err(err);
            }
        };

        let index = self.next_index;
        let frame = Frame::new(
            index,
            self.clock.pts_ns(index),
            raw.width,
            raw.height,
            raw.format,
            raw.data,
        )?
        .with_ticket(ticket);
        self.next_index += 1;
        Ok(Some(frame))
    }

    /// Release the decoder. Further calls to `next` return `None`.
    pub fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
            tracing::debug!(
                backend = decoder.name(),
                frames = self.next_index,
                "Frame source closed"
            );
        }
    }

    /// Frames emitted so far.
    pub fn frames_emitted(&self) -> u64 {
        self.next_index
    }

    /// Frames from this source that are still alive.
    pub fn in_flight(&self) -> usize {
        self.gate.live()
    }

    /// True once the stream ended or [`close`](Self::close) ran.
    pub fn is_closed(&self) -> bool {
        self.decoder.is_none()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}
