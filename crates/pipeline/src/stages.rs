//! Construction of the native endpoints of a job.

use std::path::Path;

use snapedit_common::error::SnapEditResult;
use snapedit_frame_source::FrameSource;
use snapedit_media_model::{Frame, MediaAsset};
use snapedit_render_engine::{EncodeSink, ExportSettings, SinkLimits};

/// Opens the decoder and encoder for each job.
///
/// Every call runs on a blocking thread.
pub trait StageFactory: Send + Sync {
    fn open_source(&self, asset: &MediaAsset, max_in_flight: usize) -> SnapEditResult<FrameSource>;

    fn open_sink(
        &self,
        destination: &Path,
        asset: &MediaAsset,
        settings: &ExportSettings,
        limits: SinkLimits,
    ) -> SnapEditResult<EncodeSink>;

    /// Decode the still image an overlay edit draws.
    fn load_overlay(&self, path: &Path) -> SnapEditResult<Frame> {
        snapedit_frame_source::load_image(path)
    }
}

/// ffmpeg for video, the `image` codecs for photos.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeStages;

impl StageFactory for NativeStages {
    fn open_source(&self, asset: &MediaAsset, max_in_flight: usize) -> SnapEditResult<FrameSource> {
        FrameSource::open(asset, max_in_flight)
    }

    fn open_sink(
        &self,
        destination: &Path,
        asset: &MediaAsset,
        settings: &ExportSettings,
        limits: SinkLimits,
    ) -> SnapEditResult<EncodeSink> {
        EncodeSink::create(destination, asset, settings, limits)
    }
}
