//! Decoded raster frames.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snapedit_common::error::{SnapEditError, SnapEditResult};

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGBA, straight alpha.
    Rgba8,
    /// 8-bit RGB.
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// Receives a slot back when a ticketed frame is dropped.
pub trait TicketRelease: Send + Sync {
    fn release(&self);
}

/// Accounts for one decoded frame against its source's in-flight budget.
pub struct FrameTicket {
    pool: Arc<dyn TicketRelease>,
}

impl FrameTicket {
    pub fn new(pool: Arc<dyn TicketRelease>) -> Self {
        Self { pool }
    }
}

impl Drop for FrameTicket {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// One decoded raster image.
///
/// Frames move between pipeline stages by value. A frame produced by a
/// frame source holds a ticket that returns its slot to the source on drop;
/// clones never carry the ticket.
pub struct Frame {
    /// Sequence index within the job, starting at 0.
    pub index: u64,

    /// Presentation timestamp in nanoseconds.
    pub pts_ns: u64,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Row-major pixel bytes, no padding.
    pub data: Vec<u8>,

    ticket: Option<FrameTicket>,
}

impl Frame {
    /// Build a frame, validating the buffer length against the geometry.
    pub fn new(
        index: u64,
        pts_ns: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> SnapEditResult<Self> {
        if width == 0 || height == 0 {
            return Err(SnapEditError::corrupt_media(format!(
                "frame {index} has empty geometry {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(SnapEditError::corrupt_media(format!(
                "frame {index} buffer is {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            index,
            pts_ns,
            width,
            height,
            format,
            data,
            ticket: None,
        })
    }

    /// Solid-colour RGBA frame.
    pub fn filled(index: u64, pts_ns: u64, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            index,
            pts_ns,
            width,
            height,
            format: PixelFormat::Rgba8,
            data,
            ticket: None,
        }
    }

    /// Attach an in-flight ticket.
    pub fn with_ticket(mut self, ticket: FrameTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    /// Whether this frame still counts against a source's in-flight budget.
    pub fn is_ticketed(&self) -> bool {
        self.ticket.is_some()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA value at (x, y). RGB frames report full opacity.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        let px = &self.data[offset..offset + bpp];
        match self.format {
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
        }
    }

    /// Convert to RGBA8 in place (no-op for RGBA frames).
    pub fn into_rgba(mut self) -> Self {
        if self.format == PixelFormat::Rgb8 {
            let mut rgba = Vec::with_capacity(self.pixel_count() * 4);
            for px in self.data.chunks_exact(3) {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
            self.data = rgba;
            self.format = PixelFormat::Rgba8;
        }
        self
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            pts_ns: self.pts_ns,
            width: self.width,
            height: self.height,
            format: self.format,
            data: self.data.clone(),
            ticket: None,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("pts_ns", &self.pts_ns)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .field("ticketed", &self.ticket.is_some())
            .finish()
    }
}
