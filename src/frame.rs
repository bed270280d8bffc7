//! Input and output frame data types.
//!
//! Frames enter the pipeline as [`InputFrame`]s — owned pixel data (or an
//! already-resident GPU texture) plus dimensions and the source orientation.
//! Rendered results come back out as [`FrameData`], a plain owned RGBA8
//! buffer.

use crate::orientation::Orientation;

/// Pixel payload of an incoming frame.
///
/// CPU variants own their bytes and are uploaded by the effect engine; the
/// texture variant hands over a GPU-resident image directly.
pub enum FrameContent {
    /// Packed RGBA, 4 bytes per pixel, row-major.
    Rgba(Vec<u8>),
    /// Biplanar YUV 4:2:0: a full-resolution luma plane followed by an
    /// interleaved half-resolution chroma plane (NV12 layout).
    Nv12 {
        /// Luma plane, `width * height` bytes.
        y: Vec<u8>,
        /// Interleaved CbCr plane, `width * height / 2` bytes.
        uv: Vec<u8>,
    },
    /// An opaque GPU texture the engine can sample directly.
    Texture(wgpu::Texture),
}

impl std::fmt::Debug for FrameContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameContent::Rgba(data) => f.debug_tuple("Rgba").field(&data.len()).finish(),
            FrameContent::Nv12 { y, uv } => f
                .debug_struct("Nv12")
                .field("y", &y.len())
                .field("uv", &uv.len())
                .finish(),
            FrameContent::Texture(_) => f.write_str("Texture"),
        }
    }
}

/// One caller-supplied frame, moved into the pipeline on submission.
#[derive(Debug)]
pub struct InputFrame {
    /// Pixel payload.
    pub content: FrameContent,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Orientation the frame was captured in.
    pub orientation: Orientation,
}

impl InputFrame {
    /// Create a packed-RGBA frame with the default (upright) orientation.
    pub fn rgba(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            content: FrameContent::Rgba(data),
            width,
            height,
            orientation: Orientation::Deg0,
        }
    }

    /// Set the source orientation.
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }
}

/// An owned block of rendered RGBA8 pixels read back from the GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    /// Tightly packed RGBA8 bytes, `width * height * 4` in total.
    pub bytes: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameData {
    /// Length in bytes of one tightly packed row.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * 4
    }
}
