//! Frame storage types shared by the capture session and its consumers.

use gst::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Pixel layout of a frame or plane buffer, keyed by fourcc code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Semi-planar 4:2:0, Y plane followed by interleaved UV.
    Nv12,
    /// Planar 4:2:0, separate Y, U and V planes.
    I420,
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
    /// 32-bit B G R A.
    Bgra,
    /// 24-bit R G B.
    Rgb24,
    /// 8-bit single-channel luma.
    Gray8,
}

impl PixelFormat {
    /// Parse a four-character format code.
    pub fn from_fourcc(code: &str) -> Option<Self> {
        match code {
            "NV12" => Some(Self::Nv12),
            "I420" | "YV12" => Some(Self::I420),
            "YUYV" | "YUY2" => Some(Self::Yuyv),
            "BGRA" | "BGRx" => Some(Self::Bgra),
            "RGB " | "RGB3" => Some(Self::Rgb24),
            "GRAY" | "GREY" | "Y8  " => Some(Self::Gray8),
            _ => None,
        }
    }

    pub fn fourcc(&self) -> &'static str {
        match self {
            Self::Nv12 => "NV12",
            Self::I420 => "I420",
            Self::Yuyv => "YUYV",
            Self::Bgra => "BGRA",
            Self::Rgb24 => "RGB3",
            Self::Gray8 => "GRAY",
        }
    }
}

/// Reference-counted pixel storage.
///
/// `Mapped` keeps a mapped GStreamer buffer alive without copying; the
/// underlying memory is released when the last clone drops.  `Copied` is
/// the plain heap variant used for still images and tests.
#[derive(Clone)]
pub enum FrameData {
    Copied(Arc<[u8]>),
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data,
            FrameData::Mapped(buffer) => buffer.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buffer) => write!(f, "FrameData::Mapped({} bytes)", buffer.size()),
        }
    }
}

/// One decoded camera frame.
///
/// Clones share the underlying pixel storage; the storage is released
/// exactly once, when the last clone drops.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: FrameData,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane.
    pub stride: u32,
    pub format: PixelFormat,
    pub pts: Duration,
}
