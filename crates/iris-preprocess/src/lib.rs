//! iris-preprocess – plane assembly and SDK image conversion.
//!
//! Detectors consume a packed-RGB [`VisionImage`]; this crate builds one
//! from whatever the camera or the caller hands over: a captured NV12
//! frame, a multi-plane YUV byte buffer, or a decoded image file.  The
//! final hop to the SDK's tensor input ([`VisionImage::to_tensor`])
//! resizes with Lanczos3 and normalizes to 0–1.

use ndarray::Array3;
use rgb::FromSlice;
use thiserror::Error;

mod convert;
mod planes;

pub use planes::{PixelBuffer, PlaneDescriptor, PlaneLayout};

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("cannot construct an image with no planes")]
    NoPlanes,
    #[error("plane data needs {needed} bytes but buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("expected {expected} planes, got {got}")]
    PlaneCount { expected: usize, got: usize },
    #[error("buffer of {got} bytes does not hold a {width}x{height} RGB image")]
    BadImageLength { got: usize, width: u32, height: u32 },
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("resize failed: {0}")]
    Resize(#[from] resize::Error),
    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, PreprocessError>;

/// The image representation the vision SDK consumes: tightly packed
/// 8-bit RGB plus dimensions.
#[derive(Debug, Clone)]
pub struct VisionImage {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VisionImage {
    pub fn from_rgb8(rgb: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if rgb.len() != width as usize * height as usize * 3 {
            return Err(PreprocessError::BadImageLength {
                got: rgb.len(),
                width,
                height,
            });
        }
        Ok(Self { rgb, width, height })
    }

    /// Decode an image file (PNG or JPEG).
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let decoded = image::open(path)?.to_rgb8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            rgb: decoded.into_raw(),
            width,
            height,
        })
    }

    /// Convert an assembled plane buffer into the SDK representation.
    pub fn from_pixel_buffer(buffer: &PixelBuffer) -> Result<Self> {
        convert::to_vision_image(buffer)
    }

    /// Resize and normalize into the `(height, width, 3)` f32 tensor the
    /// SDK's models take.
    pub fn to_tensor(&self, dst_w: u32, dst_h: u32) -> Result<Array3<f32>> {
        let mut dst = vec![0u8; dst_w as usize * dst_h as usize * 3];
        let mut resizer = resize::new(
            self.width as usize,
            self.height as usize,
            dst_w as usize,
            dst_h as usize,
            resize::Pixel::RGB8,
            resize::Type::Lanczos3,
        )?;
        resizer.resize(self.rgb.as_rgb(), dst.as_rgb_mut())?;

        let floats: Vec<f32> = dst.iter().map(|px| *px as f32 / 255.0).collect();
        Ok(Array3::from_shape_vec(
            (dst_h as usize, dst_w as usize, 3),
            floats,
        )?)
    }

    /// 8-bit luma at one pixel (BT.601 weights), the form the barcode
    /// SDK samples.
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let base = (y as usize * self.width as usize + x as usize) * 3;
        let r = self.rgb[base] as f32;
        let g = self.rgb[base + 1] as f32;
        let b = self.rgb[base + 2] as f32;
        (0.299 * r + 0.587 * g + 0.114 * b) as u8
    }

    /// Copy out a sub-rectangle, clamped to the image bounds.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> VisionImage {
        if self.width == 0 || self.height == 0 {
            return VisionImage {
                rgb: Vec::new(),
                width: 0,
                height: 0,
            };
        }
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let width = width.clamp(1, self.width - x);
        let height = height.clamp(1, self.height - y);

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for row in y..y + height {
            let start = (row as usize * self.width as usize + x as usize) * 3;
            rgb.extend_from_slice(&self.rgb[start..start + width as usize * 3]);
        }
        VisionImage { rgb, width, height }
    }
}
