//! Assemble a pixel buffer from caller-declared planes.

use crate::{PreprocessError, Result};
use iris_camera::{FrameData, PixelFormat, VideoFrame};

/// Geometry one plane declares over the shared byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDescriptor {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

/// Resolved placement of one plane inside the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

/// A width×height image over one shared, reference-counted byte buffer.
///
/// No pixel data is copied at construction: a single plane references the
/// caller's bytes at offset zero with the declared stride, and each
/// subsequent plane starts where the previous one ends
/// (`previous_height × previous_bytes_per_row`), the contiguous layout
/// camera stacks hand out for semi-planar and planar YUV.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: FrameData,
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<PlaneLayout>,
}

impl PixelBuffer {
    pub fn from_planes(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: FrameData,
        planes: &[PlaneDescriptor],
    ) -> Result<Self> {
        if planes.is_empty() {
            return Err(PreprocessError::NoPlanes);
        }

        let mut layouts = Vec::with_capacity(planes.len());
        let mut offset = 0usize;
        for descriptor in planes {
            let extent = descriptor.height as usize * descriptor.bytes_per_row as usize;
            let end = offset + extent;
            if end > data.len() {
                return Err(PreprocessError::BufferTooSmall {
                    needed: end,
                    available: data.len(),
                });
            }
            layouts.push(PlaneLayout {
                offset,
                width: descriptor.width,
                height: descriptor.height,
                bytes_per_row: descriptor.bytes_per_row,
            });
            offset = end;
        }

        Ok(Self {
            data,
            width,
            height,
            format,
            planes: layouts,
        })
    }

    /// View a captured camera frame as a plane buffer, without copying.
    pub fn from_video_frame(frame: &VideoFrame) -> Result<Self> {
        let descriptors = match frame.format {
            PixelFormat::Nv12 => vec![
                PlaneDescriptor {
                    width: frame.width,
                    height: frame.height,
                    bytes_per_row: frame.stride,
                },
                PlaneDescriptor {
                    width: frame.width / 2,
                    height: frame.height / 2,
                    bytes_per_row: frame.stride,
                },
            ],
            PixelFormat::I420 => vec![
                PlaneDescriptor {
                    width: frame.width,
                    height: frame.height,
                    bytes_per_row: frame.stride,
                },
                PlaneDescriptor {
                    width: frame.width / 2,
                    height: frame.height / 2,
                    bytes_per_row: frame.stride / 2,
                },
                PlaneDescriptor {
                    width: frame.width / 2,
                    height: frame.height / 2,
                    bytes_per_row: frame.stride / 2,
                },
            ],
            _ => vec![PlaneDescriptor {
                width: frame.width,
                height: frame.height,
                bytes_per_row: frame.stride,
            }],
        };
        Self::from_planes(
            frame.width,
            frame.height,
            frame.format,
            frame.data.clone(),
            &descriptors,
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Option<&PlaneLayout> {
        self.planes.get(index)
    }

    /// Bytes of one plane, `height × bytes_per_row` starting at its base.
    pub fn plane_data(&self, index: usize) -> Result<&[u8]> {
        let layout = self
            .planes
            .get(index)
            .ok_or(PreprocessError::PlaneCount {
                expected: index + 1,
                got: self.planes.len(),
            })?;
        let extent = layout.height as usize * layout.bytes_per_row as usize;
        Ok(&self.data.as_slice()[layout.offset..layout.offset + extent])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn shared(bytes: Vec<u8>) -> (Arc<[u8]>, FrameData) {
        let arc: Arc<[u8]> = Arc::from(bytes.as_slice());
        (Arc::clone(&arc), FrameData::Copied(arc))
    }

    #[test]
    fn zero_planes_is_invalid() {
        let (_, data) = shared(vec![0u8; 32]);
        let result = PixelBuffer::from_planes(4, 2, PixelFormat::Gray8, data, &[]);
        assert!(matches!(result, Err(PreprocessError::NoPlanes)));
    }

    #[test]
    fn single_plane_references_the_input_buffer() {
        let (arc, data) = shared(vec![7u8; 32]);
        let buffer = PixelBuffer::from_planes(
            4,
            2,
            PixelFormat::Gray8,
            data,
            &[PlaneDescriptor {
                width: 4,
                height: 2,
                bytes_per_row: 16,
            }],
        )
        .unwrap();

        let plane = buffer.plane_data(0).unwrap();
        assert_eq!(plane.as_ptr(), arc.as_ptr(), "single plane must not copy");
        assert_eq!(plane.len(), 32);
    }

    #[test]
    fn second_plane_starts_where_the_first_ends() {
        let (arc, data) = shared((0u8..40).collect());
        let buffer = PixelBuffer::from_planes(
            4,
            2,
            PixelFormat::Nv12,
            data,
            &[
                PlaneDescriptor {
                    width: 4,
                    height: 2,
                    bytes_per_row: 16,
                },
                PlaneDescriptor {
                    width: 2,
                    height: 1,
                    bytes_per_row: 8,
                },
            ],
        )
        .unwrap();

        let plane1 = buffer.plane_data(1).unwrap();
        // base address of plane 1 is 2 rows × 16 bytes past plane 0
        assert_eq!(plane1.as_ptr() as usize, arc.as_ptr() as usize + 32);
        assert_eq!(buffer.plane(1).unwrap().offset, 32);
        assert_eq!(plane1[0], 32);
    }

    #[test]
    fn planes_past_the_buffer_are_rejected() {
        let (_, data) = shared(vec![0u8; 16]);
        let result = PixelBuffer::from_planes(
            4,
            2,
            PixelFormat::Gray8,
            data,
            &[PlaneDescriptor {
                width: 4,
                height: 2,
                bytes_per_row: 16,
            }],
        );
        assert!(matches!(
            result,
            Err(PreprocessError::BufferTooSmall {
                needed: 32,
                available: 16,
            })
        ));
    }

    #[test]
    fn nv12_frame_maps_to_two_planes() {
        let (_, data) = shared(vec![0u8; 6 * 4 * 3 / 2]);
        let frame = VideoFrame {
            data,
            width: 6,
            height: 4,
            stride: 6,
            format: PixelFormat::Nv12,
            pts: std::time::Duration::ZERO,
        };
        let buffer = PixelBuffer::from_video_frame(&frame).unwrap();
        assert_eq!(buffer.plane_count(), 2);
        assert_eq!(buffer.plane(1).unwrap().offset, 24);
    }
}
