//! Per-format plane → packed RGB converters (BT.601, full range).

use crate::planes::PixelBuffer;
use crate::{PreprocessError, Result, VisionImage};
use iris_camera::PixelFormat;

pub(crate) fn to_vision_image(buffer: &PixelBuffer) -> Result<VisionImage> {
    let width = buffer.width();
    let height = buffer.height();
    let mut rgb = vec![0u8; width as usize * height as usize * 3];

    match buffer.format() {
        PixelFormat::Nv12 => nv12_to_rgb(buffer, &mut rgb)?,
        PixelFormat::I420 => i420_to_rgb(buffer, &mut rgb)?,
        PixelFormat::Yuyv => yuyv_to_rgb(buffer, &mut rgb)?,
        PixelFormat::Bgra => bgra_to_rgb(buffer, &mut rgb)?,
        PixelFormat::Rgb24 => rgb24_rows(buffer, &mut rgb)?,
        PixelFormat::Gray8 => gray8_to_rgb(buffer, &mut rgb)?,
    }

    VisionImage::from_rgb8(rgb, width, height)
}

fn plane_with_stride(buffer: &PixelBuffer, index: usize) -> Result<(&[u8], usize)> {
    let layout = *buffer.plane(index).ok_or(PreprocessError::PlaneCount {
        expected: index + 1,
        got: buffer.plane_count(),
    })?;
    Ok((buffer.plane_data(index)?, layout.bytes_per_row as usize))
}

fn expect_planes(buffer: &PixelBuffer, expected: usize) -> Result<()> {
    if buffer.plane_count() != expected {
        return Err(PreprocessError::PlaneCount {
            expected,
            got: buffer.plane_count(),
        });
    }
    Ok(())
}

fn store_yuv(out: &mut [u8], index: usize, y: f32, u: f32, v: f32) {
    let r = (y + 1.402 * v).clamp(0.0, 255.0);
    let g = (y - 0.344_13 * u - 0.714_14 * v).clamp(0.0, 255.0);
    let b = (y + 1.772 * u).clamp(0.0, 255.0);

    let base = index * 3;
    out[base] = r as u8;
    out[base + 1] = g as u8;
    out[base + 2] = b as u8;
}

/// Y plane + interleaved UV plane, 4:2:0.
fn nv12_to_rgb(buffer: &PixelBuffer, out: &mut [u8]) -> Result<()> {
    expect_planes(buffer, 2)?;
    let (y_plane, y_stride) = plane_with_stride(buffer, 0)?;
    let (uv_plane, uv_stride) = plane_with_stride(buffer, 1)?;

    let w = buffer.width() as usize;
    let h = buffer.height() as usize;
    for j in 0..h {
        for i in 0..w {
            let y = y_plane[j * y_stride + i] as f32;
            let uv_idx = (j / 2) * uv_stride + (i & !1);
            let u = uv_plane[uv_idx] as f32 - 128.0;
            let v = uv_plane[uv_idx + 1] as f32 - 128.0;
            store_yuv(out, j * w + i, y, u, v);
        }
    }
    Ok(())
}

/// Separate Y, U and V planes, 4:2:0.
fn i420_to_rgb(buffer: &PixelBuffer, out: &mut [u8]) -> Result<()> {
    expect_planes(buffer, 3)?;
    let (y_plane, y_stride) = plane_with_stride(buffer, 0)?;
    let (u_plane, u_stride) = plane_with_stride(buffer, 1)?;
    let (v_plane, v_stride) = plane_with_stride(buffer, 2)?;

    let w = buffer.width() as usize;
    let h = buffer.height() as usize;
    for j in 0..h {
        for i in 0..w {
            let y = y_plane[j * y_stride + i] as f32;
            let chroma = (j / 2) * u_stride + i / 2;
            let u = u_plane[chroma] as f32 - 128.0;
            let v = v_plane[(j / 2) * v_stride + i / 2] as f32 - 128.0;
            store_yuv(out, j * w + i, y, u, v);
        }
    }
    Ok(())
}

/// Packed Y0 U Y1 V, 4:2:2.
fn yuyv_to_rgb(buffer: &PixelBuffer, out: &mut [u8]) -> Result<()> {
    expect_planes(buffer, 1)?;
    let (plane, stride) = plane_with_stride(buffer, 0)?;

    let w = buffer.width() as usize;
    let h = buffer.height() as usize;
    for j in 0..h {
        for i in 0..w {
            let pair = j * stride + (i & !1) * 2;
            let y = plane[pair + (i & 1) * 2] as f32;
            let u = plane[pair + 1] as f32 - 128.0;
            let v = plane[pair + 3] as f32 - 128.0;
            store_yuv(out, j * w + i, y, u, v);
        }
    }
    Ok(())
}

fn bgra_to_rgb(buffer: &PixelBuffer, out: &mut [u8]) -> Result<()> {
    expect_planes(buffer, 1)?;
    let (plane, stride) = plane_with_stride(buffer, 0)?;

    let w = buffer.width() as usize;
    let h = buffer.height() as usize;
    for j in 0..h {
        for i in 0..w {
            let src = j * stride + i * 4;
            let dst = (j * w + i) * 3;
            out[dst] = plane[src + 2];
            out[dst + 1] = plane[src + 1];
            out[dst + 2] = plane[src];
        }
    }
    Ok(())
}

fn rgb24_rows(buffer: &PixelBuffer, out: &mut [u8]) -> Result<()> {
    expect_planes(buffer, 1)?;
    let (plane, stride) = plane_with_stride(buffer, 0)?;

    let w = buffer.width() as usize;
    let h = buffer.height() as usize;
    for j in 0..h {
        let src = j * stride;
        let dst = j * w * 3;
        out[dst..dst + w * 3].copy_from_slice(&plane[src..src + w * 3]);
    }
    Ok(())
}

fn gray8_to_rgb(buffer: &PixelBuffer, out: &mut [u8]) -> Result<()> {
    expect_planes(buffer, 1)?;
    let (plane, stride) = plane_with_stride(buffer, 0)?;

    let w = buffer.width() as usize;
    let h = buffer.height() as usize;
    for j in 0..h {
        for i in 0..w {
            let luma = plane[j * stride + i];
            let dst = (j * w + i) * 3;
            out[dst] = luma;
            out[dst + 1] = luma;
            out[dst + 2] = luma;
        }
    }
    Ok(())
}
