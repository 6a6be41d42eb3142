// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion for the conversion stage
//!
//! YUYV (packed YUV 4:2:2): Y0 U Y1 V - each 4-byte group encodes 2 pixels
//! sharing one chroma pair. The hot path uses the fixed-point BT.601
//! video-range coefficients; the floating-point form only serves as a test
//! reference.

use crate::errors::{PipelineError, PipelineResult};

#[inline]
fn clamp8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert one YUV sample to RGB with integer arithmetic (BT.601, video range)
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    [
        clamp8((298 * c + 409 * e + 128) >> 8),
        clamp8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Floating-point BT.601 conversion, the reference the integer form is checked against
#[cfg(test)]
fn yuv_to_rgb_f32(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = (y as f32 - 16.0) * 1.164;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.596 * v;
    let g = y - 0.392 * u - 0.813 * v;
    let b = y + 2.017 * u;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

fn check_packed(src: &[u8], dst_len: usize, out_per_group: usize) -> PipelineResult<usize> {
    if src.len() % 4 != 0 {
        return Err(PipelineError::InputContract(format!(
            "YUYV input of {} bytes is not a whole number of pixel pairs",
            src.len()
        )));
    }
    let needed = src.len() / 4 * out_per_group;
    if dst_len < needed {
        return Err(PipelineError::InputContract(format!(
            "output buffer holds {} bytes, conversion needs {}",
            dst_len, needed
        )));
    }
    Ok(needed)
}

/// Convert YUYV into RGB24, returning the bytes written (`src.len() * 3 / 2`)
pub fn yuyv_to_rgb_into(src: &[u8], dst: &mut [u8]) -> PipelineResult<usize> {
    let needed = check_packed(src, dst.len(), 6)?;

    for (group, out) in src.chunks_exact(4).zip(dst[..needed].chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        out[..3].copy_from_slice(&yuv_to_rgb(y0, u, v));
        out[3..].copy_from_slice(&yuv_to_rgb(y1, u, v));
    }

    Ok(needed)
}

/// Allocating form of [`yuyv_to_rgb_into`]
pub fn yuyv_to_rgb(src: &[u8]) -> PipelineResult<Vec<u8>> {
    let mut rgb = vec![0u8; src.len() / 4 * 6];
    yuyv_to_rgb_into(src, &mut rgb)?;
    Ok(rgb)
}

/// Keep only the luma samples of a YUYV frame (2 bytes out per 4 in)
pub fn yuyv_to_luma_into(src: &[u8], dst: &mut [u8]) -> PipelineResult<usize> {
    let needed = check_packed(src, dst.len(), 2)?;

    for (group, out) in src.chunks_exact(4).zip(dst[..needed].chunks_exact_mut(2)) {
        out[0] = group[0];
        out[1] = group[2];
    }

    Ok(needed)
}

/// Expand 8-bit grey to RGB24 (each sample repeated three times)
pub fn grey_to_rgb_into(src: &[u8], dst: &mut [u8]) -> PipelineResult<usize> {
    let needed = src.len() * 3;
    if dst.len() < needed {
        return Err(PipelineError::InputContract(format!(
            "output buffer holds {} bytes, conversion needs {}",
            dst.len(),
            needed
        )));
    }

    for (&g, out) in src.iter().zip(dst[..needed].chunks_exact_mut(3)) {
        out.fill(g);
    }

    Ok(needed)
}
