//! Pixel processing
//!
//! CPU implementations of the pixel work around the drawing surface:
//! - Filter chain (grayscale, blur, brightness, contrast)
//! - Colour remap toward a target tint
//! - Camera pixel format conversion (packed RGB, YUV 4:2:2)

mod colorize;
mod convert;
mod filter;

pub use colorize::{colorize, Rgb};
pub use convert::{bgra_to_rgba, rgbx_to_rgba, yuv422_to_rgba, Yuv422};
pub use filter::{apply_chain, apply_op, gaussian_kernel};

/// Premultiply straight-alpha RGBA8 into f32 RGBA in [0, 255]
pub(crate) fn premultiply(data: &[u8]) -> Vec<f32> {
    let mut out = Vec::with_capacity(data.len());
    for px in data.chunks_exact(4) {
        let a = px[3] as f32 / 255.0;
        out.extend_from_slice(&[
            px[0] as f32 * a,
            px[1] as f32 * a,
            px[2] as f32 * a,
            px[3] as f32,
        ]);
    }
    out
}

/// Inverse of `premultiply`, rounding back into RGBA8
pub(crate) fn unpremultiply(src: &[f32], dst: &mut [u8]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = s[3].clamp(0.0, 255.0);
        if a <= 0.0 {
            d.copy_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        let k = 255.0 / a;
        d[0] = to_u8(s[0] * k);
        d[1] = to_u8(s[1] * k);
        d[2] = to_u8(s[2] * k);
        d[3] = to_u8(a);
    }
}

#[inline]
pub(crate) fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
