//! CPU filter chain
//!
//! Colour maths follow the CSS Filter Effects definitions and operate on
//! straight-alpha RGBA8. Blur runs on premultiplied values so transparent
//! pixels do not bleed dark fringes.

use super::{premultiply, to_u8, unpremultiply};
use crate::filters::{FilterChain, FilterOp};

/// Apply every op of `chain` to an RGBA8 buffer, in order
pub fn apply_chain(data: &mut [u8], width: u32, height: u32, chain: &FilterChain) {
    for op in chain.ops() {
        apply_op(data, width, height, *op);
    }
}

/// Apply a single op to an RGBA8 buffer
pub fn apply_op(data: &mut [u8], width: u32, height: u32, op: FilterOp) {
    if op.is_identity() {
        return;
    }
    match op {
        FilterOp::Grayscale(percent) => grayscale(data, (percent / 100.0).clamp(0.0, 1.0) as f32),
        FilterOp::Brightness(amount) => {
            let lut = lut(|v| v * amount as f32);
            map_rgb(data, &lut);
        }
        FilterOp::Contrast(amount) => {
            let lut = lut(|v| (v - 127.5) * amount as f32 + 127.5);
            map_rgb(data, &lut);
        }
        FilterOp::Blur(sigma) => gaussian_blur(data, width, height, sigma as f32),
    }
}

fn lut(f: impl Fn(f32) -> f32) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = to_u8(f(i as f32));
    }
    table
}

fn map_rgb(data: &mut [u8], lut: &[u8; 256]) {
    for px in data.chunks_exact_mut(4) {
        px[0] = lut[px[0] as usize];
        px[1] = lut[px[1] as usize];
        px[2] = lut[px[2] as usize];
    }
}

fn grayscale(data: &mut [u8], amount: f32) {
    let k = 1.0 - amount;
    #[rustfmt::skip]
    let m = [
        0.2126 + 0.7874 * k, 0.7152 - 0.7152 * k, 0.0722 - 0.0722 * k,
        0.2126 - 0.2126 * k, 0.7152 + 0.2848 * k, 0.0722 - 0.0722 * k,
        0.2126 - 0.2126 * k, 0.7152 - 0.7152 * k, 0.0722 + 0.9278 * k,
    ];

    for px in data.chunks_exact_mut(4) {
        let r = px[0] as f32;
        let g = px[1] as f32;
        let b = px[2] as f32;
        px[0] = to_u8(m[0] * r + m[1] * g + m[2] * b);
        px[1] = to_u8(m[3] * r + m[4] * g + m[5] * b);
        px[2] = to_u8(m[6] * r + m[7] * g + m[8] * b);
    }
}

/// Widest radius run as an exact Gaussian; wider blurs use box passes
const MAX_EXACT_RADIUS: u32 = 24;

/// Normalised 1-D Gaussian kernel with radius `ceil(3 * sigma)`, at most `max_radius`
pub fn gaussian_kernel(sigma: f32, max_radius: u32) -> Vec<f32> {
    if sigma.is_nan() || sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = blur_radius(sigma).min(max_radius) as i64;
    let denom = 2.0 * sigma * sigma;
    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

fn blur_radius(sigma: f32) -> u32 {
    // Float to int casts saturate, so huge sigmas land on u32::MAX.
    (sigma * 3.0).ceil() as u32
}

/// Blur the layer; the kernel never reaches past the layer's longest side
fn gaussian_blur(data: &mut [u8], width: u32, height: u32, sigma: f32) {
    if sigma.is_nan() || sigma <= 0.0 || width == 0 || height == 0 {
        return;
    }
    let limit = width.max(height);
    let radius = blur_radius(sigma).min(limit);
    if radius == 0 {
        return;
    }

    let (w, h) = (width as usize, height as usize);
    let mut src = premultiply(data);
    let mut tmp = vec![0.0f32; src.len()];

    if radius <= MAX_EXACT_RADIUS {
        let kernel = gaussian_kernel(sigma, limit);
        kernel_pass(&src, &mut tmp, w, h, &kernel, true);
        kernel_pass(&tmp, &mut src, w, h, &kernel, false);
    } else {
        for box_radius in box_radii(sigma, limit) {
            box_pass(&src, &mut tmp, w, h, box_radius as usize, true);
            box_pass(&tmp, &mut src, w, h, box_radius as usize, false);
        }
    }

    unpremultiply(&src, data);
}

/// Rows (`horizontal`) or columns of a `width` x `height` RGBA layer
///
/// Returns `(lines, line length, pixel step along a line, pixel step between lines)`.
fn line_layout(width: usize, height: usize, horizontal: bool) -> (usize, usize, usize, usize) {
    if horizontal {
        (height, width, 1, width)
    } else {
        (width, height, width, 1)
    }
}

/// One separable convolution pass with edge clamping
fn kernel_pass(src: &[f32], dst: &mut [f32], width: usize, height: usize, kernel: &[f32], horizontal: bool) {
    let (lines, len, step, line_step) = line_layout(width, height, horizontal);
    let radius = (kernel.len() / 2) as i64;
    let last = len as i64 - 1;

    for line in 0..lines {
        let at = |k: i64| (line * line_step + k.clamp(0, last) as usize * step) * 4;
        for k in 0..len as i64 {
            let mut acc = [0.0f32; 4];
            for (ki, &kw) in kernel.iter().enumerate() {
                let idx = at(k + ki as i64 - radius);
                for c in 0..4 {
                    acc[c] += kw * src[idx + c];
                }
            }
            let out = at(k);
            dst[out..out + 4].copy_from_slice(&acc);
        }
    }
}

/// Box widths whose three passes approximate a Gaussian of `sigma`
fn box_radii(sigma: f32, limit: u32) -> [u32; 3] {
    let passes = 3.0f64;
    let variance = 12.0 * sigma as f64 * sigma as f64;
    let ideal = (variance / passes + 1.0).sqrt();
    let mut lower = ideal.floor();
    if lower % 2.0 == 0.0 {
        lower -= 1.0;
    }
    let lower = lower.max(1.0);
    let upper = lower + 2.0;
    let use_lower = ((variance - passes * lower * lower - 4.0 * passes * lower - 3.0 * passes)
        / (-4.0 * lower - 4.0))
        .round()
        .clamp(0.0, passes) as usize;

    let radius = |width: f64| (((width - 1.0) / 2.0) as u32).min(limit);
    let mut radii = [radius(upper); 3];
    for r in radii.iter_mut().take(use_lower) {
        *r = radius(lower);
    }
    radii
}

/// Moving-average pass of width `2 * radius + 1` with edge clamping
fn box_pass(src: &[f32], dst: &mut [f32], width: usize, height: usize, radius: usize, horizontal: bool) {
    let (lines, len, step, line_step) = line_layout(width, height, horizontal);
    let radius = radius as i64;
    let last = len as i64 - 1;
    let window = (2 * radius + 1) as f32;

    for line in 0..lines {
        let at = |k: i64| (line * line_step + k.clamp(0, last) as usize * step) * 4;
        let mut acc = [0.0f32; 4];
        for k in -radius..=radius {
            let idx = at(k);
            for c in 0..4 {
                acc[c] += src[idx + c];
            }
        }
        for k in 0..len as i64 {
            let out = at(k);
            for c in 0..4 {
                dst[out + c] = acc[c] / window;
            }
            let add = at(k + radius + 1);
            let sub = at(k - radius);
            for c in 0..4 {
                acc[c] += src[add + c] - src[sub + c];
            }
        }
    }
}
