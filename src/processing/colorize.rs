//! Duotone colour remap
//!
//! Each pixel is pushed from a target colour toward white by its red
//! channel's intensity. Runs over the whole canvas, so it is the most
//! expensive step of a frame and stays off unless enabled.

use serde::{Deserialize, Serialize};

/// Opaque RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Remap RGBA8 pixels in place toward `target`; alpha becomes opaque
pub fn colorize(data: &mut [u8], target: Rgb) {
    let remap = |target: u8, percent: f64| -> u8 {
        let t = target as f64;
        // Same rounding as a clamped byte array store.
        (t + (255.0 - t) * percent).round_ties_even().clamp(0.0, 255.0) as u8
    };

    for px in data.chunks_exact_mut(4) {
        let percent = px[0] as f64 / 255.0;
        px[0] = remap(target.r, percent);
        px[1] = remap(target.g, percent);
        px[2] = remap(target.b, percent);
        px[3] = 255;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINT: Rgb = Rgb::new(245, 27, 58);

    #[test]
    fn test_black_maps_to_target() {
        let mut data = vec![0, 90, 200, 0];
        colorize(&mut data, TINT);
        assert_eq!(data, vec![245, 27, 58, 255]);
    }

    #[test]
    fn test_white_maps_to_white() {
        let mut data = vec![255, 0, 0, 10];
        colorize(&mut data, TINT);
        assert_eq!(data, vec![255, 255, 255, 255]);
    }

    #[test]
    fn test_midtone_uses_red_weight() {
        let mut data = vec![51, 255, 255, 255];
        colorize(&mut data, TINT);
        // percent = 0.2
        assert_eq!(data, vec![247, 73, 97, 255]);
    }
}
