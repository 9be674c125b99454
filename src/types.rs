//! Common types used throughout camcanvas

use serde::{Deserialize, Serialize};

/// Pixel dimensions of a canvas, stream or image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    // Common resolutions
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);
    pub const UHD_4K: Self = Self::new(3840, 2160);

    /// Calculate total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Calculate aspect ratio
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// True when either side is zero (nothing can be drawn)
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FHD_1080P
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Framerate representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub den: u32,
}

impl Framerate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    // Common framerates
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_60: Self = Self::new(60, 1);

    /// Get framerate as f64
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            self.num as f64
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Interval between two frames
    pub fn frame_interval(&self) -> std::time::Duration {
        let fps = self.as_f64();
        if fps <= 0.0 {
            return std::time::Duration::from_millis(16);
        }
        std::time::Duration::from_secs_f64(1.0 / fps)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::FPS_60
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{} fps", self.num)
        } else {
            write!(f, "{:.2} fps", self.as_f64())
        }
    }
}

/// A decoded RGBA8 frame (straight alpha, tightly packed rows)
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw pixel data, `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Presentation timestamp in microseconds
    pub pts: i64,
}

impl Frame {
    /// Create a transparent frame
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
            pts: 0,
        }
    }

    /// Create a frame filled with one opaque colour
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut frame = Self::new(width, height);
        for px in frame.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        frame
    }

    /// Create a frame from existing RGBA data
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            pts: 0,
        })
    }

    /// Get resolution
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// RGBA of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }
}

/// Statistics for monitoring the render loop
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Scheduler ticks since start
    pub ticks: u64,
    /// Frames drawn by the renderer
    pub frames_rendered: u64,
    /// Ticks that fired while paused
    pub frames_skipped: u64,
    /// Average per-frame render time in ms
    pub avg_render_ms: f64,
}

impl Stats {
    /// Fold one render duration into the running average
    pub fn record_render(&mut self, elapsed: std::time::Duration) {
        self.frames_rendered += 1;
        let ms = elapsed.as_secs_f64() * 1000.0;
        let n = self.frames_rendered as f64;
        self.avg_render_ms += (ms - self.avg_render_ms) / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constructors() {
        let frame = Frame::solid(2, 2, [10, 20, 30]);
        assert_eq!(frame.pixel(1, 1), [10, 20, 30, 255]);
        assert!(Frame::from_rgba(vec![0; 15], 2, 2).is_none());
        assert!(Frame::from_rgba(vec![0; 16], 2, 2).is_some());
    }

    #[test]
    fn test_stats_average() {
        let mut stats = Stats::default();
        stats.record_render(std::time::Duration::from_millis(2));
        stats.record_render(std::time::Duration::from_millis(4));
        assert_eq!(stats.frames_rendered, 2);
        assert!((stats.avg_render_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_interval() {
        let interval = Framerate::FPS_60.frame_interval();
        assert!((interval.as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);
    }
}
