//! Placement geometry
//!
//! Computes where a source with some intrinsic size lands inside a
//! destination rectangle:
//! - `contain`: scale to fit, centred, letterboxed
//! - `cover`: scale to fill, cropping the overflow (CSS `background-size: cover`)

use serde::{Deserialize, Serialize};

use crate::types::Resolution;

/// Axis-aligned rectangle in canvas or source pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin covering a whole surface
    pub fn full(size: Resolution) -> Self {
        Self::new(0.0, 0.0, size.width as f64, size.height as f64)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    fn is_drawable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Source crop and destination rectangle for one draw call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Region of the source to sample
    pub src: Rect,
    /// Region of the destination to fill
    pub dst: Rect,
}

/// Fractional anchor of the cover crop, each axis in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

impl Anchor {
    pub const CENTER: Self = Self { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp each axis into [0, 1]; NaN falls back to the centre
    pub fn clamped(self) -> Self {
        let fix = |v: f64| if v.is_nan() { 0.5 } else { v.clamp(0.0, 1.0) };
        Self {
            x: fix(self.x),
            y: fix(self.y),
        }
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Fit the whole source inside `dst`, centred on both axes
///
/// Returns `None` when the source or destination is degenerate.
pub fn contain(dst: Rect, src_width: f64, src_height: f64) -> Option<Placement> {
    let src = Rect::new(0.0, 0.0, src_width, src_height);
    if !dst.is_drawable() || !src.is_drawable() {
        return None;
    }

    let ratio = (dst.width / src_width).min(dst.height / src_height);
    let draw_width = src_width * ratio;
    let draw_height = src_height * ratio;

    Some(Placement {
        src,
        dst: Rect::new(
            dst.x + (dst.width - draw_width) / 2.0,
            dst.y + (dst.height - draw_height) / 2.0,
            draw_width,
            draw_height,
        ),
    })
}

/// Fill `dst` completely, cropping the source around `anchor`
///
/// Returns `None` when the source or destination is degenerate.
pub fn cover(dst: Rect, src_width: f64, src_height: f64, anchor: Anchor) -> Option<Placement> {
    if !dst.is_drawable() || !Rect::new(0.0, 0.0, src_width, src_height).is_drawable() {
        return None;
    }
    let anchor = anchor.clamped();
    let (w, h) = (dst.width, dst.height);

    let r = (w / src_width).min(h / src_height);
    let mut nw = src_width * r;
    let mut nh = src_height * r;

    // Rounding can leave the scaled size a hair short of the destination.
    let mut ar = 1.0;
    if nw < w {
        ar = w / nw;
    }
    if (ar - 1.0_f64).abs() < 1e-14 && nh < h {
        ar = h / nh;
    }
    nw *= ar;
    nh *= ar;

    let mut cw = src_width / (nw / w);
    let mut ch = src_height / (nh / h);

    let cx = ((src_width - cw) * anchor.x).max(0.0);
    let cy = ((src_height - ch) * anchor.y).max(0.0);
    cw = cw.min(src_width);
    ch = ch.min(src_height);

    Some(Placement {
        src: Rect::new(cx, cy, cw, ch),
        dst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn canvas() -> Rect {
        Rect::full(Resolution::FHD_1080P)
    }

    #[test]
    fn test_cover_4_3_into_16_9() {
        let p = cover(canvas(), 640.0, 480.0, Anchor::CENTER).unwrap();
        assert_eq!(p.dst, canvas());
        assert!((p.src.x - 0.0).abs() < EPS);
        assert!((p.src.y - 60.0).abs() < EPS);
        assert!((p.src.width - 640.0).abs() < EPS);
        assert!((p.src.height - 360.0).abs() < EPS);
    }

    #[test]
    fn test_cover_anchor_moves_crop() {
        let top = cover(canvas(), 640.0, 480.0, Anchor::new(0.5, 0.0)).unwrap();
        assert!((top.src.y - 0.0).abs() < EPS);

        let bottom = cover(canvas(), 640.0, 480.0, Anchor::new(0.5, 7.0)).unwrap();
        assert!((bottom.src.y - 120.0).abs() < EPS);

        let nan = cover(canvas(), 640.0, 480.0, Anchor::new(f64::NAN, f64::NAN)).unwrap();
        assert!((nan.src.y - 60.0).abs() < EPS);
    }

    #[test]
    fn test_cover_tall_source_crops_width() {
        let p = cover(Rect::new(0.0, 0.0, 100.0, 100.0), 200.0, 400.0, Anchor::CENTER).unwrap();
        assert!((p.src.width - 200.0).abs() < EPS);
        assert!((p.src.height - 200.0).abs() < EPS);
        assert!((p.src.y - 100.0).abs() < EPS);
    }

    #[test]
    fn test_cover_crop_stays_inside_source() {
        let dests = [
            Rect::new(0.0, 0.0, 1920.0, 1080.0),
            Rect::new(10.0, 20.0, 333.0, 777.0),
            Rect::new(0.0, 0.0, 1.0, 1000.0),
            Rect::new(5.0, 5.0, 601.3, 99.9),
        ];
        let sources = [(640.0, 480.0), (1.0, 1.0), (4096.0, 3.0), (599.7, 100.1)];

        for dst in dests {
            for (sw, sh) in sources {
                let p = cover(dst, sw, sh, Anchor::CENTER).unwrap();
                assert!(p.src.x >= 0.0 && p.src.y >= 0.0, "{dst:?} {sw}x{sh}");
                assert!(p.src.right() <= sw + EPS, "{dst:?} {sw}x{sh}");
                assert!(p.src.bottom() <= sh + EPS, "{dst:?} {sw}x{sh}");
                // Same aspect as dst: the crop fills it with no bars.
                let crop_aspect = p.src.width / p.src.height;
                let dst_aspect = dst.width / dst.height;
                assert!(((crop_aspect - dst_aspect) / dst_aspect).abs() < 1e-9);
                assert_eq!(p.dst, dst);
            }
        }
    }

    #[test]
    fn test_contain_letterboxes() {
        let p = contain(canvas(), 640.0, 480.0).unwrap();
        assert!((p.dst.width - 1440.0).abs() < EPS);
        assert!((p.dst.height - 1080.0).abs() < EPS);
        assert!((p.dst.x - 240.0).abs() < EPS);
        assert!((p.dst.y - 0.0).abs() < EPS);
        assert_eq!(p.src, Rect::new(0.0, 0.0, 640.0, 480.0));
    }

    #[test]
    fn test_contain_preserves_aspect_and_bounds() {
        let dst = Rect::new(50.0, 25.0, 300.0, 700.0);
        for (sw, sh) in [(600.0, 100.0), (3.0, 7.0), (1920.0, 1080.0)] {
            let p = contain(dst, sw, sh).unwrap();
            assert!((p.dst.width / p.dst.height - sw / sh).abs() < 1e-9);
            assert!(p.dst.x >= dst.x - EPS && p.dst.y >= dst.y - EPS);
            assert!(p.dst.right() <= dst.right() + EPS);
            assert!(p.dst.bottom() <= dst.bottom() + EPS);
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(cover(canvas(), 0.0, 480.0, Anchor::CENTER).is_none());
        assert!(contain(canvas(), 640.0, 0.0).is_none());
        assert!(contain(Rect::new(0.0, 0.0, 0.0, 10.0), 640.0, 480.0).is_none());
    }
}
