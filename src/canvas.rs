//! 2D drawing surface
//!
//! `Surface` is the drawing capability the renderer needs: image draws with a
//! source crop, a filter string, pixel read-back and an affine transform
//! stack. `PixelCanvas` implements it in software on a `tiny_skia::Pixmap`.

use crate::error::{Error, Result};
use crate::filters::FilterChain;
use crate::geometry::Rect;
use crate::processing;
use crate::types::{Frame, Resolution};
use parking_lot::Mutex;
use std::sync::Arc;
use tiny_skia::{
    ColorU8, FilterQuality, Paint, Pattern, Pixmap, PixmapPaint, PixmapRef, SpreadMode, Transform,
};

/// Drawing surface consumed by the renderer
pub trait Surface {
    /// Surface size in pixels
    fn size(&self) -> Resolution;

    /// Set the filter applied to subsequent draws (CSS filter syntax)
    ///
    /// An unparsable string is ignored and the previous filter stays active.
    fn set_filter(&mut self, filter: &str);

    /// Currently active filter string
    fn filter(&self) -> String;

    /// Draw the `src` region of `image` into `dst` (user space)
    fn draw_image(&mut self, image: &Frame, src: Rect, dst: Rect);

    /// Draw the surface's current content onto itself at `(x, y)`
    fn draw_self(&mut self, x: f64, y: f64);

    /// Copy out the full pixel buffer
    fn get_image_data(&self) -> Frame;

    /// Replace the full pixel buffer; ignores transform and filter
    fn put_image_data(&mut self, data: &Frame);

    /// Push transform and filter state
    fn save(&mut self);

    /// Pop transform and filter state
    fn restore(&mut self);

    fn translate(&mut self, x: f64, y: f64);

    fn scale(&mut self, x: f64, y: f64);
}

/// Shared handle to a software canvas
pub type SharedCanvas = Arc<Mutex<PixelCanvas>>;

/// Image smoothing used when a draw resamples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleAlgorithm {
    /// Nearest neighbor (fastest, pixelated)
    Nearest,
    /// Bilinear (fast, smooth)
    #[default]
    Bilinear,
}

impl ScaleAlgorithm {
    fn quality(self) -> FilterQuality {
        match self {
            ScaleAlgorithm::Nearest => FilterQuality::Nearest,
            ScaleAlgorithm::Bilinear => FilterQuality::Bilinear,
        }
    }
}

#[derive(Debug, Clone)]
struct DrawState {
    transform: Transform,
    filter: FilterChain,
}

/// Software RGBA8 canvas
#[derive(Debug, Clone)]
pub struct PixelCanvas {
    pixmap: Pixmap,
    state: DrawState,
    stack: Vec<DrawState>,
    smoothing: ScaleAlgorithm,
}

impl PixelCanvas {
    /// Transparent canvas of the given size
    pub fn new(size: Resolution) -> Result<Self> {
        let pixmap = Pixmap::new(size.width, size.height)
            .ok_or_else(|| Error::Canvas(format!("Cannot allocate a {} canvas", size)))?;
        Ok(Self {
            pixmap,
            state: DrawState {
                transform: Transform::identity(),
                filter: FilterChain::none(),
            },
            stack: Vec::new(),
            smoothing: ScaleAlgorithm::Bilinear,
        })
    }

    pub fn shared(size: Resolution) -> Result<SharedCanvas> {
        Ok(Arc::new(Mutex::new(Self::new(size)?)))
    }

    pub fn with_smoothing(mut self, smoothing: ScaleAlgorithm) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Straight-alpha copy of the canvas
    pub fn pixels(&self) -> Frame {
        Frame {
            data: read_straight(&self.pixmap),
            width: self.pixmap.width(),
            height: self.pixmap.height(),
            pts: 0,
        }
    }

    pub fn transform(&self) -> Transform {
        self.state.transform
    }

    /// Draw `src` of `source` into `dst` through the current transform and filter
    fn composite(&mut self, source: PixmapRef<'_>, src: Rect, dst: Rect) {
        let quality = self.smoothing.quality();
        let transform = self.state.transform;

        if self.state.filter.is_identity() {
            fill_from(&mut self.pixmap, source, src, dst, transform, quality);
            return;
        }

        // Filters apply to the drawn layer, then the layer composites.
        let Some(mut layer) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        fill_from(&mut layer, source, src, dst, transform, quality);
        let mut data = read_straight(&layer);
        processing::apply_chain(&mut data, layer.width(), layer.height(), &self.state.filter);
        write_straight(&mut layer, &data);

        self.pixmap.draw_pixmap(
            0,
            0,
            layer.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }
}

impl Surface for PixelCanvas {
    fn size(&self) -> Resolution {
        Resolution::new(self.pixmap.width(), self.pixmap.height())
    }

    fn set_filter(&mut self, filter: &str) {
        match filter.parse::<FilterChain>() {
            Ok(chain) => self.state.filter = chain,
            Err(e) => tracing::warn!("Ignoring filter {:?}: {}", filter, e),
        }
    }

    fn filter(&self) -> String {
        self.state.filter.to_string()
    }

    fn draw_image(&mut self, image: &Frame, src: Rect, dst: Rect) {
        if src.width <= 0.0 || src.height <= 0.0 || dst.width <= 0.0 || dst.height <= 0.0 {
            return;
        }
        let Some(mut source) = Pixmap::new(image.width, image.height) else {
            return;
        };
        write_straight(&mut source, &image.data);
        self.composite(source.as_ref(), src, dst);
    }

    fn draw_self(&mut self, x: f64, y: f64) {
        let snapshot = self.pixmap.clone();
        let full = Rect::full(self.size());
        self.composite(
            snapshot.as_ref(),
            full,
            Rect::new(x, y, full.width, full.height),
        );
    }

    fn get_image_data(&self) -> Frame {
        self.pixels()
    }

    fn put_image_data(&mut self, data: &Frame) {
        if data.resolution() != self.size() {
            tracing::warn!(
                "put_image_data size {} does not match canvas {}",
                data.resolution(),
                self.size()
            );
            return;
        }
        write_straight(&mut self.pixmap, &data.data);
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn translate(&mut self, x: f64, y: f64) {
        self.state.transform = self.state.transform.pre_translate(x as f32, y as f32);
    }

    fn scale(&mut self, x: f64, y: f64) {
        self.state.transform = self.state.transform.pre_scale(x as f32, y as f32);
    }
}

/// Fill `dst` (user space) with the `src` region of `source`
///
/// The source is a pattern mapped so that `src` lands exactly on `dst`;
/// edges clamp, so a fractional crop never samples transparent black.
fn fill_from(
    target: &mut Pixmap,
    source: PixmapRef<'_>,
    src: Rect,
    dst: Rect,
    transform: Transform,
    quality: FilterQuality,
) {
    let Some(area) = tiny_skia::Rect::from_xywh(
        dst.x as f32,
        dst.y as f32,
        dst.width as f32,
        dst.height as f32,
    ) else {
        return;
    };

    let sx = (dst.width / src.width) as f32;
    let sy = (dst.height / src.height) as f32;
    let placement = Transform::from_row(
        sx,
        0.0,
        0.0,
        sy,
        dst.x as f32 - src.x as f32 * sx,
        dst.y as f32 - src.y as f32 * sy,
    );

    let paint = Paint {
        shader: Pattern::new(source, SpreadMode::Pad, quality, 1.0, placement),
        anti_alias: false,
        ..Paint::default()
    };
    target.fill_rect(area, &paint, transform, None);
}

/// Load straight-alpha RGBA8 into a premultiplied pixmap
fn write_straight(pixmap: &mut Pixmap, data: &[u8]) {
    for (dst, px) in pixmap.pixels_mut().iter_mut().zip(data.chunks_exact(4)) {
        *dst = ColorU8::from_rgba(px[0], px[1], px[2], px[3]).premultiply();
    }
}

/// Read a premultiplied pixmap back as straight-alpha RGBA8
fn read_straight(pixmap: &Pixmap) -> Vec<u8> {
    let mut data = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    data
}
