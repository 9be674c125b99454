//! Per-frame draw routine
//!
//! Each call reads the current filter parameters, cover-fits the source
//! onto the whole surface, then optionally mirrors the surface and remaps
//! its colours.

use crate::canvas::Surface;
use crate::filters::FilterController;
use crate::geometry::Rect;
use crate::processing::{self, Rgb};
use crate::source::{Fit, Source};

/// Post-processing switches for the renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Mirror the finished frame horizontally
    pub flip_x: bool,
    /// Duotone remap towards this colour
    pub colorize: Option<Rgb>,
    pub fit: Fit,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            flip_x: true,
            colorize: None,
            fit: Fit::default(),
        }
    }
}

/// Draws one source onto a surface
#[derive(Debug)]
pub struct Renderer {
    source: Source,
    filters: FilterController,
    options: RenderOptions,
}

impl Renderer {
    pub fn new(source: Source, filters: FilterController, options: RenderOptions) -> Self {
        tracing::info!("Renderer bound to {}", source.describe());
        Self {
            source,
            filters,
            options,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    /// Draw one frame; returns false when the source had nothing to draw
    pub fn render(&self, ctx: &mut dyn Surface) -> bool {
        let params = self.filters.current();
        ctx.set_filter(&params.to_filter_string());

        let dst = Rect::full(ctx.size());
        if !self.source.draw(ctx, dst, self.options.fit) {
            return false;
        }

        if self.options.flip_x {
            flip_x(ctx);
        }
        if let Some(color) = self.options.colorize {
            colorize(ctx, color);
        }
        true
    }

    /// Stop the camera now instead of on drop
    pub fn release(&mut self) {
        self.source.release();
    }
}

/// Mirror the whole surface around its vertical centre line
///
/// The filter is switched off for the self-draw so it applies once per frame.
pub fn flip_x(ctx: &mut dyn Surface) {
    let width = ctx.size().width as f64;
    ctx.save();
    ctx.set_filter("none");
    ctx.translate(width, 0.0);
    ctx.scale(-1.0, 1.0);
    ctx.draw_self(0.0, 0.0);
    ctx.restore();
}

/// Read back the surface, remap it towards `color` and write it back
pub fn colorize(ctx: &mut dyn Surface, color: Rgb) {
    let mut image = ctx.get_image_data();
    processing::colorize(&mut image.data, color);
    ctx.put_image_data(&image);
}
