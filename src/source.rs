//! Drawable sources
//!
//! Exactly one source feeds the renderer: a live camera stream or a still
//! placeholder image. Both draw through the same `Source::draw`.

use crate::canvas::Surface;
use crate::devices::MediaStream;
use crate::error::{Error, Result};
use crate::geometry::{self, Anchor, Rect};
use crate::types::{Frame, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Size of the built-in placeholder
pub const PLACEHOLDER_SIZE: Resolution = Resolution::new(600, 100);

/// Background of the built-in placeholder (#666666)
pub const PLACEHOLDER_COLOR: [u8; 3] = [0x66, 0x66, 0x66];

/// Built-in placeholder: "Webcam not connected" in white on the grey bar
const PLACEHOLDER_PNG: &[u8] = include_bytes!("../assets/placeholder.png");

/// How a source is placed into the destination rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fit {
    /// Fill and crop around the anchor
    Cover(Anchor),
    /// Fit inside, letterboxed
    Contain,
}

impl Default for Fit {
    fn default() -> Self {
        Fit::Cover(Anchor::CENTER)
    }
}

/// Live camera frames
#[derive(Debug)]
pub struct LiveVideoSource {
    stream: MediaStream,
}

impl LiveVideoSource {
    /// Wrap a stream once its first frame is available
    pub async fn open(mut stream: MediaStream) -> Result<Self> {
        let first = stream.first_frame().await?;
        tracing::info!(
            device = stream.device_id(),
            size = %first.resolution(),
            "Live video ready"
        );
        Ok(Self { stream })
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.stream.latest()
    }

    /// Stop the underlying stream
    pub fn stop(&mut self) {
        self.stream.stop();
    }
}

/// A decoded still image
#[derive(Debug, Clone)]
pub struct StaticImageSource {
    frame: Arc<Frame>,
    origin: String,
}

impl StaticImageSource {
    pub fn from_frame(frame: Frame, origin: impl Into<String>) -> Self {
        Self {
            frame: Arc::new(frame),
            origin: origin.into(),
        }
    }

    /// Captioned placeholder, drawn when no camera is available
    ///
    /// Falls back to a plain grey bar if the embedded image cannot be decoded.
    pub fn builtin_placeholder() -> Self {
        match Self::decode(PLACEHOLDER_PNG, "builtin") {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Built-in placeholder unreadable, drawing a plain bar: {}", e);
                Self::from_frame(
                    Frame::solid(PLACEHOLDER_SIZE.width, PLACEHOLDER_SIZE.height, PLACEHOLDER_COLOR),
                    "builtin",
                )
            }
        }
    }

    /// Decode an encoded image (PNG/JPEG) into RGBA
    pub fn decode(bytes: &[u8], origin: impl Into<String>) -> Result<Self> {
        let image = image::load_from_memory(bytes).map_err(|e| Error::Image(e.to_string()))?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let frame = Frame::from_rgba(rgba.into_raw(), width, height)
            .ok_or_else(|| Error::Image("Decoded buffer has unexpected size".into()))?;
        Ok(Self::from_frame(frame, origin))
    }

    /// Read and decode an image file off the async runtime
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Image(format!("Failed to read {}: {}", path.display(), e)))?;
        let origin = path.display().to_string();
        tokio::task::spawn_blocking(move || Self::decode(&bytes, origin))
            .await
            .map_err(|e| Error::Internal(format!("Image decode task failed: {}", e)))?
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Where the placeholder image comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Placeholder {
    #[default]
    Builtin,
    File(PathBuf),
}

impl Placeholder {
    /// Load the placeholder, using the built-in one if the file is unusable
    pub async fn load(&self) -> StaticImageSource {
        match self {
            Placeholder::Builtin => StaticImageSource::builtin_placeholder(),
            Placeholder::File(path) => match StaticImageSource::load(path).await {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("Placeholder {} unusable, using built-in: {}", path.display(), e);
                    StaticImageSource::builtin_placeholder()
                }
            },
        }
    }
}

impl From<Option<PathBuf>> for Placeholder {
    fn from(path: Option<PathBuf>) -> Self {
        path.map(Placeholder::File).unwrap_or_default()
    }
}

/// The active drawable
#[derive(Debug)]
pub enum Source {
    LiveVideo(LiveVideoSource),
    StaticImage(StaticImageSource),
}

impl Source {
    /// Frame to draw right now; `None` while a stream has nothing yet
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        match self {
            Source::LiveVideo(video) => video.current_frame(),
            Source::StaticImage(image) => Some(image.frame.clone()),
        }
    }

    /// Intrinsic size of the current frame (zero when none)
    pub fn intrinsic_size(&self) -> Resolution {
        self.current_frame()
            .map(|f| f.resolution())
            .unwrap_or(Resolution::new(0, 0))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Source::LiveVideo(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Source::LiveVideo(video) => format!("live video ({})", video.stream.device_id()),
            Source::StaticImage(image) => format!("static image ({})", image.origin),
        }
    }

    /// Draw the current frame into `dst` with the given fit
    ///
    /// Returns false when nothing could be drawn.
    pub fn draw(&self, ctx: &mut dyn Surface, dst: Rect, fit: Fit) -> bool {
        let Some(frame) = self.current_frame() else {
            return false;
        };
        let (w, h) = (frame.width as f64, frame.height as f64);
        let placement = match fit {
            Fit::Cover(anchor) => geometry::cover(dst, w, h, anchor),
            Fit::Contain => geometry::contain(dst, w, h),
        };
        match placement {
            Some(p) => {
                ctx.draw_image(&frame, p.src, p.dst);
                true
            }
            None => false,
        }
    }

    /// Release the camera if this is a live source
    pub fn release(&mut self) {
        if let Source::LiveVideo(video) = self {
            video.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelCanvas;

    #[test]
    fn test_builtin_placeholder() {
        let source = Source::StaticImage(StaticImageSource::builtin_placeholder());
        assert_eq!(source.intrinsic_size(), PLACEHOLDER_SIZE);
        assert!(!source.is_live());
        assert_eq!(source.describe(), "static image (builtin)");

        let Source::StaticImage(image) = source else {
            unreachable!()
        };
        let frame = image.frame();
        assert_eq!(frame.pixel(0, 0), [0x66, 0x66, 0x66, 255]);
        assert_eq!(frame.pixel(599, 99), [0x66, 0x66, 0x66, 255]);
        // Top-left stroke of the caption's "W".
        assert_eq!(frame.pixel(62, 36), [255, 255, 255, 255]);
        let white = (0..100)
            .flat_map(|y| (0..600).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.pixel(x, y) == [255, 255, 255, 255])
            .count();
        assert!(white > 1000);
    }

    #[test]
    fn test_decode_png() {
        let mut png = Vec::new();
        let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let source = StaticImageSource::decode(&png, "memory").unwrap();
        assert_eq!(source.frame().resolution(), Resolution::new(3, 2));
        assert_eq!(source.frame().pixel(2, 1), [1, 2, 3, 255]);
        assert!(StaticImageSource::decode(b"not an image", "memory").is_err());
    }

    #[tokio::test]
    async fn test_missing_placeholder_file_falls_back() {
        let placeholder = Placeholder::File(PathBuf::from("/nonexistent/placeholder.png"));
        let image = placeholder.load().await;
        assert_eq!(image.origin(), "builtin");
    }

    #[test]
    fn test_draw_cover_and_contain() {
        let source = Source::StaticImage(StaticImageSource::builtin_placeholder());
        let mut canvas = PixelCanvas::new(Resolution::new(60, 60)).unwrap();
        let dst = Rect::full(Resolution::new(60, 60));

        assert!(source.draw(&mut canvas, dst, Fit::Contain));
        // 600x100 into 60x60 leaves bars above and below.
        assert_eq!(canvas.pixels().pixel(30, 0)[3], 0);
        assert_eq!(canvas.pixels().pixel(1, 30), [0x66, 0x66, 0x66, 255]);

        assert!(source.draw(&mut canvas, dst, Fit::default()));
        assert_eq!(canvas.pixels().pixel(30, 0), [0x66, 0x66, 0x66, 255]);
    }
}
