//! camcanvas: live camera canvas
//!
//! Renders a live camera feed onto a canvas through an adjustable filter
//! chain. Filter settings persist between sessions and a placeholder image
//! stands in when no matching camera is found.
//!
//! # Features
//!
//! - **Devices**: label lookup with physical device grouping, PipeWire/portal or test pattern backends
//! - **Render**: cover-fit placement, CSS-style filter chain, horizontal flip, duotone remap
//! - **Loop**: ordered per-frame callbacks with play/pause, ticked at the display rate
//! - **Storage**: filter record written through to a key-value store on every change
//!
//! # Example
//!
//! ```rust,no_run
//! use camcanvas::{PipelineBuilder, RenderConfig};
//!
//! #[tokio::main]
//! async fn main() -> camcanvas::Result<()> {
//!     let config = RenderConfig::default().with_label("Logitech BRIO");
//!     let pipeline = PipelineBuilder::new().config(config).build()?;
//!
//!     for issue in pipeline.start(None).await? {
//!         eprintln!("{}", issue);
//!     }
//!     pipeline.filters().update(camcanvas::FilterField::Blur, 2.0)?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     pipeline.shutdown();
//!     Ok(())
//! }
//! ```

pub mod canvas;
pub mod config;
pub mod devices;
pub mod error;
pub mod filters;
pub mod geometry;
pub mod pipeline;
pub mod processing;
pub mod renderer;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use canvas::{PixelCanvas, ScaleAlgorithm, SharedCanvas, Surface};
pub use config::{ColorizeConfig, RenderConfig};
pub use devices::{
    AmbiguityPolicy, CaptureDevice, DeviceGroup, DeviceKind, DeviceResolver, MediaDevices,
    MediaStream, StreamConstraints, StreamFailurePolicy, TestPatternDevices,
};
pub use error::{Error, Result};
pub use filters::{FilterChain, FilterController, FilterField, FilterParameters, FilterStore};
pub use geometry::{contain, cover, Anchor, Placement, Rect};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use renderer::{RenderOptions, Renderer};
pub use scheduler::{FrameDriver, FrameScheduler};
pub use source::{Fit, Placeholder, Source};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::{Frame, Framerate, Resolution, Stats};

#[cfg(feature = "pipewire")]
pub use devices::PipeWireDevices;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether this build can talk to real cameras
pub fn has_pipewire() -> bool {
    cfg!(feature = "pipewire")
}
