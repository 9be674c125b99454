//! Configuration types for camcanvas

use crate::devices::{AmbiguityPolicy, StreamConstraints, StreamFailurePolicy};
use crate::error::{Error, Result};
use crate::geometry::Anchor;
use crate::processing::Rgb;
use crate::renderer::RenderOptions;
use crate::source::{Fit, Placeholder};
use crate::types::{Framerate, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Label used when none is given
pub const DEFAULT_LABEL: &str = "Logitech BRIO";

/// Duotone remap settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorizeConfig {
    pub enabled: bool,
    pub color: Rgb,
}

impl Default for ColorizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Rgb::new(245, 27, 58),
        }
    }
}

/// Everything the pipeline needs besides the device backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Device label substring to look for
    pub media_label: String,
    /// Canvas size
    pub canvas: Resolution,
    /// Display refresh rate driving the render loop
    pub refresh_rate: Framerate,
    /// Mirror the output horizontally
    pub flip_x: bool,
    pub colorize: ColorizeConfig,
    /// Cover-fit anchor
    pub anchor: Anchor,
    /// Camera stream request
    pub constraints: StreamConstraints,
    /// Image shown when no camera is available (built-in captioned grey bar if unset)
    pub placeholder: Option<PathBuf>,
    pub ambiguity: AmbiguityPolicy,
    pub on_stream_failure: StreamFailurePolicy,
    /// Where filter settings are kept (user config dir if unset)
    pub storage_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            media_label: DEFAULT_LABEL.to_string(),
            canvas: Resolution::FHD_1080P,
            refresh_rate: Framerate::FPS_60,
            flip_x: true,
            colorize: ColorizeConfig::default(),
            anchor: Anchor::CENTER,
            constraints: StreamConstraints::default(),
            placeholder: None,
            ambiguity: AmbiguityPolicy::default(),
            on_stream_failure: StreamFailurePolicy::default(),
            storage_dir: None,
        }
    }
}

impl RenderConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.canvas.is_empty() {
            return Err(Error::Config(format!("Canvas size {} is empty", self.canvas)));
        }
        if self.refresh_rate.as_f64() <= 0.0 {
            return Err(Error::Config("Refresh rate must be positive".into()));
        }
        if self.media_label.trim().is_empty() {
            return Err(Error::Config("Media label is empty".into()));
        }
        Ok(())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.media_label = label.into();
        self
    }

    pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
        self.canvas = Resolution::new(width, height);
        self
    }

    pub fn with_refresh_rate(mut self, fps: u32) -> Self {
        self.refresh_rate = Framerate::new(fps, 1);
        self
    }

    pub fn with_flip_x(mut self, flip: bool) -> Self {
        self.flip_x = flip;
        self
    }

    pub fn with_colorize(mut self, color: Option<Rgb>) -> Self {
        match color {
            Some(color) => {
                self.colorize = ColorizeConfig {
                    enabled: true,
                    color,
                }
            }
            None => self.colorize.enabled = false,
        }
        self
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_constraints(mut self, constraints: StreamConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_placeholder(mut self, path: impl Into<PathBuf>) -> Self {
        self.placeholder = Some(path.into());
        self
    }

    pub fn with_ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity = policy;
        self
    }

    pub fn with_stream_failure(mut self, policy: StreamFailurePolicy) -> Self {
        self.on_stream_failure = policy;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Renderer switches derived from this config
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            flip_x: self.flip_x,
            colorize: self.colorize.enabled.then_some(self.colorize.color),
            fit: Fit::Cover(self.anchor.clamped()),
        }
    }

    pub fn placeholder(&self) -> Placeholder {
        Placeholder::from(self.placeholder.clone())
    }
}
