//! Error types for camcanvas

use thiserror::Error;

/// Result type alias for camcanvas operations
pub type Result<T> = std::result::Result<T, Error>;

/// camcanvas error type
#[derive(Error, Debug)]
pub enum Error {
    // Device resolution errors
    #[error("No media device matches label: {0}")]
    DeviceNotFound(String),

    #[error("Too many media groups match label {label}: {groups} groups")]
    AmbiguousDeviceGroup { label: String, groups: usize },

    #[error("No video input in device group: {0}")]
    NoVideoInput(String),

    #[error("Stream acquisition failed: {0}")]
    StreamAcquisition(String),

    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("PipeWire error: {0}")]
    PipeWire(String),

    #[error("Portal error: {0}")]
    Portal(String),

    // Filter errors
    #[error("Invalid value for {field}: {value}")]
    InvalidFilterValue { field: String, value: String },

    #[error("Unknown filter: {0}")]
    UnknownFilterField(String),

    #[error("Filter syntax error: {0}")]
    FilterSyntax(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Source errors
    #[error("Image error: {0}")]
    Image(String),

    // Surface errors
    #[error("Canvas error: {0}")]
    Canvas(String),

    // Pipeline errors
    #[error("Pipeline not started")]
    PipelineNotStarted,

    #[error("Pipeline already running")]
    PipelineAlreadyRunning,

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is recoverable by re-resolving the device
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::StreamAcquisition(_)
                | Error::PermissionDenied
                | Error::Enumeration(_)
                | Error::PipeWire(_)
                | Error::Portal(_)
        )
    }

    /// Check if the renderer falls back to the placeholder image for this error
    pub fn is_fallback_case(&self) -> bool {
        matches!(self, Error::DeviceNotFound(_) | Error::NoVideoInput(_))
    }
}
