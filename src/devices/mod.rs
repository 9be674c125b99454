//! Capture device discovery and stream acquisition
//!
//! Provides:
//! - Device descriptors and grouping by physical device
//! - Stream constraints and their negotiation
//! - The `MediaDevices` backend trait (test pattern, PipeWire)
//! - `DeviceResolver`, which turns a label into a drawable `Source`

mod resolver;
mod stream;
mod test_pattern;

#[cfg(feature = "pipewire")]
mod pipewire;

#[cfg(feature = "pipewire")]
pub use self::pipewire::PipeWireDevices;
pub use resolver::{AmbiguityPolicy, DeviceResolver, Resolved, StreamFailurePolicy};
pub use stream::{FrameSender, MediaStream};
pub use test_pattern::TestPatternDevices;

use crate::error::{Error, Result};
use crate::types::{Framerate, Resolution};
use serde::{Deserialize, Serialize};

/// Kind of capture endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::VideoInput => f.write_str("videoinput"),
            DeviceKind::AudioInput => f.write_str("audioinput"),
        }
    }
}

/// One enumerated capture endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDevice {
    /// Backend-specific device id, used for exact stream requests
    pub id: String,
    /// Human readable name
    pub label: String,
    pub kind: DeviceKind,
    /// Physical device identifier shared by endpoints of one device
    pub group_id: String,
}

impl CaptureDevice {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        kind: DeviceKind,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            group_id: group_id.into(),
        }
    }

    /// Case-insensitive substring match on the label
    pub fn matches_label(&self, needle: &str) -> bool {
        self.label.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Endpoints sharing one physical device, in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub group_id: String,
    pub devices: Vec<CaptureDevice>,
}

impl DeviceGroup {
    /// First video endpoint of the group
    pub fn video_input(&self) -> Option<&CaptureDevice> {
        self.devices.iter().find(|d| d.kind == DeviceKind::VideoInput)
    }
}

/// Partition devices by group id, keeping first-seen order of groups and members
pub fn group_devices(devices: impl IntoIterator<Item = CaptureDevice>) -> Vec<DeviceGroup> {
    let mut groups: Vec<DeviceGroup> = Vec::new();
    for device in devices {
        match groups.iter_mut().find(|g| g.group_id == device.group_id) {
            Some(group) => group.devices.push(device),
            None => groups.push(DeviceGroup {
                group_id: device.group_id.clone(),
                devices: vec![device],
            }),
        }
    }
    groups
}

/// Groups whose members match `label`
pub fn find_groups(devices: Vec<CaptureDevice>, label: &str) -> Vec<DeviceGroup> {
    group_devices(devices.into_iter().filter(|d| d.matches_label(label)))
}

/// Numeric constraint: hard `min`/`max`, soft `ideal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstrainRange {
    pub min: Option<u32>,
    pub ideal: Option<u32>,
    pub max: Option<u32>,
}

impl ConstrainRange {
    pub const fn new(min: Option<u32>, ideal: Option<u32>, max: Option<u32>) -> Self {
        Self { min, ideal, max }
    }

    /// Pick a value for a capability whose upper limit is `capability`
    ///
    /// Prefers `ideal`, then `max`, then the capability itself, clamped into
    /// the hard bounds. Fails when the capability cannot reach `min`.
    pub fn select(&self, capability: u32) -> Option<u32> {
        let min = self.min.unwrap_or(0);
        let max = self.max.unwrap_or(u32::MAX).min(capability);
        if min > max {
            return None;
        }
        let wanted = self.ideal.or(self.max).unwrap_or(capability);
        Some(wanted.clamp(min, max))
    }
}

/// Video stream request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConstraints {
    pub width: ConstrainRange,
    pub height: ConstrainRange,
    pub frame_rate: ConstrainRange,
    /// Exact device id; `None` lets the backend choose
    pub device_id: Option<String>,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            width: ConstrainRange::new(Some(640), Some(1920), None),
            height: ConstrainRange::new(Some(400), Some(1080), None),
            frame_rate: ConstrainRange::new(Some(30), None, Some(60)),
            device_id: None,
        }
    }
}

impl StreamConstraints {
    /// Same bounds, pinned to one device
    pub fn for_device(&self, device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..self.clone()
        }
    }

    /// Settle on a size and rate a device with the given maxima can deliver
    pub fn negotiate(&self, max_size: Resolution, max_fps: u32) -> Result<(Resolution, Framerate)> {
        let over = |what: &str| {
            Error::StreamAcquisition(format!("Overconstrained: {} unsupported by device", what))
        };
        let width = self.width.select(max_size.width).ok_or_else(|| over("width"))?;
        let height = self.height.select(max_size.height).ok_or_else(|| over("height"))?;
        let fps = self.frame_rate.select(max_fps).ok_or_else(|| over("frameRate"))?;
        Ok((Resolution::new(width, height), Framerate::new(fps, 1)))
    }
}

/// Platform capability for listing devices and opening streams
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// List every capture endpoint; may wait on a permission prompt
    async fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>>;

    /// Open a live video stream satisfying `constraints`
    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<MediaStream>;
}
