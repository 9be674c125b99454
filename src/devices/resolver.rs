//! Label to source resolution
//!
//! Finds the device group whose endpoints match a label, opens its video
//! input and falls back to the placeholder image when that is not possible.

use super::{find_groups, DeviceGroup, MediaDevices, StreamConstraints};
use crate::error::{Error, Result};
use crate::source::{LiveVideoSource, Placeholder, Source};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to do when several physical devices match the label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    /// Log and continue with the first group found
    #[default]
    UseFirst,
    /// Fail the resolution
    Reject,
}

/// What to do when opening the stream fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamFailurePolicy {
    /// Report the error and draw the placeholder
    #[default]
    Placeholder,
    /// Return the error to the caller
    Propagate,
}

/// A ready source plus the non-fatal problems met on the way
#[derive(Debug)]
pub struct Resolved {
    pub source: Source,
    pub issues: Vec<Error>,
}

impl Resolved {
    /// True when a live camera was acquired without any issue
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.source.is_live()
    }
}

/// Turns a device label into a drawable source
pub struct DeviceResolver {
    devices: Arc<dyn MediaDevices>,
    constraints: StreamConstraints,
    placeholder: Placeholder,
    ambiguity: AmbiguityPolicy,
    on_stream_failure: StreamFailurePolicy,
}

impl DeviceResolver {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            constraints: StreamConstraints::default(),
            placeholder: Placeholder::default(),
            ambiguity: AmbiguityPolicy::default(),
            on_stream_failure: StreamFailurePolicy::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: StreamConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
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

    pub fn devices(&self) -> &Arc<dyn MediaDevices> {
        &self.devices
    }

    /// Enumerate and group the devices matching `label`
    pub async fn find_groups(&self, label: &str) -> Result<Vec<DeviceGroup>> {
        let devices = self.devices.enumerate_devices().await.map_err(|e| match e {
            Error::PermissionDenied | Error::Enumeration(_) => e,
            other => Error::Enumeration(other.to_string()),
        })?;
        tracing::debug!("Enumerated {} capture devices", devices.len());
        Ok(find_groups(devices, label))
    }

    /// Resolve `label` to a live camera, or the placeholder when allowed
    ///
    /// Enumeration failures always propagate. Everything else is governed by
    /// the ambiguity and stream failure policies.
    pub async fn resolve(&self, label: &str) -> Result<Resolved> {
        let groups = self.find_groups(label).await?;
        let mut issues = Vec::new();

        let group = match groups.len() {
            0 => {
                let err = Error::DeviceNotFound(label.to_string());
                tracing::error!("{}", err);
                issues.push(err);
                return Ok(self.fallback(issues).await);
            }
            1 => &groups[0],
            n => {
                let err = Error::AmbiguousDeviceGroup {
                    label: label.to_string(),
                    groups: n,
                };
                if self.ambiguity == AmbiguityPolicy::Reject {
                    return Err(err);
                }
                tracing::warn!("{}, using group {}", err, groups[0].group_id);
                issues.push(err);
                &groups[0]
            }
        };

        let Some(video) = group.video_input() else {
            let err = Error::NoVideoInput(group.group_id.clone());
            tracing::error!("{}", err);
            issues.push(err);
            return Ok(self.fallback(issues).await);
        };

        tracing::info!(device = %video.id, label = %video.label, "Opening camera");
        let constraints = self.constraints.for_device(video.id.clone());
        let opened = match self.devices.get_user_media(&constraints).await {
            Ok(stream) => LiveVideoSource::open(stream).await,
            Err(e) => Err(e),
        };

        match opened {
            Ok(live) => Ok(Resolved {
                source: Source::LiveVideo(live),
                issues,
            }),
            Err(e) if self.on_stream_failure == StreamFailurePolicy::Propagate => Err(e),
            Err(e) => {
                tracing::error!("Camera unavailable, drawing placeholder: {}", e);
                issues.push(e);
                Ok(self.fallback(issues).await)
            }
        }
    }

    async fn fallback(&self, issues: Vec<Error>) -> Resolved {
        Resolved {
            source: Source::StaticImage(self.placeholder.load().await),
            issues,
        }
    }
}

impl std::fmt::Debug for DeviceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceResolver")
            .field("constraints", &self.constraints)
            .field("placeholder", &self.placeholder)
            .field("ambiguity", &self.ambiguity)
            .field("on_stream_failure", &self.on_stream_failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CaptureDevice, DeviceKind, MediaStream, TestPatternDevices};
    use crate::types::{Framerate, Resolution};

    fn resolver(rig: Arc<TestPatternDevices>) -> DeviceResolver {
        DeviceResolver::new(rig)
    }

    #[tokio::test]
    async fn test_resolves_live_camera() {
        let rig = Arc::new(TestPatternDevices::default_rig());
        let resolved = resolver(rig.clone()).resolve("brio").await.unwrap();

        assert!(resolved.is_clean());
        assert_eq!(resolved.source.intrinsic_size(), Resolution::FHD_1080P);
        assert_eq!(rig.live_streams(), 1);

        drop(resolved);
        assert_eq!(rig.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_unknown_label_uses_placeholder() {
        let rig = Arc::new(TestPatternDevices::default_rig());
        let resolved = resolver(rig.clone()).resolve("no such camera").await.unwrap();

        assert!(!resolved.source.is_live());
        assert!(matches!(resolved.issues[..], [Error::DeviceNotFound(_)]));
        assert_eq!(rig.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_group_without_video_uses_placeholder() {
        let rig = Arc::new(TestPatternDevices::default_rig());
        let resolved = resolver(rig).resolve("desk").await.unwrap();

        assert!(!resolved.source.is_live());
        assert!(matches!(resolved.issues[..], [Error::NoVideoInput(_)]));
    }

    #[tokio::test]
    async fn test_ambiguous_groups() {
        // "camera" matches the integrated camera and a second USB camera.
        let rig = Arc::new(TestPatternDevices::new(vec![
            CaptureDevice::new("int", "Integrated Camera", DeviceKind::VideoInput, "pci"),
            CaptureDevice::new("usb", "USB Camera", DeviceKind::VideoInput, "usb"),
        ]));

        let resolved = resolver(rig.clone()).resolve("camera").await.unwrap();
        assert!(resolved.source.is_live());
        assert!(matches!(
            resolved.issues[..],
            [Error::AmbiguousDeviceGroup { groups: 2, .. }]
        ));
        assert_eq!(resolved.source.describe(), "live video (int)");
        drop(resolved);

        let strict = resolver(rig.clone()).with_ambiguity(AmbiguityPolicy::Reject);
        assert!(matches!(
            strict.resolve("camera").await,
            Err(Error::AmbiguousDeviceGroup { .. })
        ));
        assert_eq!(rig.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_policies() {
        let rig = Arc::new(TestPatternDevices::default_rig());
        rig.set_access_denied(true);

        let resolved = resolver(rig.clone()).resolve("brio").await.unwrap();
        assert!(!resolved.source.is_live());
        assert!(matches!(resolved.issues[..], [Error::PermissionDenied]));

        let strict = resolver(rig).with_stream_failure(StreamFailurePolicy::Propagate);
        assert!(matches!(
            strict.resolve("brio").await,
            Err(Error::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_overconstrained_stream_falls_back() {
        let rig = Arc::new(
            TestPatternDevices::default_rig().with_capabilities(Resolution::new(320, 240), 30),
        );
        let resolved = resolver(rig).resolve("brio").await.unwrap();
        assert!(!resolved.source.is_live());
        assert!(matches!(resolved.issues[..], [Error::StreamAcquisition(_)]));
    }

    struct BrokenDevices;

    #[async_trait::async_trait]
    impl MediaDevices for BrokenDevices {
        async fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>> {
            Err(Error::PipeWire("registry unavailable".into()))
        }

        async fn get_user_media(&self, _: &StreamConstraints) -> Result<MediaStream> {
            Err(Error::StreamAcquisition("unreachable".into()))
        }
    }

    /// One camera whose stream errors out before delivering a frame
    struct DeadStreamDevices;

    #[async_trait::async_trait]
    impl MediaDevices for DeadStreamDevices {
        async fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>> {
            Ok(vec![CaptureDevice::new(
                "cam",
                "Logitech BRIO",
                DeviceKind::VideoInput,
                "usb",
            )])
        }

        async fn get_user_media(&self, _: &StreamConstraints) -> Result<MediaStream> {
            MediaStream::spawn("cam", Resolution::new(2, 2), Framerate::FPS_30, |_tx| {})
        }
    }

    #[tokio::test]
    async fn test_stream_dying_before_first_frame() {
        let resolver = DeviceResolver::new(Arc::new(DeadStreamDevices));
        let resolved = resolver.resolve("brio").await.unwrap();
        assert!(!resolved.source.is_live());
        assert!(matches!(resolved.issues[..], [Error::StreamAcquisition(_)]));

        let strict = DeviceResolver::new(Arc::new(DeadStreamDevices))
            .with_stream_failure(StreamFailurePolicy::Propagate);
        assert!(matches!(
            strict.resolve("brio").await,
            Err(Error::StreamAcquisition(_))
        ));
    }

    #[tokio::test]
    async fn test_enumeration_failure_propagates() {
        let resolver = DeviceResolver::new(Arc::new(BrokenDevices));
        assert!(matches!(
            resolver.resolve("brio").await,
            Err(Error::Enumeration(_))
        ));
    }
}
