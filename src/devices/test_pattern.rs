//! In-process test pattern backend
//!
//! Exposes a fixed list of devices. Opening a video device spawns a worker
//! that renders scrolling colour bars at the negotiated size and rate.

use super::{CaptureDevice, DeviceKind, MediaDevices, MediaStream, StreamConstraints};
use crate::error::{Error, Result};
use crate::types::{Frame, Resolution};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Colour-bar camera rig
pub struct TestPatternDevices {
    devices: Vec<CaptureDevice>,
    max_size: Resolution,
    max_fps: u32,
    deny_access: AtomicBool,
    live_streams: Arc<AtomicUsize>,
    peak_streams: Arc<AtomicUsize>,
}

impl TestPatternDevices {
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        Self {
            devices,
            max_size: Resolution::FHD_1080P,
            max_fps: 60,
            deny_access: AtomicBool::new(false),
            live_streams: Arc::new(AtomicUsize::new(0)),
            peak_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A webcam with microphone, a built-in camera and a lone microphone
    pub fn default_rig() -> Self {
        Self::new(vec![
            CaptureDevice::new("brio-video", "Logitech BRIO", DeviceKind::VideoInput, "usb-1-2"),
            CaptureDevice::new(
                "brio-audio",
                "Logitech BRIO Microphone",
                DeviceKind::AudioInput,
                "usb-1-2",
            ),
            CaptureDevice::new(
                "integrated-video",
                "Integrated Camera",
                DeviceKind::VideoInput,
                "pci-0-14",
            ),
            CaptureDevice::new("desk-mic", "Desk Microphone", DeviceKind::AudioInput, "usb-1-4"),
        ])
    }

    /// Largest size and rate the simulated sensors support
    pub fn with_capabilities(mut self, max_size: Resolution, max_fps: u32) -> Self {
        self.max_size = max_size;
        self.max_fps = max_fps;
        self
    }

    /// Simulate the user refusing camera access (or granting it again)
    pub fn set_access_denied(&self, denied: bool) {
        self.deny_access.store(denied, Ordering::SeqCst);
    }

    /// Number of streams currently holding a device
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    /// Most streams ever held at the same time
    pub fn peak_streams(&self) -> usize {
        self.peak_streams.load(Ordering::SeqCst)
    }
}

impl Default for TestPatternDevices {
    fn default() -> Self {
        Self::default_rig()
    }
}

#[async_trait::async_trait]
impl MediaDevices for TestPatternDevices {
    async fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>> {
        Ok(self.devices.clone())
    }

    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<MediaStream> {
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied);
        }

        let device = match &constraints.device_id {
            Some(id) => self.devices.iter().find(|d| &d.id == id).ok_or_else(|| {
                Error::StreamAcquisition(format!("Overconstrained: no device {}", id))
            })?,
            None => self
                .devices
                .iter()
                .find(|d| d.kind == DeviceKind::VideoInput)
                .ok_or_else(|| Error::StreamAcquisition("No video device".into()))?,
        };
        if device.kind != DeviceKind::VideoInput {
            return Err(Error::StreamAcquisition(format!(
                "Device {} is not a video input",
                device.id
            )));
        }

        let (resolution, framerate) = constraints.negotiate(self.max_size, self.max_fps)?;
        let live = LiveGuard::new(self.live_streams.clone(), &self.peak_streams);

        MediaStream::spawn(device.id.clone(), resolution, framerate, move |tx| {
            let _live = live;
            let interval = framerate.frame_interval();
            let started = Instant::now();
            let mut offset = 0u32;

            while tx.is_active() {
                let mut frame = color_bars(resolution, offset);
                frame.pts = started.elapsed().as_micros() as i64;
                tx.send(frame);
                offset = (offset + 4) % resolution.width.max(1);
                std::thread::sleep(interval);
            }
        })
    }
}

/// Counts a stream as live until the worker exits
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let live = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(live, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Vertical colour bars scrolled horizontally by `offset` pixels
pub(crate) fn color_bars(size: Resolution, offset: u32) -> Frame {
    let mut frame = Frame::new(size.width, size.height);
    let width = size.width as usize;
    if width == 0 || size.height == 0 {
        return frame;
    }

    let row_bytes = width * 4;
    let (first_row, rest) = frame.data.split_at_mut(row_bytes);
    for (x, px) in first_row.chunks_exact_mut(4).enumerate() {
        let bar = ((x + offset as usize) % width) * BARS.len() / width;
        let [r, g, b] = BARS[bar];
        px.copy_from_slice(&[r, g, b, 255]);
    }
    for row in rest.chunks_exact_mut(row_bytes) {
        row.copy_from_slice(first_row);
    }
    frame
}
