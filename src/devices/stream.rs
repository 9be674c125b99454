//! Live media streams
//!
//! A stream is a worker thread publishing the latest frame on a
//! `tokio::sync::watch` channel. Readers always see the newest frame; old
//! frames are dropped. Stopping (or dropping) the stream ends the worker,
//! which releases the camera.

use crate::error::{Error, Result};
use crate::types::{Frame, Framerate, Resolution};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// How long a camera gets to deliver its first frame
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker side of a `MediaStream`
pub struct FrameSender {
    tx: watch::Sender<Option<Arc<Frame>>>,
    active: Arc<AtomicBool>,
}

impl FrameSender {
    /// Publish a frame, replacing the previous one
    pub fn send(&self, frame: Frame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// False once the stream has been stopped
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Shared stop flag, for loops that poll it directly
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }
}

/// A live video stream bound to one device
pub struct MediaStream {
    device_id: String,
    resolution: Resolution,
    framerate: Framerate,
    frames: watch::Receiver<Option<Arc<Frame>>>,
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MediaStream {
    /// Start a worker thread that produces frames through a `FrameSender`
    pub fn spawn<F>(
        device_id: impl Into<String>,
        resolution: Resolution,
        framerate: Framerate,
        worker: F,
    ) -> Result<Self>
    where
        F: FnOnce(FrameSender) + Send + 'static,
    {
        let device_id = device_id.into();
        let (tx, frames) = watch::channel(None);
        let active = Arc::new(AtomicBool::new(true));
        let sender = FrameSender {
            tx,
            active: active.clone(),
        };

        let handle = std::thread::Builder::new()
            .name(format!("stream-{}", device_id))
            .spawn(move || worker(sender))
            .map_err(|e| Error::StreamAcquisition(format!("Failed to spawn stream worker: {}", e)))?;

        tracing::info!(device = %device_id, %resolution, %framerate, "Stream started");

        Ok(Self {
            device_id,
            resolution,
            framerate,
            frames,
            active,
            worker: Some(handle),
        })
    }

    /// Wait until the first frame has arrived
    pub async fn first_frame(&mut self) -> Result<Arc<Frame>> {
        self.first_frame_within(FIRST_FRAME_TIMEOUT).await
    }

    /// Wait for the first frame, failing if the worker exits or `limit` passes
    pub async fn first_frame_within(&mut self, limit: Duration) -> Result<Arc<Frame>> {
        let device_id = self.device_id.clone();
        let waited = tokio::time::timeout(limit, self.frames.wait_for(|f| f.is_some()))
            .await
            .map_err(|_| {
                Error::StreamAcquisition(format!(
                    "Stream {} sent no frame within {:?}",
                    device_id, limit
                ))
            })?;
        let frame = waited
            .map_err(|_| {
                Error::StreamAcquisition(format!(
                    "Stream {} ended before its first frame",
                    device_id
                ))
            })?
            .clone();
        frame.ok_or_else(|| Error::Internal("watch returned an empty frame".into()))
    }

    /// Most recent frame, if any has arrived
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Negotiated size
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Negotiated rate
    pub fn framerate(&self) -> Framerate {
        self.framerate
    }

    /// True until `stop` is called or the worker exits
    pub fn is_live(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and release the device
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!(device = %self.device_id, "Stream worker panicked");
            }
            tracing::info!(device = %self.device_id, "Stream stopped");
        }
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("device_id", &self.device_id)
            .field("resolution", &self.resolution)
            .field("framerate", &self.framerate)
            .field("live", &self.is_live())
            .finish()
    }
}
