//! Render pipeline
//!
//! Connects resolve → render → canvas, driven by the frame scheduler.
//! Switching cameras clears the scheduler first, which drops the old
//! renderer and releases its stream before the next one is requested.

use crate::canvas::{PixelCanvas, SharedCanvas};
use crate::config::RenderConfig;
use crate::devices::{DeviceResolver, MediaDevices, TestPatternDevices};
use crate::error::{Error, Result};
use crate::filters::FilterController;
use crate::renderer::Renderer;
use crate::scheduler::{FrameDriver, FrameScheduler};
use crate::storage::{FileStore, KeyValueStore};
use crate::types::Stats;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Live camera canvas pipeline
pub struct Pipeline {
    config: RenderConfig,
    resolver: DeviceResolver,
    filters: FilterController,
    scheduler: Arc<FrameScheduler>,
    canvas: SharedCanvas,
    running: AtomicBool,
    driver: Mutex<Option<FrameDriver>>,
    stats: Arc<Mutex<Stats>>,
    source: Arc<Mutex<Option<String>>>,
}

impl Pipeline {
    /// Create a pipeline; filters are loaded (and repaired) immediately
    pub fn new(
        config: RenderConfig,
        devices: Arc<dyn MediaDevices>,
        storage: Arc<dyn KeyValueStore>,
        scheduler: Arc<FrameScheduler>,
    ) -> Result<Self> {
        config.validate()?;

        let filters = FilterController::open(storage)?;
        let resolver = DeviceResolver::new(devices)
            .with_constraints(config.constraints.clone())
            .with_placeholder(config.placeholder())
            .with_ambiguity(config.ambiguity)
            .with_stream_failure(config.on_stream_failure);

        Ok(Self {
            canvas: PixelCanvas::shared(config.canvas)?,
            config,
            resolver,
            filters,
            scheduler,
            running: AtomicBool::new(false),
            driver: Mutex::new(None),
            stats: Arc::new(Mutex::new(Stats::default())),
            source: Arc::new(Mutex::new(None)),
        })
    }

    /// Resolve `label` (or the configured label) and start rendering
    ///
    /// Returns the non-fatal issues met while resolving the device.
    pub async fn start(&self, label: Option<&str>) -> Result<Vec<Error>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::PipelineAlreadyRunning);
        }

        tracing::info!(
            "Pipeline starting: canvas {} @ {}",
            self.config.canvas,
            self.config.refresh_rate
        );

        let issues = match self.install(label).await {
            Ok(issues) => issues,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        match FrameDriver::spawn(self.scheduler.clone(), self.config.refresh_rate) {
            Ok(driver) => *self.driver.lock() = Some(driver),
            Err(e) => {
                if let Err(release) = self.release_source().await {
                    tracing::warn!("{}", release);
                }
                self.running.store(false, Ordering::SeqCst);
                return Err(Error::Io(e));
            }
        }

        Ok(issues)
    }

    /// Replace the current source with a freshly resolved one
    pub async fn restart(&self, label: Option<&str>) -> Result<Vec<Error>> {
        if !self.is_running() {
            return Err(Error::PipelineNotStarted);
        }
        tracing::info!("Pipeline restarting");
        self.install(label).await
    }

    async fn install(&self, label: Option<&str>) -> Result<Vec<Error>> {
        let label = label.unwrap_or(&self.config.media_label);

        self.release_source().await?;

        let resolved = self.resolver.resolve(label).await?;
        let renderer = Renderer::new(
            resolved.source,
            self.filters.clone(),
            self.config.render_options(),
        );
        *self.source.lock() = Some(renderer.source().describe());

        let canvas = self.canvas.clone();
        let stats = self.stats.clone();
        self.scheduler.register(move || {
            let started = Instant::now();
            let drawn = renderer.render(&mut *canvas.lock());
            if drawn {
                stats.lock().record_render(started.elapsed());
            }
        });

        Ok(resolved.issues)
    }

    /// Drop the current renderer, and with it its stream
    ///
    /// Stopping a stream joins its worker thread, so this runs on the
    /// blocking pool. It completes before any new stream is requested.
    async fn release_source(&self) -> Result<()> {
        *self.source.lock() = None;
        let scheduler = self.scheduler.clone();
        tokio::task::spawn_blocking(move || scheduler.clear())
            .await
            .map_err(|e| Error::Internal(format!("Releasing the previous source failed: {}", e)))
    }

    /// Resume rendering
    pub fn play(&self) {
        self.scheduler.play();
    }

    /// Pause rendering; the scheduler keeps ticking
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Filter controller for input controls
    pub fn filters(&self) -> &FilterController {
        &self.filters
    }

    /// The surface being drawn on
    pub fn canvas(&self) -> SharedCanvas {
        self.canvas.clone()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Description of the active source, if any
    pub fn source(&self) -> Option<String> {
        self.source.lock().clone()
    }

    /// Current statistics
    pub fn stats(&self) -> Stats {
        let mut stats = self.stats.lock().clone();
        stats.ticks = self.scheduler.ticks();
        stats.frames_skipped = self.scheduler.skipped();
        stats
    }

    /// Stop the driver and release the camera
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut driver) = self.driver.lock().take() {
            driver.stop();
        }
        self.scheduler.clear();
        *self.source.lock() = None;
        tracing::info!("Pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for `Pipeline`
pub struct PipelineBuilder {
    config: RenderConfig,
    devices: Option<Arc<dyn MediaDevices>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    scheduler: Option<Arc<FrameScheduler>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: RenderConfig::default(),
            devices: None,
            storage: None,
            scheduler: None,
        }
    }

    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.media_label = label.into();
        self
    }

    pub fn canvas(mut self, width: u32, height: u32) -> Self {
        self.config = self.config.with_canvas(width, height);
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.config = self.config.with_refresh_rate(fps);
        self
    }

    /// Device backend (test pattern rig if unset)
    pub fn devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Filter storage (file store in the configured directory if unset)
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Scheduler to register with (process-wide one if unset)
    pub fn scheduler(mut self, scheduler: Arc<FrameScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let storage = match self.storage {
            Some(storage) => storage,
            None => match &self.config.storage_dir {
                Some(dir) => Arc::new(FileStore::open(dir)?),
                None => Arc::new(FileStore::user_default()?),
            },
        };
        let devices = self
            .devices
            .unwrap_or_else(|| Arc::new(TestPatternDevices::default_rig()));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| FrameScheduler::global().clone());

        Pipeline::new(self.config, devices, storage, scheduler)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CaptureDevice, DeviceKind, MediaStream, StreamConstraints};
    use crate::storage::MemoryStore;
    use crate::types::{Frame, Framerate, Resolution};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn builder(rig: Arc<TestPatternDevices>) -> PipelineBuilder {
        PipelineBuilder::new()
            .canvas(64, 36)
            .fps(120)
            .devices(rig)
            .storage(Arc::new(MemoryStore::new()))
            .scheduler(Arc::new(FrameScheduler::new()))
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let rig = Arc::new(TestPatternDevices::default_rig());
        let pipeline = builder(rig).build().unwrap();

        assert!(pipeline.start(None).await.unwrap().is_empty());
        assert!(matches!(
            pipeline.start(None).await,
            Err(Error::PipelineAlreadyRunning)
        ));
        pipeline.shutdown();
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_restart_requires_start() {
        let rig = Arc::new(TestPatternDevices::default_rig());
        let pipeline = builder(rig).build().unwrap();
        assert!(matches!(
            pipeline.restart(Some("brio")).await,
            Err(Error::PipelineNotStarted)
        ));
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let rig = Arc::new(TestPatternDevices::new(vec![
            crate::devices::CaptureDevice::new(
                "a",
                "Camera A",
                crate::devices::DeviceKind::VideoInput,
                "g1",
            ),
            crate::devices::CaptureDevice::new(
                "b",
                "Camera B",
                crate::devices::DeviceKind::VideoInput,
                "g2",
            ),
        ]));
        let config = RenderConfig::default()
            .with_canvas(32, 18)
            .with_ambiguity(crate::devices::AmbiguityPolicy::Reject);
        let pipeline = builder(rig)
            .config(config)
            .build()
            .unwrap();

        assert!(matches!(
            pipeline.start(Some("camera")).await,
            Err(Error::AmbiguousDeviceGroup { .. })
        ));
        assert!(!pipeline.is_running());
        assert!(pipeline.start(Some("camera a")).await.is_ok());
    }

    /// One camera whose worker takes a while to let go of the device
    struct SlowTeardown;

    #[async_trait::async_trait]
    impl MediaDevices for SlowTeardown {
        async fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>> {
            Ok(vec![CaptureDevice::new(
                "slow",
                "Slow Camera",
                DeviceKind::VideoInput,
                "usb",
            )])
        }

        async fn get_user_media(&self, _: &StreamConstraints) -> Result<MediaStream> {
            MediaStream::spawn("slow", Resolution::new(4, 4), Framerate::FPS_30, |tx| {
                tx.send(Frame::solid(4, 4, [1, 2, 3]));
                while tx.is_active() {
                    std::thread::sleep(Duration::from_millis(2));
                }
                std::thread::sleep(Duration::from_millis(200));
            })
        }
    }

    #[tokio::test]
    async fn test_release_keeps_the_runtime_responsive() {
        let pipeline = PipelineBuilder::new()
            .canvas(8, 8)
            .devices(Arc::new(SlowTeardown))
            .storage(Arc::new(MemoryStore::new()))
            .scheduler(Arc::new(FrameScheduler::new()))
            .build()
            .unwrap();
        pipeline.start(Some("slow")).await.unwrap();

        let beats = Arc::new(AtomicUsize::new(0));
        let heartbeat = tokio::spawn({
            let beats = beats.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    beats.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let started = Instant::now();
        pipeline.restart(Some("slow")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        // The single test thread kept running other tasks during the teardown.
        assert!(beats.load(Ordering::SeqCst) >= 10);

        heartbeat.abort();
        pipeline.shutdown();
    }

    #[test]
    fn test_builder_uses_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = RenderConfig::default().with_storage_dir(dir.path());
        let pipeline = PipelineBuilder::new()
            .config(config)
            .scheduler(Arc::new(FrameScheduler::new()))
            .build()
            .unwrap();

        assert_eq!(pipeline.filters().current(), crate::filters::FilterParameters::DEFAULT);
        assert!(dir.path().join("filters.json").exists());
    }
}
