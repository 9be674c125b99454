//! Frame scheduling
//!
//! `FrameScheduler` is an ordered set of per-frame callbacks gated by a
//! `playing` flag. `FrameDriver` owns the thread that ticks it at the
//! display rate for as long as it lives; pausing never stops the ticks.

use crate::types::Framerate;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

/// Handle returned by `register`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback = Box<dyn FnMut() + Send>;

/// Bookkeeping for the callbacks a tick has taken out of the registry
struct InTick {
    thread: ThreadId,
    ids: Vec<CallbackId>,
    removed: Vec<CallbackId>,
    cleared: bool,
}

impl InTick {
    fn is_live(&self, id: CallbackId) -> bool {
        !self.cleared && !self.removed.contains(&id)
    }

    fn live(&self) -> usize {
        if self.cleared {
            0
        } else {
            self.ids.len() - self.removed.len()
        }
    }

    fn defer_removal(&mut self, id: CallbackId) -> bool {
        if !self.ids.contains(&id) || !self.is_live(id) {
            return false;
        }
        self.removed.push(id);
        true
    }
}

#[derive(Default)]
struct Registry {
    callbacks: Vec<(CallbackId, Callback)>,
    in_tick: Option<InTick>,
}

/// Ordered callback registry with play/pause
///
/// Callbacks may register, unregister or clear on the scheduler that runs
/// them; changes made during a tick take effect when it ends, except that a
/// callback removed mid-tick is not invoked later in that same tick. From
/// any other thread `unregister` and `clear` wait for a running tick, so
/// removed callbacks are dropped by the time they return.
pub struct FrameScheduler {
    registry: Mutex<Registry>,
    tick_lock: Mutex<()>,
    playing: AtomicBool,
    next_id: AtomicU64,
    ticks: AtomicU64,
    skipped: AtomicU64,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler {
    /// Empty scheduler, playing
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            tick_lock: Mutex::new(()),
            playing: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Process-wide scheduler
    pub fn global() -> &'static Arc<FrameScheduler> {
        static GLOBAL: OnceLock<Arc<FrameScheduler>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(FrameScheduler::new()))
    }

    /// Add a callback; it runs after every callback registered before it
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: FnMut() + Send + 'static,
    {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.lock().callbacks.push((id, Box::new(callback)));
        tracing::debug!("Registered frame callback {:?}", id);
        id
    }

    /// Remove a callback; returns false if it was not registered
    pub fn unregister(&self, id: CallbackId) -> bool {
        let _serial = self.wait_for_tick();
        let mut registry = self.registry.lock();
        if let Some(pos) = registry.callbacks.iter().position(|(cid, _)| *cid == id) {
            let entry = registry.callbacks.remove(pos);
            drop(registry);
            drop(entry);
            return true;
        }
        // Running in the current tick; dropped when the tick ends.
        registry
            .in_tick
            .as_mut()
            .is_some_and(|tick| tick.defer_removal(id))
    }

    /// Remove every callback
    pub fn clear(&self) {
        let _serial = self.wait_for_tick();
        let removed = {
            let mut registry = self.registry.lock();
            if let Some(tick) = registry.in_tick.as_mut() {
                tick.cleared = true;
            }
            std::mem::take(&mut registry.callbacks)
        };
        if !removed.is_empty() {
            tracing::debug!("Cleared {} frame callbacks", removed.len());
        }
        // Captured state (streams included) is dropped here, outside the lock.
        drop(removed);
    }

    /// Hold off ticks, unless called from a callback of the running tick
    fn wait_for_tick(&self) -> Option<MutexGuard<'_, ()>> {
        let own_tick = self
            .registry
            .lock()
            .in_tick
            .as_ref()
            .is_some_and(|tick| tick.thread == std::thread::current().id());
        (!own_tick).then(|| self.tick_lock.lock())
    }

    pub fn len(&self) -> usize {
        let registry = self.registry.lock();
        registry.callbacks.len() + registry.in_tick.as_ref().map_or(0, InTick::live)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_playing(&self, playing: bool) {
        if self.playing.swap(playing, Ordering::SeqCst) != playing {
            tracing::info!("Rendering {}", if playing { "resumed" } else { "paused" });
        }
    }

    pub fn play(&self) {
        self.set_playing(true);
    }

    pub fn stop(&self) {
        self.set_playing(false);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// One display frame: run every callback in order if playing
    ///
    /// Returns the number of callbacks invoked. Ticks never overlap; a
    /// callback must not tick its own scheduler.
    pub fn tick(&self) -> usize {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if !self.is_playing() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let _serial = self.tick_lock.lock();
        let mut running = {
            let mut registry = self.registry.lock();
            let running = std::mem::take(&mut registry.callbacks);
            registry.in_tick = Some(InTick {
                thread: std::thread::current().id(),
                ids: running.iter().map(|(id, _)| *id).collect(),
                removed: Vec::new(),
                cleared: false,
            });
            running
        };

        let mut invoked = 0;
        for (id, callback) in running.iter_mut() {
            let live = self
                .registry
                .lock()
                .in_tick
                .as_ref()
                .is_some_and(|tick| tick.is_live(*id));
            if live {
                callback();
                invoked += 1;
            }
        }

        let dropped = {
            let mut registry = self.registry.lock();
            match registry.in_tick.take() {
                Some(tick) if !tick.cleared => {
                    let (keep, dropped): (Vec<_>, Vec<_>) = running
                        .into_iter()
                        .partition(|(id, _)| !tick.removed.contains(id));
                    // Callbacks added during the tick go after the ones that ran.
                    let added = std::mem::replace(&mut registry.callbacks, keep);
                    registry.callbacks.extend(added);
                    dropped
                }
                _ => running,
            }
        };
        drop(dropped);
        invoked
    }

    /// Ticks seen so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that ran nothing because the scheduler was paused
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("callbacks", &self.len())
            .field("playing", &self.is_playing())
            .field("ticks", &self.ticks())
            .finish()
    }
}

/// Thread that ticks a scheduler at a fixed rate
pub struct FrameDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameDriver {
    /// Start ticking `scheduler` at `rate`
    pub fn spawn(scheduler: Arc<FrameScheduler>, rate: Framerate) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let interval = rate.frame_interval();

        let handle = std::thread::Builder::new()
            .name("frame-driver".into())
            .spawn(move || {
                let mut deadline = Instant::now();
                while flag.load(Ordering::SeqCst) {
                    scheduler.tick();

                    deadline += interval;
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    } else {
                        // Overran the frame budget; don't try to catch up.
                        deadline = now;
                    }
                }
            })?;

        tracing::info!("Frame driver started at {}", rate);
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop ticking and wait for the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Frame driver panicked");
            }
            tracing::info!("Frame driver stopped");
        }
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter(scheduler: &FrameScheduler) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.register(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_callbacks_run_in_insertion_order() {
        let scheduler = FrameScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            scheduler.register(move || order.lock().push(n));
        }
        assert_eq!(scheduler.tick(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_stop_then_play() {
        let scheduler = FrameScheduler::new();
        let count = counter(&scheduler);

        scheduler.tick();
        scheduler.stop();
        for _ in 0..5 {
            scheduler.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.ticks(), 6);
        assert_eq!(scheduler.skipped(), 5);

        scheduler.play();
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_unregister_and_clear() {
        let scheduler = FrameScheduler::new();
        let a = counter(&scheduler);
        let id = scheduler.register(|| {});
        let b = counter(&scheduler);

        assert!(scheduler.unregister(id));
        assert!(!scheduler.unregister(id));
        scheduler.tick();
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);

        scheduler.clear();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn test_callbacks_can_reenter_the_scheduler() {
        let scheduler = Arc::new(FrameScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&scheduler);
        let log = order.clone();
        let mut armed = true;
        scheduler.register(move || {
            log.lock().push("first");
            if std::mem::take(&mut armed) {
                if let Some(scheduler) = weak.upgrade() {
                    let log = log.clone();
                    scheduler.register(move || log.lock().push("added"));
                }
            }
        });
        let log = order.clone();
        scheduler.register(move || log.lock().push("second"));

        assert_eq!(scheduler.tick(), 2);
        assert_eq!(scheduler.len(), 3);
        assert_eq!(scheduler.tick(), 3);
        assert_eq!(
            *order.lock(),
            vec!["first", "second", "first", "second", "added"]
        );
    }

    #[test]
    fn test_clear_from_inside_a_tick() {
        let scheduler = Arc::new(FrameScheduler::new());
        let weak = Arc::downgrade(&scheduler);
        scheduler.register(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.clear();
                assert!(scheduler.is_empty());
            }
        });
        let later = counter(&scheduler);

        assert_eq!(scheduler.tick(), 1);
        assert_eq!(later.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn test_unregister_from_inside_a_tick() {
        let scheduler = Arc::new(FrameScheduler::new());
        let weak = Arc::downgrade(&scheduler);
        let victim = Arc::new(Mutex::new(None));

        let target = victim.clone();
        scheduler.register(move || {
            if let (Some(scheduler), Some(id)) = (weak.upgrade(), target.lock().take()) {
                assert!(scheduler.unregister(id));
                assert!(!scheduler.unregister(id));
            }
        });
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        *victim.lock() = Some(scheduler.register(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(scheduler.len(), 1);
        scheduler.tick();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_waits_for_running_tick() {
        let scheduler = Arc::new(FrameScheduler::new());
        let dropped = Arc::new(AtomicBool::new(false));

        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let guard = SetOnDrop(dropped.clone());
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        scheduler.register(move || {
            let _ = &guard;
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(50));
        });

        let ticker = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.tick())
        };
        started_rx.recv().unwrap();
        scheduler.clear();
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(ticker.join().unwrap(), 1);
    }

    #[test]
    fn test_driver_ticks_until_dropped() {
        let scheduler = Arc::new(FrameScheduler::new());
        let count = counter(&scheduler);

        let driver = FrameDriver::spawn(scheduler.clone(), Framerate::new(200, 1)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(driver.is_running());
        drop(driver);

        let seen = count.load(Ordering::SeqCst);
        assert!(seen > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
