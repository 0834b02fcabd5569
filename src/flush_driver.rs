//! Background timers (§4.6.7, §4.3, §5): two interval threads that keep the
//! engine durable and the write buffer bounded without the caller managing a
//! timer itself — [`FlushDriver`] calls `Engine::flush()` on `flush_interval_s`,
//! [`WriteBufferTimer`] flushes just the buffered appender on
//! `write_buffer_time_threshold_ms`.
//!
//! Grounded on the crate's own `parking_lot`/`Arc` concurrency idiom already
//! used by [`crate::engine::Engine`]; stop signaling uses a `Condvar` pair
//! rather than a raw sleep loop so `stop()` returns as soon as the thread
//! wakes, not after the next full interval. Both timers hold only a `Weak`
//! reference to the engine they serve — an `Arc` captured by the thread
//! closure would keep the engine alive for as long as the thread runs, and
//! the thread only stops when the engine (which owns the timer) drops.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::engine::Engine;

type StopSignal = Arc<(Mutex<bool>, Condvar)>;

/// Spawn a thread that calls `tick` every `interval` until stopped.
/// `interval.is_zero()` disables the timer entirely, returning a handle whose
/// `stop()` is a no-op.
fn spawn_interval(name: &'static str, interval: Duration, mut tick: impl FnMut() -> bool + Send + 'static) -> (StopSignal, Option<std::thread::JoinHandle<()>>) {
    let stop = Arc::new((Mutex::new(false), Condvar::new()));
    if interval.is_zero() {
        return (stop, None);
    }

    let stop_thread = Arc::clone(&stop);
    let handle = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let (lock, cvar) = &*stop_thread;
            let mut guard = lock.lock();
            loop {
                let timed_out = !cvar.wait_for(&mut guard, interval).timed_out();
                if *guard {
                    return;
                }
                if timed_out {
                    continue;
                }
                if !tick() {
                    return;
                }
            }
        })
        .expect("failed to spawn background timer thread");

    (stop, Some(handle))
}

fn stop_timer(stop: &StopSignal, handle: &mut Option<std::thread::JoinHandle<()>>) {
    if let Some(handle) = handle.take() {
        let (lock, cvar) = &**stop;
        *lock.lock() = true;
        cvar.notify_one();
        let _ = handle.join();
    }
}

/// Periodically calls `Engine::flush()`, giving a process that only ever
/// calls `set` bounded durability without managing a timer itself.
pub struct FlushDriver {
    stop: StopSignal,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl FlushDriver {
    /// `interval_s == 0` disables the driver entirely (matches
    /// `EngineConfig::flush_interval_s`'s documented "0 disables" contract).
    pub fn spawn(engine: &Arc<Engine>, interval_s: u64) -> Self {
        let weak: Weak<Engine> = Arc::downgrade(engine);
        let (stop, handle) = spawn_interval("fskv-flush-driver", Duration::from_secs(interval_s), move || match weak.upgrade() {
            Some(engine) => {
                if let Err(e) = engine.flush() {
                    log::warn!("background flush failed: {e}");
                }
                true
            }
            None => false,
        });
        Self { stop, handle }
    }

    /// Signal the driver thread to stop and wait for it to exit.
    pub fn stop(mut self) {
        stop_timer(&self.stop, &mut self.handle);
    }
}

impl Drop for FlushDriver {
    fn drop(&mut self) {
        stop_timer(&self.stop, &mut self.handle);
    }
}

/// Periodically flushes just the buffered appender (not the index or
/// header), bounding how long a write can sit unflushed in memory per §4.3's
/// `write_buffer_time_threshold_ms` auto-flush policy.
pub struct WriteBufferTimer {
    stop: StopSignal,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WriteBufferTimer {
    pub fn spawn(engine: &Arc<Engine>, interval_ms: u64) -> Self {
        let weak: Weak<Engine> = Arc::downgrade(engine);
        let (stop, handle) = spawn_interval("fskv-write-buffer-timer", Duration::from_millis(interval_ms), move || match weak.upgrade() {
            Some(engine) => {
                if let Err(e) = engine.flush_write_buffer() {
                    log::warn!("background write-buffer flush failed: {e}");
                }
                true
            }
            None => false,
        });
        Self { stop, handle }
    }

    pub fn stop(mut self) {
        stop_timer(&self.stop, &mut self.handle);
    }
}

impl Drop for WriteBufferTimer {
    fn drop(&mut self) {
        stop_timer(&self.stop, &mut self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;

    #[test]
    fn disabled_driver_spawns_no_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.flush_interval_s = 0;
        let engine = Engine::open(dir.path().join("t.fskv"), config).unwrap();
        assert!(engine.flush_driver.lock().is_none());
    }

    #[test]
    fn driver_flushes_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.flush_interval_s = 1;
        let engine = Engine::open(dir.path().join("t.fskv"), config).unwrap();
        engine.set(b"k", b"v").unwrap();
        std::thread::sleep(Duration::from_millis(1300));
        assert!(!engine.stats().dirty);
    }

    #[test]
    fn stopped_driver_does_not_keep_engine_alive() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.flush_interval_s = 1;
        let engine = Engine::open(dir.path().join("t.fskv"), config).unwrap();
        let weak = Arc::downgrade(&engine);
        drop(engine);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn write_buffer_timer_flushes_pending_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.flush_interval_s = 0;
        config.write_buffer_time_threshold_ms = 100;
        let engine = Engine::open(dir.path().join("t.fskv"), config).unwrap();
        engine.set(b"k", b"v").unwrap();
        let before = engine.stats().file_length;
        std::thread::sleep(Duration::from_millis(400));
        let after = engine.stats().file_length;
        assert!(after > before, "write-buffer timer should have flushed the buffered write to disk");
    }
}
