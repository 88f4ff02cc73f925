//! Handle for the single polling loop of a controller.
//!
//! At most one loop runs per controller, either on the caller's thread
//! (foreground) or on a dedicated worker thread (background). Holding a
//! [`LoopClaim`] is what "running" means; dropping it ends the loop.
//!
//! Stopping is cooperative. [`MeasurementWorker::request_stop`] only sets a
//! flag that the loop checks between completed samples; a sample blocked in
//! the transport finishes (data or transport timeout) before the flag is seen.

use crate::error::{AppResult, CounterError};
use log::warn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Default)]
struct LoopFlags {
    running: AtomicBool,
    stop_requested: AtomicBool,
}

/// Exclusive right to run the polling loop.
#[derive(Debug)]
pub struct LoopClaim {
    flags: Arc<LoopFlags>,
}

impl LoopClaim {
    /// Whether the loop has been asked to stop.
    pub fn stop_requested(&self) -> bool {
        self.flags.stop_requested.load(Ordering::SeqCst)
    }
}

impl Drop for LoopClaim {
    fn drop(&mut self) {
        self.flags.running.store(false, Ordering::SeqCst);
    }
}

/// Start / request-stop / join / is-running for the polling loop.
#[derive(Debug, Default)]
pub struct MeasurementWorker {
    flags: Arc<LoopFlags>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MeasurementWorker {
    /// Idle worker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the loop for the current thread, clearing any stale stop request.
    ///
    /// Returns `None` if a loop is already running.
    pub fn claim(&self) -> Option<LoopClaim> {
        self.flags
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.flags.stop_requested.store(false, Ordering::SeqCst);
        Some(LoopClaim {
            flags: Arc::clone(&self.flags),
        })
    }

    /// Run `body` on a new worker thread.
    ///
    /// Returns `Ok(false)` without spawning if a loop is already running.
    pub fn start<F>(&self, body: F) -> AppResult<bool>
    where
        F: FnOnce(LoopClaim) + Send + 'static,
    {
        let Some(claim) = self.claim() else {
            return Ok(false);
        };

        let previous = self.handle.lock().take();
        if let Some(previous) = previous {
            // Its claim is gone, so it is at most sending its last notification.
            // Restarting from a Ready observer runs on that very thread.
            if previous.thread().id() != std::thread::current().id()
                && previous.join().is_err()
            {
                warn!("Previous measurement worker panicked");
            }
        }

        let spawned = std::thread::Builder::new()
            .name("hp-counter-poll".to_string())
            .spawn(move || body(claim))?;
        *self.handle.lock() = Some(spawned);
        Ok(true)
    }

    /// Ask the running loop to exit after its current sample.
    pub fn request_stop(&self) {
        self.flags.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested since the loop was claimed.
    pub fn stop_requested(&self) -> bool {
        self.flags.stop_requested.load(Ordering::SeqCst)
    }

    /// Whether a loop (foreground or background) is active.
    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    /// Wait for the background thread to finish.
    ///
    /// Does nothing when no thread was started, or when called from the worker
    /// thread itself (e.g. from a `Ready` observer).
    pub fn join(&self) -> AppResult<()> {
        let mut guard = self.handle.lock();
        let Some(handle) = guard.take() else {
            return Ok(());
        };
        if handle.thread().id() == std::thread::current().id() {
            *guard = Some(handle);
            return Ok(());
        }
        drop(guard);
        handle.join().map_err(|_| CounterError::WorkerPanicked)
    }
}
