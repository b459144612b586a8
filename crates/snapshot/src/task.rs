//! Background scheduling primitives
//!
//! The coordinator runs a small fixed set of fixed-delay loops plus
//! fire-and-forget dispatch threads for outward RPC. Loops must stop cleanly
//! on shutdown: [`PeriodicTask::stop`] wakes the worker out of its delay and
//! joins it, so a stop never waits for a full interval.

use lattice_core::error::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

/// A named fixed-delay background loop.
///
/// The closure runs once per interval, starting one interval after spawn,
/// and handles its own errors (log and continue).
pub struct PeriodicTask {
    name: String,
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a loop named `name` running `tick` every `interval`.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(StopSignal::default());
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                {
                    let mut stopped = thread_stop.stopped.lock();
                    if !*stopped {
                        thread_stop.condvar.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                tick();
            })?;
        debug!(task = name, interval_ms = interval.as_millis() as u64, "periodic task started");
        Ok(PeriodicTask {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the loop and wait for the worker thread to exit.
    ///
    /// Bounded: the worker is woken out of its delay immediately and exits
    /// after at most one in-flight tick.
    pub fn stop(&mut self) {
        *self.stop.stopped.lock() = true;
        self.stop.condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(task = %self.name, "periodic task panicked before shutdown");
            }
            debug!(task = %self.name, "periodic task stopped");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run an outward RPC on its own dispatch thread.
///
/// The coordinator's loops and handlers never wait on a peer; they hand the
/// call to a dispatch thread and move on. The closure owns its completion
/// handling (record the result, log the failure). If the thread cannot be
/// spawned the call is dropped with a warning, which peers must tolerate the
/// same way they tolerate a lost network message.
pub fn fire_and_forget<F>(name: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = thread::Builder::new().name(format!("rpc-{}", name)).spawn(f) {
        warn!(target_peer = name, error = %e, "failed to spawn rpc dispatch thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    #[test]
    fn ticks_repeatedly_until_stopped() {
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let mut task = PeriodicTask::spawn("tick-test", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 3);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn stop_does_not_wait_a_full_interval() {
        let mut task =
            PeriodicTask::spawn("slow-interval", Duration::from_secs(60), || {}).unwrap();
        let start = Instant::now();
        task.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn fire_and_forget_runs_the_closure() {
        let done = Arc::new(AtomicU64::new(0));
        let d = Arc::clone(&done);
        fire_and_forget("test-peer", move || {
            d.store(1, Ordering::SeqCst);
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        while done.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
