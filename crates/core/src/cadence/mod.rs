//! Fixed-rate driver for `tick()`-style callbacks.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::Result;

/// Period of the scheduler poll loop.
pub const TICK_INTERVAL_MS: u64 = 10;

/// Returned by a cadence callback to keep or end the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceControl {
    Continue,
    Stop,
}

/// Repeats a callback on a dedicated thread, sleeping until each deadline.
///
/// Invocations never overlap: the callback runs on a single thread, and a
/// call that overruns its period causes the missed deadlines to be skipped
/// rather than replayed back to back.
pub struct Cadence {
    running: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl Cadence {
    /// Starts ticking at [`TICK_INTERVAL_MS`].
    pub fn start<F>(tick: F) -> Result<Self>
    where
        F: FnMut() -> CadenceControl + Send + 'static,
    {
        Self::spawn(Duration::from_millis(TICK_INTERVAL_MS), tick)
    }

    pub fn spawn<F>(interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> CadenceControl + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let skipped = Arc::new(AtomicU64::new(0));
        let flag = running.clone();
        let missed = skipped.clone();

        let worker = thread::Builder::new()
            .name("beatlock-cadence".to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + interval;
                while flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    if !flag.load(Ordering::Acquire) {
                        break;
                    }
                    if tick() == CadenceControl::Stop {
                        flag.store(false, Ordering::Release);
                        break;
                    }

                    deadline += interval;
                    let now = Instant::now();
                    if now > deadline {
                        let behind = skipped_periods(now - deadline, interval);
                        missed.fetch_add(behind, Ordering::Relaxed);
                        tracing::warn!(behind, "cadence overran its period; skipping ticks");
                        deadline = now + interval;
                    }
                }
            })?;

        Ok(Self {
            running,
            skipped,
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Deadlines dropped because a tick overran.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Stops the loop. Once this returns no further tick will run.
    pub fn cancel(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                // Cancelled from inside the callback; the loop exits on its own.
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("cadence thread panicked");
            }
        }
    }

    /// Blocks until the callback asks to stop or the cadence is cancelled.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("cadence thread panicked");
            }
        }
    }
}

impl Drop for Cadence {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cadence")
            .field("running", &self.is_running())
            .field("skipped", &self.skipped())
            .finish()
    }
}

fn skipped_periods(overrun: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 0;
    }
    (overrun.as_nanos() / interval.as_nanos()) as u64 + 1
}
