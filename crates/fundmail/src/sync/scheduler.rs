//! Fixed-interval cycle loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::error::IngestError;

/// Granularity of the stop-flag check while sleeping
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Repeats a cycle with a fixed pause measured from the end of the
/// previous cycle, so cycles never overlap.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    max_cycles: Option<u64>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_cycles: None,
        }
    }

    /// Stop after this many successful cycles
    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `tick` until the stop flag is set or a cycle fails.
    ///
    /// The flag is only looked at between cycles; a running cycle always
    /// reaches its terminal state. A failed cycle stops the loop and its
    /// error is returned. Returns the number of completed cycles.
    pub fn run_loop<F>(&self, stop_flag: &AtomicBool, mut tick: F) -> Result<u64, IngestError>
    where
        F: FnMut() -> Result<(), IngestError>,
    {
        info!(
            "[SYNC] Starting ingestion loop with {}s interval",
            self.interval.as_secs()
        );

        let mut completed = 0;
        while !stop_flag.load(Ordering::Relaxed) {
            if let Err(err) = tick() {
                error!(
                    "[SYNC] Cycle failed, checkpoint is not advancing; stopping loop: {}",
                    err
                );
                return Err(err);
            }
            completed += 1;

            if self.max_cycles.is_some_and(|max| completed >= max) {
                break;
            }
            sleep_unless_stopped(self.interval, stop_flag);
        }

        info!("[SYNC] Ingestion loop stopped after {} cycles", completed);
        Ok(completed)
    }
}

fn sleep_unless_stopped(total: Duration, stop_flag: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop_flag.load(Ordering::Relaxed) {
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}
