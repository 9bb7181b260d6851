//! Burst suppression by reservoir sampling.
//!
//! A batch of reports arriving close together is usually correlated (one
//! user action fanning out into several reports). Letting all of them
//! through would hand the collector a timing fingerprint, so each burst
//! window is collapsed to a single report chosen uniformly at random, and
//! the rest are silently dropped.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::Rng;

use crate::client::{ReportSender, SendError};
use crate::report::Report;

struct BurstState {
    /// Number of reports in the current burst.
    count: u64,
    /// Currently selected report, if `count > 0`.
    pending: Option<Report>,
}

/// Implements [`ReportSender`] by wrapping another sender, passing on one
/// uniformly selected report per burst window and dropping the remainder.
///
/// The selection uses the OS random source: a weaker generator seeded from
/// time would leak the window boundaries it is supposed to hide.
pub struct BurstSender {
    burst: Duration,
    sender: Arc<dyn ReportSender>,
    state: Arc<Mutex<BurstState>>,
}

impl BurstSender {
    pub fn new(sender: Arc<dyn ReportSender>, burst: Duration) -> BurstSender {
        if burst < Duration::from_secs(5) {
            log::warn!("Burst duration {:?} is too low for most use cases", burst);
        }
        BurstSender {
            burst,
            sender,
            state: Arc::new(Mutex::new(BurstState {
                count: 0,
                pending: None,
            })),
        }
    }

    /// Schedules the drain that ends the burst which just opened.
    fn schedule_drain(&self) {
        let state = Arc::clone(&self.state);
        let sender = Arc::clone(&self.sender);
        let burst = self.burst;
        let spawned = thread::Builder::new()
            .name("burst-drain".to_string())
            .spawn(move || {
                thread::sleep(burst);
                let pending = {
                    let mut state = state.lock();
                    state.count = 0;
                    state.pending.take()
                };
                if let Some(report) = pending {
                    // drain runs asynchronously, so there is no way to return
                    // errors to the caller.
                    if let Err(e) = sender.send(report) {
                        log::warn!("Error encountered in burst report sender: {}", e);
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to schedule burst drain: {}", e);
            // Reset so a later report can open a fresh burst; the pending
            // report from this one is dropped.
            let mut state = self.state.lock();
            state.count = 0;
            state.pending = None;
        }
    }
}

impl ReportSender for BurstSender {
    fn send(&self, report: Report) -> Result<(), SendError> {
        let schedule = {
            let mut state = self.state.lock();
            // Keep track of how many reports this burst has received, and
            // maintain a uniformly random selection by replacing the pending
            // report with decreasing probability (reservoir sampling).
            state.count += 1;
            if OsRng.gen_range(0..state.count) == 0 {
                // The probability of reaching this point is 1/count.
                state.pending = Some(report);
            }
            state.count == 1
        };
        if schedule {
            // This was the first report of the burst.
            self.schedule_drain();
        }
        // Errors from downstream senders are lost.
        Ok(())
    }
}
