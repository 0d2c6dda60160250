//! Flash readiness polling
//!
//! Some parts report a one-tick false "ready" while internal housekeeping is
//! still running, so a single clear busy bit cannot be trusted after a
//! write-initiating command. The poller requires a run of consecutive ready
//! reads before declaring the device ready; any busy read restarts the run.

use crate::error::{Error, Result};
use crate::spi::Status;

/// Consecutive ready reads required before READY is reported.
pub const READY_HYSTERESIS: u8 = 2;

/// Interval between status reads, in microseconds.
pub const POLL_INTERVAL_US: u32 = 1_000;

/// Default cap on status reads before giving up on the device.
///
/// At the ~1 ms tick interval this allows well over a minute of waiting,
/// enough for bulk erases of large parts, while a disconnected or wedged
/// device cannot hang the engine forever.
pub const DEFAULT_MAX_POLLS: u32 = 100_000;

/// Outcome of feeding one status snapshot to the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Hysteresis satisfied; the part is ready.
    Ready,
    /// Keep polling after the tick interval.
    Pending,
}

/// POLLING -> READY state machine over status register snapshots.
#[derive(Debug)]
pub struct ReadyPoller {
    consecutive_ready: u8,
    polls_left: u32,
}

impl ReadyPoller {
    /// Poller with the default poll budget.
    pub fn new() -> Self {
        Self::with_max_polls(DEFAULT_MAX_POLLS)
    }

    /// Poller that gives up after `max_polls` status reads.
    pub fn with_max_polls(max_polls: u32) -> Self {
        Self {
            consecutive_ready: 0,
            polls_left: max_polls,
        }
    }

    /// Feed one freshly-read status register snapshot.
    ///
    /// Returns [`Poll::Ready`] once [`READY_HYSTERESIS`] consecutive ready
    /// reads have been observed, [`Poll::Pending`] otherwise, or a hardware
    /// error when the poll budget runs out while the part is still pending.
    pub fn observe(&mut self, status: Status) -> Result<Poll> {
        if status.is_busy() {
            self.consecutive_ready = 0;
        } else {
            self.consecutive_ready += 1;
            if self.consecutive_ready >= READY_HYSTERESIS {
                return Ok(Poll::Ready);
            }
        }

        self.polls_left = self.polls_left.saturating_sub(1);
        if self.polls_left == 0 {
            return Err(Error::Hardware(
                "flash did not become ready (device not responding?)".into(),
            ));
        }
        Ok(Poll::Pending)
    }
}

impl Default for ReadyPoller {
    fn default() -> Self {
        Self::new()
    }
}
