//! Progress reporting seam between the engine and front ends

/// Operation phase reported with each progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Block or bulk erase
    Erase,
    /// Page programming
    Program,
    /// Byte-exact comparison against the source
    Verify,
    /// Read-back into the destination sink
    Read,
}

impl Phase {
    /// Short label for console or progress-bar rendering.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Erase => "erase",
            Phase::Program => "program",
            Phase::Verify => "verify",
            Phase::Read => "read",
        }
    }
}

/// Callback invoked at every chunk/block boundary of a running operation.
///
/// `fraction` is in `[0, 1]`, monotonically non-decreasing within one
/// operation and reset to 0 when the next phase starts; `addr` is the flash
/// address the phase has reached. Implementations render progress bars or
/// console percentages - the engine never writes to the terminal itself.
pub trait ProgressSink {
    /// One progress update.
    fn progress(&mut self, phase: Phase, fraction: f64, addr: u32);

    /// Polled between chunks, blocks and poll ticks. Returning `true` stops
    /// the running operation with [`crate::Error::Cancelled`] at the next
    /// boundary; the transaction in flight is always completed first.
    fn cancelled(&self) -> bool {
        false
    }
}

/// Ignores all progress updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _phase: Phase, _fraction: f64, _addr: u32) {}
}
