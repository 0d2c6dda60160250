//! Error types for iceflash-core

use thiserror::Error;

/// Library error type, one variant per failure class.
///
/// Front ends receive a distinct variant per class so they can render
/// distinct messages ("device not responding" vs "verification failed at
/// 0x...") and map the result to their own exit conventions.
#[derive(Debug, Error)]
pub enum Error {
    /// Inconsistent or invalid operation configuration, detected before any
    /// hardware access. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Source or destination stream failure (a non-hardware error).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transport or device communication failure. Aborts the operation; the
    /// failed transaction is not retried.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Flash contents differ from the source at this address. Preceding
    /// erase/program work is not rolled back.
    #[error("verification failed at 0x{addr:06X}")]
    VerifyMismatch {
        /// First differing flash address
        addr: u32,
    },

    /// The front end requested cancellation between two loop iterations.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Conventional exit status for command-line front ends: 1 for
    /// non-hardware errors, 2 for hardware/communication failures, 3 for
    /// verification failures (0 being success).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Io(_) | Error::Cancelled => 1,
            Error::Hardware(_) => 2,
            Error::VerifyMismatch { .. } => 3,
        }
    }
}

/// Result type alias using the library error type
pub type Result<T> = core::result::Result<T, Error>;
