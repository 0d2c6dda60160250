//! iceflash-core - flash programming engine for FTDI-based iCE40 boards
//!
//! Programs the serial NOR flash (or the FPGA configuration SRAM) on iCE40
//! development boards through a bit-bang SPI bridge. The bridge itself is an
//! external collaborator behind the [`transport::SpiTransport`] trait; this
//! crate owns the flash command encoding, the erase/program/verify engine,
//! the readiness poller and the operation orchestrator.
//!
//! Front ends - command line or graphical - drive everything through
//! [`runner::run`], feeding it an open transport, an [`runner::Operation`]
//! and a [`progress::ProgressSink`] for rendering:
//!
//! ```ignore
//! use iceflash_core::progress::NoProgress;
//! use iceflash_core::runner::{self, Input, Mode, Operation, OperationIo};
//!
//! let mut bitstream = std::fs::File::open("top.bin")?;
//! let op = Operation::new(Mode::Program);
//! runner::run(
//!     &mut transport,
//!     &op,
//!     OperationIo::Source(Input::File(&mut bitstream)),
//!     &mut NoProgress,
//! )?;
//! ```
//!
//! Note that block-wise erasure rounds the erased range out to block
//! boundaries on both sides: programming at an offset that is not
//! block-aligned destroys data between the boundary and the write range.
//! See [`engine::EraseRange`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod engine;
pub mod error;
pub mod flash;
pub mod poller;
pub mod progress;
pub mod runner;
pub mod spi;
pub mod transport;

pub use error::{Error, Result};
