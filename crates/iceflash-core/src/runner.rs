//! Operation orchestration
//!
//! The library entry point front ends call. One [`run`] invocation owns the
//! transport, the source/destination stream and the program session for the
//! whole operation, sequencing reset, power-up, identification, the selected
//! erase/program/verify work and power-down, with a best-effort safe
//! shutdown on any failure.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::engine::{self, EraseBlockSize, EraseRange};
use crate::error::{Error, Result};
use crate::flash::Flash;
use crate::progress::ProgressSink;
use crate::transport::SpiTransport;

/// Reach of the 3-byte addressed commands.
const FLASH_ADDR_SPACE: u32 = 16 * 1024 * 1024;

/// What one operation should do. Variants are mutually exclusive by
/// construction, so there is no way to ask for two modes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Erase, program and verify flash from the source stream; the flags
    /// select which of the phases actually run
    Program,
    /// Compare flash against the source stream without writing anything
    Check,
    /// Dump `size` bytes of flash into the destination sink
    Read {
        /// Number of bytes to read back
        size: u32,
    },
    /// Erase as if programming `size` bytes, without programming
    Erase {
        /// Pretended write length the erase range is computed from
        size: u32,
    },
    /// Stream the source directly into FPGA configuration SRAM
    Sram,
    /// Read and log the JEDEC identification, nothing else
    ReadId,
    /// Set the quad-enable status bit, nothing else
    EnableQuad,
}

/// Behaviour toggles for [`Mode::Program`] and [`Mode::Erase`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    /// Erase the whole part instead of block-by-block
    pub bulk_erase: bool,
    /// Skip erasing entirely
    pub no_erase: bool,
    /// Clear status-register protection bits before erasing or writing
    pub disable_protect: bool,
    /// Skip the verify pass after programming
    pub disable_verify: bool,
    /// Leave the flash powered up when the operation ends
    pub disable_powerdown: bool,
}

/// A fully-described flash operation.
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    /// Selected mode of operation
    pub mode: Mode,
    /// Flash address the source or destination maps to
    pub offset: u32,
    /// Erase granularity for block-wise erasure
    pub erase_block: EraseBlockSize,
    /// Behaviour toggles
    pub flags: Flags,
}

impl Operation {
    /// An operation with offset 0, 64 KiB erase blocks and default flags.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            offset: 0,
            erase_block: EraseBlockSize::default(),
            flags: Flags::default(),
        }
    }

    /// Reject inconsistent configurations before any hardware is touched.
    pub fn validate(&self) -> Result<()> {
        if self.flags.bulk_erase && self.flags.no_erase {
            return Err(Error::Config(
                "bulk-erase and no-erase are mutually exclusive".into(),
            ));
        }

        let programming = matches!(self.mode, Mode::Program | Mode::Erase { .. });
        if !programming
            && (self.flags.bulk_erase || self.flags.no_erase || self.flags.disable_protect)
        {
            return Err(Error::Config(
                "erase and protection flags are only valid when programming".into(),
            ));
        }

        match self.mode {
            Mode::Sram | Mode::ReadId | Mode::EnableQuad if self.offset != 0 => {
                return Err(Error::Config(
                    "address offset is not supported in this mode".into(),
                ));
            }
            Mode::Read { size: 0 } => {
                return Err(Error::Config("read size must be nonzero".into()));
            }
            Mode::Erase { size: 0 } => {
                return Err(Error::Config("erase size must be nonzero".into()));
            }
            _ => {}
        }

        Ok(())
    }
}

/// Source stream for program, check and SRAM operations.
pub enum Input<'a> {
    /// Seekable file; its length is taken from the file itself
    File(&'a mut File),
    /// Arbitrary stream; spooled so the length is known before erase sizing
    /// and so the verify pass can rewind it
    Stream(&'a mut dyn Read),
}

/// Operation I/O: flash write-side modes take a source, read-back takes a
/// destination, test and erase-only modes take none.
pub enum OperationIo<'a> {
    /// No stream (erase-only and test modes)
    None,
    /// Source stream (program, check, SRAM)
    Source(Input<'a>),
    /// Destination sink (read-back)
    Sink(&'a mut dyn Write),
}

// Source normalized by INIT: rewindable with a known length.
enum SourceReader<'a> {
    File(&'a mut File),
    Memory(Cursor<Vec<u8>>),
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::File(f) => f.read(buf),
            SourceReader::Memory(c) => c.read(buf),
        }
    }
}

struct Source<'a> {
    reader: SourceReader<'a>,
    len: u32,
}

impl Source<'_> {
    fn rewind(&mut self) -> io::Result<()> {
        match &mut self.reader {
            SourceReader::File(f) => f.seek(SeekFrom::Start(0)).map(|_| ()),
            SourceReader::Memory(c) => {
                c.set_position(0);
                Ok(())
            }
        }
    }
}

// Mode plus its resolved I/O, so each branch carries exactly the streams it
// needs.
enum Plan<'a> {
    Test { quad: bool },
    Sram(Input<'a>),
    Flash(FlashPlan<'a>),
}

enum FlashPlan<'a> {
    Program(Source<'a>),
    Check(Source<'a>),
    Read { size: u32, sink: &'a mut dyn Write },
    Erase { size: u32 },
}

// Resolve the stream and its length before the hardware is touched. A
// seekable file reports its own size; anything else is spooled into memory
// first (the verify pass needs a second reading anyway).
fn resolve_source(input: Input<'_>) -> Result<Source<'_>> {
    match input {
        Input::File(file) => {
            let len = file.seek(SeekFrom::End(0))?;
            file.seek(SeekFrom::Start(0))?;
            Ok(Source {
                reader: SourceReader::File(file),
                len: stream_len(len)?,
            })
        }
        Input::Stream(stream) => {
            let mut spool = Vec::new();
            stream.read_to_end(&mut spool)?;
            let len = stream_len(spool.len() as u64)?;
            Ok(Source {
                reader: SourceReader::Memory(Cursor::new(spool)),
                len,
            })
        }
    }
}

fn stream_len(len: u64) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&l| l <= FLASH_ADDR_SPACE)
        .ok_or_else(|| {
            Error::Config(format!("input of {len} bytes exceeds the flash address space"))
        })
}

fn check_range(offset: u32, len: u32) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= FLASH_ADDR_SPACE => Ok(()),
        _ => Err(Error::Config(format!(
            "range 0x{offset:X}+0x{len:X} exceeds the 24-bit flash address space"
        ))),
    }
}

fn cdone_label(cdone: bool) -> &'static str {
    if cdone {
        "high"
    } else {
        "low"
    }
}

/// Parse a byte count with an optional `k` or `M` suffix.
///
/// Accepts decimal and `0x` hexadecimal digits ("150000", "0x2000", "64k",
/// "1M"); anything else is a configuration error. Front ends use this for
/// their size and offset arguments.
pub fn parse_size(arg: &str) -> Result<u32> {
    let (digits, multiplier) = if let Some(d) = arg.strip_suffix('k') {
        (d, 1024u32)
    } else if let Some(d) = arg.strip_suffix('M') {
        (d, 1024 * 1024)
    } else {
        (arg, 1)
    };

    let invalid = || Error::Config(format!("`{arg}' is not a valid size"));

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        digits.parse()
    }
    .map_err(|_| invalid())?;

    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Run one operation against the board behind `transport`.
///
/// The transport is owned exclusively for the whole operation; the progress
/// sink is invoked at every chunk and block boundary. Configuration and
/// stream-length problems surface before a single transport call is made.
/// Once the hardware has been touched, any failure triggers a best-effort
/// shutdown (power-down unless disabled, reset release) before the error is
/// returned.
pub fn run<T, P>(
    transport: &mut T,
    op: &Operation,
    io: OperationIo<'_>,
    progress: &mut P,
) -> Result<()>
where
    T: SpiTransport,
    P: ProgressSink,
{
    op.validate()?;

    // INIT: resolve streams and lengths before touching the hardware.
    let plan = match (op.mode, io) {
        (Mode::Program, OperationIo::Source(input)) => {
            let source = resolve_source(input)?;
            if source.len == 0 {
                return Err(Error::Config("input is empty, nothing to program".into()));
            }
            check_range(op.offset, source.len)?;
            Plan::Flash(FlashPlan::Program(source))
        }
        (Mode::Check, OperationIo::Source(input)) => {
            let source = resolve_source(input)?;
            check_range(op.offset, source.len)?;
            Plan::Flash(FlashPlan::Check(source))
        }
        (Mode::Sram, OperationIo::Source(input)) => Plan::Sram(input),
        (Mode::Read { size }, OperationIo::Sink(sink)) => {
            check_range(op.offset, size)?;
            Plan::Flash(FlashPlan::Read { size, sink })
        }
        (Mode::Erase { size }, OperationIo::None) => {
            check_range(op.offset, size)?;
            Plan::Flash(FlashPlan::Erase { size })
        }
        (Mode::ReadId, OperationIo::None) => Plan::Test { quad: false },
        (Mode::EnableQuad, OperationIo::None) => Plan::Test { quad: true },
        _ => {
            return Err(Error::Config(
                "operation mode and supplied I/O do not match".into(),
            ));
        }
    };

    let mut flash = Flash::new(transport);

    log::info!("init..");
    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));

    flash.release_reset()?;
    flash.transport.delay_us(100_000);

    let sram = matches!(plan, Plan::Sram(_));
    let result = match plan {
        Plan::Test { quad } => run_test(&mut flash, quad),
        Plan::Sram(input) => run_sram(&mut flash, input, progress),
        Plan::Flash(plan) => run_flash(&mut flash, op, plan, progress),
    };

    if result.is_err() && !sram {
        shutdown_best_effort(&mut flash, op);
    }

    result
}

// TEST: identification or quad-enable, no erase/program.
fn run_test<T: SpiTransport>(flash: &mut Flash<'_, T>, quad: bool) -> Result<()> {
    log::info!("reset..");

    flash.chip_deselect()?;
    flash.transport.delay_us(250_000);

    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));

    flash.reset()?;
    flash.power_up()?;

    if quad {
        flash.enable_quad()?;
    } else {
        flash.read_id()?;
    }

    flash.power_down()?;

    flash.release_reset()?;
    flash.transport.delay_us(250_000);

    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));
    Ok(())
}

// SRAM_PROGRAM: raw bitstream bytes straight into the FPGA, no command
// framing, finished off with the configuration trailer.
fn run_sram<T, P>(flash: &mut Flash<'_, T>, input: Input<'_>, progress: &mut P) -> Result<()>
where
    T: SpiTransport,
    P: ProgressSink,
{
    log::info!("reset..");

    flash.sram_reset()?;
    flash.transport.delay_us(100);

    flash.sram_chip_select()?;
    flash.transport.delay_us(2_000);

    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));

    log::info!("programming..");

    let source: &mut dyn Read = match input {
        Input::File(f) => f,
        Input::Stream(s) => s,
    };

    let mut buf = [0u8; 4096];
    loop {
        if progress.cancelled() {
            return Err(Error::Cancelled);
        }
        let n = engine::read_fill(source, &mut buf)?;
        if n == 0 {
            break;
        }
        log::debug!("sending {} bytes.", n);
        flash.transport.send(&buf[..n])?;
    }

    flash.transport.send_dummy_bytes(6)?;
    flash.transport.send_dummy_bit()?;

    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));
    Ok(())
}

// Protection-disable and erase, shared by the program and erase-only paths.
fn erase_phase<T, P>(
    flash: &mut Flash<'_, T>,
    op: &Operation,
    write_len: u32,
    progress: &mut P,
) -> Result<()>
where
    T: SpiTransport,
    P: ProgressSink,
{
    if op.flags.disable_protect {
        flash.write_enable()?;
        flash.disable_protection()?;
    }

    if op.flags.no_erase {
        return Ok(());
    }

    if op.flags.bulk_erase {
        engine::erase_bulk(flash, progress)
    } else {
        log::info!("file size: {}", write_len);
        let range = EraseRange::covering(op.offset, write_len, op.erase_block);
        engine::erase_blocks(flash, range, progress)
    }
}

// FLASH_PROGRAM: protection, erase, program, then read-back or verify.
fn run_flash<T, P>(
    flash: &mut Flash<'_, T>,
    op: &Operation,
    plan: FlashPlan<'_>,
    progress: &mut P,
) -> Result<()>
where
    T: SpiTransport,
    P: ProgressSink,
{
    log::info!("reset..");

    flash.chip_deselect()?;
    flash.transport.delay_us(250_000);

    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));

    flash.reset()?;
    flash.power_up()?;
    flash.read_id()?;

    match plan {
        FlashPlan::Program(mut source) => {
            erase_phase(flash, op, source.len, progress)?;
            engine::program(flash, &mut source.reader, op.offset, source.len, progress)?;
            if !op.flags.disable_verify {
                // Second pass over the source from the beginning.
                source.rewind()?;
                engine::verify(flash, &mut source.reader, op.offset, source.len, progress)?;
            }
        }
        FlashPlan::Check(mut source) => {
            if !op.flags.disable_verify {
                engine::verify(flash, &mut source.reader, op.offset, source.len, progress)?;
            }
        }
        FlashPlan::Read { size, sink } => {
            engine::read_back(flash, sink, op.offset, size, progress)?;
        }
        FlashPlan::Erase { size } => {
            erase_phase(flash, op, size, progress)?;
        }
    }

    // POWERDOWN
    if !op.flags.disable_powerdown {
        flash.power_down()?;
    }

    flash.release_reset()?;
    flash.transport.delay_us(250_000);

    log::info!("cdone: {}", cdone_label(flash.read_cdone()?));
    Ok(())
}

// Leave the board in a sane state after a failure: the flash powered down
// (unless the caller asked to keep it up) and the reset line released.
// Secondary failures are ignored; the original error is what surfaces.
fn shutdown_best_effort<T: SpiTransport>(flash: &mut Flash<'_, T>, op: &Operation) {
    if !op.flags.disable_powerdown {
        let _ = flash.power_down();
    }
    let _ = flash.release_reset();
    flash.transport.delay_us(250_000);
}
