//! Erase/program/verify engine
//!
//! Drives the flash command layer through whole-operation loops: block
//! erasure over a conservatively rounded address range, page-bounded
//! programming of a source stream, byte-exact verification and read-back.
//! Addresses within each phase are visited strictly in ascending order.

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::flash::{Flash, PAGE_SIZE};
use crate::progress::{Phase, ProgressSink};
use crate::spi::opcodes;
use crate::transport::SpiTransport;

/// Erase granularity; selects both the erase opcode and the alignment mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EraseBlockSize {
    /// 4 KiB sector erase
    Kb4,
    /// 32 KiB block erase
    Kb32,
    /// 64 KiB block erase
    #[default]
    Kb64,
}

impl EraseBlockSize {
    /// The erase opcode for this block size.
    pub const fn opcode(self) -> u8 {
        match self {
            EraseBlockSize::Kb4 => opcodes::SE_4K,
            EraseBlockSize::Kb32 => opcodes::BE_32K,
            EraseBlockSize::Kb64 => opcodes::BE_64K,
        }
    }

    /// Block size in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            EraseBlockSize::Kb4 => 4 * 1024,
            EraseBlockSize::Kb32 => 32 * 1024,
            EraseBlockSize::Kb64 => 64 * 1024,
        }
    }

    /// Alignment mask (`size - 1`).
    pub const fn mask(self) -> u32 {
        self.bytes() - 1
    }
}

impl fmt::Display for EraseBlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EraseBlockSize::Kb4 => write!(f, "4kB"),
            EraseBlockSize::Kb32 => write!(f, "32kB"),
            EraseBlockSize::Kb64 => write!(f, "64kB"),
        }
    }
}

/// Block-aligned erase span covering a write request.
///
/// Both ends are rounded out to block boundaries, so the erased span may
/// start before and end after the requested range. Everything inside the
/// span but outside the request is destroyed as well - programming at an
/// unaligned offset erases the neighbouring contents of those blocks. This
/// is a documented side effect of block-granular erasure, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseRange {
    /// First address of the span; `begin <= offset`
    pub begin: u32,
    /// One past the last address; `end >= offset + len`
    pub end: u32,
    /// Block size the span is aligned to
    pub block: EraseBlockSize,
}

impl EraseRange {
    /// The smallest block-aligned span covering `len` bytes at `offset`.
    pub fn covering(offset: u32, len: u32, block: EraseBlockSize) -> Self {
        let mask = block.mask();
        Self {
            begin: offset & !mask,
            end: (offset + len + mask) & !mask,
            block,
        }
    }

    /// Block start addresses, ascending.
    pub fn blocks(&self) -> impl Iterator<Item = u32> {
        (self.begin..self.end).step_by(self.block.bytes() as usize)
    }

    /// Span length in bytes.
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    /// True when the span contains no blocks.
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// One pass over a source stream mapped to flash addresses.
///
/// Owns the address cursor and the progress arithmetic shared by the
/// program and verify loops. The fraction only ever grows within a pass.
struct ProgramSession {
    offset: u32,
    total: u32,
    cursor: u32,
}

impl ProgramSession {
    fn new(offset: u32, total: u32) -> Self {
        Self {
            offset,
            total,
            cursor: 0,
        }
    }

    fn addr(&self) -> u32 {
        self.offset + self.cursor
    }

    fn advance(&mut self, n: u32) {
        self.cursor += n;
    }

    fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            f64::from(self.cursor) / f64::from(self.total)
        }
    }
}

// Read until `buf` is full or the stream ends; returns the byte count.
pub(crate) fn read_fill<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// Distance from `addr` to the next 256-byte page boundary.
fn page_room(addr: u32) -> usize {
    PAGE_SIZE - (addr as usize % PAGE_SIZE)
}

/// Erase every block of `range`, in ascending address order.
///
/// Each block is write-enabled, erased and waited on individually.
pub fn erase_blocks<T, P>(flash: &mut Flash<'_, T>, range: EraseRange, progress: &mut P) -> Result<()>
where
    T: SpiTransport,
    P: ProgressSink,
{
    progress.progress(Phase::Erase, 0.0, range.begin);

    for addr in range.blocks() {
        if progress.cancelled() {
            return Err(Error::Cancelled);
        }
        flash.write_enable()?;
        flash.sector_erase(range.block, addr)?;
        flash.wait_ready_with(progress)?;

        let done = addr + range.block.bytes() - range.begin;
        progress.progress(Phase::Erase, f64::from(done) / f64::from(range.len()), addr);
    }

    Ok(())
}

/// Erase the entire part with a single chip-erase command.
///
/// Mutually exclusive with block erasure.
pub fn erase_bulk<T, P>(flash: &mut Flash<'_, T>, progress: &mut P) -> Result<()>
where
    T: SpiTransport,
    P: ProgressSink,
{
    progress.progress(Phase::Erase, 0.0, 0);
    flash.write_enable()?;
    flash.bulk_erase()?;
    flash.wait_ready_with(progress)?;
    progress.progress(Phase::Erase, 1.0, 0);
    Ok(())
}

/// Stream `source` into flash starting at `offset`, one page-bounded chunk
/// at a time.
///
/// Each chunk is capped at the distance to the next 256-byte page boundary,
/// so no page-program command ever crosses a page even when `offset` is
/// unaligned. The loop stops when the stream ends; `total` is only used for
/// progress arithmetic.
pub fn program<T, R, P>(
    flash: &mut Flash<'_, T>,
    source: &mut R,
    offset: u32,
    total: u32,
    progress: &mut P,
) -> Result<()>
where
    T: SpiTransport,
    R: Read + ?Sized,
    P: ProgressSink,
{
    log::info!("programming..");

    let mut session = ProgramSession::new(offset, total);
    progress.progress(Phase::Program, 0.0, offset);

    let mut buf = [0u8; PAGE_SIZE];
    loop {
        if progress.cancelled() {
            return Err(Error::Cancelled);
        }
        let room = page_room(session.addr());
        let n = read_fill(source, &mut buf[..room])?;
        if n == 0 {
            break;
        }

        flash.write_enable()?;
        flash.page_program(session.addr(), &buf[..n])?;
        flash.wait_ready_with(progress)?;

        session.advance(n as u32);
        progress.progress(Phase::Program, session.fraction(), session.addr());
    }

    log::info!("done.");
    Ok(())
}

/// Compare flash contents against `source`, failing fast at the first
/// mismatching byte.
///
/// The source is read in fixed 256-byte chunks; each chunk is read back
/// from the same flash address range and compared byte for byte. On a
/// mismatch the scan stops immediately and the failing address is reported;
/// preceding erase/program work is not rolled back.
pub fn verify<T, R, P>(
    flash: &mut Flash<'_, T>,
    source: &mut R,
    offset: u32,
    total: u32,
    progress: &mut P,
) -> Result<()>
where
    T: SpiTransport,
    R: Read + ?Sized,
    P: ProgressSink,
{
    log::info!("reading..");

    let mut session = ProgramSession::new(offset, total);
    progress.progress(Phase::Verify, 0.0, offset);

    let mut file_buf = [0u8; PAGE_SIZE];
    let mut flash_buf = [0u8; PAGE_SIZE];
    loop {
        if progress.cancelled() {
            return Err(Error::Cancelled);
        }
        let n = read_fill(source, &mut file_buf)?;
        if n == 0 {
            break;
        }

        let addr = session.addr();
        flash.read(addr, &mut flash_buf[..n])?;

        if let Some(i) = file_buf[..n]
            .iter()
            .zip(&flash_buf[..n])
            .position(|(want, have)| want != have)
        {
            let mismatch = addr + i as u32;
            log::error!("Found difference between flash and file at 0x{:06X}!", mismatch);
            return Err(Error::VerifyMismatch { addr: mismatch });
        }

        session.advance(n as u32);
        progress.progress(Phase::Verify, session.fraction(), session.addr());
    }

    log::info!("VERIFY OK");
    Ok(())
}

/// Dump `len` bytes of flash starting at `offset` into `dest`.
///
/// Chunks are 256 bytes with an exact-length final partial chunk; there is
/// no comparison step.
pub fn read_back<T, W, P>(
    flash: &mut Flash<'_, T>,
    dest: &mut W,
    offset: u32,
    len: u32,
    progress: &mut P,
) -> Result<()>
where
    T: SpiTransport,
    W: Write + ?Sized,
    P: ProgressSink,
{
    log::info!("reading..");
    progress.progress(Phase::Read, 0.0, offset);

    let mut buf = [0u8; PAGE_SIZE];
    let mut done = 0u32;
    while done < len {
        if progress.cancelled() {
            return Err(Error::Cancelled);
        }
        let n = (len - done).min(PAGE_SIZE as u32) as usize;
        flash.read(offset + done, &mut buf[..n])?;
        dest.write_all(&buf[..n])?;

        done += n as u32;
        progress.progress(Phase::Read, f64::from(done) / f64::from(len), offset + done);
    }

    log::info!("done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_range_is_conservative_for_all_block_sizes() {
        let sizes = [EraseBlockSize::Kb4, EraseBlockSize::Kb32, EraseBlockSize::Kb64];
        let cases = [
            (0u32, 1u32),
            (0, 4096),
            (1, 4096),
            (0x1080, 1000),
            (0x1FFF, 2),
            (0x12345, 150_000),
            (0, 150_000),
        ];

        for block in sizes {
            for (offset, len) in cases {
                let range = EraseRange::covering(offset, len, block);
                assert!(range.begin <= offset);
                assert!(range.end >= offset + len);
                assert_eq!(range.begin & block.mask(), 0);
                assert_eq!(range.end & block.mask(), 0);
                // Rounding never adds more than one block on either side.
                assert!(offset - range.begin < block.bytes());
                assert!(range.end - (offset + len) < block.bytes());
            }
        }
    }

    #[test]
    fn erase_range_for_150k_file_is_three_64k_blocks() {
        let range = EraseRange::covering(0, 150_000, EraseBlockSize::Kb64);
        assert_eq!(range.begin, 0);
        assert_eq!(range.end, 196_608);
        assert_eq!(range.blocks().collect::<Vec<_>>(), vec![0, 0x10000, 0x20000]);
    }

    #[test]
    fn erase_range_blocks_are_ascending() {
        let range = EraseRange::covering(0x1080, 100_000, EraseBlockSize::Kb4);
        let blocks: Vec<u32> = range.blocks().collect();
        assert!(blocks.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(blocks.first(), Some(&0x1000));
    }

    #[test]
    fn zero_length_erase_range_has_no_blocks() {
        let range = EraseRange::covering(0x2000, 0, EraseBlockSize::Kb4);
        assert!(range.is_empty());
        assert_eq!(range.blocks().count(), 0);
    }

    #[test]
    fn chunks_never_cross_a_page_boundary() {
        // Walk the chunk sequence for several unaligned starts and check
        // every chunk stays within the page of its start address.
        for start in [0u32, 1, 128, 255, 0x1080, 0x12345] {
            let mut addr = start;
            let mut remaining = 1_000u32;
            while remaining > 0 {
                let chunk = (page_room(addr) as u32).min(remaining);
                let first_page = addr / PAGE_SIZE as u32;
                let last_page = (addr + chunk - 1) / PAGE_SIZE as u32;
                assert_eq!(first_page, last_page, "chunk at 0x{addr:06X} crosses a page");
                addr += chunk;
                remaining -= chunk;
            }
        }
    }

    #[test]
    fn chunk_count_for_150k_aligned_write() {
        let mut addr = 0u32;
        let mut remaining = 150_000u32;
        let mut chunks = 0;
        while remaining > 0 {
            let chunk = (page_room(addr) as u32).min(remaining);
            addr += chunk;
            remaining -= chunk;
            chunks += 1;
        }
        assert_eq!(chunks, 586);
        assert_eq!(addr, 150_000);
    }

    #[test]
    fn first_chunk_at_unaligned_offset_reaches_the_page_boundary() {
        assert_eq!(page_room(0x1080), 128);
        assert_eq!(page_room(0x10FF), 1);
        assert_eq!(page_room(0x1100), 256);
    }

    #[test]
    fn read_fill_tolerates_short_reads() {
        // A reader that trickles one byte at a time must still fill the
        // whole chunk before the engine sizes a page program.
        struct Trickle(Vec<u8>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }

        let mut source = Trickle((0..100u8).collect());
        let mut buf = [0u8; 64];
        assert_eq!(read_fill(&mut source, &mut buf).unwrap(), 64);
        assert_eq!(read_fill(&mut source, &mut buf).unwrap(), 36);
        assert_eq!(read_fill(&mut source, &mut buf).unwrap(), 0);
    }
}
