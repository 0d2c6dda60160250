//! Flash command layer
//!
//! Encodes each flash operation as an SPI command frame. Every operation is
//! one atomic chip-select transaction: assert, transmit the command (plus
//! address and payload), deassert. Chip select is never left asserted across
//! two logical operations.

use std::fmt;

use crate::engine::EraseBlockSize;
use crate::error::{Error, Result};
use crate::poller::{Poll, ReadyPoller, DEFAULT_MAX_POLLS, POLL_INTERVAL_US};
use crate::progress::{NoProgress, ProgressSink};
use crate::spi::{encode_addr, opcodes, Status};
use crate::transport::SpiTransport;

/// Physical page size; a single program command must stay within one page.
pub const PAGE_SIZE: usize = 256;

// GPIO mapping on the supported boards. Output values stay low; a line is
// asserted (driven low) by setting its direction bit.
const GPIO_VALUE: u8 = 0x00;
const DIR_BASE: u8 = 0x03;
/// ADBUS4 (GPIOL0): flash chip select, active low
const DIR_CS: u8 = 0x10;
/// ADBUS7 (GPIOL3): FPGA reset, active low
const DIR_CRESET: u8 = 0x80;
/// ADBUS6 (GPIOL2): FPGA configuration-done
const CDONE_MASK: u8 = 0x40;

/// JEDEC identification response. Display/logging only; control flow never
/// branches on the contents beyond the read-error flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JedecId {
    /// Manufacturer byte
    pub manufacturer: u8,
    /// Two device-ID bytes
    pub device: [u8; 2],
    /// Extended device string, when the part reports one
    pub extended: Vec<u8>,
    /// The extended-length byte read back as 0xFF, which indicates a bus
    /// read error rather than a real length
    pub ext_read_error: bool,
}

impl fmt::Display for JedecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:02X} 0x{:02X} 0x{:02X}",
            self.manufacturer, self.device[0], self.device[1]
        )?;
        for byte in &self.extended {
            write!(f, " 0x{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Issues flash commands over a borrowed transport.
///
/// Holds no device state of its own; the status register is re-read from
/// the part whenever it is needed.
pub struct Flash<'a, T: SpiTransport> {
    pub(crate) transport: &'a mut T,
    max_polls: u32,
}

impl<'a, T: SpiTransport> Flash<'a, T> {
    /// Wrap an open transport.
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Override the poll budget used by [`Flash::wait_ready`].
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    // Both lines are active low and asserted by setting their direction bit.
    fn set_cs_creset(&mut self, cs_n: bool, creset_n: bool) -> Result<()> {
        let mut direction = DIR_BASE;
        if !cs_n {
            direction |= DIR_CS;
        }
        if !creset_n {
            direction |= DIR_CRESET;
        }
        self.transport.set_gpio(GPIO_VALUE, direction)
    }

    /// Release the FPGA reset; the flash chip select is deasserted with it.
    pub fn release_reset(&mut self) -> Result<()> {
        self.set_cs_creset(true, true)
    }

    /// Assert flash chip select. Only valid while the FPGA is held in reset.
    fn chip_select(&mut self) -> Result<()> {
        self.set_cs_creset(false, false)
    }

    /// Deassert flash chip select, keeping the FPGA in reset.
    pub fn chip_deselect(&mut self) -> Result<()> {
        self.set_cs_creset(true, false)
    }

    /// Assert chip select and reset together (SRAM programming entry).
    ///
    /// Drives the same lines as a flash chip select; named separately for
    /// ease of code reading.
    pub fn sram_reset(&mut self) -> Result<()> {
        self.set_cs_creset(false, false)
    }

    /// Select the FPGA SRAM target; the reset is released for SRAM access.
    pub fn sram_chip_select(&mut self) -> Result<()> {
        self.set_cs_creset(false, true)
    }

    /// Sample the configuration-done signal.
    pub fn read_cdone(&mut self) -> Result<bool> {
        Ok(self.transport.read_low_gpio()? & CDONE_MASK != 0)
    }

    fn simple_command(&mut self, opcode: u8) -> Result<()> {
        let mut buf = [opcode];
        self.chip_select()?;
        self.transport.transfer(&mut buf)?;
        self.chip_deselect()
    }

    /// Read the JEDEC identification in a single chip-select transaction.
    ///
    /// An extended-length byte of 0xFF is treated as a read error: the fixed
    /// bytes are returned as-is, no further bytes are clocked, and the
    /// response is flagged.
    pub fn read_id(&mut self) -> Result<JedecId> {
        log::debug!("read flash ID..");

        let mut buf = [0u8; 5];
        buf[0] = opcodes::RDID;
        self.chip_select()?;
        self.transport.transfer(&mut buf)?;

        let mut id = JedecId {
            manufacturer: buf[1],
            device: [buf[2], buf[3]],
            extended: Vec::new(),
            ext_read_error: false,
        };

        let ext_len = buf[4];
        if ext_len == 0xFF {
            log::warn!(
                "Extended Device String Length is 0xFF, this is likely a read error. Ignoring..."
            );
            id.ext_read_error = true;
        } else if ext_len != 0 {
            let mut extended = vec![0u8; ext_len as usize];
            self.transport.transfer(&mut extended)?;
            id.extended = extended;
        }

        self.chip_deselect()?;

        log::info!("flash ID: {}", id);
        Ok(id)
    }

    // One raw status-register-1 transaction, without the settle delay.
    fn status_transaction(&mut self) -> Result<Status> {
        let mut buf = [opcodes::RDSR, 0x00];
        self.chip_select()?;
        self.transport.transfer(&mut buf)?;
        self.chip_deselect()?;
        Ok(Status::from_bits_retain(buf[1]))
    }

    /// Read status register 1.
    ///
    /// The part needs a short settle time after a status read; the ~1 ms
    /// delay is applied here so callers cannot skip it.
    pub fn read_status(&mut self) -> Result<Status> {
        let status = self.status_transaction()?;
        status.log_decode();
        self.transport.delay_us(1_000);
        Ok(status)
    }

    /// Set the write-enable latch.
    ///
    /// The device clears the latch again after every erase, program,
    /// status-write or protection command, so this must be sent immediately
    /// before each one.
    pub fn write_enable(&mut self) -> Result<()> {
        log::debug!("write enable..");
        self.simple_command(opcodes::WREN)
    }

    /// Erase one block at `addr`.
    ///
    /// Callers send [`Flash::write_enable`] first and [`Flash::wait_ready`]
    /// after.
    pub fn sector_erase(&mut self, block: EraseBlockSize, addr: u32) -> Result<()> {
        log::info!("erase {} sector at 0x{:06X}..", block, addr);

        let a = encode_addr(addr);
        let command = [block.opcode(), a[0], a[1], a[2]];
        self.chip_select()?;
        self.transport.send(&command)?;
        self.chip_deselect()
    }

    /// Erase the entire part.
    ///
    /// Callers send [`Flash::write_enable`] first and [`Flash::wait_ready`]
    /// after.
    pub fn bulk_erase(&mut self) -> Result<()> {
        log::info!("bulk erase..");
        self.simple_command(opcodes::CE)
    }

    /// Program up to one page at `addr`.
    ///
    /// `data` must be at most [`PAGE_SIZE`] bytes and must not cross a
    /// 256-byte page boundary relative to `addr`; the engine's chunking
    /// guarantees this for its callers.
    pub fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= PAGE_SIZE);
        log::debug!("prog 0x{:06X} +0x{:03X}..", addr, data.len());

        let a = encode_addr(addr);
        let command = [opcodes::PP, a[0], a[1], a[2]];
        self.chip_select()?;
        self.transport.send(&command)?;
        self.transport.send(data)?;
        self.chip_deselect()
    }

    /// Read `buf.len()` bytes starting at `addr`.
    ///
    /// The buffer is zeroed before the transfer so a transport fault shows
    /// up as zeros rather than stale contents.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        log::debug!("read 0x{:06X} +0x{:03X}..", addr, buf.len());

        let a = encode_addr(addr);
        let command = [opcodes::READ, a[0], a[1], a[2]];
        self.chip_select()?;
        self.transport.send(&command)?;
        buf.fill(0);
        self.transport.transfer(buf)?;
        self.chip_deselect()
    }

    /// Release the part from deep power-down.
    pub fn power_up(&mut self) -> Result<()> {
        self.simple_command(opcodes::RDP)
    }

    /// Put the part into deep power-down.
    pub fn power_down(&mut self) -> Result<()> {
        self.simple_command(opcodes::DP)
    }

    /// Return the part to plain 1-bit SPI mode.
    ///
    /// An all-ones 8-byte frame drops continuous-read mode, then a 2-bit
    /// all-ones frame drops QPI mode; each is its own chip-select
    /// transaction.
    pub fn reset(&mut self) -> Result<()> {
        let mut ones = [0xFFu8; 8];
        self.chip_select()?;
        self.transport.transfer(&mut ones)?;
        self.chip_deselect()?;

        self.chip_select()?;
        self.transport.transfer_bits(0xFF, 2)?;
        self.chip_deselect()
    }

    /// Clear status register 1, dropping any block-protection bits.
    ///
    /// Callers send [`Flash::write_enable`] first. Failure to clear the
    /// register is a warning, not an error: the operation continues and may
    /// still succeed on unprotected ranges.
    pub fn disable_protection(&mut self) -> Result<()> {
        log::info!("disable flash protection...");

        let mut command = [opcodes::WRSR, 0x00];
        self.chip_select()?;
        self.transport.transfer(&mut command)?;
        self.chip_deselect()?;

        self.wait_ready()?;

        let status = self.status_transaction()?;
        if !status.is_empty() {
            log::warn!(
                "failed to disable protection, SR now equal to 0x{:02X} (expected 0x00)",
                status.bits()
            );
        }
        Ok(())
    }

    /// Set the quad-enable bit in status register 2.
    ///
    /// Failure of the bit to latch is a warning, not an error.
    pub fn enable_quad(&mut self) -> Result<()> {
        log::info!("Enabling Quad operation...");

        self.write_enable()?;

        let mut command = [opcodes::WRSR2, 0x02];
        self.chip_select()?;
        self.transport.transfer(&mut command)?;
        self.chip_deselect()?;

        self.wait_ready()?;

        let mut buf = [opcodes::RDSR2, 0x00];
        self.chip_select()?;
        self.transport.transfer(&mut buf)?;
        self.chip_deselect()?;

        if buf[1] & 0x02 != 0x02 {
            log::warn!(
                "failed to set QE=1, SR2 now equal to 0x{:02X} (expected 0x{:02X})",
                buf[1],
                buf[1] | 0x02
            );
        }
        log::info!("SR2: 0x{:02X}", buf[1]);
        Ok(())
    }

    /// Poll the status register until the part reports ready.
    pub fn wait_ready(&mut self) -> Result<()> {
        self.wait_ready_with(&NoProgress)
    }

    /// As [`Flash::wait_ready`], checking for cancellation between ticks.
    pub fn wait_ready_with<P: ProgressSink>(&mut self, progress: &P) -> Result<()> {
        log::debug!("waiting..");

        let mut poller = ReadyPoller::with_max_polls(self.max_polls);
        loop {
            if progress.cancelled() {
                return Err(Error::Cancelled);
            }
            let status = self.status_transaction()?;
            match poller.observe(status)? {
                Poll::Ready => return Ok(()),
                Poll::Pending => self.transport.delay_us(POLL_INTERVAL_US),
            }
        }
    }
}
