//! iceflash-dummy - in-memory board emulator for testing
//!
//! Emulates the SPI bridge, a W25Q-style flash part and the FPGA control
//! lines well enough to run every engine operation without hardware. The
//! emulator decodes the chip-select and reset lines from the GPIO direction
//! mask, accumulates the bytes clocked within one chip-select window,
//! answers full-duplex reads on the fly and executes the framed command when
//! the window closes. Every operation is recorded so tests can assert on
//! exact command sequences.

use iceflash_core::error::Result;
use iceflash_core::transport::SpiTransport;

// Opcodes the emulated part responds to.
mod op {
    pub const WREN: u8 = 0x06;
    pub const WRDI: u8 = 0x04;
    pub const RDP: u8 = 0xAB;
    pub const RDID: u8 = 0x9F;
    pub const READ: u8 = 0x03;
    pub const PP: u8 = 0x02;
    pub const SE_4K: u8 = 0x20;
    pub const BE_32K: u8 = 0x52;
    pub const BE_64K: u8 = 0xD8;
    pub const CE: u8 = 0xC7;
    pub const RDSR: u8 = 0x05;
    pub const WRSR: u8 = 0x01;
    pub const RDSR2: u8 = 0x35;
    pub const WRSR2: u8 = 0x31;
    pub const DP: u8 = 0xB9;
}

// Direction-mask encoding of the board's control lines (active low, driven
// by setting the direction bit).
const DIR_CS: u8 = 0x10;
const DIR_CRESET: u8 = 0x80;
const CDONE: u8 = 0x40;

/// Emulated flash geometry and behaviour.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// JEDEC manufacturer byte
    pub manufacturer_id: u8,
    /// JEDEC device-ID bytes
    pub device_id: [u8; 2],
    /// Flash size in bytes
    pub size: usize,
    /// Extended JEDEC string returned after the fixed ID bytes
    pub extended_id: Vec<u8>,
    /// Report 0xFF for the extended-length byte (simulated bus read fault)
    pub ext_len_read_error: bool,
    /// Busy status reads reported after each write-initiating command
    /// before the part turns ready; exercises the poller hysteresis
    pub busy_polls: u32,
    /// Silently drop status-register writes (stuck protection bits)
    pub ignore_status_writes: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: [0x40, 0x16], // W25Q32
            size: 4 * 1024 * 1024,
            extended_id: Vec::new(),
            ext_len_read_error: false,
            busy_polls: 2,
            ignore_status_writes: false,
        }
    }
}

// Which device the asserted chip select is talking to. Flash is selected
// while the FPGA is held in reset; releasing the reset with chip select
// still asserted targets the configuration SRAM instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Flash,
    Sram,
}

/// In-memory board emulator implementing [`SpiTransport`].
pub struct DummyBoard {
    config: DummyConfig,
    memory: Vec<u8>,
    sr1: u8,
    sr2: u8,
    write_enabled: bool,
    powered_down: bool,
    cdone_high: bool,

    cs_asserted: bool,
    creset_asserted: bool,
    target: Target,
    frame: Vec<u8>,
    busy_countdown: u32,

    // Operation records for test assertions
    erases: Vec<(u8, u32)>,
    chip_erases: usize,
    programs: Vec<(u32, usize)>,
    reads: Vec<(u32, usize)>,
    id_reads: usize,
    status_reads: usize,
    sram_data: Vec<u8>,
    dummy_bytes: usize,
    dummy_bits: usize,
    transport_calls: usize,
}

impl DummyBoard {
    /// A board with the given flash behaviour, fully erased.
    pub fn new(config: DummyConfig) -> Self {
        let memory = vec![0xFF; config.size];
        Self {
            config,
            memory,
            sr1: 0,
            sr2: 0,
            write_enabled: false,
            powered_down: true,
            cdone_high: false,
            cs_asserted: false,
            creset_asserted: false,
            target: Target::Flash,
            frame: Vec::new(),
            busy_countdown: 0,
            erases: Vec::new(),
            chip_erases: 0,
            programs: Vec::new(),
            reads: Vec::new(),
            id_reads: 0,
            status_reads: 0,
            sram_data: Vec::new(),
            dummy_bytes: 0,
            dummy_bits: 0,
            transport_calls: 0,
        }
    }

    /// A board with the default W25Q32 behaviour.
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Flash contents.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Mutable flash contents, for seeding patterns or corrupting bytes.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Emulated status register 1 (protection bits).
    pub fn status1(&self) -> u8 {
        self.sr1
    }

    /// Force status register 1, e.g. to simulate a protected part.
    pub fn set_status1(&mut self, value: u8) {
        self.sr1 = value & 0xFC;
    }

    /// Emulated status register 2.
    pub fn status2(&self) -> u8 {
        self.sr2
    }

    /// The part is in deep power-down.
    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }

    /// Executed sector/block erases as `(opcode, address)`, in order.
    pub fn erases(&self) -> &[(u8, u32)] {
        &self.erases
    }

    /// Number of chip-erase commands executed.
    pub fn chip_erases(&self) -> usize {
        self.chip_erases
    }

    /// Executed page programs as `(address, length)`, in order.
    pub fn programs(&self) -> &[(u32, usize)] {
        &self.programs
    }

    /// Executed data reads as `(address, length)`, in order.
    pub fn reads(&self) -> &[(u32, usize)] {
        &self.reads
    }

    /// Number of JEDEC-ID transactions.
    pub fn id_reads(&self) -> usize {
        self.id_reads
    }

    /// Number of status-register-1 transactions.
    pub fn status_reads(&self) -> usize {
        self.status_reads
    }

    /// Bytes streamed to the configuration SRAM.
    pub fn sram_data(&self) -> &[u8] {
        &self.sram_data
    }

    /// Dummy trailer bytes clocked after an SRAM stream.
    pub fn dummy_bytes(&self) -> usize {
        self.dummy_bytes
    }

    /// Dummy trailer bits clocked after an SRAM stream.
    pub fn dummy_bits(&self) -> usize {
        self.dummy_bits
    }

    /// Total transport invocations, including GPIO and delays.
    pub fn transport_calls(&self) -> usize {
        self.transport_calls
    }

    fn frame_addr(&self) -> u32 {
        u32::from(self.frame[1]) << 16 | u32::from(self.frame[2]) << 8 | u32::from(self.frame[3])
    }

    // Response byte for the next clocked position, computed from the bytes
    // already in the frame.
    fn respond(&mut self, pos: usize) -> u8 {
        if pos == 0 {
            return 0x00;
        }
        match self.frame[0] {
            op::RDSR => {
                let busy = self.busy_countdown > 0;
                if busy {
                    self.busy_countdown -= 1;
                }
                let mut sr = self.sr1;
                if busy {
                    sr |= 0x01;
                }
                if self.write_enabled {
                    sr |= 0x02;
                }
                sr
            }
            op::RDSR2 => self.sr2,
            op::RDID => match pos {
                1 => self.config.manufacturer_id,
                2 => self.config.device_id[0],
                3 => self.config.device_id[1],
                4 => {
                    if self.config.ext_len_read_error {
                        0xFF
                    } else {
                        self.config.extended_id.len() as u8
                    }
                }
                _ => self
                    .config
                    .extended_id
                    .get(pos - 5)
                    .copied()
                    .unwrap_or(0x00),
            },
            op::READ if pos >= 4 => {
                let addr = self.frame_addr() as usize + (pos - 4);
                self.memory.get(addr).copied().unwrap_or(0xFF)
            }
            _ => 0x00,
        }
    }

    // Execute a completed flash command frame at chip-select deassert.
    fn execute_frame(&mut self) {
        if self.frame.is_empty() {
            return;
        }
        match self.frame[0] {
            op::WREN => self.write_enabled = true,
            op::WRDI => self.write_enabled = false,
            op::RDP => self.powered_down = false,
            op::DP => self.powered_down = true,
            op::RDID => self.id_reads += 1,
            op::RDSR => self.status_reads += 1,
            op::READ if self.frame.len() >= 4 => {
                let addr = self.frame_addr();
                self.reads.push((addr, self.frame.len() - 4));
            }
            op::PP if self.frame.len() >= 4 => {
                let addr = self.frame_addr();
                if self.write_enabled {
                    let data = self.frame[4..].to_vec();
                    self.programs.push((addr, data.len()));
                    for (i, byte) in data.iter().enumerate() {
                        if let Some(cell) = self.memory.get_mut(addr as usize + i) {
                            // Programming only clears bits.
                            *cell &= byte;
                        }
                    }
                    self.busy_countdown = self.config.busy_polls;
                } else {
                    log::warn!("page program without write enable, ignored");
                }
                self.write_enabled = false;
            }
            opcode @ (op::SE_4K | op::BE_32K | op::BE_64K) if self.frame.len() >= 4 => {
                let size = match opcode {
                    op::SE_4K => 4 * 1024,
                    op::BE_32K => 32 * 1024,
                    _ => 64 * 1024,
                };
                let addr = self.frame_addr();
                if self.write_enabled {
                    self.erases.push((opcode, addr));
                    let begin = addr as usize & !(size - 1);
                    let end = (begin + size).min(self.memory.len());
                    for byte in &mut self.memory[begin.min(end)..end] {
                        *byte = 0xFF;
                    }
                    self.busy_countdown = self.config.busy_polls;
                } else {
                    log::warn!("sector erase without write enable, ignored");
                }
                self.write_enabled = false;
            }
            op::CE => {
                if self.write_enabled {
                    self.chip_erases += 1;
                    self.memory.fill(0xFF);
                    self.busy_countdown = self.config.busy_polls;
                } else {
                    log::warn!("chip erase without write enable, ignored");
                }
                self.write_enabled = false;
            }
            op::WRSR => {
                if self.write_enabled {
                    if !self.config.ignore_status_writes && self.frame.len() >= 2 {
                        self.sr1 = self.frame[1] & 0xFC;
                    }
                    self.busy_countdown = self.config.busy_polls;
                }
                self.write_enabled = false;
            }
            op::WRSR2 => {
                if self.write_enabled {
                    if !self.config.ignore_status_writes && self.frame.len() >= 2 {
                        self.sr2 = self.frame[1];
                    }
                    self.busy_countdown = self.config.busy_polls;
                }
                self.write_enabled = false;
            }
            // Reset sequences and anything unrecognised are accepted and
            // ignored, like a real part in 1-bit mode.
            _ => {}
        }
    }
}

impl SpiTransport for DummyBoard {
    fn set_gpio(&mut self, _value: u8, direction: u8) -> Result<()> {
        self.transport_calls += 1;

        let cs = direction & DIR_CS != 0;
        let creset = direction & DIR_CRESET != 0;

        if self.cs_asserted && !cs && self.target == Target::Flash {
            self.execute_frame();
        }
        if cs && (!self.cs_asserted || creset != self.creset_asserted) {
            // A fresh select window. The flash is addressed while the FPGA
            // is held in reset; a released reset targets the SRAM instead.
            self.frame.clear();
            self.target = if creset { Target::Flash } else { Target::Sram };
        }

        self.cs_asserted = cs;
        self.creset_asserted = creset;
        Ok(())
    }

    fn read_low_gpio(&mut self) -> Result<u8> {
        self.transport_calls += 1;
        Ok(if self.cdone_high { CDONE } else { 0x00 })
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.transport_calls += 1;
        if !self.cs_asserted {
            log::warn!("send with chip select deasserted, dropped");
            return Ok(());
        }
        match self.target {
            Target::Flash => self.frame.extend_from_slice(data),
            Target::Sram => self.sram_data.extend_from_slice(data),
        }
        Ok(())
    }

    fn transfer(&mut self, data: &mut [u8]) -> Result<()> {
        self.transport_calls += 1;
        if !self.cs_asserted {
            log::warn!("transfer with chip select deasserted, dropped");
            return Ok(());
        }
        match self.target {
            Target::Flash => {
                for byte in data.iter_mut() {
                    let pos = self.frame.len();
                    let out = self.respond(pos);
                    self.frame.push(*byte);
                    *byte = out;
                }
            }
            Target::Sram => {
                self.sram_data.extend_from_slice(data);
                data.fill(0);
            }
        }
        Ok(())
    }

    fn transfer_bits(&mut self, _value: u8, _count: u8) -> Result<()> {
        self.transport_calls += 1;
        Ok(())
    }

    fn delay_us(&mut self, _us: u32) {
        self.transport_calls += 1;
    }

    fn send_dummy_bytes(&mut self, n: usize) -> Result<()> {
        self.transport_calls += 1;
        self.dummy_bytes += n;
        Ok(())
    }

    fn send_dummy_bit(&mut self) -> Result<()> {
        self.transport_calls += 1;
        self.dummy_bits += 1;
        if self.target == Target::Sram && !self.sram_data.is_empty() {
            // Configuration complete; the FPGA raises cdone.
            self.cdone_high = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iceflash_core::engine::EraseBlockSize;
    use iceflash_core::progress::{NoProgress, Phase, ProgressSink};
    use iceflash_core::runner::{run, Input, Mode, Operation, OperationIo};
    use iceflash_core::Error;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Collects progress updates and checks monotonicity per phase.
    #[derive(Default)]
    struct Collecting {
        updates: Vec<(Phase, f64, u32)>,
    }

    impl ProgressSink for Collecting {
        fn progress(&mut self, phase: Phase, fraction: f64, addr: u32) {
            self.updates.push((phase, fraction, addr));
        }
    }

    impl Collecting {
        fn assert_monotone(&self, phase: Phase) {
            let fractions: Vec<f64> = self
                .updates
                .iter()
                .filter(|(p, _, _)| *p == phase)
                .map(|(_, f, _)| *f)
                .collect();
            assert!(!fractions.is_empty(), "no updates for {phase:?}");
            assert_eq!(fractions[0], 0.0, "{phase:?} does not start at 0");
            assert!(
                fractions.windows(2).all(|w| w[0] <= w[1]),
                "{phase:?} fractions are not monotone: {fractions:?}"
            );
            assert_eq!(*fractions.last().unwrap(), 1.0, "{phase:?} does not end at 1");
        }
    }

    #[test]
    fn program_150k_erases_three_blocks_and_verifies() {
        let data = pattern(150_000);
        let mut board = DummyBoard::new_default();
        let mut progress = Collecting::default();

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &Operation::new(Mode::Program),
            OperationIo::Source(Input::Stream(&mut src)),
            &mut progress,
        )
        .unwrap();

        // Erase range [0, 196608): three ascending 64 KiB blocks.
        assert_eq!(
            board.erases(),
            &[(op::BE_64K, 0x00000), (op::BE_64K, 0x10000), (op::BE_64K, 0x20000)]
        );

        // 585 full pages plus one 240-byte tail.
        assert_eq!(board.programs().len(), 586);
        assert_eq!(board.programs()[0], (0, 256));
        assert_eq!(board.programs()[585], (149_760, 240));

        // Verify re-read the same 586 chunks.
        assert_eq!(board.reads().len(), 586);

        assert_eq!(&board.memory()[..150_000], &data[..]);
        assert!(board.memory()[150_000..196_608].iter().all(|&b| b == 0xFF));
        assert!(board.is_powered_down());

        progress.assert_monotone(Phase::Erase);
        progress.assert_monotone(Phase::Program);
        progress.assert_monotone(Phase::Verify);
    }

    #[test]
    fn corrupted_byte_fails_verification_at_its_address() {
        let data = pattern(150_000);
        let mut board = DummyBoard::new_default();

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.disable_verify = true;
        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        board.memory_mut()[0x1234] ^= 0x40;
        let reads_before = board.reads().len();

        let mut src: &[u8] = &data;
        let result = run(
            &mut board,
            &Operation::new(Mode::Check),
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        );

        assert!(matches!(result, Err(Error::VerifyMismatch { addr: 0x1234 })));

        // Fail-fast: the scan stopped inside the chunk holding the corrupt
        // byte (0x1234 lies in the 19th 256-byte chunk).
        assert_eq!(board.reads().len() - reads_before, 19);

        // Best-effort shutdown still powered the part down.
        assert!(board.is_powered_down());
    }

    #[test]
    fn read_back_300_bytes_uses_a_full_and_a_partial_chunk() {
        let mut board = DummyBoard::new_default();
        for (i, byte) in board.memory_mut()[0x1000..0x1200].iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(7);
        }

        let mut op_read = Operation::new(Mode::Read { size: 300 });
        op_read.offset = 0x1000;

        let mut out = Vec::new();
        run(
            &mut board,
            &op_read,
            OperationIo::Sink(&mut out),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.reads(), &[(0x1000, 256), (0x1100, 44)]);
        assert_eq!(out, &board.memory()[0x1000..0x112C]);
    }

    #[test]
    fn unaligned_offset_preserves_data_outside_the_erase_range() {
        let data = pattern(1000);
        let mut board = DummyBoard::new_default();
        board.memory_mut()[0x0FFF] = 0x11; // below the erase range
        board.memory_mut()[0x1000] = 0x22; // inside the range, before the write

        let mut op_write = Operation::new(Mode::Program);
        op_write.offset = 0x1080;
        op_write.erase_block = EraseBlockSize::Kb4;

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        // One 4 KiB block covers [0x1080, 0x1468).
        assert_eq!(board.erases(), &[(op::SE_4K, 0x1000)]);

        // The first chunk stops at the page boundary.
        assert_eq!(board.programs()[0], (0x1080, 128));

        assert_eq!(&board.memory()[0x1080..0x1468], &data[..]);
        // Outside the erase range survives; inside it is collateral damage.
        assert_eq!(board.memory()[0x0FFF], 0x11);
        assert_eq!(board.memory()[0x1000], 0xFF);
    }

    #[test]
    fn bulk_erase_wipes_the_whole_part() {
        let data = pattern(512);
        let mut board = DummyBoard::new_default();
        board.memory_mut()[0x300000] = 0x00;

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.bulk_erase = true;

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.chip_erases(), 1);
        assert!(board.erases().is_empty());
        assert_eq!(board.memory()[0x300000], 0xFF);
        assert_eq!(&board.memory()[..512], &data[..]);
    }

    #[test]
    fn no_erase_skips_all_erasure() {
        let data = pattern(512);
        let mut board = DummyBoard::new_default();

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.no_erase = true;

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        assert!(board.erases().is_empty());
        assert_eq!(board.chip_erases(), 0);
        assert_eq!(&board.memory()[..512], &data[..]);
    }

    #[test]
    fn erase_only_mode_touches_no_data_path() {
        let mut board = DummyBoard::new_default();

        run(
            &mut board,
            &Operation::new(Mode::Erase { size: 100_000 }),
            OperationIo::None,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.erases(), &[(op::BE_64K, 0x00000), (op::BE_64K, 0x10000)]);
        assert!(board.programs().is_empty());
        assert!(board.reads().is_empty());
    }

    #[test]
    fn sram_mode_streams_the_bitstream_with_trailer() {
        let bitstream = pattern(5000);
        let mut board = DummyBoard::new_default();

        let mut src: &[u8] = &bitstream;
        run(
            &mut board,
            &Operation::new(Mode::Sram),
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.sram_data(), &bitstream[..]);
        assert_eq!(board.dummy_bytes(), 6);
        assert_eq!(board.dummy_bits(), 1);

        // No flash traffic at all in SRAM mode.
        assert!(board.erases().is_empty());
        assert!(board.programs().is_empty());
        assert_eq!(board.id_reads(), 0);
    }

    #[test]
    fn read_id_mode_reads_the_jedec_id_once() {
        let mut board = DummyBoard::new(DummyConfig {
            extended_id: vec![0x12, 0x34],
            ..DummyConfig::default()
        });

        run(
            &mut board,
            &Operation::new(Mode::ReadId),
            OperationIo::None,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.id_reads(), 1);
        assert!(board.is_powered_down());
    }

    #[test]
    fn read_id_survives_an_extended_length_read_error() {
        let mut board = DummyBoard::new(DummyConfig {
            ext_len_read_error: true,
            ..DummyConfig::default()
        });

        run(
            &mut board,
            &Operation::new(Mode::ReadId),
            OperationIo::None,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.id_reads(), 1);
    }

    #[test]
    fn enable_quad_mode_sets_the_qe_bit() {
        let mut board = DummyBoard::new_default();

        run(
            &mut board,
            &Operation::new(Mode::EnableQuad),
            OperationIo::None,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.status2() & 0x02, 0x02);
    }

    #[test]
    fn enable_quad_with_stuck_register_still_succeeds() {
        let mut board = DummyBoard::new(DummyConfig {
            ignore_status_writes: true,
            ..DummyConfig::default()
        });

        // The QE bit never latches; that is a warning, not a failure.
        run(
            &mut board,
            &Operation::new(Mode::EnableQuad),
            OperationIo::None,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.status2() & 0x02, 0x00);
    }

    #[test]
    fn disable_protect_clears_the_status_register() {
        let data = pattern(256);
        let mut board = DummyBoard::new_default();
        board.set_status1(0x1C);

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.disable_protect = true;

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.status1(), 0x00);
        assert_eq!(&board.memory()[..256], &data[..]);
    }

    #[test]
    fn stuck_protection_is_a_warning_not_an_error() {
        let data = pattern(256);
        let mut board = DummyBoard::new(DummyConfig {
            ignore_status_writes: true,
            ..DummyConfig::default()
        });
        board.set_status1(0x1C);

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.disable_protect = true;

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(board.status1(), 0x1C);
    }

    #[test]
    fn slow_part_exercises_the_poller_hysteresis() {
        let data = pattern(256);
        let mut board = DummyBoard::new(DummyConfig {
            busy_polls: 5,
            ..DummyConfig::default()
        });

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.disable_verify = true;

        let mut src: &[u8] = &data;
        run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        )
        .unwrap();

        // One erase wait and one program wait: each sees 5 busy reads, then
        // 2 consecutive ready reads to satisfy the hysteresis.
        assert_eq!(board.status_reads(), 14);
    }

    #[test]
    fn cancellation_stops_between_chunks() {
        /// Requests cancellation after a few progress updates.
        #[derive(Default)]
        struct CancelAfter {
            updates: usize,
        }

        impl ProgressSink for CancelAfter {
            fn progress(&mut self, _phase: Phase, _fraction: f64, _addr: u32) {
                self.updates += 1;
            }
            fn cancelled(&self) -> bool {
                self.updates >= 5
            }
        }

        let data = pattern(150_000);
        let mut board = DummyBoard::new_default();
        let mut progress = CancelAfter::default();

        let mut src: &[u8] = &data;
        let result = run(
            &mut board,
            &Operation::new(Mode::Program),
            OperationIo::Source(Input::Stream(&mut src)),
            &mut progress,
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        // Shutdown still ran.
        assert!(board.is_powered_down());
        // The operation stopped early: nowhere near 586 pages.
        assert!(board.programs().len() < 10);
    }

    #[test]
    fn config_error_makes_no_transport_calls() {
        let mut board = DummyBoard::new_default();

        let mut op_write = Operation::new(Mode::Program);
        op_write.flags.bulk_erase = true;
        op_write.flags.no_erase = true;

        let data = pattern(256);
        let mut src: &[u8] = &data;
        let result = run(
            &mut board,
            &op_write,
            OperationIo::Source(Input::Stream(&mut src)),
            &mut NoProgress,
        );

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(board.transport_calls(), 0);
    }

    #[test]
    fn program_from_a_seekable_file() {
        let data = pattern(3000);
        let path = std::env::temp_dir().join(format!(
            "iceflash-dummy-test-{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, &data).unwrap();

        let mut board = DummyBoard::new_default();
        let mut file = std::fs::File::open(&path).unwrap();

        run(
            &mut board,
            &Operation::new(Mode::Program),
            OperationIo::Source(Input::File(&mut file)),
            &mut NoProgress,
        )
        .unwrap();

        std::fs::remove_file(&path).ok();

        assert_eq!(&board.memory()[..3000], &data[..]);
        // 3000 bytes is 11 full pages and a 184-byte tail.
        assert_eq!(board.programs().len(), 12);
    }
}
