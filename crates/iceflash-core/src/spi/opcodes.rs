//! SPI flash command opcodes
//!
//! The command set of the Winbond W25Q-series parts fitted to the supported
//! boards. Each opcode is a fixed one-byte code defined here once.

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - required before every write/erase/status-write command
pub const WREN: u8 = 0x06;
/// Volatile SR Write Enable
pub const EWSR: u8 = 0x50;
/// Write Disable - clears the write-enable latch
pub const WRDI: u8 = 0x04;

// ============================================================================
// Power management
// ============================================================================

/// Release Power-Down, returns Device ID
pub const RDP: u8 = 0xAB;
/// Deep Power-Down
pub const DP: u8 = 0xB9;

// ============================================================================
// Identification
// ============================================================================

/// Read Manufacturer/Device ID (legacy)
pub const REMS: u8 = 0x90;
/// Read JEDEC ID (manufacturer + device ID + extended string)
pub const RDID: u8 = 0x9F;
/// Read Unique ID
pub const RDUID: u8 = 0x4B;

// ============================================================================
// Read
// ============================================================================

/// Read Data (3-byte address)
pub const READ: u8 = 0x03;
/// Fast Read (with dummy byte)
pub const FAST_READ: u8 = 0x0B;

// ============================================================================
// Program / erase
// ============================================================================

/// Page Program (up to 256 bytes within one page)
pub const PP: u8 = 0x02;
/// Sector Erase 4 KiB
pub const SE_4K: u8 = 0x20;
/// Block Erase 32 KiB
pub const BE_32K: u8 = 0x52;
/// Block Erase 64 KiB
pub const BE_64K: u8 = 0xD8;
/// Chip Erase
pub const CE: u8 = 0xC7;

// ============================================================================
// Status register operations
// ============================================================================

/// Read Status Register 1
pub const RDSR: u8 = 0x05;
/// Write Status Register 1
pub const WRSR: u8 = 0x01;
/// Read Status Register 2
pub const RDSR2: u8 = 0x35;
/// Write Status Register 2
pub const WRSR2: u8 = 0x31;
/// Read Status Register 3
pub const RDSR3: u8 = 0x15;
/// Write Status Register 3
pub const WRSR3: u8 = 0x11;

// ============================================================================
// SFDP and security registers
// ============================================================================

/// Read SFDP Register
pub const RDSFDP: u8 = 0x5A;
/// Erase Security Register
pub const ERSR: u8 = 0x44;
/// Program Security Register
pub const PRSR: u8 = 0x42;
/// Read Security Register
pub const RDSCUR: u8 = 0x48;

// ============================================================================
// Block protection
// ============================================================================

/// Global Block Lock
pub const GBL: u8 = 0x7E;
/// Global Block Unlock
pub const GBU: u8 = 0x98;
/// Read Block Lock
pub const RBL: u8 = 0x3D;
/// Read Sector Protection Registers (Adesto)
pub const RPR: u8 = 0x3C;
/// Individual Block Lock
pub const IBL: u8 = 0x36;
/// Individual Block Unlock
pub const IBU: u8 = 0x39;

// ============================================================================
// Suspend / resume
// ============================================================================

/// Erase / Program Suspend
pub const SUSPEND: u8 = 0x75;
/// Erase / Program Resume
pub const RESUME: u8 = 0x7A;

// ============================================================================
// Mode control and reset
// ============================================================================

/// Enter QPI mode
pub const EQIO: u8 = 0x38;
/// Enable Reset
pub const RSTEN: u8 = 0x66;
/// Reset Device
pub const RST: u8 = 0x99;
