//! Status register 1 contents

use bitflags::bitflags;

bitflags! {
    /// Status register 1 of the flash part.
    ///
    /// A read-only snapshot; the register is re-fetched from the device on
    /// every poll rather than cached.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Write/erase operation in progress (~RDY, also called WIP)
        const BUSY = 1 << 0;
        /// Write-enable latch
        const WEL = 1 << 1;
        /// Software protection range, low bit
        const SWP0 = 1 << 2;
        /// Software protection range, high bit
        const SWP1 = 1 << 3;
        /// ~WP pin state
        const WPN = 1 << 4;
        /// Erase/program error
        const EPE = 1 << 5;
        /// Sequential program mode
        const SPM = 1 << 6;
        /// Status-register protection lock
        const SPRL = 1 << 7;
    }
}

impl Status {
    /// An internal write/erase/program operation is still running.
    pub fn is_busy(self) -> bool {
        self.contains(Status::BUSY)
    }

    /// Two-bit software-protection range field (bits 2-3).
    pub fn protection_range(self) -> u8 {
        (self.bits() >> 2) & 0x3
    }

    /// Dump a field-by-field decode at debug level.
    pub fn log_decode(self) {
        log::debug!("SR1: 0x{:02X}", self.bits());
        log::debug!(
            " - SPRL: {}",
            if self.contains(Status::SPRL) { "locked" } else { "unlocked" }
        );
        log::debug!(
            " -  SPM: {}",
            if self.contains(Status::SPM) {
                "Sequential Prog Mode"
            } else {
                "Byte/Page Prog Mode"
            }
        );
        log::debug!(
            " -  EPE: {}",
            if self.contains(Status::EPE) {
                "Erase/Prog error"
            } else {
                "Erase/Prog success"
            }
        );
        log::debug!(
            " -  ~WP: {}",
            if self.contains(Status::WPN) { "deasserted" } else { "asserted" }
        );
        log::debug!(
            " -  SWP: {}",
            match self.protection_range() {
                0 => "All sectors unprotected",
                1 => "Some sectors protected",
                2 => "Reserved (xxxx 10xx)",
                _ => "All sectors protected",
            }
        );
        log::debug!(
            " -  WEL: {}",
            if self.contains(Status::WEL) {
                "Write enabled"
            } else {
                "Not write enabled"
            }
        );
        log::debug!(
            " - ~RDY: {}",
            if self.is_busy() { "Busy" } else { "Ready" }
        );
    }
}
