//! HyperFlash status register

use bitflags::bitflags;

bitflags! {
    /// Status register word returned by a status read
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusRegister: u16 {
        /// Device ready (embedded operation finished)
        const DEVICE_READY      = 1 << 7;
        /// Erase suspended
        const ERASE_SUSPENDED   = 1 << 6;
        /// Erase failed
        const ERASE_FAILED      = 1 << 5;
        /// Program failed
        const PROGRAM_FAILED    = 1 << 4;
        /// Write buffer load aborted
        const BUFFER_ABORT      = 1 << 3;
        /// Program suspended
        const PROGRAM_SUSPENDED = 1 << 2;
        /// Target sector is locked
        const SECTOR_LOCKED     = 1 << 1;

        /// Any failure indication
        const FAILURE = Self::ERASE_FAILED.bits()
            | Self::PROGRAM_FAILED.bits()
            | Self::BUFFER_ABORT.bits();
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        StatusRegister::DEVICE_READY
    }
}

impl StatusRegister {
    /// The device has finished its embedded operation
    pub fn is_ready(self) -> bool {
        self.contains(Self::DEVICE_READY)
    }

    /// The last operation reported a failure
    pub fn has_failed(self) -> bool {
        self.intersects(Self::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let busy = StatusRegister::from_bits_retain(0x0000);
        assert!(!busy.is_ready());
        let ok = StatusRegister::from_bits_retain(0x0080);
        assert!(ok.is_ready() && !ok.has_failed());
        let failed = StatusRegister::from_bits_retain(0x00A0);
        assert!(failed.is_ready() && failed.has_failed());
        assert!(StatusRegister::from_bits_retain(0x0088).has_failed());
        assert!(!StatusRegister::from_bits_retain(0x0082).has_failed());
    }
}
