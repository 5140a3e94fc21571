//! HyperFlash command set constants
//!
//! Addresses are word addresses. Commands go out as the payload of a write
//! packet; sector-addressed commands carry the sector number in the upper
//! address bits.

/// First unlock cycle address
pub const UNLOCK1_ADDR: u32 = 0x555;
/// First unlock cycle data
pub const UNLOCK1_DATA: u16 = 0xAA;
/// Second unlock cycle address
pub const UNLOCK2_ADDR: u32 = 0x2AA;
/// Second unlock cycle data
pub const UNLOCK2_DATA: u16 = 0x55;
/// Address for non-sector commands
pub const CMD_ADDR: u32 = 0x555;

/// Erase setup (followed by a second unlock pair)
pub const ERASE_SETUP: u16 = 0x80;
/// Sector erase
pub const SECTOR_ERASE: u16 = 0x30;
/// Chip erase
pub const CHIP_ERASE: u16 = 0x10;
/// Write to buffer (followed by word count and data)
pub const WRITE_BUFFER_LOAD: u16 = 0x25;
/// Program buffer to flash
pub const WRITE_BUFFER_CONFIRM: u16 = 0x29;
/// Enter status register read
pub const STATUS_READ: u16 = 0x70;
/// Clear status register
pub const STATUS_CLEAR: u16 = 0x71;
/// Reset / return to array read
pub const RESET: u16 = 0xF0;

/// Byte address bit where the sector number starts (256 KiB sectors)
pub const SECTOR_SHIFT: u32 = 18;
/// Sector number width taken from a 24-bit byte address
pub const SECTOR_MASK: u32 = 0x3F;
/// Sector number position inside the packet's upper address field
pub const SECTOR_FIELD_SHIFT: u32 = 14;
/// Write buffer capacity in words
pub const WRITE_BUFFER_WORDS: u16 = 256;
/// Word address width
pub const WORD_ADDR_MASK: u32 = (1 << 23) - 1;

/// Sector number of a byte address
pub const fn sector_of(byte_addr: u32) -> u32 {
    (byte_addr >> SECTOR_SHIFT) & SECTOR_MASK
}

/// Word address of a byte address
pub const fn word_of(byte_addr: u32) -> u32 {
    (byte_addr >> 1) & WORD_ADDR_MASK
}
