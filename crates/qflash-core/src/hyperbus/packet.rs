//! Command/address packet and the bus shift register
//!
//! A packet is kept as named fields and only turned into the 64-bit vector
//! at the shift register:
//!
//! | Bits | Field |
//! |------|-------|
//! | 63 | direction (1 = read) |
//! | 62 | address space (1 = register) |
//! | 61 | burst type (1 = linear) |
//! | 60..32 | upper address |
//! | 31..19 | reserved, zero |
//! | 18..16 | lower address |
//! | 15..0 | payload (command, unlock key or data word) |

use super::opcodes::{SECTOR_FIELD_SHIFT, SECTOR_MASK};

const UPPER_MASK: u32 = (1 << 29) - 1;
const LOWER_MASK: u8 = 0x7;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Controller writes the payload
    Write,
    /// Device returns data after the latency window
    Read,
}

/// Target address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    /// Flash array and command interface
    Memory,
    /// Configuration registers
    Register,
}

/// Burst type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    /// Wrapped burst
    Wrapped,
    /// Linear burst
    Linear,
}

/// One bus packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Read or write
    pub direction: Direction,
    /// Memory or register space
    pub space: AddressSpace,
    /// Burst type
    pub burst: Burst,
    /// Address bits above the lower three (29 bits)
    pub upper: u32,
    /// Lowest three word-address bits
    pub lower: u8,
    /// Payload word
    pub payload: u16,
}

impl Packet {
    /// Write `payload` to word address `addr`
    pub const fn word(addr: u32, payload: u16) -> Self {
        Self {
            direction: Direction::Write,
            space: AddressSpace::Memory,
            burst: Burst::Wrapped,
            upper: (addr >> 3) & UPPER_MASK,
            lower: (addr & LOWER_MASK as u32) as u8,
            payload,
        }
    }

    /// Write `payload` to sector `sector`
    pub const fn sector(sector: u32, payload: u16) -> Self {
        Self {
            direction: Direction::Write,
            space: AddressSpace::Memory,
            burst: Burst::Wrapped,
            upper: (sector & SECTOR_MASK) << SECTOR_FIELD_SHIFT,
            lower: 0,
            payload,
        }
    }

    /// Read header for word address `addr`
    pub const fn read(addr: u32) -> Self {
        let mut p = Self::word(addr, 0);
        p.direction = Direction::Read;
        p
    }

    /// Word address carried by the header
    pub const fn word_address(&self) -> u32 {
        (self.upper << 3) | self.lower as u32
    }

    /// Sector number carried by the header
    pub const fn sector_number(&self) -> u32 {
        (self.upper >> SECTOR_FIELD_SHIFT) & SECTOR_MASK
    }

    /// Serialize to the 64-bit bus vector
    pub const fn to_bits(&self) -> u64 {
        let mut bits = 0u64;
        if matches!(self.direction, Direction::Read) {
            bits |= 1 << 63;
        }
        if matches!(self.space, AddressSpace::Register) {
            bits |= 1 << 62;
        }
        if matches!(self.burst, Burst::Linear) {
            bits |= 1 << 61;
        }
        bits |= ((self.upper & UPPER_MASK) as u64) << 32;
        bits |= ((self.lower & LOWER_MASK) as u64) << 16;
        bits | self.payload as u64
    }

    /// Parse a 64-bit bus vector; reserved bits are ignored
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            direction: if bits & (1 << 63) != 0 {
                Direction::Read
            } else {
                Direction::Write
            },
            space: if bits & (1 << 62) != 0 {
                AddressSpace::Register
            } else {
                AddressSpace::Memory
            },
            burst: if bits & (1 << 61) != 0 {
                Burst::Linear
            } else {
                Burst::Wrapped
            },
            upper: ((bits >> 32) as u32) & UPPER_MASK,
            lower: ((bits >> 16) as u8) & LOWER_MASK,
            payload: bits as u16,
        }
    }

    /// Parse the six header bytes as they appear on the bus
    pub fn from_header(bytes: [u8; 6]) -> Self {
        let mut bits = 0u64;
        for b in bytes {
            bits = (bits << 8) | b as u64;
        }
        Self::from_bits(bits << 16)
    }
}

/// 64-bit shift register between the packet and the 8-bit bus
///
/// The top byte is always on the data lines. Each active edge shifts the
/// vector up one byte and takes the input byte in at the bottom, so the same
/// register serializes outbound packets and collects inbound data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftRegister(u64);

impl ShiftRegister {
    /// Load a complete packet
    pub fn load(&mut self, packet: &Packet) {
        self.0 = packet.to_bits();
    }

    /// Load only the 48 header bits, keeping the current low 16 bits
    pub fn load_header(&mut self, packet: &Packet) {
        self.0 = (packet.to_bits() & !0xFFFF) | (self.0 & 0xFFFF);
    }

    /// Zero the register
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Byte currently on the data lines
    pub const fn out_byte(&self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Shift by one byte, taking `input` in at the bottom
    pub fn shift_in(&mut self, input: u8) {
        self.0 = (self.0 << 8) | input as u64;
    }

    /// Low 16 bits (the payload, or the last two bytes shifted in)
    pub const fn payload(&self) -> u16 {
        self.0 as u16
    }

    /// Raw vector
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Decode the current contents as a packet
    pub const fn packet(&self) -> Packet {
        Packet::from_bits(self.0)
    }
}
