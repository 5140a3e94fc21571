//! Error types for qflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Protocol faults seen while the models run are not
//! errors: they show up on the `err` output or in the log. This type covers
//! configuration and packet parsing.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    /// Initial latency must be between 2 and 31 clocks
    InvalidLatency(u8),
    /// Program length must be 1..=256 words
    InvalidLength(u16),
    /// Decoder address nibble count out of range
    InvalidAddressWidth(u8),
    /// Clock half period or divider must be non-zero
    InvalidTiming,

    // Bus errors
    /// Address does not fit the 23-bit bus address space
    AddressOutOfRange(u32),
    /// Flash start address does not fit 24 bits
    FlashAddressOutOfRange(u32),
    /// Bus command packet is shorter than its header or declared length
    TruncatedPacket,
    /// Bus command opcode is not known
    UnknownOpcode(u8),
    /// Transaction carries no data
    EmptyTransaction,

    // Config file errors
    /// Configuration file could not be parsed
    ConfigParse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLatency(l) => write!(f, "invalid initial latency {} (expected 2..=31)", l),
            Self::InvalidLength(n) => write!(f, "invalid program length {} (expected 1..=256 words)", n),
            Self::InvalidAddressWidth(n) => {
                write!(f, "invalid address width of {} nibbles (expected 1..=4)", n)
            }
            Self::InvalidTiming => write!(f, "clock periods must be non-zero"),
            Self::AddressOutOfRange(a) => write!(f, "bus address 0x{:08X} exceeds 23 bits", a),
            Self::FlashAddressOutOfRange(a) => {
                write!(f, "flash address 0x{:08X} exceeds 24 bits", a)
            }
            Self::TruncatedPacket => write!(f, "bus command packet truncated"),
            Self::UnknownOpcode(op) => write!(f, "unknown bus command opcode 0x{:02X}", op),
            Self::EmptyTransaction => write!(f, "transaction carries no data"),
            Self::ConfigParse => write!(f, "failed to parse configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
