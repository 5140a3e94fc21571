//! Error types for the simulation bench

use thiserror::Error;

/// Bench and device model errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid parameters or configuration file
    #[error("Configuration error: {0}")]
    Config(#[from] qflash_core::Error),

    /// Device size is not a whole number of sectors
    #[error("Invalid flash geometry: size 0x{size:X}, sector size 0x{sector_size:X}")]
    InvalidGeometry {
        /// Device size in bytes
        size: u32,
        /// Sector size in bytes
        sector_size: u32,
    },

    /// Configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The peripheral did not finish in time
    #[error("Timed out after {0} ticks")]
    Timeout(u64),

    /// The device reported a failed erase or program
    #[error("Flash operation failed (status 0x{0:04X})")]
    FlashFailed(u16),

    /// Program address is not on a word boundary
    #[error("Address 0x{0:06X} is not word aligned")]
    Unaligned(u32),

    /// Range does not fit the device
    #[error("Range 0x{addr:06X}+0x{len:X} exceeds the flash size")]
    OutOfRange {
        /// Start byte address
        addr: u32,
        /// Length in bytes
        len: usize,
    },

    /// The serial bus host finished with an unexpected completion
    #[error("Unexpected bus completion")]
    Protocol,
}

/// Result type for bench operations
pub type Result<T> = core::result::Result<T, ModelError>;
