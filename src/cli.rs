//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    qflash_core::config::parse_number(s)
}

#[derive(Parser)]
#[command(name = "qflash")]
#[command(author, version, about = "QSPI HyperFlash programmer simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Bench configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Initial read latency in clocks (sequencer and device)
    #[arg(long, global = true)]
    pub latency: Option<u8>,

    /// Ticks per flash sequencer clock
    #[arg(long, global = true)]
    pub flash_div: Option<u32>,

    /// Make the emulated device fail every erase
    #[arg(long, global = true)]
    pub fail_erase: bool,

    /// Make the emulated device fail every program
    #[arg(long, global = true)]
    pub fail_program: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Operation to trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TraceOp {
    /// Sector erase
    Erase,
    /// Buffered program of a short test pattern
    Write,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Erase the flash sectors covering a range
    Erase {
        /// Start address (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Length of the range to erase (hex or decimal, default one sector)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Program a file into flash
    Write {
        /// Start address (hex or decimal, must be even)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Skip reading the device back after programming
        #[arg(long)]
        no_verify: bool,

        /// Don't erase before writing
        #[arg(long)]
        no_erase: bool,
    },

    /// Play a raw bus-sender packet (opcode, address, length, payload)
    Send {
        /// Packet bytes as hex, e.g. "03 00000000 00000002 3402"
        #[arg(long)]
        packet: String,
    },

    /// Read peripheral memory over the serial bus
    Read {
        /// Bus address (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Number of bytes
        #[arg(long, value_parser = parse_hex_u32)]
        len: u32,

        /// Write the bytes to a file instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print every flash bus packet of one operation
    Trace {
        /// Operation to run
        #[arg(value_enum)]
        op: TraceOp,

        /// Flash address (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        addr: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "qflash", "-vv", "--latency", "12", "write", "--addr", "0x400", "-i", "fw.bin",
            "--no-erase",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.latency, Some(12));
        match cli.command {
            Commands::Write {
                addr, no_erase, no_verify, ..
            } => {
                assert_eq!(addr, 0x400);
                assert!(no_erase);
                assert!(!no_verify);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
