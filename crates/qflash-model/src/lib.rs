//! qflash-model - Simulation collaborators for the qflash peripheral
//!
//! This crate provides an in-memory HyperFlash device that answers the
//! flash sequencer edge by edge, and a [`Bench`] that wires a serial bus
//! host, the peripheral and the device together in the fixed per-tick
//! order. It is what the command-line tool and the scenario tests drive.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bench;
mod error;
mod flash;

pub use bench::{page_chunks, Bench, BenchConfig, DEFAULT_TIMEOUT};
pub use error::{ModelError, Result};
pub use flash::{FlashConfig, FlashModel, FlashStats, MAX_SIZE};
