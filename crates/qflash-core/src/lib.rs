//! qflash-core - Cycle-level models of a QSPI-attached flash programmer
//!
//! This crate holds the clocked state machines of a small bus peripheral:
//! a QSPI-style slave that turns a 4-bit serial stream into memory strobes,
//! a sequencer that erases and programs a HyperFlash device, and the
//! register file that connects the two. Every model is an explicitly stepped
//! [`Clocked`](clock::Clocked) component. The crate is `no_std` compatible.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`, adds serde
//!   derives and TOML configuration loading)
//! - `alloc` - Enable heap allocation for the host-side bus driver
//!
//! # Example
//!
//! ```ignore
//! use qflash_core::clock::Clocked;
//! use qflash_core::soc::{Soc, SocConfig, SocInput};
//!
//! let mut soc = Soc::new(SocConfig::default())?;
//! let out = soc.posedge(&SocInput::default());
//! soc.negedge();
//! assert!(out.flash.csn_o);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod clock;
#[cfg(feature = "std")]
pub mod config;
pub mod error;
pub mod hyperbus;
pub mod qspi;
pub mod soc;
pub mod sync;

pub use error::{Error, Result};
