//! CLI command implementations
//!
//! Each command drives a [`qflash_model::Bench`] through the serial bus, the
//! way a host attached to the peripheral would.

pub mod erase;
pub mod read;
pub mod send;
pub mod trace;
pub mod write;

use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Sector start addresses covering `[addr, addr + len)`
fn sectors(addr: u32, len: u32, size: u32) -> Vec<u32> {
    let first = addr & !(size - 1);
    let end = addr.saturating_add(len.max(1));
    (first..end).step_by(size as usize).collect()
}
