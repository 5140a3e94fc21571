//! Erase command implementation

use super::{create_progress_bar_with_phase, sectors};
use qflash_model::Bench;

/// Run the erase command
pub fn run_erase(
    bench: &mut Bench,
    addr: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sector_size = bench.flash().config().sector_size;
    let total_size = bench.flash().config().size;
    let length = length.unwrap_or(sector_size);

    if addr as u64 + length as u64 > total_size as u64 {
        return Err(format!(
            "Erase range 0x{:08X}..0x{:08X} is outside flash bounds (0x{:08X})",
            addr,
            addr as u64 + length as u64,
            total_size
        )
        .into());
    }

    erase_region_with_progress(bench, addr, length)?;
    println!("Erased sectors covering 0x{:08X}..0x{:08X}", addr, addr + length);
    Ok(())
}

/// Erase every sector touched by a region, with a progress bar
pub fn erase_region_with_progress(
    bench: &mut Bench,
    addr: u32,
    length: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let sector_size = bench.flash().config().sector_size;
    let list = sectors(addr, length, sector_size);

    let pb = create_progress_bar_with_phase(list.len() as u64 * sector_size as u64, "Erasing")?;
    for start in list {
        log::debug!("Erasing sector at 0x{:08X}", start);
        bench.erase_sector(start)?;
        pb.inc(sector_size as u64);
    }
    pb.finish_with_message("Erase complete");
    Ok(())
}
