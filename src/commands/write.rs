//! Write command implementation

use super::create_progress_bar_with_phase;
use super::erase::erase_region_with_progress;
use qflash_model::{page_chunks, Bench};
use std::path::Path;

/// Run the write command
pub fn run_write(
    bench: &mut Bench,
    addr: u32,
    input: &Path,
    verify: bool,
    erase: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(input)?;
    if data.is_empty() {
        println!("Nothing to write: {:?} is empty", input);
        return Ok(());
    }
    if addr & 1 != 0 {
        return Err(format!("Write address 0x{:08X} must be even", addr).into());
    }
    let total_size = bench.flash().config().size;
    if addr as u64 + data.len() as u64 > total_size as u64 {
        return Err(format!(
            "File ({} bytes) does not fit at 0x{:08X} in {} bytes of flash",
            data.len(),
            addr,
            total_size
        )
        .into());
    }

    if erase {
        erase_region_with_progress(bench, addr, data.len() as u32)?;
    }

    let pb = create_progress_bar_with_phase(data.len() as u64, "Writing")?;
    for (page_addr, chunk) in page_chunks(addr, &data) {
        bench.program_page(page_addr, chunk)?;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_with_message("Write complete");

    if verify {
        let readback = bench.flash().read_bytes(addr, data.len());
        if let Some(offset) = readback.iter().zip(&data).position(|(a, b)| a != b) {
            return Err(format!(
                "Verification failed at 0x{:08X}: expected 0x{:02X}, found 0x{:02X}",
                addr + offset as u32,
                data[offset],
                readback[offset]
            )
            .into());
        }
        println!("Verified {} bytes", data.len());
    }

    let stats = bench.flash().stats();
    log::info!(
        "{} sector erases, {} buffer programs, {} status reads",
        stats.sector_erases,
        stats.buffer_programs,
        stats.status_reads
    );
    println!("Wrote {} bytes at 0x{:08X}", data.len(), addr);
    Ok(())
}
