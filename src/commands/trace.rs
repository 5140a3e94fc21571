//! Bus trace of a single flash operation

use crate::cli::TraceOp;
use qflash_model::Bench;

/// Words programmed by the write trace
const PATTERN: [u8; 4] = [0x34, 0x12, 0x78, 0x56];

/// Run the trace command
pub fn run_trace(
    bench: &mut Bench,
    op: TraceOp,
    addr: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    bench.set_tracing(true);
    match op {
        TraceOp::Erase => bench.erase_sector(addr)?,
        TraceOp::Write => bench.program_page(addr & !1, &PATTERN)?,
    }
    bench.set_tracing(false);

    let windows = bench.take_windows();
    let status_reads = windows.iter().filter(|w| w.is_read()).count();
    for window in &windows {
        println!("{}", window);
    }
    println!(
        "{} packets ({} status reads)",
        windows.len(),
        status_reads
    );
    Ok(())
}
