//! Read command implementation

use qflash_model::Bench;
use std::path::Path;

/// Run the read command
pub fn run_read(
    bench: &mut Bench,
    addr: u32,
    len: usize,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = bench.read(addr, len)?;

    match output {
        Some(path) => {
            std::fs::write(path, &data)?;
            println!("Read {} bytes to {:?}", data.len(), path);
        }
        None => print!("{}", hexdump(addr, &data)),
    }
    Ok(())
}

/// Format bytes as a classic hexdump, 16 per line
fn hexdump(addr: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:08x}  {:<47}  |{}|\n",
            addr as usize + i * 16,
            hex.join(" "),
            ascii
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump() {
        let dump = hexdump(0x200, b"Hi\x00");
        assert_eq!(dump, format!("00000200  {:<47}  |Hi.|\n", "48 69 00"));
        assert_eq!(hexdump(0, &[0u8; 17]).lines().count(), 2);
    }
}
