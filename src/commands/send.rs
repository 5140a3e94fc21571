//! Raw bus-sender packet playback

use qflash_core::qspi::host::BusCommand;
use qflash_core::soc::{Indicators, REG_FLASH_STATUS};
use qflash_model::Bench;

/// Parse a hex string into bytes
///
/// Whitespace and `:` separators are ignored, as is a leading `0x`.
fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex byte '{}': {}", &digits[i..i + 2], e))
        })
        .collect()
}

/// Run the send command
pub fn run_send(bench: &mut Bench, packet: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex_bytes(packet)?;
    let command = BusCommand::parse(&bytes)?;
    println!(
        "Sending {} bytes to 0x{:03X}",
        command.data.len(),
        command.addr
    );
    bench.send(command)?;

    let ind = Indicators::from_bits_retain(bench.read(REG_FLASH_STATUS, 1)?[0]);
    println!("Status: {:?}", ind);
    if !bench.uart().is_empty() {
        println!("UART: {}", String::from_utf8_lossy(bench.uart()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("0x0102ff").unwrap(), vec![1, 2, 0xFF]);
        assert_eq!(
            parse_hex_bytes("03 00000000 00000002 3402").unwrap(),
            vec![3, 0, 0, 0, 0, 0, 0, 0, 2, 0x34, 0x02]
        );
        assert_eq!(parse_hex_bytes("de:ad").unwrap(), vec![0xDE, 0xAD]);
        assert!(parse_hex_bytes("abc").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }
}
