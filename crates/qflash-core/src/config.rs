//! Configuration file helpers
//!
//! Configuration structs derive `serde::Deserialize` and default every
//! missing field, so a file only needs the values it changes:
//!
//! ```toml
//! flash_div = 2
//!
//! [sequencer]
//! init_latency = 12
//! ```
//!
//! Sizes and addresses may be written as integers, hex strings (`"0x40000"`)
//! or sizes with a unit (`"256 KiB"`).

use std::format;
use std::string::String;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Parse a TOML document into a configuration struct
pub fn from_toml_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        Error::ConfigParse
    })
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> core::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "64 MiB", "0x40000" or "4096"
pub fn parse_size(s: &str) -> core::result::Result<u32, String> {
    let s = s.trim();
    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: u32 = num.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum IntOrStr {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
pub fn deserialize_hex_u32<'de, D>(deserializer: D) -> core::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match IntOrStr::deserialize(deserializer)? {
        IntOrStr::Int(n) => Ok(n),
        IntOrStr::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a byte size that can carry a KiB/MiB unit
pub fn deserialize_size<'de, D>(deserializer: D) -> core::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match IntOrStr::deserialize(deserializer)? {
        IntOrStr::Int(n) => Ok(n),
        IntOrStr::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}
