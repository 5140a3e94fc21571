//! Passive bus monitor
//!
//! Watches the pins after every tick and cuts the traffic into chip-select
//! windows: one byte per output clock edge, taken from whichever side drives
//! the data lines.

use core::fmt;

use super::packet::{Direction, Packet};
use super::pins::HyperbusPins;

/// Bytes kept per window; enough for a read header, the longest latency
/// window and the status word
pub const WINDOW_CAPACITY: usize = 128;

/// Traffic seen during one chip-select assertion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusWindow {
    /// Tick on which select was first seen asserted
    pub start_tick: u64,
    /// Clock edges while selected
    pub edges: u16,
    /// Byte on the bus at each edge
    pub bytes: heapless::Vec<u8, WINDOW_CAPACITY>,
}

impl BusWindow {
    /// Header packet (payload taken from the data bytes when present)
    pub fn packet(&self) -> Option<Packet> {
        if self.bytes.len() < 6 {
            return None;
        }
        let mut header = [0u8; 6];
        header.copy_from_slice(&self.bytes[..6]);
        let mut packet = Packet::from_header(header);
        if let Some(payload) = self.payload() {
            packet.payload = payload;
        }
        Some(packet)
    }

    /// True if the header requests a read
    pub fn is_read(&self) -> bool {
        self.bytes.first().is_some_and(|b| b & 0x80 != 0)
    }

    /// Data word: bytes 6-7 for writes, the final two bytes for reads
    pub fn payload(&self) -> Option<u16> {
        let n = self.bytes.len();
        if n < 8 {
            return None;
        }
        let (hi, lo) = if self.is_read() {
            (self.bytes[n - 2], self.bytes[n - 1])
        } else {
            (self.bytes[6], self.bytes[7])
        };
        Some(((hi as u16) << 8) | lo as u16)
    }
}

impl fmt::Display for BusWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.packet() {
            Some(p) => write!(
                f,
                "@{:<8} {} addr 0x{:06X} data 0x{:04X} ({} edges)",
                self.start_tick,
                if p.direction == Direction::Read { "RD" } else { "WR" },
                p.word_address(),
                p.payload,
                self.edges
            ),
            None => write!(
                f,
                "@{:<8} short window ({} edges)",
                self.start_tick, self.edges
            ),
        }
    }
}

/// Chip-select window recorder
#[derive(Debug, Clone)]
pub struct BusMonitor {
    tick: u64,
    last_clk: bool,
    current: Option<BusWindow>,
}

impl Default for BusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BusMonitor {
    /// Create a monitor
    pub const fn new() -> Self {
        Self {
            tick: 0,
            last_clk: false,
            current: None,
        }
    }

    /// True while select is asserted
    pub fn in_window(&self) -> bool {
        self.current.is_some()
    }

    /// Record one tick of pin activity
    ///
    /// `dq_in` is what the device drives. Returns the window that just
    /// closed, if select was released on this tick.
    pub fn observe(&mut self, pins: &HyperbusPins, dq_in: u8) -> Option<BusWindow> {
        let tick = self.tick;
        self.tick += 1;
        let edge = pins.clk_o != self.last_clk;
        self.last_clk = pins.clk_o;

        if pins.csn_o {
            return self.current.take();
        }

        let window = self.current.get_or_insert_with(|| BusWindow {
            start_tick: tick,
            ..Default::default()
        });
        if edge {
            window.edges += 1;
            let byte = if pins.dq_oe { pins.dq_o } else { dq_in };
            if window.bytes.push(byte).is_err() {
                log::warn!("Bus window exceeds {} bytes", WINDOW_CAPACITY);
            }
        }
        None
    }
}
