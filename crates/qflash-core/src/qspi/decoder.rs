//! QSPI slave command decoder
//!
//! Consumes the synchronized select/clock/data lines and produces byte-wide
//! strobes for a backing memory. States:
//!
//! ```text
//! COMMAND --2 nibbles--> ADDRESS --addr_nibbles--> WRITE_DATA | READ_DATA
//!    ^                                                   |
//!    +---------------- select deasserted ----------------+
//! ```
//!
//! Select high resets everything, in any state, on the tick it is seen at the
//! synchronizer output.

use super::{nibbles, QspiPins, CMD_ADDR_MASK, CMD_READ};
use crate::clock::Clocked;
use crate::error::{Error, Result};
use crate::sync::{Edge, Synchronizer};

/// Nibble counter width; only its parity matters once data flows
const NIBBLE_COUNT_MASK: u8 = 0x1F;

/// Decoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct DecoderConfig {
    /// Address nibbles following the command byte
    pub addr_nibbles: u8,
    /// Width of the power-on settle counter; the decoder ignores the bus
    /// until it saturates (2^bits - 1 ticks)
    pub settle_bits: u8,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            addr_nibbles: 4,
            settle_bits: 9,
        }
    }
}

impl DecoderConfig {
    /// Total address width in bits (7 from the command byte plus the nibbles)
    pub const fn address_bits(&self) -> u32 {
        7 + 4 * self.addr_nibbles as u32
    }

    /// Nibbles before the first data nibble
    pub const fn header_nibbles(&self) -> u8 {
        2 + self.addr_nibbles
    }

    /// Ticks after reset before nibbles are accepted
    pub const fn settle_ticks(&self) -> u32 {
        (1u32 << self.settle_bits) - 1
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.addr_nibbles == 0 || self.addr_nibbles > 4 {
            return Err(Error::InvalidAddressWidth(self.addr_nibbles));
        }
        if self.settle_bits == 0 || self.settle_bits > 16 {
            return Err(Error::InvalidTiming);
        }
        Ok(())
    }
}

/// Decoder FSM state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Collecting the command byte
    Command,
    /// Collecting the low address nibbles
    Address,
    /// Host is writing bytes
    WriteData,
    /// Host is reading bytes
    ReadData,
}

/// Inputs for one decoder tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderInput {
    /// Raw (unsynchronized) bus levels
    pub pins: QspiPins,
    /// Byte returned by the backing memory for the current address
    pub din: u8,
}

/// Registered decoder outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOutput {
    /// Memory address
    pub addr: u32,
    /// Nibble driven back to the host
    pub qd_o: u8,
    /// Per-line output enable for the data nibble
    pub qd_oe: u8,
    /// Byte to write
    pub dout: u8,
    /// Read strobe (one tick per requested byte)
    pub rd: bool,
    /// Write strobe (one tick per completed byte)
    pub wr: bool,
}

/// QSPI slave decoder
#[derive(Debug, Clone)]
pub struct QspiDecoder {
    config: DecoderConfig,
    state: DecoderState,

    qss: Synchronizer<bool>,
    qck: Synchronizer<bool>,
    qd: Synchronizer<u8>,
    qss_edge: Edge,
    qck_edge: Edge,

    settle: u32,

    cmd: u8,
    addr: u32,
    data: u8,
    nibble_count: u8,
    req_read: bool,
    req_write: bool,
    qd_o: u8,
    qd_oe: u8,

    bytes: u32,
}

impl QspiDecoder {
    /// Create a decoder in its reset state
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: DecoderState::Command,
            qss: Synchronizer::new(true),
            qck: Synchronizer::new(false),
            qd: Synchronizer::new(0),
            qss_edge: Edge::new(true),
            qck_edge: Edge::new(false),
            settle: 0,
            cmd: 0,
            addr: 0,
            data: 0,
            nibble_count: 0,
            req_read: false,
            req_write: false,
            qd_o: 0,
            qd_oe: 0,
            bytes: 0,
        })
    }

    /// Current FSM state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decoder parameters
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// True once the power-on settle window has elapsed
    pub fn is_settled(&self) -> bool {
        self.settle >= self.config.settle_ticks()
    }

    /// Nibbles received in the current transaction (5-bit, wrapping)
    pub fn nibble_count(&self) -> u8 {
        self.nibble_count
    }

    /// Registered outputs as of the last completed tick
    pub fn outputs(&self) -> DecoderOutput {
        DecoderOutput {
            addr: self.addr,
            qd_o: self.qd_o,
            qd_oe: self.qd_oe,
            dout: self.data,
            rd: self.req_read,
            wr: self.req_write,
        }
    }

    fn addr_mask(&self) -> u32 {
        (1u32 << self.config.address_bits()) - 1
    }

    /// True if the nibble just counted completes a data byte
    fn is_second_nibble(&self) -> bool {
        self.nibble_count
            .wrapping_sub(self.config.header_nibbles())
            & 1
            == 1
    }

    fn clear(&mut self) {
        self.state = DecoderState::Command;
        self.req_read = false;
        self.req_write = false;
        self.nibble_count = 0;
        self.qd_oe = 0;
        self.cmd = 0;
        self.addr = 0;
        self.data = 0;
        self.bytes = 0;
    }

    fn end_transaction(&mut self) {
        match self.state {
            DecoderState::WriteData | DecoderState::ReadData => {
                if self.nibble_count.wrapping_sub(self.config.header_nibbles()) & 1 == 1 {
                    log::warn!(
                        "QSPI transaction ended mid-byte at address 0x{:06X}; last half byte dropped",
                        self.addr
                    );
                }
                log::debug!(
                    "QSPI {} of {} bytes done",
                    if self.state == DecoderState::ReadData { "read" } else { "write" },
                    self.bytes
                );
            }
            DecoderState::Command | DecoderState::Address => {
                if self.nibble_count != 0 {
                    log::warn!(
                        "QSPI transaction ended in header after {} nibbles",
                        self.nibble_count
                    );
                }
            }
        }
    }

    fn on_nibble(&mut self, nibble: u8, din: u8) {
        let count = self.nibble_count;
        match self.state {
            DecoderState::Command => {
                self.cmd = (self.cmd << 4) | nibble;
                if count == 1 {
                    self.state = DecoderState::Address;
                }
            }
            DecoderState::Address => {
                let low_bits = 4 * self.config.addr_nibbles as u32;
                let low = ((self.addr << 4) | nibble as u32) & ((1u32 << low_bits) - 1);
                if count == self.config.addr_nibbles + 1 {
                    self.addr = ((((self.cmd & CMD_ADDR_MASK) as u32) << low_bits) | low)
                        & self.addr_mask();
                    if self.cmd & CMD_READ != 0 {
                        self.qd_oe = 0xF;
                        self.req_read = true;
                        self.state = DecoderState::ReadData;
                        log::trace!("QSPI read from 0x{:06X}", self.addr);
                    } else {
                        self.state = DecoderState::WriteData;
                        log::trace!("QSPI write to 0x{:06X}", self.addr);
                    }
                } else {
                    self.addr = low;
                }
            }
            DecoderState::WriteData => {
                self.data = (self.data << 4) | nibble;
                if self.is_second_nibble() {
                    self.req_write = true;
                    self.bytes += 1;
                }
            }
            DecoderState::ReadData => {
                let (high, low) = nibbles(din);
                if self.is_second_nibble() {
                    self.qd_o = low;
                    self.req_read = true;
                    self.addr = (self.addr + 1) & self.addr_mask();
                    self.bytes += 1;
                } else {
                    self.qd_o = high;
                }
            }
        }
        self.nibble_count = (count + 1) & NIBBLE_COUNT_MASK;
    }
}

impl Clocked for QspiDecoder {
    type Input = DecoderInput;
    type Output = DecoderOutput;

    fn posedge(&mut self, input: &DecoderInput) -> DecoderOutput {
        let qss = self.qss.get();
        let qck = self.qck.get();
        let qd = self.qd.get();

        let settled = self.is_settled();
        let qss_t = self.qss_edge.sample(qss);
        let qck_t = self.qck_edge.sample(qck);
        let new_nibble = !qss && settled && qck_t.rose();

        if !settled {
            self.settle += 1;
        }

        if qss {
            if qss_t.rose() {
                self.end_transaction();
            }
            self.clear();
        } else {
            if qss_t.fell() && settled {
                log::trace!("QSPI select asserted");
            }
            // Strobes last one tick; a completed write byte advances the
            // address on the tick after its strobe.
            if self.req_write {
                self.addr = (self.addr + 1) & self.addr_mask();
            }
            self.req_write = false;
            self.req_read = false;
            if new_nibble {
                self.on_nibble(qd & 0xF, input.din);
            }
        }

        self.qss.clock(input.pins.qss);
        self.qck.clock(input.pins.qck);
        self.qd.clock(input.pins.qd & 0xF);

        self.outputs()
    }

    fn reset(&mut self) {
        self.qss.reset();
        self.qck.reset();
        self.qd.reset();
        self.qss_edge.reset();
        self.qck_edge.reset();
        self.settle = 0;
        self.qd_o = 0;
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    const HALF: u32 = 4;

    /// Decoder wired to a 256-byte memory with a registered read port
    struct Bench {
        dec: QspiDecoder,
        mem: [u8; 256],
        rdata: u8,
        writes: Vec<(u32, u8)>,
        read_strobes: Vec<u32>,
        max_oe: u8,
    }

    impl Bench {
        fn new(config: DecoderConfig) -> Self {
            let mut mem = [0u8; 256];
            for (i, b) in mem.iter_mut().enumerate() {
                *b = (i as u8).wrapping_mul(7).wrapping_add(3);
            }
            Self {
                dec: QspiDecoder::new(config).unwrap(),
                mem,
                rdata: 0,
                writes: Vec::new(),
                read_strobes: Vec::new(),
                max_oe: 0,
            }
        }

        fn settled() -> Self {
            let mut b = Self::new(DecoderConfig::default());
            b.idle(DecoderConfig::default().settle_ticks() + 4);
            assert!(b.dec.is_settled());
            b
        }

        fn tick(&mut self, pins: QspiPins) -> DecoderOutput {
            let input = DecoderInput {
                pins,
                din: self.rdata,
            };
            let out = self.dec.posedge(&input);
            if out.wr {
                self.mem[(out.addr & 0xFF) as usize] = out.dout;
                self.writes.push((out.addr, out.dout));
            }
            if out.rd {
                self.read_strobes.push(out.addr);
            }
            self.max_oe = self.max_oe.max(out.qd_oe);
            self.rdata = self.mem[(out.addr & 0xFF) as usize];
            out
        }

        fn idle(&mut self, ticks: u32) {
            for _ in 0..ticks {
                self.tick(QspiPins::default());
            }
        }

        /// Clock nibbles with select held low; returns the nibble the slave
        /// drove at the end of each high phase
        fn clock(&mut self, nibbles: &[u8]) -> Vec<u8> {
            let mut seen = Vec::new();
            for &qd in nibbles {
                for t in 0..2 * HALF {
                    let out = self.tick(QspiPins {
                        qss: false,
                        qck: t >= HALF,
                        qd,
                    });
                    if t == 2 * HALF - 1 {
                        seen.push(out.qd_o);
                    }
                }
            }
            seen
        }

        fn select(&mut self) {
            for _ in 0..HALF {
                self.tick(QspiPins {
                    qss: false,
                    qck: false,
                    qd: 0,
                });
            }
        }

        fn deselect(&mut self) {
            self.idle(2 * HALF);
        }
    }

    fn header(read: bool, addr: u32) -> Vec<u8> {
        let bytes = [
            if read { CMD_READ } else { 0 } | ((addr >> 16) as u8 & CMD_ADDR_MASK),
            (addr >> 8) as u8,
            addr as u8,
        ];
        bytes.iter().flat_map(|&b| [b >> 4, b & 0xF]).collect()
    }

    fn data(bytes: &[u8]) -> Vec<u8> {
        bytes.iter().flat_map(|&b| [b >> 4, b & 0xF]).collect()
    }

    #[test]
    fn test_write_bytes_in_order() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x10));
        assert_eq!(b.dec.state(), DecoderState::WriteData);
        b.clock(&data(&[0xDE, 0xAD, 0xBE, 0xEF]));
        b.deselect();
        assert_eq!(
            b.writes,
            vec![(0x10, 0xDE), (0x11, 0xAD), (0x12, 0xBE), (0x13, 0xEF)]
        );
        assert_eq!(&b.mem[0x10..0x14], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(b.dec.state(), DecoderState::Command);
    }

    #[test]
    fn test_write_strobe_is_one_tick() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x40));
        let mut high_ticks = 0;
        for &qd in &data(&[0x5A]) {
            for t in 0..2 * HALF {
                let out = b.tick(QspiPins {
                    qss: false,
                    qck: t >= HALF,
                    qd,
                });
                if out.wr {
                    high_ticks += 1;
                }
            }
        }
        b.idle(4);
        assert_eq!(high_ticks, 1);
    }

    #[test]
    fn test_read_returns_high_then_low_nibbles() {
        let mut b = Bench::settled();
        let expected = [b.mem[0x20], b.mem[0x21], b.mem[0x22]];
        b.select();
        b.clock(&header(true, 0x20));
        assert_eq!(b.dec.state(), DecoderState::ReadData);
        assert_eq!(b.dec.outputs().qd_oe, 0xF);
        let seen = b.clock(&[0; 6]);
        let bytes: Vec<u8> = seen.chunks(2).map(|p| (p[0] << 4) | p[1]).collect();
        assert_eq!(bytes, expected.to_vec());
        b.deselect();

        // One strobe at the latch, one per completed byte
        assert_eq!(b.read_strobes, vec![0x20, 0x21, 0x22, 0x23]);
        assert!(b.writes.is_empty());
        assert_eq!(b.dec.outputs().qd_oe, 0);
    }

    #[test]
    fn test_high_address_bits_from_command_byte() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x7F_FFFE));
        b.clock(&data(&[1, 2]));
        b.deselect();
        assert_eq!(b.writes, vec![(0x7F_FFFE, 1), (0x7F_FFFF, 2)]);
    }

    #[test]
    fn test_address_wraps_at_bus_width() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x7F_FFFF));
        b.clock(&data(&[9, 8]));
        b.deselect();
        assert_eq!(b.writes, vec![(0x7F_FFFF, 9), (0, 8)]);
    }

    #[test]
    fn test_select_resets_mid_header() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x30)[..3]);
        assert_eq!(b.dec.state(), DecoderState::Address);
        b.deselect();
        assert_eq!(b.dec.state(), DecoderState::Command);
        assert_eq!(b.dec.nibble_count(), 0);

        b.select();
        b.clock(&header(false, 0x30));
        b.clock(&data(&[0x77]));
        b.deselect();
        assert_eq!(b.writes, vec![(0x30, 0x77)]);
    }

    #[test]
    fn test_select_reset_within_sync_delay() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x30));
        b.clock(&[0x1]);
        // Synchronizer delay, then the reset tick
        for _ in 0..crate::sync::SYNC_STAGES + 1 {
            b.tick(QspiPins::default());
        }
        assert_eq!(b.dec.state(), DecoderState::Command);
        assert_eq!(b.dec.nibble_count(), 0);
    }

    #[test]
    fn test_truncated_byte_is_dropped() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(false, 0x50));
        b.clock(&[0xA, 0xB, 0xC]);
        b.deselect();
        assert_eq!(b.writes, vec![(0x50, 0xAB)]);
    }

    #[test]
    fn test_ignores_bus_before_settle() {
        let mut b = Bench::new(DecoderConfig::default());
        b.select();
        b.clock(&header(false, 0x10));
        b.clock(&data(&[0x11]));
        b.deselect();
        assert!(!b.dec.is_settled());
        assert!(b.writes.is_empty());
        assert_eq!(b.dec.state(), DecoderState::Command);
    }

    #[test]
    fn test_output_disabled_while_deselected() {
        let mut b = Bench::settled();
        b.select();
        b.clock(&header(true, 0));
        b.clock(&[0, 0]);
        assert_eq!(b.max_oe, 0xF);
        b.deselect();
        for _ in 0..20 {
            assert_eq!(b.tick(QspiPins::default()).qd_oe, 0);
        }
    }

    #[test]
    fn test_short_address() {
        let config = DecoderConfig {
            addr_nibbles: 2,
            settle_bits: 4,
        };
        assert_eq!(config.address_bits(), 15);
        let mut b = Bench::new(config);
        b.idle(config.settle_ticks() + 2);
        b.select();
        // Command byte carries bits 14..8, two nibbles carry 7..0
        b.clock(&[0x0, 0x1, 0x2, 0x3]);
        b.clock(&data(&[0xC3]));
        b.deselect();
        assert_eq!(b.writes, vec![(0x123, 0xC3)]);
    }

    #[test]
    fn test_config_validation() {
        let bad = DecoderConfig {
            addr_nibbles: 5,
            ..Default::default()
        };
        assert_eq!(QspiDecoder::new(bad).err(), Some(Error::InvalidAddressWidth(5)));
        let bad = DecoderConfig {
            settle_bits: 0,
            ..Default::default()
        };
        assert_eq!(QspiDecoder::new(bad).err(), Some(Error::InvalidTiming));
    }
}
