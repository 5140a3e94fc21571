//! Host (master) side of the serial command bus
//!
//! [`QspiHost`] plays queued [`Transaction`]s out as per-tick pin levels, the
//! way a bus-sender on the far side of the cable would. It is a test and
//! simulation collaborator; the gateware never contains it.
//!
//! Each nibble takes `half_period` ticks with the clock low (data changes
//! here) followed by `half_period` ticks with the clock high. During reads the
//! data lines are sampled at the end of every high phase.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{nibbles, DecoderOutput, QspiPins, CMD_ADDR_MASK, CMD_READ};
use crate::error::{Error, Result};
use crate::sync::SYNC_STAGES;

/// Opcode of a bus-sender write packet
pub const BUS_OP_WRITE: u8 = 0x03;

/// Bus-sender packet header length (opcode, address, length)
pub const BUS_HEADER_LEN: usize = 9;

/// Highest address the serial bus can carry
pub const MAX_BUS_ADDR: u32 = (1 << 23) - 1;

/// Host timing, in ticks of the decoder clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct HostConfig {
    /// Ticks per clock half period
    pub half_period: u32,
    /// Ticks between select assertion and the first clock
    pub setup: u32,
    /// Idle ticks with select deasserted after a transaction
    pub gap: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            half_period: 4,
            setup: 4,
            gap: 8,
        }
    }
}

impl HostConfig {
    /// Check the host is slow enough for the decoder's synchronizers
    pub fn validate(&self) -> Result<()> {
        // The slave sees a rising edge SYNC_STAGES ticks late and registers
        // its answer one tick after that.
        if self.half_period <= SYNC_STAGES as u32 || self.gap <= SYNC_STAGES as u32 {
            return Err(Error::InvalidTiming);
        }
        Ok(())
    }
}

/// One select-bounded bus transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Write `data` starting at `addr`
    Write {
        /// Start address
        addr: u32,
        /// Bytes to write
        data: Vec<u8>,
    },
    /// Read `len` bytes starting at `addr`
    Read {
        /// Start address
        addr: u32,
        /// Number of bytes
        len: usize,
    },
}

impl Transaction {
    /// Build a write, checking the address fits the bus
    pub fn write(addr: u32, data: &[u8]) -> Result<Self> {
        if addr > MAX_BUS_ADDR {
            return Err(Error::AddressOutOfRange(addr));
        }
        if data.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        Ok(Self::Write {
            addr,
            data: data.to_vec(),
        })
    }

    /// Build a read, checking the address fits the bus
    pub fn read(addr: u32, len: usize) -> Result<Self> {
        if addr > MAX_BUS_ADDR {
            return Err(Error::AddressOutOfRange(addr));
        }
        if len == 0 {
            return Err(Error::EmptyTransaction);
        }
        Ok(Self::Read { addr, len })
    }

    /// Header bytes: read flag + address 22..16, then address 15..0
    pub fn header(&self) -> [u8; 3] {
        let (flag, addr) = match self {
            Self::Write { addr, .. } => (0, *addr),
            Self::Read { addr, .. } => (CMD_READ, *addr),
        };
        [
            flag | ((addr >> 16) as u8 & CMD_ADDR_MASK),
            (addr >> 8) as u8,
            addr as u8,
        ]
    }

    fn nibble_stream(&self) -> (Vec<u8>, usize) {
        let mut out = Vec::new();
        for byte in self.header() {
            let (h, l) = nibbles(byte);
            out.push(h);
            out.push(l);
        }
        let header = out.len();
        match self {
            Self::Write { data, .. } => {
                for &byte in data {
                    let (h, l) = nibbles(byte);
                    out.push(h);
                    out.push(l);
                }
            }
            Self::Read { len, .. } => out.resize(header + 2 * len, 0),
        }
        (out, header)
    }
}

/// Bus-sender command packet
///
/// Wire format: opcode (`0x03` = write), 4-byte big-endian address, 4-byte
/// big-endian length, then `length` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusCommand {
    /// Opcode byte
    pub opcode: u8,
    /// Target address
    pub addr: u32,
    /// Payload
    pub data: Vec<u8>,
}

impl BusCommand {
    /// Build a write command
    pub fn write(addr: u32, data: &[u8]) -> Self {
        Self {
            opcode: BUS_OP_WRITE,
            addr,
            data: data.to_vec(),
        }
    }

    /// Parse a packet
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BUS_HEADER_LEN {
            return Err(Error::TruncatedPacket);
        }
        let opcode = bytes[0];
        if opcode != BUS_OP_WRITE {
            return Err(Error::UnknownOpcode(opcode));
        }
        let addr = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let len = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
        let payload = &bytes[BUS_HEADER_LEN..];
        if payload.len() < len {
            return Err(Error::TruncatedPacket);
        }
        if payload.len() > len {
            log::warn!(
                "Bus packet carries {} bytes beyond its declared length",
                payload.len() - len
            );
        }
        Ok(Self {
            opcode,
            addr,
            data: payload[..len].to_vec(),
        })
    }

    /// Serialize to the wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BUS_HEADER_LEN + self.data.len());
        out.push(self.opcode);
        out.extend_from_slice(&self.addr.to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Convert into a serial bus transaction
    pub fn into_transaction(self) -> Result<Transaction> {
        Transaction::write(self.addr, &self.data)
    }
}

/// Result of a completed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A write finished
    Written {
        /// Start address
        addr: u32,
        /// Byte count
        len: usize,
    },
    /// A read finished
    Read {
        /// Start address
        addr: u32,
        /// Bytes returned by the slave
        data: Vec<u8>,
    },
}

#[derive(Debug)]
struct Active {
    txn: Transaction,
    nibbles: Vec<u8>,
    header: usize,
    tick: u32,
    received: Vec<u8>,
    high: Option<u8>,
}

/// Tick-level serial bus master
#[derive(Debug)]
pub struct QspiHost {
    config: HostConfig,
    queue: VecDeque<Transaction>,
    active: Option<Active>,
    gap: u32,
    completed: VecDeque<Completion>,
}

impl QspiHost {
    /// Create an idle host
    pub fn new(config: HostConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            queue: VecDeque::new(),
            active: None,
            gap: 0,
            completed: VecDeque::new(),
        })
    }

    /// Queue a transaction behind any pending ones
    pub fn submit(&mut self, txn: Transaction) {
        self.queue.push_back(txn);
    }

    /// True when nothing is queued or on the wire
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty() && self.gap == 0
    }

    /// Take the oldest completed transaction
    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completed.pop_front()
    }

    /// Ticks a transaction occupies on the wire, gap included
    pub fn duration(&self, txn: &Transaction) -> u32 {
        let (nibbles, _) = txn.nibble_stream();
        self.config.setup
            + 2 * self.config.half_period * nibbles.len() as u32
            + self.config.half_period
            + self.config.gap
    }

    /// Pin levels for the coming tick
    pub fn drive(&mut self) -> QspiPins {
        if self.active.is_none() && self.gap == 0 {
            if let Some(txn) = self.queue.pop_front() {
                let (nibbles, header) = txn.nibble_stream();
                self.active = Some(Active {
                    txn,
                    nibbles,
                    header,
                    tick: 0,
                    received: Vec::new(),
                    high: None,
                });
            }
        }

        let Some(active) = &self.active else {
            if self.gap > 0 {
                self.gap -= 1;
            }
            return QspiPins::default();
        };

        let half = self.config.half_period;
        let t = active.tick;
        if t < self.config.setup {
            return QspiPins {
                qss: false,
                qck: false,
                qd: 0,
            };
        }
        let u = t - self.config.setup;
        let index = (u / (2 * half)) as usize;
        match active.nibbles.get(index) {
            Some(&nibble) => QspiPins {
                qss: false,
                qck: u % (2 * half) >= half,
                qd: nibble,
            },
            // Trailing low half period with select still asserted
            None => QspiPins {
                qss: false,
                qck: false,
                qd: 0,
            },
        }
    }

    /// Observe the slave's outputs after the tick and advance
    pub fn sample(&mut self, out: &DecoderOutput) {
        let half = self.config.half_period;
        let setup = self.config.setup;
        let Some(active) = &mut self.active else {
            return;
        };

        let t = active.tick;
        if t >= setup {
            let u = t - setup;
            let index = (u / (2 * half)) as usize;
            let end_of_high = u % (2 * half) == 2 * half - 1;
            let reading = matches!(active.txn, Transaction::Read { .. });
            if reading && end_of_high && index >= active.header && index < active.nibbles.len() {
                if out.qd_oe != 0xF {
                    log::warn!("QSPI slave not driving data during read nibble {}", index);
                }
                let nibble = out.qd_o & 0xF;
                match active.high.take() {
                    None => active.high = Some(nibble),
                    Some(high) => active.received.push((high << 4) | nibble),
                }
            }
        }

        active.tick += 1;
        let end = setup + 2 * half * active.nibbles.len() as u32 + half;
        if active.tick >= end {
            if let Some(active) = self.active.take() {
                let completion = match active.txn {
                    Transaction::Write { addr, data } => Completion::Written {
                        addr,
                        len: data.len(),
                    },
                    Transaction::Read { addr, .. } => Completion::Read {
                        addr,
                        data: active.received,
                    },
                };
                self.completed.push_back(completion);
            }
            self.gap = self.config.gap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_header_bytes() {
        let w = Transaction::write(0x12_3456, &[1]).unwrap();
        assert_eq!(w.header(), [0x12, 0x34, 0x56]);
        let r = Transaction::read(0x12_3456, 1).unwrap();
        assert_eq!(r.header(), [0x92, 0x34, 0x56]);
    }

    #[test]
    fn test_address_range() {
        assert_eq!(
            Transaction::write(1 << 23, &[0]),
            Err(Error::AddressOutOfRange(1 << 23))
        );
        assert_eq!(Transaction::read(0, 0), Err(Error::EmptyTransaction));
    }

    #[test]
    fn test_parse_bus_command() {
        let bytes = [0x03, 0, 0, 0, 0, 0, 0, 0, 2, 0x42, 0x56];
        let cmd = BusCommand::parse(&bytes).unwrap();
        assert_eq!(cmd.addr, 0);
        assert_eq!(cmd.data, vec![0x42, 0x56]);
        assert_eq!(cmd.to_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_parse_rejects_bad_packets() {
        assert_eq!(BusCommand::parse(&[0x03, 0, 0]), Err(Error::TruncatedPacket));
        assert_eq!(
            BusCommand::parse(&[0x03, 0, 0, 1, 0, 0, 0, 0, 4, 0xAA]),
            Err(Error::TruncatedPacket)
        );
        assert_eq!(
            BusCommand::parse(&[0x07, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(Error::UnknownOpcode(0x07))
        );
    }

    #[test]
    fn test_write_waveform() {
        let config = HostConfig {
            half_period: 3,
            setup: 2,
            gap: 3,
        };
        let mut host = QspiHost::new(config).unwrap();
        let txn = Transaction::write(0x000102, &[0xAB]).unwrap();
        let ticks = host.duration(&txn);
        host.submit(txn);

        let mut rises = Vec::new();
        let mut last_qck = false;
        let mut select_ticks = 0;
        for _ in 0..ticks {
            let pins = host.drive();
            if !pins.qss {
                select_ticks += 1;
            }
            if pins.qck && !last_qck {
                rises.push(pins.qd);
            }
            last_qck = pins.qck;
            host.sample(&DecoderOutput::default());
        }
        assert_eq!(rises, vec![0x0, 0x0, 0x0, 0x1, 0x0, 0x2, 0xA, 0xB]);
        assert_eq!(select_ticks, 2 + 2 * 3 * 8 + 3);
        assert!(host.is_idle());
        assert_eq!(
            host.take_completion(),
            Some(Completion::Written { addr: 0x102, len: 1 })
        );
    }

    #[test]
    fn test_rejects_fast_clock() {
        let config = HostConfig {
            half_period: 2,
            ..Default::default()
        };
        assert!(QspiHost::new(config).is_err());
    }
}
