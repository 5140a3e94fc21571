//! HyperFlash erase/program sequencer
//!
//! A long linear state machine. Every bus packet is an *issue* state (load
//! the shift register, assert chip-select, load the edge counter) followed by
//! a *wait* state that holds until the counter is about to expire, then
//! releases chip-select. The next issue state reasserts it a tick later, so
//! every packet gets its own select pulse.
//!
//! ```text
//! IDLE -ERASE-> AA 55 80 AA 55 30(sector) ------------+
//!      -WRITE-> AA 55 25(sector) count {data}xN 29 ----+-> STATUS ... DONE -> IDLE
//! ```
//!
//! After the last command the sequencer polls the status register until the
//! device reports ready, then raises `done` (and `err` if the device reported
//! a failure) and waits for the command input to return to NONE.

use super::opcodes::{self, WORD_ADDR_MASK, WRITE_BUFFER_WORDS};
use super::packet::{Packet, ShiftRegister};
use super::pins::{HyperbusInputs, HyperbusPins};
use super::status::StatusRegister;
use super::{latency_edges, DEFAULT_LATENCY, HEADER_EDGES, PHASE_EDGES, STATUS_DATA_EDGES};
use crate::clock::Clocked;
use crate::error::{Error, Result};

/// Command register value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum FlashCommand {
    /// Nothing to do
    #[default]
    None,
    /// Erase the sector containing the start address
    Erase,
    /// Buffered program of `len` words at the start address
    Write,
}

impl FlashCommand {
    /// Decode the 2-bit command register
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            1 => Self::Erase,
            2 => Self::Write,
            _ => Self::None,
        }
    }

    /// Encode for the 2-bit command register
    pub const fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Erase => 1,
            Self::Write => 2,
        }
    }
}

/// One packet of a command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// AA @ 555
    EraseUnlock1,
    /// 55 @ 2AA
    EraseUnlock2,
    /// 80 @ 555
    EraseSetup,
    /// AA @ 555
    EraseUnlock3,
    /// 55 @ 2AA
    EraseUnlock4,
    /// 30 @ sector (erase-execute)
    EraseSector,
    /// AA @ 555
    WriteUnlock1,
    /// 55 @ 2AA
    WriteUnlock2,
    /// 25 @ sector
    WriteBufferLoad,
    /// len-1 @ sector
    WriteWordCount,
    /// data word @ word cursor
    WriteData,
    /// 29 @ sector
    WriteConfirm,
    /// 70 @ 555
    StatusCommand,
}

/// Packets of a sector erase, in bus order
pub const ERASE_SEQUENCE: [Phase; 6] = [
    Phase::EraseUnlock1,
    Phase::EraseUnlock2,
    Phase::EraseSetup,
    Phase::EraseUnlock3,
    Phase::EraseUnlock4,
    Phase::EraseSector,
];

/// Packets of a buffered program before the data words
pub const WRITE_PREAMBLE: [Phase; 4] = [
    Phase::WriteUnlock1,
    Phase::WriteUnlock2,
    Phase::WriteBufferLoad,
    Phase::WriteWordCount,
];

impl Phase {
    /// Packet for every phase except `WriteData`, whose payload comes from
    /// the data input
    fn packet(self, sector: u32, len: u16) -> Packet {
        match self {
            Self::EraseUnlock1 | Self::EraseUnlock3 | Self::WriteUnlock1 => {
                Packet::word(opcodes::UNLOCK1_ADDR, opcodes::UNLOCK1_DATA)
            }
            Self::EraseUnlock2 | Self::EraseUnlock4 | Self::WriteUnlock2 => {
                Packet::word(opcodes::UNLOCK2_ADDR, opcodes::UNLOCK2_DATA)
            }
            Self::EraseSetup => Packet::word(opcodes::CMD_ADDR, opcodes::ERASE_SETUP),
            Self::EraseSector => Packet::sector(sector, opcodes::SECTOR_ERASE),
            Self::WriteBufferLoad => Packet::sector(sector, opcodes::WRITE_BUFFER_LOAD),
            Self::WriteWordCount => Packet::sector(sector, len.wrapping_sub(1)),
            Self::WriteConfirm => Packet::sector(sector, opcodes::WRITE_BUFFER_CONFIRM),
            Self::StatusCommand => Packet::word(opcodes::CMD_ADDR, opcodes::STATUS_READ),
            Self::WriteData => Packet::word(0, 0),
        }
    }

    /// Fixed successor for phases that do not branch
    fn successor(self) -> Option<Phase> {
        match self {
            Self::EraseUnlock1 => Some(Self::EraseUnlock2),
            Self::EraseUnlock2 => Some(Self::EraseSetup),
            Self::EraseSetup => Some(Self::EraseUnlock3),
            Self::EraseUnlock3 => Some(Self::EraseUnlock4),
            Self::EraseUnlock4 => Some(Self::EraseSector),
            Self::EraseSector => Some(Self::StatusCommand),
            Self::WriteUnlock1 => Some(Self::WriteUnlock2),
            Self::WriteUnlock2 => Some(Self::WriteBufferLoad),
            Self::WriteBufferLoad => Some(Self::WriteWordCount),
            Self::WriteConfirm => Some(Self::StatusCommand),
            Self::WriteWordCount | Self::WriteData | Self::StatusCommand => None,
        }
    }
}

/// Sequencer FSM state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Waiting for a command
    Idle,
    /// Load and start a packet
    Issue(Phase),
    /// Shift the packet out
    Wait(Phase),
    /// Start the status read header
    StatusHeader,
    /// Shift the read header
    StatusHeaderWait,
    /// Initial latency window
    StatusLatency,
    /// Shift the status word in
    StatusShift,
    /// Latch the status word and release the bus
    StatusAck,
    /// Operation finished; waiting for the command to be withdrawn
    Done,
}

/// Sequencer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct SequencerConfig {
    /// Initial read latency in clocks
    pub init_latency: u8,
    /// Give up (with `err`) after this many busy status reads
    pub poll_limit: Option<u32>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            init_latency: DEFAULT_LATENCY,
            poll_limit: None,
        }
    }
}

impl SequencerConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(2..=31).contains(&self.init_latency) {
            return Err(Error::InvalidLatency(self.init_latency));
        }
        Ok(())
    }
}

/// Inputs for one sequencer tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerInput {
    /// Command register
    pub cmd: FlashCommand,
    /// Byte address (24 bits)
    pub start_addr: u32,
    /// Words to program, 1..=256
    pub len: u16,
    /// Data word requested by the previous tick's `next`
    pub din: u16,
    /// Levels driven by the device
    pub bus: HyperbusInputs,
}

/// Sequencer outputs for the tick just evaluated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerOutput {
    /// Word address of the next data word
    pub addr: u32,
    /// Data word request; `din` must follow on the next tick
    pub next: bool,
    /// Operation complete
    pub done: bool,
    /// Operation failed
    pub err: bool,
}

/// HyperFlash erase/program sequencer
#[derive(Debug, Clone)]
pub struct Sequencer {
    config: SequencerConfig,
    state: SequencerState,

    sr: ShiftRegister,
    counter: u8,
    clk: bool,
    csn: bool,
    dq_oe: bool,
    rwds_oe: bool,

    sector: u32,
    word_addr: u32,
    len: u16,
    rem_words: u16,

    next: bool,
    done: bool,
    err: bool,
    status: StatusRegister,
    polls: u32,
}

impl Sequencer {
    /// Create a sequencer in IDLE
    pub fn new(config: SequencerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: SequencerConfig) -> Self {
        Self {
            config,
            state: SequencerState::Idle,
            sr: ShiftRegister::default(),
            counter: 0,
            clk: false,
            csn: true,
            dq_oe: true,
            rwds_oe: false,
            sector: 0,
            word_addr: 0,
            len: 0,
            rem_words: 0,
            next: false,
            done: false,
            err: false,
            status: StatusRegister::default(),
            polls: 0,
        }
    }

    /// Current FSM state
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Sequencer parameters
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Last status word read from the device
    pub fn status(&self) -> StatusRegister {
        self.status
    }

    /// Status reads that found the device busy during this operation
    pub fn busy_polls(&self) -> u32 {
        self.polls
    }

    /// Remaining edge count
    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Pins as driven after the last completed tick
    pub fn pins(&self) -> HyperbusPins {
        HyperbusPins {
            clk_o: self.clk,
            csn_o: self.csn,
            rwds_o: false,
            rwds_oe: self.rwds_oe,
            dq_o: self.sr.out_byte(),
            dq_oe: self.dq_oe,
        }
    }

    /// Outputs of the last completed tick
    pub fn outputs(&self) -> SequencerOutput {
        SequencerOutput {
            addr: self.word_addr,
            next: self.next,
            done: self.done,
            err: self.err,
        }
    }

    fn start(&mut self, input: &SequencerInput) {
        let start_addr = input.start_addr & 0xFF_FFFF;
        if start_addr != input.start_addr {
            log::warn!(
                "Flash start address 0x{:08X} truncated to 24 bits",
                input.start_addr
            );
        }
        self.done = false;
        self.err = false;
        self.polls = 0;
        self.sector = opcodes::sector_of(start_addr);
        self.word_addr = opcodes::word_of(start_addr);
        self.len = input.len;
        self.rem_words = input.len;

        match input.cmd {
            FlashCommand::None => {}
            FlashCommand::Erase => {
                log::debug!("Erasing sector {} (0x{:06X})", self.sector, start_addr);
                self.issue(ERASE_SEQUENCE[0], 0);
            }
            FlashCommand::Write => {
                if input.len == 0 || input.len > WRITE_BUFFER_WORDS {
                    log::warn!("{}", Error::InvalidLength(input.len));
                    self.err = true;
                    self.done = true;
                    self.state = SequencerState::Done;
                    return;
                }
                log::debug!(
                    "Programming {} words at 0x{:06X} (sector {})",
                    input.len,
                    start_addr,
                    self.sector
                );
                self.issue(WRITE_PREAMBLE[0], 0);
            }
        }
    }

    fn issue(&mut self, phase: Phase, din: u16) {
        let packet = match phase {
            Phase::WriteData => {
                let p = Packet::word(self.word_addr, din);
                self.rem_words = self.rem_words.saturating_sub(1);
                self.word_addr = (self.word_addr + 1) & WORD_ADDR_MASK;
                p
            }
            _ => phase.packet(self.sector, self.len),
        };
        log::trace!(
            "{:?}: addr 0x{:06X} payload 0x{:04X}",
            phase,
            packet.word_address(),
            packet.payload
        );
        self.sr.load(&packet);
        self.csn = false;
        self.counter = PHASE_EDGES;
        self.state = SequencerState::Wait(phase);
    }

    /// Leave a wait state; returns the data request strobe
    fn finish_phase(&mut self, phase: Phase) -> bool {
        let (next_state, request) = match phase {
            Phase::WriteWordCount => (SequencerState::Issue(Phase::WriteData), true),
            Phase::WriteData if self.rem_words > 0 => {
                (SequencerState::Issue(Phase::WriteData), true)
            }
            Phase::WriteData => (SequencerState::Issue(Phase::WriteConfirm), false),
            Phase::StatusCommand => (SequencerState::StatusHeader, false),
            p => match p.successor() {
                Some(s) => (SequencerState::Issue(s), false),
                None => (SequencerState::Idle, false),
            },
        };
        self.state = next_state;
        request
    }

    fn finish_status(&mut self) {
        let status = StatusRegister::from_bits_retain(self.sr.payload());
        self.status = status;
        if status.is_ready() {
            self.done = true;
            self.err = status.has_failed();
            self.state = SequencerState::Done;
            if self.err {
                log::warn!("Flash reported failure, status 0x{:04X}", status.bits());
            } else {
                log::debug!("Flash operation complete after {} busy polls", self.polls);
            }
            return;
        }

        self.polls += 1;
        match self.config.poll_limit {
            Some(limit) if self.polls >= limit => {
                log::warn!("Flash still busy after {} status reads; giving up", self.polls);
                self.done = true;
                self.err = true;
                self.state = SequencerState::Done;
            }
            _ => self.state = SequencerState::Issue(Phase::StatusCommand),
        }
    }
}

impl Clocked for Sequencer {
    type Input = SequencerInput;
    type Output = SequencerOutput;

    fn posedge(&mut self, input: &SequencerInput) -> SequencerOutput {
        let counter = self.counter;
        let mut next = false;

        // Shift on every active edge; states below may overwrite the register.
        if counter != 0 {
            self.counter -= 1;
            self.sr.shift_in(input.bus.dq_i);
        }

        match self.state {
            SequencerState::Idle => {
                self.counter = 0;
                self.csn = true;
                self.dq_oe = true;
                self.rwds_oe = false;
                if input.cmd != FlashCommand::None {
                    self.start(input);
                }
            }
            SequencerState::Issue(phase) => self.issue(phase, input.din),
            SequencerState::Wait(phase) => {
                if counter == 1 {
                    self.csn = true;
                    next = self.finish_phase(phase);
                }
            }
            SequencerState::StatusHeader => {
                self.sr.load_header(&Packet::read(0));
                self.csn = false;
                self.dq_oe = true;
                self.counter = HEADER_EDGES;
                self.state = SequencerState::StatusHeaderWait;
            }
            SequencerState::StatusHeaderWait => {
                if counter == 1 {
                    self.counter = latency_edges(self.config.init_latency);
                    self.state = SequencerState::StatusLatency;
                }
            }
            SequencerState::StatusLatency => {
                if counter == 1 {
                    self.dq_oe = false;
                    self.sr.clear();
                    self.counter = STATUS_DATA_EDGES;
                    self.state = SequencerState::StatusShift;
                }
            }
            SequencerState::StatusShift => {
                if counter == 1 {
                    self.state = SequencerState::StatusAck;
                }
            }
            SequencerState::StatusAck => {
                self.dq_oe = true;
                self.csn = true;
                self.finish_status();
            }
            SequencerState::Done => {
                if input.cmd == FlashCommand::None {
                    self.state = SequencerState::Idle;
                }
            }
        }

        self.next = next;
        self.outputs()
    }

    fn negedge(&mut self) {
        if self.csn {
            self.clk = false;
        } else if self.counter != 0 {
            self.clk = !self.clk;
        }
    }

    fn reset(&mut self) {
        *self = Self::with_config(self.config);
    }
}
