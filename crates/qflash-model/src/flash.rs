//! In-memory HyperFlash device
//!
//! Watches the controller's pins once per tick and reacts the way a
//! HyperFlash part would: six header bytes on the first six clock edges,
//! then either a two-byte payload (a command cycle, executed when select is
//! released) or, for reads, `2*latency-2` latency edges followed by data
//! words driven MSB first.
//!
//! Command cycles run through the usual unlock state machine:
//!
//! ```text
//! AA@555 55@2AA 80@555 AA@555 55@2AA 30@sector   sector erase
//! AA@555 55@2AA 80@555 AA@555 55@2AA 10@555      chip erase
//! AA@555 55@2AA A0@555 data@addr                 word program
//! AA@555 55@2AA 25@sector (n-1)@sector {data@addr}xn 29@sector
//! 70@555                                          status read
//! ```

use qflash_core::config::deserialize_size;
use qflash_core::hyperbus::opcodes::{self, SECTOR_SHIFT, WRITE_BUFFER_WORDS};
use qflash_core::hyperbus::{
    latency_edges, AddressSpace, Direction, HyperbusInputs, HyperbusPins, Packet,
    StatusRegister, DEFAULT_LATENCY, HEADER_EDGES, PHASE_EDGES,
};

use crate::error::{ModelError, Result};

/// Words in one program page; a buffered program must stay inside one
pub const PAGE_WORDS: u32 = WRITE_BUFFER_WORDS as u32;

/// Largest device the 24-bit controller start address reaches
pub const MAX_SIZE: u32 = 1 << 24;

/// Command cycles compare only these address bits
const UNLOCK_ADDR_MASK: u32 = 0xFFF;

/// Single-word program command code
const WORD_PROGRAM: u16 = 0xA0;

/// Device parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Device size in bytes (at most 16 MiB)
    #[serde(deserialize_with = "deserialize_size")]
    pub size: u32,
    /// Erase sector size in bytes (256 KiB, fixed by the controller)
    #[serde(deserialize_with = "deserialize_size")]
    pub sector_size: u32,
    /// Initial read latency in clocks
    pub latency: u8,
    /// Ticks a sector erase keeps the device busy
    pub erase_busy: u32,
    /// Ticks a program keeps the device busy
    pub program_busy: u32,
    /// Report every erase as failed
    pub fail_erase: bool,
    /// Report every program as failed
    pub fail_program: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            size: 16 * 1024 * 1024,
            sector_size: 256 * 1024,
            latency: DEFAULT_LATENCY,
            erase_busy: 400,
            program_busy: 100,
            fail_erase: false,
            fail_program: false,
        }
    }
}

impl FlashConfig {
    /// Check the geometry and latency
    pub fn validate(&self) -> Result<()> {
        // The controller derives the sector from address bits 23..18.
        if self.sector_size != 1 << SECTOR_SHIFT
            || self.size < self.sector_size
            || self.size > MAX_SIZE
            || self.size % self.sector_size != 0
        {
            return Err(ModelError::InvalidGeometry {
                size: self.size,
                sector_size: self.sector_size,
            });
        }
        if !(2..=31).contains(&self.latency) {
            return Err(qflash_core::Error::InvalidLatency(self.latency).into());
        }
        Ok(())
    }
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    /// Sector erases started
    pub sector_erases: u32,
    /// Chip erases started
    pub chip_erases: u32,
    /// Buffered programs started
    pub buffer_programs: u32,
    /// Single-word programs started
    pub word_programs: u32,
    /// Status words returned
    pub status_reads: u32,
    /// Command cycles that broke a sequence
    pub rejected: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Idle,
    Unlock1,
    Unlock2,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
    WordProgram,
    BufferCount { sector: u32 },
    BufferData { sector: u32, remaining: u32 },
    BufferConfirm { sector: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    SectorErase(u32),
    ChipErase,
    Program,
}

/// Bus side of one chip-select window
#[derive(Debug, Clone, Copy, Default)]
struct Window {
    edges: u32,
    header: [u8; 6],
    payload: u16,
    packet: Option<Packet>,
    status: bool,
    word: u16,
}

/// Emulated HyperFlash device
#[derive(Debug, Clone)]
pub struct FlashModel {
    config: FlashConfig,
    data: Vec<u16>,
    state: CommandState,
    status: StatusRegister,
    status_mode: bool,
    buffer: Vec<(u32, u16)>,
    busy: Option<(Operation, u32)>,

    selected: bool,
    last_clk: bool,
    window: Window,
    dq: u8,

    stats: FlashStats,
}

impl FlashModel {
    /// Create an erased device
    pub fn new(config: FlashConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            data: vec![0xFFFF; config.size as usize / 2],
            state: CommandState::Idle,
            status: StatusRegister::default(),
            status_mode: false,
            buffer: Vec::new(),
            busy: None,
            selected: false,
            last_clk: false,
            window: Window::default(),
            dq: 0,
            stats: FlashStats::default(),
        })
    }

    /// Device parameters
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Array contents as words
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Status register
    pub fn status(&self) -> StatusRegister {
        self.status
    }

    /// True while an erase or program is running
    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    /// Operation counters
    pub fn stats(&self) -> &FlashStats {
        &self.stats
    }

    /// Levels driven back to the controller
    pub fn inputs(&self) -> HyperbusInputs {
        HyperbusInputs {
            rwds_i: false,
            dq_i: self.dq,
        }
    }

    /// Read bytes from the array (little-endian words)
    pub fn read_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| {
                let a = addr + i;
                let word = self.data[self.index(a / 2)];
                if a & 1 == 0 {
                    word as u8
                } else {
                    (word >> 8) as u8
                }
            })
            .collect()
    }

    /// Overwrite array contents without a program cycle
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            let a = addr + i as u32;
            let index = self.index(a / 2);
            let word = &mut self.data[index];
            *word = if a & 1 == 0 {
                (*word & 0xFF00) | b as u16
            } else {
                (*word & 0x00FF) | ((b as u16) << 8)
            };
        }
    }

    fn index(&self, word: u32) -> usize {
        let index = word as usize;
        if index >= self.data.len() {
            log::warn!("Word address 0x{:06X} beyond device; wrapping", word);
        }
        index % self.data.len()
    }

    fn sector_of(&self, word: u32) -> u32 {
        word * 2 / self.config.sector_size
    }

    /// Advance one tick, looking at the pins the controller drives
    pub fn observe(&mut self, pins: &HyperbusPins) {
        if let Some((op, ticks)) = self.busy {
            if ticks <= 1 {
                self.busy = None;
                self.finish(op);
            } else {
                self.busy = Some((op, ticks - 1));
            }
        }

        if pins.csn_o {
            if self.selected {
                self.end_window();
            }
            self.selected = false;
            // The controller holds the clock low while deselected, so the
            // first toggle after select falls is an edge even on the same tick.
            self.last_clk = false;
            self.dq = 0;
            return;
        }
        if !self.selected {
            self.selected = true;
            self.window = Window::default();
        }
        if pins.clk_o == self.last_clk {
            return;
        }
        self.last_clk = pins.clk_o;
        self.window.edges += 1;
        self.on_edge(pins);
    }

    fn on_edge(&mut self, pins: &HyperbusPins) {
        let edge = self.window.edges;
        let header = HEADER_EDGES as u32;
        if edge <= header {
            if !pins.dq_oe {
                log::warn!("Controller not driving DQ during header edge {}", edge);
            }
            self.window.header[edge as usize - 1] = pins.dq_o;
            if edge == header {
                self.on_header();
            }
            return;
        }

        let Some(packet) = self.window.packet else {
            return;
        };
        match packet.direction {
            Direction::Write => {
                if edge <= PHASE_EDGES as u32 {
                    self.window.payload = (self.window.payload << 8) | pins.dq_o as u16;
                } else if edge == PHASE_EDGES as u32 + 1 {
                    log::warn!("Write packet runs past {} edges", PHASE_EDGES);
                }
            }
            Direction::Read => {
                let latency = latency_edges(self.config.latency) as u32;
                if edge <= header + latency {
                    return;
                }
                if pins.dq_oe {
                    log::warn!("Bus contention: controller driving DQ during read data");
                }
                let index = edge - header - latency - 1;
                if index % 2 == 0 {
                    self.window.word = self.read_word(&packet, index / 2);
                    self.dq = (self.window.word >> 8) as u8;
                } else {
                    self.dq = self.window.word as u8;
                }
            }
        }
    }

    fn on_header(&mut self) {
        let packet = Packet::from_header(self.window.header);
        if packet.space == AddressSpace::Register {
            log::warn!("Register space access not modeled");
        }
        if packet.direction == Direction::Read {
            self.window.status = self.status_mode;
            log::trace!(
                "Read at 0x{:06X} ({})",
                packet.word_address(),
                if self.status_mode { "status" } else { "array" }
            );
        }
        self.window.packet = Some(packet);
    }

    fn read_word(&mut self, packet: &Packet, offset: u32) -> u16 {
        if self.window.status {
            if offset == 0 {
                self.stats.status_reads += 1;
            }
            return self.status.bits();
        }
        if self.is_busy() {
            log::warn!("Array read while the device is busy");
        }
        self.data[self.index(packet.word_address() + offset)]
    }

    fn end_window(&mut self) {
        let window = self.window;
        let Some(packet) = window.packet else {
            log::warn!("Select released after {} edges; packet dropped", window.edges);
            return;
        };
        match packet.direction {
            Direction::Write if window.edges == PHASE_EDGES as u32 => {
                self.command(packet.word_address(), window.payload);
            }
            Direction::Write => {
                log::warn!(
                    "Write packet with {} edges ignored (expected {})",
                    window.edges,
                    PHASE_EDGES
                );
            }
            Direction::Read => {
                if window.status {
                    self.status_mode = false;
                }
            }
        }
    }

    fn command(&mut self, addr: u32, data: u16) {
        let unlock = addr & UNLOCK_ADDR_MASK;
        let code = data & 0xFF;
        log::trace!("Command cycle 0x{:04X} @ 0x{:06X} in {:?}", data, addr, self.state);

        if self.busy.is_some() {
            if (unlock, code) == (opcodes::CMD_ADDR, opcodes::STATUS_READ) {
                self.status_mode = true;
            } else {
                log::warn!("Command 0x{:04X} while busy ignored", data);
                self.stats.rejected += 1;
            }
            return;
        }

        if code == opcodes::RESET && self.expects_command() {
            if self.state != CommandState::Idle {
                log::debug!("Reset aborts command sequence in {:?}", self.state);
            }
            self.state = CommandState::Idle;
            self.status_mode = false;
            self.buffer.clear();
            return;
        }

        self.state = match self.state {
            CommandState::Idle => match (unlock, code) {
                (opcodes::UNLOCK1_ADDR, opcodes::UNLOCK1_DATA) => CommandState::Unlock1,
                (opcodes::CMD_ADDR, opcodes::STATUS_READ) => {
                    self.status_mode = true;
                    CommandState::Idle
                }
                (opcodes::CMD_ADDR, opcodes::STATUS_CLEAR) => {
                    self.status.remove(StatusRegister::FAILURE);
                    CommandState::Idle
                }
                _ => self.reject(addr, data),
            },
            CommandState::Unlock1 => match (unlock, code) {
                (opcodes::UNLOCK2_ADDR, opcodes::UNLOCK2_DATA) => CommandState::Unlock2,
                _ => self.reject(addr, data),
            },
            CommandState::Unlock2 => match (unlock, code) {
                (opcodes::CMD_ADDR, opcodes::ERASE_SETUP) => CommandState::EraseSetup,
                (opcodes::CMD_ADDR, WORD_PROGRAM) => CommandState::WordProgram,
                (_, opcodes::WRITE_BUFFER_LOAD) => CommandState::BufferCount {
                    sector: self.sector_of(addr),
                },
                _ => self.reject(addr, data),
            },
            CommandState::EraseSetup => match (unlock, code) {
                (opcodes::UNLOCK1_ADDR, opcodes::UNLOCK1_DATA) => CommandState::EraseUnlock1,
                _ => self.reject(addr, data),
            },
            CommandState::EraseUnlock1 => match (unlock, code) {
                (opcodes::UNLOCK2_ADDR, opcodes::UNLOCK2_DATA) => CommandState::EraseUnlock2,
                _ => self.reject(addr, data),
            },
            CommandState::EraseUnlock2 => match (unlock, code) {
                (_, opcodes::SECTOR_ERASE) => {
                    self.start(Operation::SectorErase(self.sector_of(addr)));
                    CommandState::Idle
                }
                (opcodes::CMD_ADDR, opcodes::CHIP_ERASE) => {
                    self.start(Operation::ChipErase);
                    CommandState::Idle
                }
                _ => self.reject(addr, data),
            },
            CommandState::WordProgram => {
                self.buffer.clear();
                self.buffer.push((addr, data));
                self.stats.word_programs += 1;
                self.start(Operation::Program);
                CommandState::Idle
            }
            CommandState::BufferCount { sector } => {
                let count = data as u32 + 1;
                if self.sector_of(addr) != sector || count > PAGE_WORDS {
                    self.abort("bad word count")
                } else {
                    self.buffer.clear();
                    CommandState::BufferData {
                        sector,
                        remaining: count,
                    }
                }
            }
            CommandState::BufferData { sector, remaining } => {
                let page = self.buffer.first().map(|&(a, _)| a / PAGE_WORDS);
                if page.is_some_and(|p| p != addr / PAGE_WORDS) {
                    self.abort("buffer crosses a page boundary")
                } else if self.sector_of(addr) != sector {
                    self.abort("buffer word outside the loaded sector")
                } else {
                    self.buffer.push((addr, data));
                    if remaining > 1 {
                        CommandState::BufferData {
                            sector,
                            remaining: remaining - 1,
                        }
                    } else {
                        CommandState::BufferConfirm { sector }
                    }
                }
            }
            CommandState::BufferConfirm { sector } => {
                if code == opcodes::WRITE_BUFFER_CONFIRM && self.sector_of(addr) == sector {
                    self.stats.buffer_programs += 1;
                    self.start(Operation::Program);
                    CommandState::Idle
                } else {
                    self.abort("missing buffer confirm")
                }
            }
        };
    }

    /// True in states where the payload is a command code, not data
    fn expects_command(&self) -> bool {
        !matches!(
            self.state,
            CommandState::WordProgram
                | CommandState::BufferCount { .. }
                | CommandState::BufferData { .. }
        )
    }

    fn reject(&mut self, addr: u32, data: u16) -> CommandState {
        log::warn!(
            "Unexpected command cycle 0x{:04X} @ 0x{:06X} in {:?}",
            data,
            addr,
            self.state
        );
        self.stats.rejected += 1;
        CommandState::Idle
    }

    fn abort(&mut self, reason: &str) -> CommandState {
        log::warn!("Write buffer abort: {}", reason);
        self.status.insert(StatusRegister::BUFFER_ABORT);
        self.buffer.clear();
        self.stats.rejected += 1;
        CommandState::Idle
    }

    fn start(&mut self, op: Operation) {
        let ticks = match op {
            Operation::SectorErase(_) | Operation::ChipErase => self.config.erase_busy,
            Operation::Program => self.config.program_busy,
        };
        match op {
            Operation::SectorErase(sector) => {
                self.stats.sector_erases += 1;
                log::debug!("Erasing sector {}", sector);
            }
            Operation::ChipErase => {
                self.stats.chip_erases += 1;
                log::debug!("Erasing chip");
            }
            Operation::Program => log::debug!("Programming {} words", self.buffer.len()),
        }
        self.status.remove(StatusRegister::FAILURE | StatusRegister::DEVICE_READY);
        self.busy = Some((op, ticks.max(1)));
    }

    fn finish(&mut self, op: Operation) {
        match op {
            Operation::SectorErase(_) | Operation::ChipErase if self.config.fail_erase => {
                log::debug!("Injected erase failure");
                self.status.insert(StatusRegister::ERASE_FAILED);
            }
            Operation::SectorErase(sector) => {
                let words = (self.config.sector_size / 2) as usize;
                let start = sector as usize * words;
                let end = (start + words).min(self.data.len());
                if start < end {
                    self.data[start..end].fill(0xFFFF);
                } else {
                    log::warn!("Sector {} beyond device", sector);
                }
            }
            Operation::ChipErase => self.data.fill(0xFFFF),
            Operation::Program if self.config.fail_program => {
                log::debug!("Injected program failure");
                self.status.insert(StatusRegister::PROGRAM_FAILED);
            }
            Operation::Program => {
                for (addr, word) in core::mem::take(&mut self.buffer) {
                    let index = self.index(addr);
                    let old = self.data[index];
                    if old & word != word {
                        log::trace!("Word 0x{:06X}: cannot set bits 0x{:04X}", addr, word & !old);
                    }
                    self.data[index] = old & word;
                }
            }
        }
        self.buffer.clear();
        self.status.insert(StatusRegister::DEVICE_READY);
    }
}
