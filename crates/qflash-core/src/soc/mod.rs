//! Bus peripheral top
//!
//! Composes the QSPI decoder, the control registers, the program buffer and
//! the flash sequencer:
//!
//! ```text
//! host -> QspiDecoder -> RegisterFile / WordBuffer -> (go) -> Sequencer -> flash
//!                              ^                                  |
//!                              +------------ (done) --------------+
//! ```
//!
//! The sequencer may run on a slower clock (`flash_div`). Only two single-bit
//! signals cross between the domains, each through a [`Synchronizer`]:
//!
//! - `go`: a command is pending in the register file. The sequencer sees the
//!   command register only while its synchronized copy of `go` is high.
//! - `ack`: the sequencer is holding its DONE state. On the rising edge the
//!   register file latches the result and withdraws the command; `BUSY` stays
//!   set until the sequencer has returned to IDLE.
//!
//! Address, length and command registers are locked while either is high, so
//! the multi-bit values are stable whenever the sequencer samples them.

mod buffer;
mod regs;

pub use buffer::{WordBuffer, BUFFER_WORDS};
pub use regs::*;

use crate::clock::{ClockDivider, Clocked};
use crate::error::{Error, Result};
use crate::hyperbus::{
    FlashCommand, HyperbusInputs, HyperbusPins, Sequencer, SequencerConfig, SequencerInput,
    SequencerState,
};
use crate::qspi::{DecoderConfig, DecoderInput, DecoderOutput, QspiDecoder, QspiPins};
use crate::sync::{Edge, Synchronizer};

/// Peripheral parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct SocConfig {
    /// Command decoder parameters
    pub decoder: DecoderConfig,
    /// Flash sequencer parameters
    pub sequencer: SequencerConfig,
    /// Ticks per sequencer clock
    pub flash_div: u32,
    /// Program length register reset value, in words
    pub default_len: u16,
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            sequencer: SequencerConfig::default(),
            flash_div: 1,
            default_len: 128,
        }
    }
}

impl SocConfig {
    /// Check every parameter
    pub fn validate(&self) -> Result<()> {
        self.decoder.validate()?;
        self.sequencer.validate()?;
        if self.flash_div == 0 {
            return Err(Error::InvalidTiming);
        }
        if self.default_len == 0 || self.default_len as usize > BUFFER_WORDS {
            return Err(Error::InvalidLength(self.default_len));
        }
        Ok(())
    }
}

/// Inputs for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocInput {
    /// Command bus levels from the host
    pub qspi: QspiPins,
    /// Levels driven by the flash device
    pub flash: HyperbusInputs,
}

/// Outputs after one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocOutput {
    /// Decoder outputs (the host samples `qd_o` under `qd_oe`)
    pub qspi: DecoderOutput,
    /// Flash bus as driven by the sequencer
    pub flash: HyperbusPins,
}

/// The assembled peripheral
#[derive(Debug, Clone)]
pub struct Soc {
    config: SocConfig,

    decoder: QspiDecoder,
    regs: RegisterFile,
    buffer: WordBuffer,
    /// Registered read port of the decoder side
    rdata: u8,

    divider: ClockDivider,
    go_sync: Synchronizer<bool>,
    ack_sync: Synchronizer<bool>,
    ack_edge: Edge,
    seq: Sequencer,
    /// Registered read port of the sequencer side
    seq_din: u16,
    flash_clocked: bool,
}

impl Soc {
    /// Build the peripheral in its reset state
    pub fn new(config: SocConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            decoder: QspiDecoder::new(config.decoder)?,
            regs: RegisterFile::new(config.default_len),
            buffer: WordBuffer::new(),
            rdata: 0,
            divider: ClockDivider::new(config.flash_div),
            go_sync: Synchronizer::new(false),
            ack_sync: Synchronizer::new(false),
            ack_edge: Edge::new(false),
            seq: Sequencer::new(config.sequencer)?,
            seq_din: 0,
            flash_clocked: false,
        })
    }

    /// Peripheral parameters
    pub fn config(&self) -> &SocConfig {
        &self.config
    }

    /// Command decoder
    pub fn decoder(&self) -> &QspiDecoder {
        &self.decoder
    }

    /// Flash sequencer
    pub fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    /// Control registers
    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Take the next byte queued for the UART transmitter
    pub fn uart_pop(&mut self) -> Option<u8> {
        self.regs.uart_pop()
    }

    /// Program buffer
    pub fn buffer(&self) -> &WordBuffer {
        &self.buffer
    }

    /// Indicator bank
    pub fn indicators(&self) -> Indicators {
        self.regs.indicators()
    }

    /// True if the last tick clocked the sequencer
    pub fn flash_clocked(&self) -> bool {
        self.flash_clocked
    }

    /// Outputs after the last completed tick
    pub fn outputs(&self) -> SocOutput {
        SocOutput {
            qspi: self.decoder.outputs(),
            flash: self.seq.pins(),
        }
    }

    fn bus_write(&mut self, addr: u32, data: u8) {
        match addr {
            BUFFER_BASE..=BUFFER_END => self.buffer.write_byte(addr - BUFFER_BASE, data),
            _ => {
                if !self.regs.write(addr, data) {
                    log::trace!("Write to unmapped address 0x{:06X} ignored", addr);
                }
            }
        }
    }

    fn bus_read(&self, addr: u32) -> u8 {
        match addr {
            BUFFER_BASE..=BUFFER_END => self.buffer.read_byte(addr - BUFFER_BASE),
            _ => self.regs.read(addr).unwrap_or(0),
        }
    }

    /// Sequencer side of the tick (runs when the divider fires)
    fn clock_flash(&mut self, go: bool, cmd: FlashCommand, input: &SocInput) {
        let seq_in = SequencerInput {
            cmd: if self.go_sync.get() { cmd } else { FlashCommand::None },
            start_addr: self.regs.flash_addr(),
            len: self.regs.len(),
            din: self.seq_din,
            bus: input.flash,
        };
        let out = self.seq.posedge(&seq_in);
        self.seq_din = self.buffer.word(out.addr);
        self.go_sync.clock(go);
    }
}

impl Clocked for Soc {
    type Input = SocInput;
    type Output = SocOutput;

    fn posedge(&mut self, input: &SocInput) -> SocOutput {
        // Snapshot registered values from the previous tick.
        let dec = self.decoder.outputs();
        let cmd = self.regs.command();
        let go = cmd != FlashCommand::None;
        let ack = self.seq.state() == SequencerState::Done && self.seq.outputs().done;
        let err = self.seq.outputs().err;

        self.decoder.posedge(&DecoderInput {
            pins: input.qspi,
            din: self.rdata,
        });

        if dec.wr {
            self.bus_write(dec.addr, dec.dout);
        }
        if dec.rd {
            self.rdata = self.bus_read(dec.addr);
        }

        // Completion handshake, decoder side
        let ack_s = self.ack_sync.get();
        if self.ack_edge.sample(ack_s).rose() {
            self.regs.complete(err);
        }
        self.regs.set_busy(ack_s);
        self.ack_sync.clock(ack);

        self.flash_clocked = self.divider.tick();
        if self.flash_clocked {
            self.clock_flash(go, cmd, input);
        }

        self.outputs()
    }

    fn negedge(&mut self) {
        if self.flash_clocked {
            self.seq.negedge();
        }
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.regs = RegisterFile::new(self.config.default_len);
        self.buffer = WordBuffer::new();
        self.rdata = 0;
        self.divider = ClockDivider::new(self.config.flash_div);
        self.go_sync.reset();
        self.ack_sync.reset();
        self.ack_edge.reset();
        self.seq.reset();
        self.seq_din = 0;
        self.flash_clocked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperbus::opcodes::*;
    use crate::hyperbus::{BusMonitor, BusWindow};
    use crate::qspi::{CMD_ADDR_MASK, CMD_READ};
    use std::vec;
    use std::vec::Vec;

    const HALF: u32 = 4;

    /// Peripheral with a nibble-level host and a flash stub that drives a
    /// constant byte
    struct Rig {
        soc: Soc,
        dq_i: u8,
        mon: BusMonitor,
        windows: Vec<BusWindow>,
    }

    impl Rig {
        fn new(config: SocConfig, dq_i: u8) -> Self {
            let mut rig = Self {
                soc: Soc::new(config).unwrap(),
                dq_i,
                mon: BusMonitor::new(),
                windows: Vec::new(),
            };
            rig.idle(config.decoder.settle_ticks() + 4);
            rig
        }

        fn tick(&mut self, qspi: QspiPins) -> SocOutput {
            let input = SocInput {
                qspi,
                flash: HyperbusInputs {
                    rwds_i: false,
                    dq_i: self.dq_i,
                },
            };
            let out = self.soc.posedge(&input);
            self.soc.negedge();
            if let Some(w) = self.mon.observe(&self.soc.outputs().flash, self.dq_i) {
                self.windows.push(w);
            }
            out
        }

        fn idle(&mut self, ticks: u32) {
            for _ in 0..ticks {
                self.tick(QspiPins::default());
            }
        }

        /// One bus transaction; returns the bytes read
        fn transfer(&mut self, read: bool, addr: u32, data: &[u8], read_len: usize) -> Vec<u8> {
            let cmd = if read { CMD_READ } else { 0 } | ((addr >> 16) as u8 & CMD_ADDR_MASK);
            let mut bytes = vec![cmd, (addr >> 8) as u8, addr as u8];
            bytes.extend_from_slice(data);
            bytes.extend(core::iter::repeat(0).take(read_len));

            for _ in 0..HALF {
                self.tick(QspiPins {
                    qss: false,
                    qck: false,
                    qd: 0,
                });
            }
            let mut seen = Vec::new();
            for nibble in bytes.iter().flat_map(|&b| [b >> 4, b & 0xF]) {
                for t in 0..2 * HALF {
                    let out = self.tick(QspiPins {
                        qss: false,
                        qck: t >= HALF,
                        qd: nibble,
                    });
                    if t == 2 * HALF - 1 && out.qspi.qd_oe != 0 {
                        seen.push(out.qspi.qd_o);
                    }
                }
            }
            self.idle(2 * HALF);
            // The latch tick enables the drivers one sample early
            seen[seen.len() - 2 * read_len..]
                .chunks(2)
                .map(|p| (p[0] << 4) | p[1])
                .collect()
        }

        fn write(&mut self, addr: u32, data: &[u8]) {
            self.transfer(false, addr, data, 0);
        }

        fn read(&mut self, addr: u32, len: usize) -> Vec<u8> {
            self.transfer(true, addr, &[], len)
        }

        fn wait_done(&mut self) -> Indicators {
            for _ in 0..100_000 {
                self.tick(QspiPins::default());
                let ind = self.soc.indicators();
                if ind.contains(Indicators::DONE) && !ind.contains(Indicators::BUSY) {
                    return ind;
                }
            }
            panic!("flash command never completed");
        }

        fn writes(&self) -> Vec<(u32, u16)> {
            self.windows
                .iter()
                .filter(|w| !w.is_read())
                .map(|w| {
                    let p = w.packet().unwrap();
                    (p.word_address(), p.payload)
                })
                .collect()
        }
    }

    #[test]
    fn test_register_readback() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(REG_DISPLAY_LO, &[0x34, 0x02, 0x21]);
        rig.write(REG_UART_START, b"hi");
        assert_eq!(rig.soc.registers().display(), 0x234);
        assert_eq!(rig.soc.registers().leds(), 0x21);
        assert_eq!(rig.soc.uart_pop(), Some(b'h'));
        assert_eq!(rig.soc.uart_pop(), Some(b'i'));
        assert_eq!(rig.soc.uart_pop(), None);

        assert_eq!(rig.read(REG_DISPLAY_LO, 3), vec![0x34, 0x02, 0x21]);
        assert_eq!(rig.read(REG_FLASH_LEN_HI, 2), vec![0x00, 128]);
    }

    #[test]
    fn test_read_port_follows_strobe() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(REG_LEDS, &[0x21]);
        assert_eq!(rig.read(REG_LEDS, 1), vec![0x21]);
        let held = rig.soc.rdata;
        // Writing the byte at the idle decoder address must not reach the
        // read port without a read strobe
        rig.write(REG_DISPLAY_LO, &[0x99]);
        assert_ne!(held, 0x99);
        assert_eq!(rig.soc.rdata, held);
        assert_eq!(rig.read(REG_DISPLAY_LO, 1), vec![0x99]);
    }

    #[test]
    fn test_buffer_through_bus() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(BUFFER_BASE, &[0x34, 0x12, 0x78, 0x56]);
        assert_eq!(rig.soc.buffer().word(0), 0x1234);
        assert_eq!(rig.soc.buffer().word(1), 0x5678);
        assert_eq!(rig.read(BUFFER_BASE + 1, 3), vec![0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_erase_handshake() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(REG_FLASH_ADDR_HI, &[0x04, 0x00, 0x00, FlashCommand::Erase.bits()]);
        assert_eq!(rig.soc.registers().flash_addr(), 0x04_0000);

        let ind = rig.wait_done();
        assert_eq!(ind, Indicators::DONE);
        assert_eq!(rig.soc.registers().command(), FlashCommand::None);
        assert_eq!(rig.soc.sequencer().state(), SequencerState::Idle);

        let writes = rig.writes();
        assert_eq!(
            &writes[..5],
            &[
                (UNLOCK1_ADDR, UNLOCK1_DATA),
                (UNLOCK2_ADDR, UNLOCK2_DATA),
                (CMD_ADDR, ERASE_SETUP),
                (UNLOCK1_ADDR, UNLOCK1_DATA),
                (UNLOCK2_ADDR, UNLOCK2_DATA),
            ]
        );
        let erase = rig.windows[5].packet().unwrap();
        assert_eq!(erase.sector_number(), 1);
        assert_eq!(erase.payload, SECTOR_ERASE);
        assert_eq!(writes[6], (CMD_ADDR, STATUS_READ));
        assert!(rig.windows[7].is_read());

        assert_eq!(rig.read(REG_FLASH_STATUS, 1), vec![Indicators::DONE.bits()]);
    }

    #[test]
    fn test_program_from_buffer() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(BUFFER_BASE, &[0x34, 0x12, 0x78, 0x56]);
        rig.write(REG_FLASH_LEN_HI, &[0x00, 0x02]);
        rig.write(REG_FLASH_ADDR_HI, &[0, 0, 0, FlashCommand::Write.bits()]);
        assert_eq!(rig.wait_done(), Indicators::DONE);

        let payloads: Vec<u16> = rig.writes().iter().map(|w| w.1).collect();
        assert_eq!(
            payloads,
            vec![
                UNLOCK1_DATA,
                UNLOCK2_DATA,
                WRITE_BUFFER_LOAD,
                1,
                0x1234,
                0x5678,
                WRITE_BUFFER_CONFIRM,
                STATUS_READ
            ]
        );
        let writes = rig.writes();
        assert_eq!(writes[4].0, 0);
        assert_eq!(writes[5].0, 1);
    }

    #[test]
    fn test_slow_flash_clock() {
        let config = SocConfig {
            flash_div: 3,
            ..Default::default()
        };
        let mut rig = Rig::new(config, 0x80);
        rig.write(REG_FLASH_ADDR_HI, &[0, 0, 0, FlashCommand::Erase.bits()]);
        assert_eq!(rig.wait_done(), Indicators::DONE);
        assert_eq!(rig.windows.iter().filter(|w| !w.is_read()).count(), 7);
        assert!(rig.windows.iter().all(|w| w.edges == 8 || w.is_read()));
    }

    #[test]
    fn test_failure_reported() {
        // Ready with erase and program failure bits
        let mut rig = Rig::new(SocConfig::default(), 0xB0);
        rig.write(REG_FLASH_ADDR_HI, &[0, 0, 0, FlashCommand::Erase.bits()]);
        assert_eq!(rig.wait_done(), Indicators::DONE | Indicators::ERR);
        assert!(rig.soc.sequencer().status().has_failed());
    }

    #[test]
    fn test_bad_length_completes_with_error() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(REG_FLASH_LEN_HI, &[0x00, 0x00]);
        rig.write(REG_FLASH_CMD, &[FlashCommand::Write.bits()]);
        assert_eq!(rig.wait_done(), Indicators::DONE | Indicators::ERR);
        assert!(rig.windows.is_empty());
    }

    #[test]
    fn test_registers_locked_while_busy() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(REG_FLASH_ADDR_HI, &[0, 0, 0x10, FlashCommand::Erase.bits()]);
        rig.write(REG_FLASH_ADDR_LO, &[0x55]);
        assert_eq!(rig.soc.registers().flash_addr(), 0x10);
        rig.wait_done();
    }

    #[test]
    fn test_back_to_back_commands() {
        let mut rig = Rig::new(SocConfig::default(), 0x80);
        rig.write(REG_FLASH_ADDR_HI, &[0, 0, 0, FlashCommand::Erase.bits()]);
        rig.wait_done();
        let first = rig.windows.len();

        rig.write(REG_FLASH_ADDR_HI, &[0x08, 0, 0, FlashCommand::Erase.bits()]);
        assert_eq!(rig.soc.indicators(), Indicators::CMD_ERASE);
        assert_eq!(rig.wait_done(), Indicators::DONE);
        assert_eq!(rig.windows.len(), 2 * first);
        assert_eq!(rig.windows[first + 5].packet().unwrap().sector_number(), 2);
    }

    #[test]
    fn test_config_validation() {
        let bad = SocConfig {
            flash_div: 0,
            ..Default::default()
        };
        assert!(Soc::new(bad).is_err());
        assert_eq!(bad.validate(), Err(Error::InvalidTiming));
        let bad = SocConfig {
            default_len: 0,
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(Error::InvalidLength(0)));
    }
}
