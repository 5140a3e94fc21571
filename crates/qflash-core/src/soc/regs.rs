//! Memory-mapped control registers
//!
//! | Address | Register |
//! |---------|----------|
//! | 0x000 | display value, low byte |
//! | 0x001 | display value, high nibble |
//! | 0x002 | LED bank (bits 5..0 LEDs, bit 7 single LED) |
//! | 0x003-0x0FF | UART transmit stream |
//! | 0x100-0x102 | flash start address (high, mid, low) |
//! | 0x103 | flash command trigger |
//! | 0x104-0x105 | program length in words (high, low) |
//! | 0x106 | flash status read-back |
//! | 0x200-0x3FF | program buffer (256 words, little-endian byte pairs) |

use bitflags::bitflags;
use heapless::Deque;

use crate::hyperbus::FlashCommand;

/// Display value, low byte
pub const REG_DISPLAY_LO: u32 = 0x000;
/// Display value, high nibble
pub const REG_DISPLAY_HI: u32 = 0x001;
/// LED bank
pub const REG_LEDS: u32 = 0x002;
/// First address of the UART transmit stream
pub const REG_UART_START: u32 = 0x003;
/// Last address of the UART transmit stream
pub const REG_UART_END: u32 = 0x0FF;
/// Flash start address, bits 23..16
pub const REG_FLASH_ADDR_HI: u32 = 0x100;
/// Flash start address, bits 15..8
pub const REG_FLASH_ADDR_MID: u32 = 0x101;
/// Flash start address, bits 7..0
pub const REG_FLASH_ADDR_LO: u32 = 0x102;
/// Flash command trigger (low two bits)
pub const REG_FLASH_CMD: u32 = 0x103;
/// Program length, bits 15..8
pub const REG_FLASH_LEN_HI: u32 = 0x104;
/// Program length, bits 7..0
pub const REG_FLASH_LEN_LO: u32 = 0x105;
/// Flash status read-back ([`Indicators`])
pub const REG_FLASH_STATUS: u32 = 0x106;
/// First byte of the program buffer
pub const BUFFER_BASE: u32 = 0x200;
/// Last byte of the program buffer
pub const BUFFER_END: u32 = 0x3FF;

/// UART transmit FIFO depth
pub const UART_FIFO_DEPTH: usize = 32;

/// Display value width mask (12 bits)
const DISPLAY_MASK: u16 = 0x0FFF;

bitflags! {
    /// Indicator bank, also readable at [`REG_FLASH_STATUS`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Indicators: u8 {
        /// Last flash operation completed
        const DONE = 1 << 0;
        /// Last flash operation failed
        const ERR = 1 << 1;
        /// Erase command pending
        const CMD_ERASE = 1 << 2;
        /// Program command pending
        const CMD_WRITE = 1 << 3;
        /// Command handshake with the sequencer still in progress
        const BUSY = 1 << 4;
    }
}

impl Indicators {
    /// Command bits for a command register value
    pub const fn for_command(cmd: FlashCommand) -> Self {
        Self::from_bits_retain(cmd.bits() << 2)
    }

    /// Command register value mirrored in the indicator bits
    pub const fn command(self) -> FlashCommand {
        FlashCommand::from_bits(self.bits() >> 2)
    }
}

/// Control register file
#[derive(Debug, Clone)]
pub struct RegisterFile {
    display: u16,
    leds: u8,
    flash_addr: u32,
    cmd: FlashCommand,
    len: u16,
    done: bool,
    err: bool,
    busy: bool,
    uart: Deque<u8, UART_FIFO_DEPTH>,
}

impl RegisterFile {
    /// Registers at their reset values; `default_len` seeds the length
    pub fn new(default_len: u16) -> Self {
        Self {
            display: 0,
            leds: 0,
            flash_addr: 0,
            cmd: FlashCommand::None,
            len: default_len,
            done: false,
            err: false,
            busy: false,
            uart: Deque::new(),
        }
    }

    /// 12-bit display value
    pub fn display(&self) -> u16 {
        self.display
    }

    /// LED bank
    pub fn leds(&self) -> u8 {
        self.leds
    }

    /// Flash start address (24 bits)
    pub fn flash_addr(&self) -> u32 {
        self.flash_addr
    }

    /// Pending flash command
    pub fn command(&self) -> FlashCommand {
        self.cmd
    }

    /// Program length in words
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Indicator bank
    pub fn indicators(&self) -> Indicators {
        let mut ind = Indicators::for_command(self.cmd);
        ind.set(Indicators::DONE, self.done);
        ind.set(Indicators::ERR, self.err);
        ind.set(Indicators::BUSY, self.busy);
        ind
    }

    /// Bytes queued for the UART transmitter
    pub fn uart_pending(&self) -> usize {
        self.uart.len()
    }

    /// Take the next byte for the UART transmitter
    pub fn uart_pop(&mut self) -> Option<u8> {
        self.uart.pop_front()
    }

    /// True while the flash registers must not change
    pub(crate) fn is_locked(&self) -> bool {
        self.cmd != FlashCommand::None || self.busy
    }

    /// Record the handshake state seen from the sequencer side
    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// The sequencer finished: latch the result and withdraw the command
    pub(crate) fn complete(&mut self, err: bool) {
        self.done = true;
        self.err = err;
        self.cmd = FlashCommand::None;
    }

    /// Register write; returns false if the address is not a register
    pub fn write(&mut self, addr: u32, data: u8) -> bool {
        match addr {
            REG_DISPLAY_LO => self.display = (self.display & 0xF00) | data as u16,
            REG_DISPLAY_HI => {
                self.display = (((data as u16) << 8) | (self.display & 0xFF)) & DISPLAY_MASK
            }
            REG_LEDS => self.leds = data,
            REG_UART_START..=REG_UART_END => {
                if self.uart.push_back(data).is_err() {
                    log::warn!("UART FIFO full; dropped byte 0x{:02X}", data);
                }
            }
            REG_FLASH_ADDR_HI..=REG_FLASH_LEN_LO if self.is_locked() => {
                log::warn!(
                    "Flash register 0x{:03X} written while a command is in flight; ignored",
                    addr
                );
            }
            REG_FLASH_ADDR_HI => {
                self.flash_addr = (self.flash_addr & 0x00_FFFF) | ((data as u32) << 16)
            }
            REG_FLASH_ADDR_MID => {
                self.flash_addr = (self.flash_addr & 0xFF_00FF) | ((data as u32) << 8)
            }
            REG_FLASH_ADDR_LO => self.flash_addr = (self.flash_addr & 0xFF_FF00) | data as u32,
            REG_FLASH_CMD => {
                self.cmd = FlashCommand::from_bits(data);
                if self.cmd != FlashCommand::None {
                    self.done = false;
                    self.err = false;
                    log::debug!(
                        "Flash command {:?} at 0x{:06X}, {} words",
                        self.cmd,
                        self.flash_addr,
                        self.len
                    );
                }
            }
            REG_FLASH_LEN_HI => self.len = (self.len & 0x00FF) | ((data as u16) << 8),
            REG_FLASH_LEN_LO => self.len = (self.len & 0xFF00) | data as u16,
            REG_FLASH_STATUS => log::trace!("Write to read-only status register ignored"),
            _ => return false,
        }
        true
    }

    /// Register read; `None` if the address is not a register
    pub fn read(&self, addr: u32) -> Option<u8> {
        let value = match addr {
            REG_DISPLAY_LO => self.display as u8,
            REG_DISPLAY_HI => (self.display >> 8) as u8,
            REG_LEDS => self.leds,
            REG_UART_START..=REG_UART_END => 0,
            REG_FLASH_ADDR_HI => (self.flash_addr >> 16) as u8,
            REG_FLASH_ADDR_MID => (self.flash_addr >> 8) as u8,
            REG_FLASH_ADDR_LO => self.flash_addr as u8,
            REG_FLASH_CMD => self.cmd.bits(),
            REG_FLASH_LEN_HI => (self.len >> 8) as u8,
            REG_FLASH_LEN_LO => self.len as u8,
            REG_FLASH_STATUS => self.indicators().bits(),
            _ => return None,
        };
        Some(value)
    }
}
