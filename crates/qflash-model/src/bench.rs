//! Simulation bench
//!
//! One tick of the bench:
//!
//! 1. the host drives the serial bus pins for this tick;
//! 2. the peripheral evaluates its rising edge, then its falling edge;
//! 3. the host samples the peripheral's data nibble;
//! 4. the flash device looks at the pins the peripheral now drives and
//!    updates what it drives back for the next tick.
//!
//! Everything the host does goes through the serial bus, including polling
//! the flash status register for completion.

use std::path::Path;

use qflash_core::clock::Clocked;
use qflash_core::hyperbus::{BusMonitor, BusWindow, FlashCommand};
use qflash_core::qspi::host::{BusCommand, Completion, HostConfig, QspiHost, Transaction};
use qflash_core::soc::{
    Indicators, Soc, SocConfig, SocInput, BUFFER_BASE, BUFFER_WORDS, REG_FLASH_ADDR_HI,
    REG_FLASH_LEN_HI, REG_FLASH_STATUS,
};

use crate::error::{ModelError, Result};
use crate::flash::{FlashConfig, FlashModel, PAGE_WORDS};

/// Ticks an operation may take before the bench gives up
pub const DEFAULT_TIMEOUT: u64 = 2_000_000;

/// Bytes in one program page
const PAGE_BYTES: u32 = PAGE_WORDS * 2;

/// Everything needed to build a bench
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Peripheral parameters
    pub soc: SocConfig,
    /// Serial bus host timing
    pub host: HostConfig,
    /// Flash device parameters
    pub flash: FlashConfig,
}

impl BenchConfig {
    /// Load a configuration file; missing fields keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(qflash_core::config::from_toml_str(&content)?)
    }

    /// Check every part
    pub fn validate(&self) -> Result<()> {
        self.soc.validate()?;
        self.host.validate()?;
        self.flash.validate()?;
        if self.soc.sequencer.init_latency != self.flash.latency {
            log::warn!(
                "Sequencer latency {} does not match device latency {}; status reads will be garbage",
                self.soc.sequencer.init_latency,
                self.flash.latency
            );
        }
        Ok(())
    }
}

/// Host, peripheral and flash device in one clocked system
#[derive(Debug)]
pub struct Bench {
    host: QspiHost,
    soc: Soc,
    flash: FlashModel,
    monitor: BusMonitor,
    windows: Vec<BusWindow>,
    tracing: bool,
    uart: Vec<u8>,
    ticks: u64,
    timeout: u64,
}

impl Bench {
    /// Build the bench and let the peripheral's power-on settle expire
    pub fn new(config: BenchConfig) -> Result<Self> {
        config.validate()?;
        let mut bench = Self {
            host: QspiHost::new(config.host)?,
            soc: Soc::new(config.soc)?,
            flash: FlashModel::new(config.flash)?,
            monitor: BusMonitor::new(),
            windows: Vec::new(),
            tracing: false,
            uart: Vec::new(),
            ticks: 0,
            timeout: DEFAULT_TIMEOUT,
        };
        while !bench.soc.decoder().is_settled() {
            bench.tick();
        }
        log::debug!("Peripheral settled after {} ticks", bench.ticks);
        Ok(bench)
    }

    /// Ticks each operation may take
    pub fn set_timeout(&mut self, ticks: u64) {
        self.timeout = ticks;
    }

    /// Record every chip-select window on the flash bus
    pub fn set_tracing(&mut self, tracing: bool) {
        self.tracing = tracing;
    }

    /// Take the windows recorded so far
    pub fn take_windows(&mut self) -> Vec<BusWindow> {
        std::mem::take(&mut self.windows)
    }

    /// Ticks elapsed
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The peripheral
    pub fn soc(&self) -> &Soc {
        &self.soc
    }

    /// The flash device
    pub fn flash(&self) -> &FlashModel {
        &self.flash
    }

    /// The flash device, for preloading contents
    pub fn flash_mut(&mut self) -> &mut FlashModel {
        &mut self.flash
    }

    /// Bytes the peripheral has sent to its UART
    pub fn uart(&self) -> &[u8] {
        &self.uart
    }

    /// Advance one tick
    pub fn tick(&mut self) {
        let input = SocInput {
            qspi: self.host.drive(),
            flash: self.flash.inputs(),
        };
        let out = self.soc.posedge(&input);
        self.soc.negedge();
        self.host.sample(&out.qspi);

        let pins = self.soc.outputs().flash;
        self.flash.observe(&pins);
        if let Some(window) = self.monitor.observe(&pins, self.flash.inputs().dq_i) {
            log::trace!("{}", window);
            if self.tracing {
                self.windows.push(window);
            }
        }
        while let Some(byte) = self.soc.uart_pop() {
            self.uart.push(byte);
        }
        self.ticks += 1;
    }

    fn run_host(&mut self) -> Result<Option<Completion>> {
        let start = self.ticks;
        while !self.host.is_idle() {
            if self.ticks - start > self.timeout {
                return Err(ModelError::Timeout(self.ticks - start));
            }
            self.tick();
        }
        Ok(self.host.take_completion())
    }

    fn transact(&mut self, txn: Transaction) -> Result<Option<Completion>> {
        self.host.submit(txn);
        self.run_host()
    }

    /// Write bytes over the serial bus
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        match self.transact(Transaction::write(addr, data)?)? {
            Some(Completion::Written { .. }) => Ok(()),
            _ => Err(ModelError::Protocol),
        }
    }

    /// Read bytes over the serial bus
    pub fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        match self.transact(Transaction::read(addr, len)?)? {
            Some(Completion::Read { data, .. }) => Ok(data),
            _ => Err(ModelError::Protocol),
        }
    }

    /// Play a bus-sender packet
    pub fn send(&mut self, command: BusCommand) -> Result<()> {
        let txn = command.into_transaction()?;
        match self.transact(txn)? {
            Some(Completion::Written { .. }) => Ok(()),
            _ => Err(ModelError::Protocol),
        }
    }

    /// Poll the status register until the command handshake is complete
    pub fn wait_done(&mut self) -> Result<Indicators> {
        let start = self.ticks;
        loop {
            let ind = Indicators::from_bits_retain(self.read(REG_FLASH_STATUS, 1)?[0]);
            if ind.contains(Indicators::DONE)
                && !ind.contains(Indicators::BUSY)
                && ind.command() == FlashCommand::None
            {
                return Ok(ind);
            }
            if self.ticks - start > self.timeout {
                return Err(ModelError::Timeout(self.ticks - start));
            }
        }
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<()> {
        if addr as u64 + len as u64 > self.flash.config().size as u64 {
            return Err(ModelError::OutOfRange { addr, len });
        }
        Ok(())
    }

    fn trigger(&mut self, addr: u32, cmd: FlashCommand) -> Result<()> {
        self.write(
            REG_FLASH_ADDR_HI,
            &[(addr >> 16) as u8, (addr >> 8) as u8, addr as u8, cmd.bits()],
        )?;
        let ind = self.wait_done()?;
        if ind.contains(Indicators::ERR) {
            return Err(ModelError::FlashFailed(self.soc.sequencer().status().bits()));
        }
        Ok(())
    }

    /// Erase the sector containing `addr`
    pub fn erase_sector(&mut self, addr: u32) -> Result<()> {
        self.check_range(addr, 1)?;
        log::debug!("Erasing sector at 0x{:06X}", addr);
        self.trigger(addr, FlashCommand::Erase)
    }

    /// Program up to one page; the range must not cross a page boundary
    pub fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if addr & 1 != 0 {
            return Err(ModelError::Unaligned(addr));
        }
        self.check_range(addr, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let last = addr + data.len() as u32 - 1;
        if addr / PAGE_BYTES != last / PAGE_BYTES {
            return Err(ModelError::OutOfRange {
                addr,
                len: data.len(),
            });
        }

        let mut bytes = data.to_vec();
        if bytes.len() % 2 != 0 {
            bytes.push(0xFF);
        }
        let words = bytes.len() / 2;
        let index = (addr >> 1) % BUFFER_WORDS as u32;
        self.write(BUFFER_BASE + 2 * index, &bytes)?;
        self.write(REG_FLASH_LEN_HI, &[(words >> 8) as u8, words as u8])?;
        log::debug!("Programming {} words at 0x{:06X}", words, addr);
        self.trigger(addr, FlashCommand::Write)
    }

    /// Program any range, one page at a time
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if addr & 1 != 0 {
            return Err(ModelError::Unaligned(addr));
        }
        self.check_range(addr, data.len())?;
        for (page_addr, chunk) in page_chunks(addr, data) {
            self.program_page(page_addr, chunk)?;
        }
        Ok(())
    }
}

/// Split a range at program page boundaries
pub fn page_chunks(addr: u32, data: &[u8]) -> Vec<(u32, &[u8])> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let a = addr + offset as u32;
        let room = (PAGE_BYTES - a % PAGE_BYTES) as usize;
        let n = room.min(data.len() - offset);
        chunks.push((a, &data[offset..offset + n]));
        offset += n;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflash_core::hyperbus::opcodes;
    use qflash_core::hyperbus::StatusRegister;
    use qflash_core::soc::REG_UART_START;

    fn config() -> BenchConfig {
        BenchConfig {
            flash: FlashConfig {
                size: 1024 * 1024,
                erase_busy: 300,
                program_busy: 80,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn bench() -> Bench {
        Bench::new(config()).unwrap()
    }

    #[test]
    fn test_erase_sector() {
        let mut b = bench();
        b.flash_mut().load(0x3_FFFE, &[0; 4]);
        b.flash_mut().load(0x4_1000, &[0; 16]);
        b.erase_sector(0x4_1234).unwrap();

        assert_eq!(b.flash().stats().sector_erases, 1);
        assert_eq!(b.flash().read_bytes(0x4_1000, 16), vec![0xFF; 16]);
        assert_eq!(b.flash().read_bytes(0x4_0000, 2), vec![0xFF; 2]);
        // Neighbouring sector untouched
        assert_eq!(b.flash().read_bytes(0x3_FFFE, 2), vec![0; 2]);
    }

    #[test]
    fn test_program_odd_length() {
        let mut b = bench();
        b.program(0x100, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(b.flash().read_bytes(0x100, 6), vec![1, 2, 3, 4, 5, 0xFF]);
        assert_eq!(b.flash().stats().buffer_programs, 1);
        assert_eq!(b.flash().stats().rejected, 0);
    }

    #[test]
    fn test_program_across_pages() {
        let mut b = bench();
        let data: Vec<u8> = (0..64u8).collect();
        b.program(0x3F0, &data).unwrap();
        assert_eq!(b.flash().read_bytes(0x3F0, 64), data);
        assert_eq!(b.flash().stats().buffer_programs, 2);
    }

    #[test]
    fn test_program_full_page() {
        let mut b = bench();
        let data: Vec<u8> = (0..512u32).map(|i| (i * 7) as u8).collect();
        b.program(0x8_0400, &data).unwrap();
        assert_eq!(b.flash().read_bytes(0x8_0400, 512), data);
        assert_eq!(b.soc().registers().len(), 256);
    }

    #[test]
    fn test_program_then_reprogram_needs_erase() {
        let mut b = bench();
        b.program(0x200, &[0x0F, 0xF0]).unwrap();
        b.program(0x200, &[0xF0, 0x0F]).unwrap();
        assert_eq!(b.flash().read_bytes(0x200, 2), vec![0x00, 0x00]);
        b.erase_sector(0x200).unwrap();
        b.program(0x200, &[0xF0, 0x0F]).unwrap();
        assert_eq!(b.flash().read_bytes(0x200, 2), vec![0xF0, 0x0F]);
    }

    #[test]
    fn test_bus_sender_packet() {
        let mut b = bench();
        let packet = BusCommand::write(0x000, &[0x34, 0x02, 0x21]).to_bytes();
        b.send(BusCommand::parse(&packet).unwrap()).unwrap();
        assert_eq!(b.soc().registers().display(), 0x234);
        assert_eq!(b.soc().registers().leds(), 0x21);

        b.write(REG_UART_START, b"hello").unwrap();
        assert_eq!(b.uart(), b"hello");
        assert_eq!(b.read(0, 3).unwrap(), vec![0x34, 0x02, 0x21]);
    }

    #[test]
    fn test_program_failure() {
        let mut cfg = config();
        cfg.flash.fail_program = true;
        let mut b = Bench::new(cfg).unwrap();
        match b.program(0x100, &[0, 0]) {
            Err(ModelError::FlashFailed(status)) => {
                let status = StatusRegister::from_bits_retain(status);
                assert!(status.contains(StatusRegister::PROGRAM_FAILED));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(b.flash().read_bytes(0x100, 2), vec![0xFF, 0xFF]);
        // Erase still works and clears the failure
        b.erase_sector(0).unwrap();
    }

    #[test]
    fn test_slow_flash_domain() {
        let mut cfg = config();
        cfg.soc.flash_div = 3;
        cfg.soc.sequencer.init_latency = 8;
        cfg.flash.latency = 8;
        let mut b = Bench::new(cfg).unwrap();
        b.program(0x10, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(b.flash().read_bytes(0x10, 4), vec![0xAA, 0xBB, 0xCC, 0xDD]);
        b.erase_sector(0x10).unwrap();
        assert_eq!(b.flash().read_bytes(0x10, 4), vec![0xFF; 4]);
    }

    #[test]
    fn test_trace_windows() {
        let mut b = bench();
        b.set_tracing(true);
        b.erase_sector(0x4_0000).unwrap();
        let windows = b.take_windows();
        let first = windows[0].packet().unwrap();
        assert_eq!(first.word_address(), opcodes::UNLOCK1_ADDR);
        assert_eq!(first.payload, opcodes::UNLOCK1_DATA);
        assert_eq!(windows[5].packet().unwrap().sector_number(), 1);
        let last = windows.last().unwrap();
        assert!(last.is_read());
        assert!(StatusRegister::from_bits_retain(last.payload().unwrap()).is_ready());
        // Busy polls before the final read
        assert!(windows.len() > 8);
    }

    #[test]
    fn test_timeout() {
        let mut cfg = config();
        cfg.flash.erase_busy = 1_000_000;
        let mut b = Bench::new(cfg).unwrap();
        b.set_timeout(20_000);
        assert!(matches!(b.erase_sector(0), Err(ModelError::Timeout(_))));
    }

    #[test]
    fn test_argument_checks() {
        let mut b = bench();
        assert!(matches!(b.program(0x101, &[0]), Err(ModelError::Unaligned(0x101))));
        assert!(matches!(
            b.program_page(0x1FE, &[0; 4]),
            Err(ModelError::OutOfRange { .. })
        ));
        assert!(matches!(
            b.erase_sector(0x10_0000),
            Err(ModelError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_unaddressable_geometry_rejected() {
        let mut small_sectors = config();
        small_sectors.flash.sector_size = 64 * 1024;
        assert!(matches!(
            Bench::new(small_sectors),
            Err(ModelError::InvalidGeometry { .. })
        ));
        let mut too_big = config();
        too_big.flash.size = 32 * 1024 * 1024;
        assert!(matches!(
            Bench::new(too_big),
            Err(ModelError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_page_chunks() {
        let data = [0u8; 1000];
        let chunks = page_chunks(0x1F0, &data);
        let spans: Vec<(u32, usize)> = chunks.iter().map(|(a, c)| (*a, c.len())).collect();
        assert_eq!(spans, vec![(0x1F0, 16), (0x200, 512), (0x400, 472)]);
    }
}
