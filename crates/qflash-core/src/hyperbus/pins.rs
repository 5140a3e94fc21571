//! HyperBus pin bundle

/// Levels the controller drives onto the flash bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperbusPins {
    /// Output clock
    pub clk_o: bool,
    /// Chip select, active low
    pub csn_o: bool,
    /// Read/write data strobe output
    pub rwds_o: bool,
    /// Strobe output enable
    pub rwds_oe: bool,
    /// Data byte output
    pub dq_o: u8,
    /// Data output enable
    pub dq_oe: bool,
}

impl Default for HyperbusPins {
    fn default() -> Self {
        Self {
            clk_o: false,
            csn_o: true,
            rwds_o: false,
            rwds_oe: false,
            dq_o: 0,
            dq_oe: true,
        }
    }
}

/// Levels the flash device drives back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HyperbusInputs {
    /// Read/write data strobe input
    pub rwds_i: bool,
    /// Data byte input
    pub dq_i: u8,
}
