//! Clocked component abstraction
//!
//! Every model in this crate is an explicitly stepped state machine. One
//! simulated clock tick consists of two phases:
//!
//! 1. `posedge` on every component, in a fixed order. Registered values are
//!    computed from the register contents left by the previous tick and the
//!    inputs presented for this tick.
//! 2. `negedge` on every component. This is where logic clocked from an
//!    inverted clock runs (the flash output clock, for instance).
//!
//! Outputs read between ticks always reflect the registers after the last
//! completed tick.

/// A synchronous component advanced once per clock tick
pub trait Clocked {
    /// Inputs sampled on the active edge
    type Input;
    /// Combinational outputs valid during the tick just evaluated
    type Output;

    /// Evaluate the rising edge of the primary clock
    fn posedge(&mut self, input: &Self::Input) -> Self::Output;

    /// Evaluate the falling edge (inverted clock domain)
    ///
    /// Default implementation does nothing.
    fn negedge(&mut self) {}

    /// Return every register to its reset value
    fn reset(&mut self);
}

/// Clock enable for a slower domain derived from the tick rate
///
/// Fires once every `div` ticks, starting with the first tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivider {
    div: u32,
    count: u32,
}

impl ClockDivider {
    /// Create a divider; `div` of 0 is treated as 1
    pub const fn new(div: u32) -> Self {
        Self {
            div: if div == 0 { 1 } else { div },
            count: 0,
        }
    }

    /// Advance one tick, returning true when the slow domain is clocked
    pub fn tick(&mut self) -> bool {
        let fire = self.count == 0;
        self.count += 1;
        if self.count == self.div {
            self.count = 0;
        }
        fire
    }

    /// Division ratio
    pub const fn div(&self) -> u32 {
        self.div
    }
}
