//! Synchronizers and edge detection
//!
//! Externally driven lines (select, sample clock, data nibble) and control
//! bits crossing between clock domains pass through a two-stage register
//! chain before any logic looks at them. The output is the input delayed by
//! exactly [`SYNC_STAGES`] ticks.

/// Depth of the synchronizer register chain
pub const SYNC_STAGES: usize = 2;

/// Two-flop synchronizer for a single value (bit or bus)
///
/// Only quasi-static multi-bit values may be synchronized this way; a bus
/// that changes while being sampled can tear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synchronizer<T: Copy> {
    stages: [T; SYNC_STAGES],
    reset: T,
}

impl<T: Copy> Synchronizer<T> {
    /// Create a synchronizer whose stages start at `reset`
    pub const fn new(reset: T) -> Self {
        Self {
            stages: [reset; SYNC_STAGES],
            reset,
        }
    }

    /// Synchronized value (input as it was `SYNC_STAGES` ticks ago)
    pub fn get(&self) -> T {
        self.stages[SYNC_STAGES - 1]
    }

    /// Clock one new sample into the chain
    pub fn clock(&mut self, input: T) {
        for i in (1..SYNC_STAGES).rev() {
            self.stages[i] = self.stages[i - 1];
        }
        self.stages[0] = input;
    }

    /// Return all stages to the reset value
    pub fn reset(&mut self) {
        self.stages = [self.reset; SYNC_STAGES];
    }
}

/// Transition of a synchronized bit between two consecutive ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 0 -> 1
    Rose,
    /// 1 -> 0
    Fell,
    /// Unchanged
    Steady,
}

impl Transition {
    /// True on a 0 -> 1 transition
    pub const fn rose(self) -> bool {
        matches!(self, Self::Rose)
    }

    /// True on a 1 -> 0 transition
    pub const fn fell(self) -> bool {
        matches!(self, Self::Fell)
    }
}

/// Edge detector holding the previous sample of a synchronized bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    past: bool,
    reset: bool,
}

impl Edge {
    /// Create a detector whose previous sample starts at `reset`
    pub const fn new(reset: bool) -> Self {
        Self { past: reset, reset }
    }

    /// Compare `now` with the previous tick's sample, then remember `now`
    pub fn sample(&mut self, now: bool) -> Transition {
        let t = match (self.past, now) {
            (false, true) => Transition::Rose,
            (true, false) => Transition::Fell,
            _ => Transition::Steady,
        };
        self.past = now;
        t
    }

    /// Forget history
    pub fn reset(&mut self) {
        self.past = self.reset;
    }
}
