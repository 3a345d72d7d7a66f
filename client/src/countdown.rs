//! Locally ticking countdown display
//!
//! The server's value is authoritative and replaces ours whenever it arrives.
//! Between updates a 1-second timer counts down, stopping at zero.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayCountdown {
    remaining: u32,
}

impl DisplayCountdown {
    pub fn new(secs: u32) -> Self {
        Self { remaining: secs }
    }

    pub fn set(&mut self, secs: u32) {
        self.remaining = secs;
    }

    /// One second passed. Returns the new value.
    pub fn tick(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn finished(&self) -> bool {
        self.remaining == 0
    }
}
