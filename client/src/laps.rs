//! Lap bookkeeping
//!
//! Checkpoint geometry lives elsewhere; whatever detects a completed lap calls
//! [`LapTracker::report_local_lap_increment`] and the session forwards the new
//! count to the server.

use std::collections::HashMap;

pub trait LapTracker {
    /// Records one more local lap and returns the new total.
    fn report_local_lap_increment(&mut self) -> u8;

    fn set_opponent_laps(&mut self, client_id: u16, laps: u8);
}

#[derive(Debug, Default, Clone)]
pub struct LapBoard {
    local_laps: u8,
    opponents: HashMap<u16, u8>,
}

impl LapBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_laps(&self) -> u8 {
        self.local_laps
    }

    pub fn opponent_laps(&self, client_id: u16) -> Option<u8> {
        self.opponents.get(&client_id).copied()
    }
}

impl LapTracker for LapBoard {
    fn report_local_lap_increment(&mut self) -> u8 {
        self.local_laps = self.local_laps.saturating_add(1);
        self.local_laps
    }

    fn set_opponent_laps(&mut self, client_id: u16, laps: u8) {
        self.opponents.insert(client_id, laps);
    }
}
