//! Remote vehicles, keyed by client id

use crate::vehicle::{Vehicle, VehicleFactory};
use log::debug;
use shared::{ClientState, InputBitmap, OpponentInfo, VehicleColor};
use std::collections::HashMap;
use std::sync::Arc;

const UNKNOWN_COLOR: VehicleColor = VehicleColor::new(128, 128, 128);

pub struct Opponent {
    pub vehicle: Box<dyn Vehicle>,
    /// Inputs from the newest snapshot, replayed between snapshots
    pub inputs: InputBitmap,
    pub nickname: Option<String>,
    pub color: VehicleColor,
}

/// Every opponent the client knows about.
///
/// Entries are created from `OpponentsInfo` before the race, or lazily the
/// first time a state for an unknown id arrives. The local client's own id is
/// never added. Entries live until the session ends.
pub struct OpponentRoster {
    factory: Arc<dyn VehicleFactory>,
    local_id: Option<u16>,
    opponents: HashMap<u16, Opponent>,
}

impl OpponentRoster {
    pub fn new(factory: Arc<dyn VehicleFactory>) -> Self {
        Self {
            factory,
            local_id: None,
            opponents: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> Option<u16> {
        self.local_id
    }

    pub fn set_local_id(&mut self, id: u16) {
        self.local_id = Some(id);
        self.opponents.remove(&id);
    }

    /// Pre-spawns an opponent at its grid slot.
    pub fn spawn_from_info(&mut self, info: &OpponentInfo) {
        if Some(info.id) == self.local_id {
            return;
        }
        if let Some(existing) = self.opponents.get_mut(&info.id) {
            existing.nickname = Some(info.nickname.clone());
            existing.color = info.color;
            return;
        }

        let transform = shared::opponent::starting_transform(info.grid_position);
        debug!("Spawning opponent {} ({}) at grid {}", info.id, info.nickname, info.grid_position);
        self.opponents.insert(
            info.id,
            Opponent {
                vehicle: self.factory.spawn(transform, info.color),
                inputs: InputBitmap::default(),
                nickname: Some(info.nickname.clone()),
                color: info.color,
            },
        );
    }

    /// Overwrites one opponent with a received state. Returns false for the local id.
    pub fn apply_state(&mut self, state: &ClientState) -> bool {
        if Some(state.client_id) == self.local_id {
            return false;
        }

        let factory = &self.factory;
        let opponent = self.opponents.entry(state.client_id).or_insert_with(|| {
            debug!("First sighting of opponent {}", state.client_id);
            Opponent {
                vehicle: factory.spawn(state.snapshot.transform, UNKNOWN_COLOR),
                inputs: InputBitmap::default(),
                nickname: None,
                color: UNKNOWN_COLOR,
            }
        });
        opponent.vehicle.apply_remote_state(&state.snapshot);
        opponent.inputs = state.snapshot.inputs;
        true
    }

    /// Applies a batch, returning how many entries were used.
    pub fn apply_batch(&mut self, states: &[ClientState]) -> usize {
        states.iter().filter(|state| self.apply_state(state)).count()
    }

    /// Advances every opponent with its last known inputs.
    pub fn apply_last_inputs(&mut self, dt: f32) {
        for opponent in self.opponents.values_mut() {
            opponent.vehicle.apply_control_state(opponent.inputs.controls());
            opponent.vehicle.step(dt);
        }
    }

    pub fn get(&self, id: u16) -> Option<&Opponent> {
        self.opponents.get(&id)
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.opponents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.opponents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opponents.is_empty()
    }

    pub fn clear(&mut self) {
        self.opponents.clear();
    }
}
