//! Opponent descriptions, vehicle colors and the starting grid

use crate::codec::WireSize;
use crate::snapshot::Transform;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl VehicleColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl WireSize for VehicleColor {
    const WIRE_SIZE: usize = 3;
}

/// Body colors handed out at race start.
pub const VEHICLE_PALETTE: [VehicleColor; 8] = [
    VehicleColor::new(220, 40, 40),
    VehicleColor::new(40, 90, 220),
    VehicleColor::new(60, 200, 80),
    VehicleColor::new(240, 200, 30),
    VehicleColor::new(160, 60, 200),
    VehicleColor::new(250, 130, 20),
    VehicleColor::new(30, 200, 210),
    VehicleColor::new(235, 235, 235),
];

/// What a client needs to pre-spawn an opponent before its first snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpponentInfo {
    pub id: u16,
    pub color: VehicleColor,
    pub grid_position: u8,
    pub nickname: String,
}

/// Grid slots as `(rotation quaternion xyzw, origin)`.
pub const STARTING_POSITIONS: [([f32; 4], [f32; 3]); 8] = [
    ([-0.00267267, -0.717962, -0.00671669, 0.696045], [-22.453, -0.160233, 2.05332]),
    ([-0.00101643, -0.717909, -0.0048289, 0.69612], [-14.6133, -0.25759, 8.6199]),
    ([-0.00116076, -0.715315, -0.00352614, 0.698792], [-6.47278, -0.246592, 2.40021]),
    ([-0.00111546, -0.711308, -0.00197497, 0.702877], [1.3951, -0.273447, 8.79956]),
    ([-0.00260312, -0.718089, -0.00271119, 0.695941], [9.45136, -0.287051, 2.72824]),
    ([-0.00310603, -0.708566, -0.00314201, 0.705631], [17.4364, -0.321969, 9.07955]),
    ([-0.00289886, -0.707143, -0.00293046, 0.707058], [25.4526, -0.357757, 2.95028]),
    ([-0.00182313, -0.710226, -0.00184198, 0.703969], [33.3998, -0.380791, 8.97912]),
];

/// Transform of a grid slot. Slots wrap around the table.
pub fn starting_transform(grid_position: u8) -> Transform {
    let (rotation, origin) = STARTING_POSITIONS[grid_position as usize % STARTING_POSITIONS.len()];
    Transform::from_rotation_translation(rotation, origin)
}
