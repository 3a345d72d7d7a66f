//! Vehicle state exchanged over the data channel

use crate::codec::WireSize;
use serde::{Deserialize, Serialize};

/// Rigid-body transform in the physics engine's float layout.
///
/// Three basis rows and the origin, each padded to four floats, giving a
/// 64-byte blob on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub basis: [[f32; 4]; 3],
    pub origin: [f32; 4],
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        basis: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
        origin: [0.0; 4],
    };

    /// Builds a transform from a unit quaternion `(x, y, z, w)` and a translation.
    pub fn from_rotation_translation(rotation: [f32; 4], translation: [f32; 3]) -> Self {
        let [x, y, z, w] = rotation;
        let d = x * x + y * y + z * z + w * w;
        if d == 0.0 {
            return Self::from_translation(translation);
        }

        let s = 2.0 / d;
        let (xs, ys, zs) = (x * s, y * s, z * s);
        let (wx, wy, wz) = (w * xs, w * ys, w * zs);
        let (xx, xy, xz) = (x * xs, x * ys, x * zs);
        let (yy, yz, zz) = (y * ys, y * zs, z * zs);

        Self {
            basis: [
                [1.0 - (yy + zz), xy - wz, xz + wy, 0.0],
                [xy + wz, 1.0 - (xx + zz), yz - wx, 0.0],
                [xz - wy, yz + wx, 1.0 - (xx + yy), 0.0],
            ],
            origin: [translation[0], translation[1], translation[2], 0.0],
        }
    }

    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            origin: [translation[0], translation[1], translation[2], 0.0],
            ..Self::IDENTITY
        }
    }

    pub fn position(&self) -> [f32; 3] {
        [self.origin[0], self.origin[1], self.origin[2]]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl WireSize for Transform {
    const WIRE_SIZE: usize = 64;
}

/// Driver controls as booleans, the shape the vehicle collaborator consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub forward: bool,
    pub backward: bool,
    pub handbrake: bool,
    pub left: bool,
    pub right: bool,
}

/// Packed driver inputs, one bit per control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBitmap(pub u8);

impl InputBitmap {
    pub const THROTTLE: u8 = 1 << 0;
    pub const BRAKE: u8 = 1 << 1;
    pub const HANDBRAKE: u8 = 1 << 2;
    pub const LEFT: u8 = 1 << 3;
    pub const RIGHT: u8 = 1 << 4;

    pub fn from_controls(controls: ControlState) -> Self {
        let mut bits = 0;
        if controls.forward {
            bits |= Self::THROTTLE;
        }
        if controls.backward {
            bits |= Self::BRAKE;
        }
        if controls.handbrake {
            bits |= Self::HANDBRAKE;
        }
        if controls.left {
            bits |= Self::LEFT;
        }
        if controls.right {
            bits |= Self::RIGHT;
        }
        Self(bits)
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn controls(&self) -> ControlState {
        ControlState {
            forward: self.contains(Self::THROTTLE),
            backward: self.contains(Self::BRAKE),
            handbrake: self.contains(Self::HANDBRAKE),
            left: self.contains(Self::LEFT),
            right: self.contains(Self::RIGHT),
        }
    }
}

/// One client's vehicle state at a point in time.
///
/// Layout: transform (64) + velocity (12) + steering angle (4) + inputs (1).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleStateSnapshot {
    pub transform: Transform,
    pub velocity: [f32; 3],
    pub steering_angle: f32,
    pub inputs: InputBitmap,
}

impl WireSize for VehicleStateSnapshot {
    const WIRE_SIZE: usize = 81;
}
