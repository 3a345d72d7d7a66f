//! Vehicle collaborator interface and a headless stand-in
//!
//! The physics engine and renderer live outside this crate. The session only
//! needs a handle it can steer, overwrite from the network and read back.

use shared::{ControlState, InputBitmap, Transform, VehicleColor, VehicleStateSnapshot};

/// A simulated vehicle, local or remote.
pub trait Vehicle: Send {
    fn apply_control_state(&mut self, controls: ControlState);

    /// Overwrites transform, velocity and steering with a received snapshot.
    fn apply_remote_state(&mut self, snapshot: &VehicleStateSnapshot);

    fn step(&mut self, dt: f32);

    fn transform(&self) -> Transform;

    fn velocity(&self) -> [f32; 3];

    fn steering_angle(&self) -> f32;

    fn snapshot(&self, inputs: InputBitmap) -> VehicleStateSnapshot {
        VehicleStateSnapshot {
            transform: self.transform(),
            velocity: self.velocity(),
            steering_angle: self.steering_angle(),
            inputs,
        }
    }
}

/// Creates vehicles for the local player and for opponents.
pub trait VehicleFactory: Send + Sync {
    fn spawn(&self, transform: Transform, color: VehicleColor) -> Box<dyn Vehicle>;
}

const ACCELERATION: f32 = 8.0;
const BRAKING: f32 = 12.0;
const ROLLING_DRAG: f32 = 0.5;
const HANDBRAKE_DRAG: f32 = 2.0;
const MAX_SPEED: f32 = 40.0;
const MAX_REVERSE_SPEED: f32 = 10.0;
const MAX_STEERING_ANGLE: f32 = 0.5;

/// Straight-line kinematic vehicle used when no physics engine is attached.
///
/// Moves along its local z axis. Steering is reported but never turns the
/// body.
#[derive(Debug, Clone)]
pub struct HeadlessVehicle {
    transform: Transform,
    velocity: [f32; 3],
    steering_angle: f32,
    controls: ControlState,
    pub color: VehicleColor,
}

impl HeadlessVehicle {
    pub fn new(transform: Transform, color: VehicleColor) -> Self {
        Self {
            transform,
            velocity: [0.0; 3],
            steering_angle: 0.0,
            controls: ControlState::default(),
            color,
        }
    }

    fn forward(&self) -> [f32; 3] {
        let basis = &self.transform.basis;
        [basis[0][2], basis[1][2], basis[2][2]]
    }
}

impl Vehicle for HeadlessVehicle {
    fn apply_control_state(&mut self, controls: ControlState) {
        self.controls = controls;
        self.steering_angle = match (controls.left, controls.right) {
            (true, false) => MAX_STEERING_ANGLE,
            (false, true) => -MAX_STEERING_ANGLE,
            _ => 0.0,
        };
    }

    fn apply_remote_state(&mut self, snapshot: &VehicleStateSnapshot) {
        self.transform = snapshot.transform;
        self.velocity = snapshot.velocity;
        self.steering_angle = snapshot.steering_angle;
    }

    fn step(&mut self, dt: f32) {
        let forward = self.forward();
        let mut speed: f32 = self
            .velocity
            .iter()
            .zip(forward.iter())
            .map(|(v, f)| v * f)
            .sum();

        if self.controls.forward {
            speed += ACCELERATION * dt;
        }
        if self.controls.backward {
            speed -= BRAKING * dt;
        }
        let drag = if self.controls.handbrake {
            HANDBRAKE_DRAG
        } else if !self.controls.forward && !self.controls.backward {
            ROLLING_DRAG
        } else {
            0.0
        };
        speed *= (1.0 - drag * dt).max(0.0);
        speed = speed.clamp(-MAX_REVERSE_SPEED, MAX_SPEED);

        for axis in 0..3 {
            self.velocity[axis] = forward[axis] * speed;
            self.transform.origin[axis] += self.velocity[axis] * dt;
        }
    }

    fn transform(&self) -> Transform {
        self.transform
    }

    fn velocity(&self) -> [f32; 3] {
        self.velocity
    }

    fn steering_angle(&self) -> f32 {
        self.steering_angle
    }
}

/// Spawns [`HeadlessVehicle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessFactory;

impl VehicleFactory for HeadlessFactory {
    fn spawn(&self, transform: Transform, color: VehicleColor) -> Box<dyn Vehicle> {
        Box::new(HeadlessVehicle::new(transform, color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn white() -> VehicleColor {
        VehicleColor::new(255, 255, 255)
    }

    #[test]
    fn test_throttle_moves_along_local_z() {
        let mut vehicle = HeadlessVehicle::new(Transform::IDENTITY, white());
        vehicle.apply_control_state(ControlState {
            forward: true,
            ..ControlState::default()
        });

        for _ in 0..32 {
            vehicle.step(1.0 / 32.0);
        }

        let velocity = vehicle.velocity();
        assert_approx_eq!(velocity[2], ACCELERATION, 1e-3);
        assert_approx_eq!(velocity[0], 0.0);
        assert!(vehicle.transform().position()[2] > 0.0);
    }

    #[test]
    fn test_drag_slows_coasting_vehicle() {
        let mut vehicle = HeadlessVehicle::new(Transform::IDENTITY, white());
        vehicle.apply_remote_state(&VehicleStateSnapshot {
            velocity: [0.0, 0.0, 10.0],
            ..VehicleStateSnapshot::default()
        });

        vehicle.step(0.5);
        assert!(vehicle.velocity()[2] < 10.0);
        assert!(vehicle.velocity()[2] > 0.0);
    }

    #[test]
    fn test_steering_follows_controls() {
        let mut vehicle = HeadlessVehicle::new(Transform::IDENTITY, white());
        vehicle.apply_control_state(ControlState {
            left: true,
            ..ControlState::default()
        });
        assert_approx_eq!(vehicle.steering_angle(), MAX_STEERING_ANGLE);

        vehicle.apply_control_state(ControlState {
            left: true,
            right: true,
            ..ControlState::default()
        });
        assert_approx_eq!(vehicle.steering_angle(), 0.0);
    }

    #[test]
    fn test_remote_state_overwrites_and_snapshot_reads_back() {
        let factory = HeadlessFactory;
        let mut vehicle = factory.spawn(Transform::IDENTITY, white());
        let remote = VehicleStateSnapshot {
            transform: Transform::from_translation([3.0, 1.0, -2.0]),
            velocity: [1.0, 0.0, 0.0],
            steering_angle: 0.2,
            inputs: InputBitmap(InputBitmap::BRAKE),
        };

        vehicle.apply_remote_state(&remote);
        let snapshot = vehicle.snapshot(remote.inputs);
        assert_eq!(snapshot, remote);
    }
}
