//! Math types.
//!
//! Positions are kept in `f64` block units, rotations in degrees, matching
//! what the wire formats expect before quantization.

use serde::{Deserialize, Serialize};

/// 3D vector in block units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f64 {
        self.dot(self)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn distance_sq(self, rhs: Self) -> f64 {
        self.sub(rhs).len_sq()
    }
}

/// Opaque world/dimension handle assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct WorldId(pub u32);

/// A point in a world plus a facing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub world: WorldId,
    pub pos: Vec3,
    /// Degrees, 0 = facing +Z.
    pub yaw: f32,
    /// Degrees, positive looks down.
    pub pitch: f32,
}

impl Location {
    pub const fn new(world: WorldId, pos: Vec3, yaw: f32, pitch: f32) -> Self {
        Self {
            world,
            pos,
            yaw,
            pitch,
        }
    }

    /// Squared distance, or `None` when the two locations are in different worlds.
    pub fn distance_sq(&self, other: &Location) -> Option<f64> {
        (self.world == other.world).then(|| self.pos.distance_sq(other.pos))
    }

    /// Whether `other` is in the same world and within `radius` blocks.
    ///
    /// Compares against the squared radius, so no square root is taken.
    pub fn within(&self, other: &Location, radius: f64) -> bool {
        self.distance_sq(other)
            .is_some_and(|d| d <= radius * radius)
    }

    /// Yaw/pitch that make an entity at `self` face `target`.
    pub fn look_at(&self, target: Vec3) -> (f32, f32) {
        let d = target.sub(self.pos);
        let horizontal = (d.x * d.x + d.z * d.z).sqrt();
        if horizontal == 0.0 && d.y == 0.0 {
            return (self.yaw, self.pitch);
        }
        let yaw = (-d.x).atan2(d.z).to_degrees();
        let pitch = (-d.y).atan2(horizontal).to_degrees();
        (wrap_degrees(yaw as f32), pitch as f32)
    }
}

/// Wraps an angle into `[-180, 180)`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a >= 180.0 {
        a -= 360.0;
    }
    if a < -180.0 {
        a += 360.0;
    }
    a
}

/// Converts degrees into the protocol's 1/256 turn angle byte.
pub fn angle_byte(degrees: f32) -> u8 {
    ((degrees * 256.0 / 360.0).floor() as i32 & 0xFF) as u8
}
