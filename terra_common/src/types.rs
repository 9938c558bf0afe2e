//! Geometry, units, and motion-profile value types.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

use serde::{Deserialize, Serialize};

/// One of the three linear degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    X,
    Y,
    Z,
}

impl AxisId {
    /// All axes in dispatch order.
    pub const ALL: [AxisId; 3] = [AxisId::X, AxisId::Y, AxisId::Z];
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisId::X => write!(f, "x"),
            AxisId::Y => write!(f, "y"),
            AxisId::Z => write!(f, "z"),
        }
    }
}

/// Length unit accepted by movement commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Mm,
    Cm,
}

impl LengthUnit {
    /// Millimetres per one of this unit.
    #[inline]
    pub const fn to_mm(self) -> f64 {
        match self {
            LengthUnit::Mm => 1.0,
            LengthUnit::Cm => 10.0,
        }
    }
}

/// Speed band within a phase profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedBand {
    Slow,
    Normal,
    Fast,
}

/// Machine phase selecting which speed profile applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FaultManual,
    Homing,
    Spraying,
    Tending,
    Cleaning,
}

/// One of the three plant-tray tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Spraying,
    Tending,
    Cleaning,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Spraying => write!(f, "spraying"),
            TaskKind::Tending => write!(f, "tending"),
            TaskKind::Cleaning => write!(f, "cleaning"),
        }
    }
}

/// Exchangeable liquid tanks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Liquid {
    Water,
    Disinfectant,
}

impl fmt::Display for Liquid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liquid::Water => write!(f, "water"),
            Liquid::Disinfectant => write!(f, "disinfectant"),
        }
    }
}

/// A position or delta over the tray, in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Coordinate {
    pub const ORIGIN: Coordinate = Coordinate {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Coordinate {
    fn add_assign(&mut self, rhs: Coordinate) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Coordinate {
    type Output = Coordinate;

    fn neg(self) -> Coordinate {
        Coordinate::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// One cleaning stop: tray position, dwell, and whether the sonicator
/// bath runs while the finger is down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CleaningStation {
    pub x: f64,
    pub y: f64,
    /// Dwell at the station in seconds.
    pub time: u64,
    pub sonicator: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversion_factors() {
        assert_eq!(LengthUnit::Mm.to_mm(), 1.0);
        assert_eq!(LengthUnit::Cm.to_mm(), 10.0);
    }

    #[test]
    fn coordinate_arithmetic() {
        let a = Coordinate::new(1.0, 2.0, 3.0);
        let b = Coordinate::new(0.5, -2.0, 1.0);
        assert_eq!(a + b, Coordinate::new(1.5, 0.0, 4.0));
        assert_eq!(a - b, Coordinate::new(0.5, 4.0, 2.0));
        assert_eq!(-(a - a), Coordinate::ORIGIN);
    }

    #[test]
    fn coordinate_sum_of_deltas() {
        let deltas = [
            Coordinate::new(10.0, 0.0, 0.0),
            Coordinate::new(0.0, 5.0, 0.0),
            Coordinate::new(-2.5, 0.0, 1.0),
        ];
        let mut pos = Coordinate::ORIGIN;
        for d in deltas {
            pos += d;
        }
        assert_eq!(pos, Coordinate::new(7.5, 5.0, 1.0));
    }
}
