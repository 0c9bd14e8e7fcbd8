//! State and command types for the pellet machine.
//!
//! The controller pushes [`StateEvent`] snapshots over its event namespace and
//! accepts [`Mutation`] payloads on its command endpoint. Snapshots are always
//! total; a consumer never receives a partial state.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::machine_identification::MachineIdentification;
use crate::{MACHINE_PELLET, VENDOR};

pub const MACHINE_IDENTIFICATION: MachineIdentification = MachineIdentification::new(VENDOR, MACHINE_PELLET);

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Forward,
    Reverse,
}

/// Inverter ramp level, 1 (slowest) to 15 (fastest).
///
/// Used for both the acceleration and deceleration setpoints. The controller
/// rejects anything outside the range, so out-of-range levels are
/// unrepresentable; on the wire a level is a plain number.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct RampLevel(u8);

impl RampLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 15;

    fn is_valid(value: u8) -> bool {
        (Self::MIN..=Self::MAX).contains(&value)
    }

    /// For values known to be in range, e.g. literals.
    pub fn from_raw(value: u8) -> Self {
        assert!(Self::is_valid(value));

        Self(value)
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for RampLevel {
    type Error = RampLevelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if !Self::is_valid(value) {
            return Err(RampLevelError::OutOfRange {
                value,
            });
        }

        Ok(Self(value))
    }
}

impl From<RampLevel> for u8 {
    fn from(level: RampLevel) -> Self {
        level.0
    }
}

impl Default for RampLevel {
    fn default() -> Self {
        // Controller power-on default.
        Self(7)
    }
}

impl Display for RampLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RampLevelError {
    #[error("ramp level must be 1..=15. value: {value}")]
    OutOfRange { value: u8 },
}

/// Inverter setpoints and run state as last confirmed by the controller.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct InverterState {
    pub run_state: RunState,
    /// Target output frequency in Hz.
    pub frequency_target: f64,
    pub acceleration_level: RampLevel,
    pub deceleration_level: RampLevel,
}

impl Default for InverterState {
    fn default() -> Self {
        // Controller power-on defaults.
        Self {
            run_state: RunState::Stopped,
            frequency_target: 50.0,
            acceleration_level: RampLevel::default(),
            deceleration_level: RampLevel::default(),
        }
    }
}

/// Laser diameter-measurement setpoints, all in mm.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LaserState {
    pub target_diameter: f64,
    pub lower_tolerance: f64,
    pub higher_tolerance: f64,
}

/// A full state snapshot as pushed by the controller.
///
/// Replaced wholesale on every arrival, never patched field-by-field.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StateEvent {
    /// True for the snapshot the controller emits before it has synced with
    /// the hardware; such a snapshot carries defaults, not confirmed values.
    pub is_default_state: bool,

    pub inverter_state: InverterState,
    pub laser_state: LaserState,
}

impl Default for StateEvent {
    fn default() -> Self {
        Self {
            is_default_state: true,
            inverter_state: InverterState::default(),
            laser_state: LaserState::default(),
        }
    }
}

/// Command payload accepted by the controller.
///
/// Externally tagged on the wire, e.g. `{"SetFrequencyTarget": 42.0}`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum Mutation {
    SetRunState(RunState),
    SetFrequencyTarget(f64),
    SetAccelerationLevel(RampLevel),
    SetDecelerationLevel(RampLevel),
    SetTargetDiameter(f64),
    SetLowerTolerance(f64),
    SetHigherTolerance(f64),
}
