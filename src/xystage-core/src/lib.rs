// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod error;
pub mod gpio;
pub mod motor;
pub mod progress;
pub mod rail;
pub mod stage;

#[cfg(test)]
pub(crate) mod testing;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use error::{MotionError, MotionResult};
pub use gpio::{Channel, DigitalInput, DigitalOutput, GpioError, Level, LimitSwitch, PinNumbering};
pub use motor::sequencer::{Direction, PhaseIndex, PhaseMismatch, StepSequencer, PHASE_TABLE};
pub use motor::{MotorController, MotorParams, Rotation};
pub use progress::Progress;
pub use rail::calibration::{CalibrationEvent, CalibrationMachine, CalibrationState};
pub use rail::{Limit, Rail, RailMove, RailParams};
pub use stage::{StageController, StageMove};
