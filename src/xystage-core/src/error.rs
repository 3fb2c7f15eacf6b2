// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

use crate::gpio::GpioError;
use crate::motor::sequencer::PhaseMismatch;
use crate::rail::Limit;

/// Error type returned by motor, rail and stage operations.
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("not calibrated")]
    NotCalibrated,

    #[error("requested speed {requested:.2} rpm exceeds maximum {max:.2} rpm")]
    SpeedExceeded { requested: f64, max: f64 },

    #[error("invalid speed {0} rpm")]
    InvalidSpeed(f64),

    #[error("invalid target position {0} m")]
    InvalidTarget(f64),

    #[error(transparent)]
    PhaseMismatch(#[from] PhaseMismatch),

    #[error("{0} limit switch did not trip during calibration")]
    LimitNotReached(Limit),

    #[error("gpio: {0}")]
    Gpio(#[from] GpioError),
}

pub type MotionResult<T> = Result<T, MotionError>;

impl MotionError {
    /// True for errors caused by the requested motion rather than the hardware.
    pub fn is_command_error(&self) -> bool {
        matches!(
            self,
            Self::NotCalibrated
                | Self::SpeedExceeded { .. }
                | Self::InvalidSpeed(_)
                | Self::InvalidTarget(_)
        )
    }
}
