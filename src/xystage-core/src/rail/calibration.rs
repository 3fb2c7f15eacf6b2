// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rail calibration state machine.
//!
//! Calibration is a fixed sequence: drive to the far switch, back off and set
//! zero, drive to the near switch while measuring, back off again. The machine
//! only accepts the transitions of that sequence, so a rail can never claim to
//! be calibrated after skipping a phase.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Events that drive the calibration sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    /// Calibration requested
    Started,
    /// Far switch tripped (or the search angle ran out)
    FarLimitReached,
    /// Backed off the far switch, zero reference set
    ZeroSet,
    /// Near switch tripped (or the search angle ran out)
    NearLimitReached,
    /// Backed off the near switch, rail length known
    Measured { length: f64 },
    /// A motor or switch operation failed
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "data")]
pub enum CalibrationState {
    #[default]
    Uninitialized,
    DrivingToFar,
    BackingOffFar,
    DrivingToNear,
    BackingOffNear,
    Calibrated {
        length: f64,
    },
    Failed {
        message: String,
    },
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::DrivingToFar => write!(f, "DrivingToFar"),
            Self::BackingOffFar => write!(f, "BackingOffFar"),
            Self::DrivingToNear => write!(f, "DrivingToNear"),
            Self::BackingOffNear => write!(f, "BackingOffNear"),
            Self::Calibrated { length } => write!(f, "Calibrated({:.4} m)", length),
            Self::Failed { message } => write!(f, "Failed({})", message),
        }
    }
}

impl CalibrationState {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated { .. })
    }

    /// Motion phases of the sequence.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::DrivingToFar | Self::BackingOffFar | Self::DrivingToNear | Self::BackingOffNear
        )
    }

    pub fn length(&self) -> Option<f64> {
        match self {
            Self::Calibrated { length } => Some(*length),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationMachine {
    state: CalibrationState,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl CalibrationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Apply an event. Returns true if the state changed.
    pub fn process_event(&mut self, event: CalibrationEvent) -> bool {
        match self.next_state(event) {
            Some(state) => {
                self.state = state;
                self.transition_count += 1;
                self.last_transition = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    fn next_state(&self, event: CalibrationEvent) -> Option<CalibrationState> {
        use CalibrationEvent as E;
        use CalibrationState as S;

        match (&self.state, event) {
            // A dropped run leaves the machine mid-sequence, so restart from anywhere
            (_, E::Started) => Some(S::DrivingToFar),

            (S::DrivingToFar, E::FarLimitReached) => Some(S::BackingOffFar),
            (S::BackingOffFar, E::ZeroSet) => Some(S::DrivingToNear),
            (S::DrivingToNear, E::NearLimitReached) => Some(S::BackingOffNear),
            (S::BackingOffNear, E::Measured { length }) => Some(S::Calibrated { length }),

            (current, E::Failed(message)) if current.is_in_progress() => {
                Some(S::Failed { message })
            }

            _ => None,
        }
    }
}
