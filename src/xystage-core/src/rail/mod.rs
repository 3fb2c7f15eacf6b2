// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! One linear axis: a motor on a lead screw between two limit switches.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MotionError, MotionResult};
use crate::gpio::LimitSwitch;
use crate::motor::{MotorController, Rotation};

pub mod calibration;

use calibration::{CalibrationEvent, CalibrationMachine, CalibrationState};

/// End of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Limit {
    /// Near end, reached by counter-clockwise rotation.
    Min,
    /// Far end, reached by clockwise rotation.
    Max,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RailParams {
    /// Linear travel per shaft revolution in metres.
    pub m_per_rotation: f64,
    /// Standoff from each switch after calibration, in revolutions.
    pub margin_rotations: f64,
    /// Angle driven while searching for a switch before giving up.
    pub search_degrees: f64,
    /// Fail calibration when a search ends without tripping its switch.
    pub require_limit_trip: bool,
}

impl Default for RailParams {
    fn default() -> Self {
        Self {
            m_per_rotation: 0.008,
            margin_rotations: 3.0,
            search_degrees: 100_000.0,
            require_limit_trip: false,
        }
    }
}

/// A validated move, ready to run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RailMove {
    pub target: f64,
    /// Signed distance from the current position.
    pub distance: f64,
    pub degrees: f64,
    pub seconds: f64,
    /// Speed the move runs at, `None` when there is nothing to do.
    /// [`Rail::run_move`] drives at exactly this rpm.
    pub rpm: Option<f64>,
}

impl RailMove {
    fn stop_at(&self) -> Limit {
        if self.distance > 0.0 {
            Limit::Max
        } else {
            Limit::Min
        }
    }
}

#[derive(Debug)]
pub struct Rail {
    name: String,
    motor: MotorController,
    min_switch: LimitSwitch,
    max_switch: LimitSwitch,
    params: RailParams,
    position: Option<f64>,
    length: Option<f64>,
    machine: CalibrationMachine,
}

impl Rail {
    pub fn new(
        name: impl Into<String>,
        motor: MotorController,
        min_switch: LimitSwitch,
        max_switch: LimitSwitch,
        params: RailParams,
    ) -> Self {
        Self {
            name: name.into(),
            motor,
            min_switch,
            max_switch,
            params,
            position: None,
            length: None,
            machine: CalibrationMachine::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in metres from the calibrated zero, `None` until calibrated.
    pub fn position(&self) -> Option<f64> {
        self.position
    }

    /// Usable travel in metres, `None` until calibrated.
    pub fn length(&self) -> Option<f64> {
        self.length
    }

    pub fn state(&self) -> &CalibrationState {
        self.machine.state()
    }

    pub fn calibration(&self) -> &CalibrationMachine {
        &self.machine
    }

    pub fn is_calibrated(&self) -> bool {
        self.machine.state().is_calibrated()
    }

    pub fn params(&self) -> &RailParams {
        &self.params
    }

    pub fn motor(&self) -> &MotorController {
        &self.motor
    }

    /// Standoff kept from each switch, in metres.
    pub fn margin(&self) -> f64 {
        self.params.margin_rotations * self.params.m_per_rotation
    }

    /// Top linear speed in metres per second.
    pub fn max_speed(&self) -> f64 {
        self.motor.max_rpm() / 60.0 * self.params.m_per_rotation
    }

    pub fn min_time_for_dist(&self, distance: f64) -> f64 {
        distance.abs() / self.max_speed()
    }

    pub fn min_time_to(&self, target: f64) -> MotionResult<f64> {
        if !target.is_finite() {
            return Err(MotionError::InvalidTarget(target));
        }
        let position = self.position.ok_or(MotionError::NotCalibrated)?;
        Ok(self.min_time_for_dist(position - target))
    }

    pub fn is_at_min(&self) -> MotionResult<bool> {
        Ok(self.min_switch.is_pressed()?)
    }

    pub fn is_at_max(&self) -> MotionResult<bool> {
        Ok(self.max_switch.is_pressed()?)
    }

    fn degrees_for(&self, distance: f64) -> f64 {
        distance / self.params.m_per_rotation * 360.0
    }

    /// Drive to both switches and measure the usable travel.
    ///
    /// On success the carriage sits one margin off the near switch, which
    /// becomes position zero, and the measured length is returned. On failure
    /// position and length are cleared.
    pub async fn calibrate(&mut self) -> MotionResult<f64> {
        info!("{}: calibrating", self.name);
        self.position = None;
        self.length = None;
        self.transition(CalibrationEvent::Started);

        match self.run_calibration().await {
            Ok(length) => {
                info!("{}: calibrated, length {:.4} m", self.name, length);
                Ok(length)
            }
            Err(err) => {
                warn!("{}: calibration failed: {}", self.name, err);
                self.position = None;
                self.length = None;
                self.transition(CalibrationEvent::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Runs at `max_rpm`; the motor's configured rpm is not touched.
    async fn run_calibration(&mut self) -> MotionResult<f64> {
        self.motor.calibrate()?;
        self.position = Some(0.0);

        let rpm = self.motor.max_rpm();
        let search = self.params.search_degrees.abs();
        let back_off = self.degrees_for(self.margin());

        self.search_limit(Limit::Max, search, rpm).await?;
        self.transition(CalibrationEvent::FarLimitReached);

        self.drive(-back_off, rpm, None).await?;
        self.position = Some(0.0);
        self.transition(CalibrationEvent::ZeroSet);

        self.search_limit(Limit::Min, -search, rpm).await?;
        self.transition(CalibrationEvent::NearLimitReached);

        self.drive(back_off, rpm, None).await?;
        let length = -self.position.unwrap_or_default();
        self.position = Some(0.0);
        self.length = Some(length);
        self.transition(CalibrationEvent::Measured { length });
        Ok(length)
    }

    async fn search_limit(&mut self, limit: Limit, degrees: f64, rpm: f64) -> MotionResult<()> {
        let rotation = self.drive(degrees, rpm, Some(limit)).await?;
        if rotation.aborted {
            return Ok(());
        }
        if self.params.require_limit_trip {
            return Err(MotionError::LimitNotReached(limit));
        }
        warn!(
            "{}: {} limit switch not reached within {:.0}°, continuing",
            self.name,
            limit,
            degrees.abs()
        );
        Ok(())
    }

    /// Check a move to `target` over `seconds` without touching the motor.
    pub fn plan_move(&self, target: f64, seconds: f64) -> MotionResult<RailMove> {
        if !target.is_finite() {
            return Err(MotionError::InvalidTarget(target));
        }
        if !self.is_calibrated() {
            return Err(MotionError::NotCalibrated);
        }
        let position = self.position.ok_or(MotionError::NotCalibrated)?;

        let distance = target - position;
        let degrees = self.degrees_for(distance);
        let rpm = if degrees == 0.0 {
            None
        } else {
            Some(self.motor.rpm_for_duration(degrees, seconds)?)
        };
        Ok(RailMove {
            target,
            distance,
            degrees,
            seconds,
            rpm,
        })
    }

    /// Execute a planned move, stopping early if the switch ahead trips.
    pub async fn run_move(&mut self, planned: &RailMove) -> MotionResult<Rotation> {
        if !self.is_calibrated() {
            return Err(MotionError::NotCalibrated);
        }
        let Some(rpm) = planned.rpm else {
            return Ok(Rotation::default());
        };
        let limit = planned.stop_at();
        debug!(
            "{}: {:.5} m -> {:.5} m in {:.3} s",
            self.name,
            self.position.unwrap_or_default(),
            planned.target,
            planned.seconds
        );
        let rotation = self
            .drive(planned.degrees, rpm, Some(limit))
            .await?;
        if rotation.aborted {
            warn!(
                "{}: {} limit switch tripped at {:.5} m",
                self.name,
                limit,
                self.position.unwrap_or_default()
            );
        }
        Ok(rotation)
    }

    pub async fn move_to_position_in_seconds(
        &mut self,
        target: f64,
        seconds: f64,
    ) -> MotionResult<Rotation> {
        let planned = self.plan_move(target, seconds)?;
        self.run_move(&planned).await
    }

    /// Rotate while integrating every issued step into `position`.
    async fn drive(
        &mut self,
        degrees: f64,
        rpm: f64,
        stop_at: Option<Limit>,
    ) -> MotionResult<Rotation> {
        let Self {
            name,
            motor,
            min_switch,
            max_switch,
            params,
            position,
            ..
        } = self;
        let name: &str = name;
        let m_per_rotation = params.m_per_rotation;
        let switch = match stop_at {
            Some(Limit::Min) => Some((Limit::Min, &*min_switch)),
            Some(Limit::Max) => Some((Limit::Max, &*max_switch)),
            None => None,
        };

        let abort = || switch.is_some_and(|(limit, switch)| limit_pressed(name, limit, switch));
        let mut on_step = |step_degrees: f64| {
            if let Some(position) = position.as_mut() {
                *position += step_degrees / 360.0 * m_per_rotation;
            }
        };

        motor
            .rotate_at(degrees, rpm, Some(&abort), Some(&mut on_step))
            .await
    }

    fn transition(&mut self, event: CalibrationEvent) {
        let spent = self.machine.time_in_state();
        if self.machine.process_event(event) {
            debug!(
                "{}: calibration -> {} (transition {}, {:.3?} in previous state)",
                self.name,
                self.machine.state(),
                self.machine.transition_count(),
                spent.unwrap_or_default()
            );
        }
    }
}

/// An unreadable switch counts as pressed so motion stops.
fn limit_pressed(rail: &str, limit: Limit, switch: &LimitSwitch) -> bool {
    switch.is_pressed().unwrap_or_else(|err| {
        warn!("{}: reading {} switch failed: {}", rail, limit, err);
        true
    })
}
