// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Stepper motor control at constant angular velocity.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{MotionError, MotionResult};
use crate::gpio::{Channel, DigitalOutput};

pub mod sequencer;

use sequencer::{Direction, PhaseIndex, StepSequencer};

/// Physical and speed settings of one motor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorParams {
    /// Speed used by plain `rotate` calls.
    pub rpm: f64,
    pub max_rpm: f64,
    /// Half-steps per shaft revolution.
    pub steps_per_rotation: u32,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            rpm: 60.0,
            max_rpm: 140.0,
            steps_per_rotation: 400,
        }
    }
}

/// Outcome of a rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rotation {
    /// Steps physically issued.
    pub steps: u64,
    /// The abort predicate stopped the rotation early.
    pub aborted: bool,
}

/// Owns the coil pins of one motor and steps them through the phase table.
pub struct MotorController {
    output: Box<dyn DigitalOutput>,
    sequencer: StepSequencer,
    params: MotorParams,
    calibrated: bool,
}

impl MotorController {
    /// Bind a motor to four coil channels. Nothing is driven until [`calibrate`](Self::calibrate).
    pub fn new(output: Box<dyn DigitalOutput>, pins: [Channel; 4], params: MotorParams) -> Self {
        Self {
            output,
            sequencer: StepSequencer::new(pins),
            params,
            calibrated: false,
        }
    }

    /// Claim the pins as outputs and energize phase 0. Safe to repeat.
    pub fn calibrate(&mut self) -> MotionResult<()> {
        for pin in self.sequencer.pins() {
            self.output.claim(pin)?;
        }
        self.sequencer.reset(self.output.as_mut())?;
        self.calibrated = true;
        debug!("Motor {:?} calibrated at phase 0", self.sequencer.pins());
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn pins(&self) -> [Channel; 4] {
        self.sequencer.pins()
    }

    pub fn phase(&self) -> PhaseIndex {
        self.sequencer.current()
    }

    pub fn rpm(&self) -> f64 {
        self.params.rpm
    }

    pub fn max_rpm(&self) -> f64 {
        self.params.max_rpm
    }

    pub fn steps_per_rotation(&self) -> u32 {
        self.params.steps_per_rotation
    }

    pub fn degrees_per_step(&self) -> f64 {
        360.0 / self.params.steps_per_rotation as f64
    }

    pub fn set_rpm(&mut self, rpm: f64) -> MotionResult<()> {
        self.check_rpm(rpm)?;
        self.params.rpm = rpm;
        Ok(())
    }

    fn check_rpm(&self, rpm: f64) -> MotionResult<()> {
        // +inf falls through to SpeedExceeded.
        if rpm.is_nan() || rpm <= 0.0 {
            return Err(MotionError::InvalidSpeed(rpm));
        }
        if rpm.round() > self.params.max_rpm.round() {
            return Err(MotionError::SpeedExceeded {
                requested: rpm,
                max: self.params.max_rpm,
            });
        }
        Ok(())
    }

    /// Number of whole steps `degrees` rounds to.
    pub fn steps_for(&self, degrees: f64) -> u64 {
        (degrees / 360.0 * self.params.steps_per_rotation as f64)
            .abs()
            .round() as u64
    }

    /// Speed that turns `degrees` in exactly `seconds`.
    pub fn rpm_for_duration(&self, degrees: f64, seconds: f64) -> MotionResult<f64> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(MotionError::SpeedExceeded {
                requested: f64::INFINITY,
                max: self.params.max_rpm,
            });
        }
        let rpm = (degrees / 360.0 / seconds).abs() * 60.0;
        self.check_rpm(rpm)?;
        Ok(rpm)
    }

    /// Turn by `degrees` at the current rpm; negative angles turn counter-clockwise.
    pub async fn rotate(
        &mut self,
        degrees: f64,
        should_abort: Option<&dyn Fn() -> bool>,
        on_step: Option<&mut dyn FnMut(f64)>,
    ) -> MotionResult<Rotation> {
        let rpm = self.params.rpm;
        self.rotate_at(degrees, rpm, should_abort, on_step).await
    }

    /// Turn by `degrees` at `rpm` without changing the configured rpm.
    ///
    /// Each step waits for its deadline, advances one phase, reports the signed
    /// step angle to `on_step` and then asks `should_abort`. An abort stops the
    /// loop after the step that triggered it; issued steps are never undone.
    pub async fn rotate_at(
        &mut self,
        degrees: f64,
        rpm: f64,
        should_abort: Option<&dyn Fn() -> bool>,
        mut on_step: Option<&mut dyn FnMut(f64)>,
    ) -> MotionResult<Rotation> {
        if !self.calibrated {
            return Err(MotionError::NotCalibrated);
        }
        self.check_rpm(rpm)?;

        let steps = self.steps_for(degrees);
        let direction = Direction::from_degrees(degrees);
        let step_degrees = direction.sign() * self.degrees_per_step();
        let seconds_per_step = 60.0 / (rpm * self.params.steps_per_rotation as f64);
        debug!(
            "Rotating {:.2}° ({} steps {:?}) at {:.2} rpm",
            degrees, steps, direction, rpm
        );

        let start = Instant::now();
        for step in 1..=steps {
            time::sleep_until(start + Duration::from_secs_f64(seconds_per_step * step as f64))
                .await;
            let phase = self.sequencer.advance(self.output.as_mut(), direction)?;
            trace!("step {} -> phase {}", step, phase);

            if let Some(on_step) = on_step.as_deref_mut() {
                on_step(step_degrees);
            }
            if should_abort.is_some_and(|abort| abort()) {
                debug!("Rotation aborted after {} of {} steps", step, steps);
                return Ok(Rotation {
                    steps: step,
                    aborted: true,
                });
            }
        }

        Ok(Rotation {
            steps,
            aborted: false,
        })
    }

    /// Turn by `degrees` over `seconds`. The configured rpm is left as it was,
    /// also when the rotation fails or is dropped part way.
    pub async fn rotate_for_duration(
        &mut self,
        degrees: f64,
        seconds: f64,
        should_abort: Option<&dyn Fn() -> bool>,
        on_step: Option<&mut dyn FnMut(f64)>,
    ) -> MotionResult<Rotation> {
        if !self.calibrated {
            return Err(MotionError::NotCalibrated);
        }
        if degrees == 0.0 {
            return Ok(Rotation::default());
        }

        let rpm = self.rpm_for_duration(degrees, seconds)?;
        self.rotate_at(degrees, rpm, should_abort, on_step).await
    }
}

impl Drop for MotorController {
    fn drop(&mut self) {
        for pin in self.sequencer.pins() {
            self.output.release(pin);
        }
    }
}

impl fmt::Debug for MotorController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotorController")
            .field("pins", &self.sequencer.pins())
            .field("phase", &self.sequencer.current())
            .field("params", &self.params)
            .field("calibrated", &self.calibrated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::gpio::Level;
    use crate::testing::TestAxis;

    const PINS: [Channel; 4] = [35, 33, 37, 31];

    fn motor() -> (MotorController, TestAxis) {
        let axis = TestAxis::new(PINS);
        let motor = MotorController::new(Box::new(axis.output()), PINS, MotorParams::default());
        (motor, axis)
    }

    fn calibrated_motor() -> (MotorController, TestAxis) {
        let (mut motor, axis) = motor();
        motor.calibrate().unwrap();
        (motor, axis)
    }

    #[test]
    fn test_default_params() {
        let params = MotorParams::default();
        assert_eq!(params.rpm, 60.0);
        assert_eq!(params.max_rpm, 140.0);
        assert_eq!(params.steps_per_rotation, 400);
    }

    #[test]
    fn test_degrees_per_step() {
        let (motor, _) = motor();
        assert!((motor.degrees_per_step() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_set_rpm_bounds() {
        let (mut motor, _) = motor();
        assert!(motor.set_rpm(1.0).is_ok());
        assert!(motor.set_rpm(140.0).is_ok());
        // Rounds to 140.
        assert!(motor.set_rpm(140.4).is_ok());
        assert!(matches!(
            motor.set_rpm(140.6),
            Err(MotionError::SpeedExceeded { .. })
        ));
        assert!(matches!(
            motor.set_rpm(500.0),
            Err(MotionError::SpeedExceeded { .. })
        ));
        assert!(matches!(
            motor.set_rpm(0.0),
            Err(MotionError::InvalidSpeed(_))
        ));
        assert!(matches!(
            motor.set_rpm(f64::NAN),
            Err(MotionError::InvalidSpeed(_))
        ));
        assert!(matches!(
            motor.set_rpm(f64::INFINITY),
            Err(MotionError::SpeedExceeded { .. })
        ));
        assert_eq!(motor.rpm(), 140.4);
    }

    #[test]
    fn test_calibrate_is_idempotent() {
        let (mut motor, axis) = motor();
        motor.calibrate().unwrap();
        let first = (motor.phase(), axis.carriage());
        motor.calibrate().unwrap();
        assert_eq!((motor.phase(), axis.carriage()), first);
        assert_eq!(motor.phase(), PhaseIndex::ZERO);
        assert_eq!(axis.claimed(), 4);
        assert!(motor.is_calibrated());
    }

    #[test]
    fn test_drop_releases_pins() {
        let (motor, axis) = calibrated_motor();
        assert_eq!(axis.claimed(), 4);
        drop(motor);
        assert_eq!(axis.claimed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_requires_calibration() {
        let (mut motor, axis) = motor();
        let err = motor.rotate(90.0, None, None).await.unwrap_err();
        assert!(matches!(err, MotionError::NotCalibrated));
        let err = motor
            .rotate_for_duration(90.0, 1.0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::NotCalibrated));
        assert_eq!(axis.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_issues_rounded_step_count() {
        let (mut motor, axis) = calibrated_motor();
        let start = axis.carriage();

        let rotation = motor.rotate(720.0, None, None).await.unwrap();
        assert_eq!(rotation.steps, 800);
        assert!(!rotation.aborted);
        assert_eq!(axis.carriage() - start, 800);

        // 1.3 steps rounds down, 1.6 rounds up.
        let rotation = motor.rotate(-1.17, None, None).await.unwrap();
        assert_eq!(rotation.steps, 1);
        let rotation = motor.rotate(-1.44, None, None).await.unwrap();
        assert_eq!(rotation.steps, 2);
        assert_eq!(axis.carriage() - start, 797);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_direction_follows_sign() {
        let (mut motor, axis) = calibrated_motor();
        let start = axis.carriage();
        motor.rotate(-9.0, None, None).await.unwrap();
        assert_eq!(axis.carriage() - start, -10);
        // 10 steps back from phase 0 wraps to phase 6.
        assert_eq!(motor.phase().get(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_takes_commanded_time() {
        let (mut motor, _) = calibrated_motor();
        motor.set_rpm(60.0).unwrap();
        let start = Instant::now();
        motor.rotate(360.0, None, None).await.unwrap();
        let elapsed = start.elapsed().as_secs_f64();
        assert!((elapsed - 1.0).abs() < 0.01, "elapsed {elapsed}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_reports_each_step_then_checks_abort() {
        let (mut motor, axis) = calibrated_motor();
        let start = axis.carriage();
        let steps_seen = Cell::new(0u64);
        let mut degrees_seen = 0.0;

        let abort = || steps_seen.get() >= 5;
        let mut on_step = |degrees: f64| {
            steps_seen.set(steps_seen.get() + 1);
            degrees_seen += degrees;
        };
        let rotation = motor
            .rotate(-90.0, Some(&abort), Some(&mut on_step))
            .await
            .unwrap();

        assert_eq!(rotation, Rotation { steps: 5, aborted: true });
        assert_eq!(steps_seen.get(), 5);
        assert!((degrees_seen + 4.5).abs() < 1e-9);
        assert_eq!(axis.carriage() - start, -5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_for_duration_keeps_rpm() {
        let (mut motor, _) = calibrated_motor();
        motor.set_rpm(30.0).unwrap();

        let start = Instant::now();
        let rotation = motor
            .rotate_for_duration(720.0, 2.0, None, None)
            .await
            .unwrap();
        let elapsed = start.elapsed().as_secs_f64();

        assert_eq!(rotation.steps, 800);
        assert!((elapsed - 2.0).abs() < 0.01, "elapsed {elapsed}");
        assert_eq!(motor.rpm(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_for_duration_rejects_too_fast() {
        let (mut motor, axis) = calibrated_motor();
        let writes = axis.writes();
        // 3 rotations in 1 s = 180 rpm.
        let err = motor
            .rotate_for_duration(1080.0, 1.0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::SpeedExceeded { .. }));
        let err = motor
            .rotate_for_duration(10.0, 0.0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::SpeedExceeded { .. }));
        // The implied rpm overflows to infinity.
        let err = motor
            .rotate_for_duration(10.0, 1e-320, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MotionError::SpeedExceeded { .. }));
        assert_eq!(axis.writes(), writes);
        assert_eq!(motor.rpm(), 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_for_duration_keeps_rpm_on_failure() {
        let (mut motor, axis) = calibrated_motor();
        motor.set_rpm(30.0).unwrap();

        let mut steps = 0;
        let mut on_step = |_: f64| {
            steps += 1;
            if steps == 3 {
                axis.force_levels([Level::High, Level::Low, Level::High, Level::Low]);
            }
        };
        let err = motor
            .rotate_for_duration(90.0, 1.0, None, Some(&mut on_step))
            .await
            .unwrap_err();

        assert!(matches!(err, MotionError::PhaseMismatch(_)));
        assert_eq!(steps, 3);
        assert_eq!(motor.rpm(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_rotation_keeps_rpm() {
        let (mut motor, axis) = calibrated_motor();
        motor.set_rpm(30.0).unwrap();
        let start = axis.carriage();

        // 100 steps over 10 s, cut off after 1 s.
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            motor.rotate_for_duration(90.0, 10.0, None, None),
        )
        .await;

        assert!(result.is_err());
        let moved = axis.carriage() - start;
        assert!(moved > 0 && moved < 100, "moved {moved}");
        assert_eq!(motor.rpm(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_at_checks_rpm() {
        let (mut motor, axis) = calibrated_motor();
        let writes = axis.writes();
        let err = motor.rotate_at(90.0, 200.0, None, None).await.unwrap_err();
        assert!(matches!(err, MotionError::SpeedExceeded { .. }));
        let err = motor.rotate_at(90.0, -1.0, None, None).await.unwrap_err();
        assert!(matches!(err, MotionError::InvalidSpeed(_)));
        assert_eq!(axis.writes(), writes);

        let start = Instant::now();
        let rotation = motor.rotate_at(360.0, 120.0, None, None).await.unwrap();
        assert_eq!(rotation.steps, 400);
        assert!((start.elapsed().as_secs_f64() - 0.5).abs() < 0.01);
        assert_eq!(motor.rpm(), 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_for_duration_zero_angle_is_noop() {
        let (mut motor, axis) = calibrated_motor();
        let writes = axis.writes();
        let rotation = motor
            .rotate_for_duration(0.0, 0.0, None, None)
            .await
            .unwrap();
        assert_eq!(rotation, Rotation::default());
        assert_eq!(axis.writes(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotate_stops_on_phase_mismatch() {
        let (mut motor, axis) = calibrated_motor();
        axis.force_levels([Level::High, Level::Low, Level::High, Level::Low]);
        let err = motor.rotate(9.0, None, None).await.unwrap_err();
        assert!(matches!(err, MotionError::PhaseMismatch(_)));

        // Re-calibrating forces phase 0 and motion resumes.
        motor.calibrate().unwrap();
        let rotation = motor.rotate(9.0, None, None).await.unwrap();
        assert_eq!(rotation.steps, 10);
    }
}
