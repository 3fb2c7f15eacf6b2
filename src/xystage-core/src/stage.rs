// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Two rails driven together so both axes arrive at the same time.

use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use crate::error::{MotionError, MotionResult};
use crate::motor::Rotation;
use crate::progress::Progress;
use crate::rail::Rail;

/// Outcome of a synchronized move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageMove {
    /// Shared duration both axes were given.
    pub seconds: f64,
    pub x: Rotation,
    pub y: Rotation,
}

#[derive(Debug)]
pub struct StageController {
    x_rail: Rail,
    y_rail: Rail,
    calibrated: bool,
}

impl StageController {
    pub fn new(x_rail: Rail, y_rail: Rail) -> Self {
        Self {
            x_rail,
            y_rail,
            calibrated: false,
        }
    }

    pub fn x_rail(&self) -> &Rail {
        &self.x_rail
    }

    pub fn y_rail(&self) -> &Rail {
        &self.y_rail
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Calibrate both rails concurrently and return their lengths.
    pub async fn calibrate(&mut self) -> MotionResult<(f64, f64)> {
        self.calibrated = false;
        let (x, y) = tokio::join!(self.x_rail.calibrate(), self.y_rail.calibrate());
        let lengths = first_error(x, y)?;
        self.calibrated = true;
        info!(
            "Stage calibrated: x {:.4} m, y {:.4} m",
            lengths.0, lengths.1
        );
        Ok(lengths)
    }

    pub fn current_position(&self) -> (Option<f64>, Option<f64>) {
        (self.x_rail.position(), self.y_rail.position())
    }

    pub fn lengths(&self) -> (Option<f64>, Option<f64>) {
        (self.x_rail.length(), self.y_rail.length())
    }

    /// Time the slower axis needs at full speed to reach `(x, y)`.
    pub fn shared_duration(&self, x: f64, y: f64) -> MotionResult<f64> {
        let x_time = self.x_rail.min_time_to(x)?;
        let y_time = self.y_rail.min_time_to(y)?;
        Ok(x_time.max(y_time))
    }

    /// Move both axes to `(x, y)`, arriving together.
    ///
    /// Both moves are validated before either axis steps.
    pub async fn move_to_point(&mut self, x: f64, y: f64) -> MotionResult<StageMove> {
        if !self.calibrated {
            return Err(MotionError::NotCalibrated);
        }
        let seconds = self.shared_duration(x, y)?;
        let x_move = self.x_rail.plan_move(x, seconds)?;
        let y_move = self.y_rail.plan_move(y, seconds)?;
        debug!("Moving to ({:.5}, {:.5}) in {:.3} s", x, y, seconds);

        let (x_result, y_result) = tokio::join!(
            self.x_rail.run_move(&x_move),
            self.y_rail.run_move(&y_move)
        );
        let (x, y) = first_error(x_result, y_result)?;
        Ok(StageMove { seconds, x, y })
    }

    /// Visit `points` in order, reporting after each one.
    ///
    /// Stops at the first error, or early when `on_progress` breaks. Returns
    /// the last progress reported.
    pub async fn trace_points<F>(
        &mut self,
        points: &[[f64; 2]],
        mut on_progress: F,
    ) -> MotionResult<Progress>
    where
        F: FnMut(Progress) -> ControlFlow<()>,
    {
        let total = points.len();
        info!("Tracing {} points", total);
        let mut reached = Progress { current: 0, total };
        for (i, &[x, y]) in points.iter().enumerate() {
            self.move_to_point(x, y).await?;
            reached.current = i + 1;
            if on_progress(reached).is_break() {
                break;
            }
        }
        if !reached.is_done() {
            warn!("Trace stopped after {} of {} points", reached.current, total);
        }
        Ok(reached)
    }
}

/// Combine per-axis results, preferring the x error when both failed.
fn first_error<A, B>(x: MotionResult<A>, y: MotionResult<B>) -> MotionResult<(A, B)> {
    match (x, y) {
        (Ok(x), Ok(y)) => Ok((x, y)),
        (Err(x_err), Err(y_err)) => {
            warn!("y axis also failed: {}", y_err);
            Err(x_err)
        }
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
    }
}
