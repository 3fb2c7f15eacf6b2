// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Half-step phase sequencing for a four-wire unipolar stepper.
//!
//! The sequencer does not trust its own counter: every [`StepSequencer::advance`]
//! first reads the coil pins back and resynchronizes from what the hardware
//! actually holds, then moves exactly one phase.

use std::fmt;

use thiserror::Error;

use crate::error::MotionResult;
use crate::gpio::{Channel, DigitalOutput, GpioResult, Level};

use crate::gpio::Level::{High as H, Low as L};

/// Coil levels for each half-step phase. Neighbours differ in exactly one pin.
pub const PHASE_TABLE: [[Level; 4]; 8] = [
    [H, L, L, L],
    [H, H, L, L],
    [L, H, L, L],
    [L, H, H, L],
    [L, L, H, L],
    [L, L, H, H],
    [L, L, L, H],
    [H, L, L, H],
];

/// Index into [`PHASE_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhaseIndex(u8);

impl PhaseIndex {
    pub const ZERO: Self = Self(0);

    pub fn new(index: usize) -> Option<Self> {
        (index < PHASE_TABLE.len()).then_some(Self(index as u8))
    }

    /// Look up the phase whose coil pattern equals `levels`.
    pub fn from_levels(levels: &[Level; 4]) -> Option<Self> {
        PHASE_TABLE
            .iter()
            .position(|phase| phase == levels)
            .map(|i| Self(i as u8))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }

    pub fn next(self) -> Self {
        Self((self.0 + 1) % PHASE_TABLE.len() as u8)
    }

    pub fn prev(self) -> Self {
        Self((self.0 + PHASE_TABLE.len() as u8 - 1) % PHASE_TABLE.len() as u8)
    }

    pub fn step(self, direction: Direction) -> Self {
        match direction {
            Direction::Cw => self.next(),
            Direction::Ccw => self.prev(),
        }
    }

    pub fn levels(self) -> [Level; 4] {
        PHASE_TABLE[self.get()]
    }
}

impl fmt::Display for PhaseIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward through the table, towards the far end of a rail.
    Cw,
    /// Backward through the table, towards the near end of a rail.
    Ccw,
}

impl Direction {
    /// Positive angles turn clockwise, everything else counter-clockwise.
    pub fn from_degrees(degrees: f64) -> Self {
        if degrees > 0.0 {
            Self::Cw
        } else {
            Self::Ccw
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Self::Cw => 1.0,
            Self::Ccw => -1.0,
        }
    }
}

/// Read-back coil levels that belong to no phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("coil levels {} match no half-step phase", render_levels(.levels))]
pub struct PhaseMismatch {
    pub levels: [Level; 4],
}

fn render_levels(levels: &[Level; 4]) -> String {
    levels.iter().map(ToString::to_string).collect()
}

/// Drives four coil pins through [`PHASE_TABLE`].
#[derive(Debug, Clone)]
pub struct StepSequencer {
    pins: [Channel; 4],
    current: PhaseIndex,
}

impl StepSequencer {
    pub fn new(pins: [Channel; 4]) -> Self {
        Self {
            pins,
            current: PhaseIndex::ZERO,
        }
    }

    pub fn pins(&self) -> [Channel; 4] {
        self.pins
    }

    /// Last phase written or observed.
    pub fn current(&self) -> PhaseIndex {
        self.current
    }

    pub fn resync_from_observed(
        &mut self,
        levels: [Level; 4],
    ) -> Result<PhaseIndex, PhaseMismatch> {
        let phase = PhaseIndex::from_levels(&levels).ok_or(PhaseMismatch { levels })?;
        self.current = phase;
        Ok(phase)
    }

    /// Read the coil levels currently held by the output bank.
    pub fn observe(&self, output: &dyn DigitalOutput) -> GpioResult<[Level; 4]> {
        let mut levels = [Level::Low; 4];
        for (level, &pin) in levels.iter_mut().zip(self.pins.iter()) {
            *level = output.read(pin)?;
        }
        Ok(levels)
    }

    /// Force phase 0 regardless of what the pins hold.
    pub fn reset(&mut self, output: &mut dyn DigitalOutput) -> MotionResult<()> {
        self.apply(output, PhaseIndex::ZERO)?;
        self.current = PhaseIndex::ZERO;
        Ok(())
    }

    /// Move one phase in `direction` and return the phase now on the pins.
    ///
    /// Fails with [`PhaseMismatch`] without touching the pins when the
    /// read-back levels are not a valid phase.
    pub fn advance(
        &mut self,
        output: &mut dyn DigitalOutput,
        direction: Direction,
    ) -> MotionResult<PhaseIndex> {
        let observed = self.observe(output)?;
        let next = self.resync_from_observed(observed)?.step(direction);
        self.apply(output, next)?;
        self.current = next;
        Ok(next)
    }

    fn apply(&self, output: &mut dyn DigitalOutput, phase: PhaseIndex) -> GpioResult<()> {
        for (&pin, level) in self.pins.iter().zip(phase.levels()) {
            output.write(pin, level)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MotionError;
    use crate::testing::{TestAxis, TestOutput};

    const PINS: [Channel; 4] = [13, 11, 15, 12];

    fn sequencer_at(phase: usize) -> (StepSequencer, TestOutput) {
        let mut output = TestAxis::new(PINS).claimed_output();
        let mut sequencer = StepSequencer::new(PINS);
        sequencer.reset(&mut output).unwrap();
        for _ in 0..phase {
            sequencer.advance(&mut output, Direction::Cw).unwrap();
        }
        (sequencer, output)
    }

    #[test]
    fn test_neighbouring_phases_differ_by_one_pin() {
        for i in 0..PHASE_TABLE.len() {
            let a = PHASE_TABLE[i];
            let b = PHASE_TABLE[(i + 1) % PHASE_TABLE.len()];
            let changed = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
            assert_eq!(changed, 1, "phases {} and {}", i, i + 1);
        }
    }

    #[test]
    fn test_phase_index_wraps() {
        assert_eq!(PhaseIndex::new(7).unwrap().next(), PhaseIndex::ZERO);
        assert_eq!(PhaseIndex::ZERO.prev(), PhaseIndex::new(7).unwrap());
        assert!(PhaseIndex::new(8).is_none());
    }

    #[test]
    fn test_advance_writes_next_phase() {
        let (mut sequencer, mut output) = sequencer_at(0);
        let phase = sequencer.advance(&mut output, Direction::Cw).unwrap();
        assert_eq!(phase.get(), 1);
        assert_eq!(sequencer.observe(&output).unwrap(), PHASE_TABLE[1]);

        let phase = sequencer.advance(&mut output, Direction::Ccw).unwrap();
        assert_eq!(phase, PhaseIndex::ZERO);
        let phase = sequencer.advance(&mut output, Direction::Ccw).unwrap();
        assert_eq!(phase.get(), 7);
    }

    #[test]
    fn test_cw_then_ccw_round_trip_from_every_phase() {
        for start in 0..PHASE_TABLE.len() {
            let (mut sequencer, mut output) = sequencer_at(start);
            sequencer.advance(&mut output, Direction::Cw).unwrap();
            let back = sequencer.advance(&mut output, Direction::Ccw).unwrap();
            assert_eq!(back.get(), start);
            assert_eq!(sequencer.observe(&output).unwrap(), PHASE_TABLE[start]);
        }
    }

    #[test]
    fn test_advance_resyncs_from_disturbed_pins() {
        let (mut sequencer, mut output) = sequencer_at(0);
        // Someone else moved the motor to phase 4.
        for (&pin, level) in PINS.iter().zip(PHASE_TABLE[4]) {
            output.write(pin, level).unwrap();
        }
        let phase = sequencer.advance(&mut output, Direction::Cw).unwrap();
        assert_eq!(phase.get(), 5);
    }

    #[test]
    fn test_advance_fails_on_unknown_levels() {
        let (mut sequencer, mut output) = sequencer_at(2);
        for &pin in &PINS {
            output.write(pin, Level::High).unwrap();
        }
        let err = sequencer.advance(&mut output, Direction::Cw).unwrap_err();
        match err {
            MotionError::PhaseMismatch(mismatch) => {
                assert_eq!(mismatch.levels, [Level::High; 4]);
                assert!(mismatch.to_string().contains("1111"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Pins untouched.
        assert_eq!(sequencer.observe(&output).unwrap(), [Level::High; 4]);
    }

    #[test]
    fn test_reset_recovers_from_mismatch() {
        let (mut sequencer, mut output) = sequencer_at(3);
        for &pin in &PINS {
            output.write(pin, Level::Low).unwrap();
        }
        sequencer.reset(&mut output).unwrap();
        assert_eq!(sequencer.current(), PhaseIndex::ZERO);
        assert_eq!(sequencer.advance(&mut output, Direction::Cw).unwrap().get(), 1);
    }

    #[test]
    fn test_direction_from_degrees() {
        assert_eq!(Direction::from_degrees(90.0), Direction::Cw);
        assert_eq!(Direction::from_degrees(-90.0), Direction::Ccw);
        assert_eq!(Direction::Ccw.sign(), -1.0);
    }
}
