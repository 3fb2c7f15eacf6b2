// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! In-memory axis used by the unit tests.
//!
//! Coil writes are decoded back into phases; every one-phase move shifts the
//! carriage by one half-step. Switch channels report pressed at the travel ends.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::gpio::{Channel, DigitalInput, DigitalOutput, GpioError, GpioResult, Level};
use crate::motor::sequencer::PhaseIndex;

pub const MIN_SWITCH: Channel = 40;
pub const MAX_SWITCH: Channel = 38;

struct AxisState {
    pins: [Channel; 4],
    levels: HashMap<Channel, Level>,
    claimed: HashSet<Channel>,
    last_phase: Option<PhaseIndex>,
    carriage: i64,
    travel: i64,
    writes: u64,
}

impl AxisState {
    fn track_phase(&mut self) {
        let mut levels = [Level::Low; 4];
        for (level, pin) in levels.iter_mut().zip(self.pins) {
            *level = self.levels.get(&pin).copied().unwrap_or(Level::Low);
        }
        let Some(phase) = PhaseIndex::from_levels(&levels) else {
            return;
        };
        if let Some(last) = self.last_phase {
            if phase == last.next() {
                self.carriage += 1;
            } else if phase == last.prev() {
                self.carriage -= 1;
            }
        }
        self.last_phase = Some(phase);
    }
}

#[derive(Clone)]
pub struct TestAxis {
    state: Arc<Mutex<AxisState>>,
}

impl TestAxis {
    /// Axis with switches far out of reach.
    pub fn new(pins: [Channel; 4]) -> Self {
        Self::with_travel(pins, i64::MAX / 4, i64::MAX / 8)
    }

    /// Axis whose min switch closes at carriage 0 and max switch at `travel`.
    pub fn with_travel(pins: [Channel; 4], travel: i64, start: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(AxisState {
                pins,
                levels: HashMap::new(),
                claimed: HashSet::new(),
                last_phase: None,
                carriage: start,
                travel,
                writes: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AxisState> {
        self.state.lock().unwrap()
    }

    pub fn output(&self) -> TestOutput {
        TestOutput { axis: self.clone() }
    }

    pub fn claimed_output(&self) -> TestOutput {
        let mut output = self.output();
        let pins = self.lock().pins;
        for pin in pins {
            output.claim(pin).unwrap();
        }
        output
    }

    pub fn switches(&self) -> Arc<dyn DigitalInput> {
        Arc::new(TestSwitches { axis: self.clone() })
    }

    pub fn carriage(&self) -> i64 {
        self.lock().carriage
    }

    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    pub fn claimed(&self) -> usize {
        self.lock().claimed.len()
    }

    /// Overwrite the coil levels behind the controller's back.
    pub fn force_levels(&self, levels: [Level; 4]) {
        let mut state = self.lock();
        let pins = state.pins;
        for (pin, level) in pins.into_iter().zip(levels) {
            state.levels.insert(pin, level);
        }
    }
}

pub struct TestOutput {
    axis: TestAxis,
}

impl DigitalOutput for TestOutput {
    fn claim(&mut self, channel: Channel) -> GpioResult<()> {
        let mut state = self.axis.lock();
        state.claimed.insert(channel);
        state.levels.entry(channel).or_insert(Level::Low);
        Ok(())
    }

    fn write(&mut self, channel: Channel, level: Level) -> GpioResult<()> {
        let mut state = self.axis.lock();
        if !state.claimed.contains(&channel) {
            return Err(GpioError::NotClaimed(channel));
        }
        state.levels.insert(channel, level);
        state.writes += 1;
        state.track_phase();
        Ok(())
    }

    fn read(&self, channel: Channel) -> GpioResult<Level> {
        let state = self.axis.lock();
        if !state.claimed.contains(&channel) {
            return Err(GpioError::NotClaimed(channel));
        }
        Ok(state.levels.get(&channel).copied().unwrap_or(Level::Low))
    }

    fn release(&mut self, channel: Channel) {
        self.axis.lock().claimed.remove(&channel);
    }
}

struct TestSwitches {
    axis: TestAxis,
}

impl DigitalInput for TestSwitches {
    fn read(&self, channel: Channel) -> GpioResult<Level> {
        let state = self.axis.lock();
        match channel {
            MIN_SWITCH => Ok(Level::from(state.carriage <= 0)),
            MAX_SWITCH => Ok(Level::from(state.carriage >= state.travel)),
            other => Err(GpioError::Unavailable {
                channel: other,
                reason: "not a switch".to_string(),
            }),
        }
    }
}
