// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated stage for development and testing.
//!
//! Each axis holds its coil levels in memory and decodes every write back into
//! a phase. A move to the neighbouring phase shifts the carriage by one step,
//! and the switches close when the carriage reaches either end of its travel.
//! No hardware required.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;
use xystage_core::{Channel, DigitalInput, DigitalOutput, GpioError, Level, PhaseIndex};

use crate::AxisWiring;

struct SimState {
    pins: [Channel; 4],
    min_switch: Channel,
    max_switch: Channel,
    active: Level,
    levels: HashMap<Channel, Level>,
    claimed: HashSet<Channel>,
    phase: Option<PhaseIndex>,
    carriage: i64,
    travel: i64,
    writes: u64,
}

impl SimState {
    fn coil_levels(&self) -> [Level; 4] {
        let mut levels = [Level::Low; 4];
        for (level, pin) in levels.iter_mut().zip(self.pins) {
            *level = self.levels.get(&pin).copied().unwrap_or(Level::Low);
        }
        levels
    }

    fn track_phase(&mut self) {
        let Some(phase) = PhaseIndex::from_levels(&self.coil_levels()) else {
            return;
        };
        if let Some(last) = self.phase {
            if phase == last.next() {
                self.carriage += 1;
            } else if phase == last.prev() {
                self.carriage -= 1;
            }
        }
        self.phase = Some(phase);
    }

    fn at_min(&self) -> bool {
        self.carriage <= 0
    }

    fn at_max(&self) -> bool {
        self.carriage >= self.travel
    }

    fn switch_level(&self, channel: Channel) -> Option<Level> {
        let pressed = match (channel == self.min_switch, channel == self.max_switch) {
            // Both switches wired to one input.
            (true, true) => self.at_min() || self.at_max(),
            (true, false) => self.at_min(),
            (false, true) => self.at_max(),
            (false, false) => return None,
        };
        Some(if pressed { self.active } else { !self.active })
    }
}

/// Handle to one simulated axis. Clones share the same carriage.
#[derive(Clone)]
pub struct SimAxis {
    state: Arc<Mutex<SimState>>,
}

impl SimAxis {
    pub fn new(wiring: &AxisWiring) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                pins: wiring.motor_pins,
                min_switch: wiring.min_switch,
                max_switch: wiring.max_switch,
                active: if wiring.switch_active_low {
                    Level::Low
                } else {
                    Level::High
                },
                levels: HashMap::new(),
                claimed: HashSet::new(),
                phase: None,
                carriage: wiring.start_steps,
                travel: wiring.travel_steps,
                writes: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn output(&self) -> SimOutput {
        SimOutput { axis: self.clone() }
    }

    pub fn input(&self) -> SimInput {
        SimInput { axis: self.clone() }
    }

    /// Carriage position in steps from the min end.
    pub fn carriage(&self) -> i64 {
        self.lock().carriage
    }

    /// Pin writes issued so far.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    pub fn claimed_pins(&self) -> usize {
        self.lock().claimed.len()
    }
}

/// Coil outputs of a [`SimAxis`].
pub struct SimOutput {
    axis: SimAxis,
}

impl DigitalOutput for SimOutput {
    fn claim(&mut self, channel: Channel) -> Result<(), GpioError> {
        let mut state = self.axis.lock();
        if !state.pins.contains(&channel) {
            return Err(GpioError::Unavailable {
                channel,
                reason: "not a coil pin of this axis".to_string(),
            });
        }
        state.claimed.insert(channel);
        state.levels.entry(channel).or_insert(Level::Low);
        Ok(())
    }

    fn write(&mut self, channel: Channel, level: Level) -> Result<(), GpioError> {
        let mut state = self.axis.lock();
        if !state.claimed.contains(&channel) {
            return Err(GpioError::NotClaimed(channel));
        }
        state.levels.insert(channel, level);
        state.writes += 1;
        state.track_phase();
        trace!("sim pin {} = {} (carriage {})", channel, level, state.carriage);
        Ok(())
    }

    fn read(&self, channel: Channel) -> Result<Level, GpioError> {
        let state = self.axis.lock();
        if !state.claimed.contains(&channel) {
            return Err(GpioError::NotClaimed(channel));
        }
        Ok(state.levels.get(&channel).copied().unwrap_or(Level::Low))
    }

    fn release(&mut self, channel: Channel) {
        let mut state = self.axis.lock();
        state.claimed.remove(&channel);
        state.levels.remove(&channel);
    }
}

/// Limit switch inputs of a [`SimAxis`].
pub struct SimInput {
    axis: SimAxis,
}

impl DigitalInput for SimInput {
    fn read(&self, channel: Channel) -> Result<Level, GpioError> {
        self.axis
            .lock()
            .switch_level(channel)
            .ok_or_else(|| GpioError::Unavailable {
                channel,
                reason: "not a switch of this axis".to_string(),
            })
    }
}
