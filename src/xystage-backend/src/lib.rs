// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;

use xystage_app::normalize_name;
use xystage_core::{Channel, DigitalInput, DigitalOutput, DynResult, PinNumbering};

pub mod sim;

#[cfg(feature = "rppal")]
use xystage_backend_rppal::{RppalInput, RppalOutput};

/// Pin assignment of one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisWiring {
    pub motor_pins: [Channel; 4],
    pub min_switch: Channel,
    pub max_switch: Channel,
    pub switch_active_low: bool,
    /// Simulated travel between the switches, in steps.
    pub travel_steps: i64,
    /// Simulated carriage start, in steps from the min end.
    pub start_steps: i64,
}

impl AxisWiring {
    /// Switch channels without duplicates.
    pub fn switch_channels(&self) -> Vec<Channel> {
        if self.min_switch == self.max_switch {
            vec![self.min_switch]
        } else {
            vec![self.min_switch, self.max_switch]
        }
    }
}

/// Wiring of the whole stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWiring {
    pub numbering: PinNumbering,
    pub x: AxisWiring,
    pub y: AxisWiring,
}

/// I/O handed to one rail: the motor's coil outputs and the bank its
/// switches are read from.
pub struct AxisHardware {
    pub output: Box<dyn DigitalOutput>,
    pub switches: Arc<dyn DigitalInput>,
}

pub struct StageHardware {
    pub x: AxisHardware,
    pub y: AxisHardware,
}

pub type BackendFactory = fn(&StageWiring) -> DynResult<StageHardware>;

/// Context for registering and instantiating GPIO backends.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    /// Create a new empty registration context.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under a stable name (e.g. "sim").
    pub fn register_backend(&mut self, name: &str, factory: BackendFactory) {
        let key = normalize_name(name);
        self.factories.insert(key, factory);
    }

    /// Check whether a backend name is registered.
    pub fn is_backend_registered(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.factories.contains_key(&key)
    }

    /// List registered backend names.
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the hardware of both axes with the named backend.
    pub fn build_stage(&self, name: &str, wiring: &StageWiring) -> DynResult<StageHardware> {
        let key = normalize_name(name);
        let factory = self.factories.get(&key).ok_or_else(|| {
            format!(
                "Unknown GPIO backend: {} (available: {})",
                name,
                self.registered_backends().join(", ")
            )
        })?;
        factory(wiring)
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    context.register_backend("sim", sim_factory);
    #[cfg(feature = "rppal")]
    context.register_backend("rppal", rppal_factory);
}

fn sim_axis(wiring: &AxisWiring) -> AxisHardware {
    let axis = sim::SimAxis::new(wiring);
    AxisHardware {
        output: Box::new(axis.output()),
        switches: Arc::new(axis.input()),
    }
}

fn sim_factory(wiring: &StageWiring) -> DynResult<StageHardware> {
    Ok(StageHardware {
        x: sim_axis(&wiring.x),
        y: sim_axis(&wiring.y),
    })
}

#[cfg(feature = "rppal")]
fn rppal_axis(numbering: PinNumbering, wiring: &AxisWiring) -> DynResult<AxisHardware> {
    Ok(AxisHardware {
        output: Box::new(RppalOutput::new(numbering)?),
        switches: Arc::new(RppalInput::new(numbering, &wiring.switch_channels())?),
    })
}

#[cfg(feature = "rppal")]
fn rppal_factory(wiring: &StageWiring) -> DynResult<StageHardware> {
    Ok(StageHardware {
        x: rppal_axis(wiring.numbering, &wiring.x)?,
        y: rppal_axis(wiring.numbering, &wiring.y)?,
    })
}
