// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for xystage.
//!
//! Config is loaded from the `[xystage]` section of `xystage.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./xystage.toml`
//! 3. `~/.config/xystage/xystage.toml`
//! 4. `/etc/xystage/xystage.toml`

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use xystage_app::ConfigFile;
use xystage_backend::{AxisWiring, StageWiring};
use xystage_core::{Channel, MotorParams, PinNumbering, RailParams};

/// Top-level stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// General settings
    pub general: GeneralConfig,
    /// GPIO backend selection
    pub backend: BackendConfig,
    /// Limit search behaviour shared by both rails
    pub calibration: CalibrationConfig,
    /// X rail
    pub x: AxisConfig,
    /// Y rail
    pub y: AxisConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            backend: BackendConfig::default(),
            calibration: CalibrationConfig::default(),
            x: AxisConfig::x_axis(),
            y: AxisConfig::y_axis(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend name (e.g. "sim", "rppal")
    pub kind: String,
    /// How pin numbers below are interpreted ("board" or "bcm")
    pub numbering: PinNumbering,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "sim".to_string(),
            numbering: PinNumbering::Board,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Angle driven while searching for a switch
    pub search_degrees: f64,
    /// Standoff from each switch, in revolutions
    pub margin_rotations: f64,
    /// Fail when a search ends without tripping its switch
    pub require_limit_trip: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let rail = RailParams::default();
        Self {
            search_degrees: rail.search_degrees,
            margin_rotations: rail.margin_rotations,
            require_limit_trip: rail.require_limit_trip,
        }
    }
}

/// One rail. The wiring keys are required whenever the section is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Coil pins in phase-table order
    pub motor_pins: [Channel; 4],
    /// Near-end switch input
    pub min_switch: Channel,
    /// Far-end switch input (may equal `min_switch`)
    pub max_switch: Channel,
    /// Switches pull their input low when closed
    #[serde(default)]
    pub switch_active_low: bool,
    /// Linear travel per revolution in metres
    #[serde(default = "default_m_per_rotation")]
    pub m_per_rotation: f64,
    #[serde(default = "default_max_rpm")]
    pub max_rpm: f64,
    #[serde(default = "default_rpm")]
    pub rpm: f64,
    #[serde(default = "default_steps_per_rotation")]
    pub steps_per_rotation: u32,
    /// Simulated rail, used by the "sim" backend only
    #[serde(default)]
    pub sim: SimConfig,
}

fn default_m_per_rotation() -> f64 {
    RailParams::default().m_per_rotation
}

fn default_max_rpm() -> f64 {
    MotorParams::default().max_rpm
}

fn default_rpm() -> f64 {
    MotorParams::default().rpm
}

fn default_steps_per_rotation() -> u32 {
    MotorParams::default().steps_per_rotation
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Distance between the switches in metres
    pub travel_m: f64,
    /// Carriage start, in metres from the near switch
    pub start_m: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            travel_m: 0.3,
            start_m: 0.1,
        }
    }
}

impl AxisConfig {
    fn with_wiring(motor_pins: [Channel; 4], switch: Channel) -> Self {
        Self {
            motor_pins,
            min_switch: switch,
            max_switch: switch,
            switch_active_low: false,
            m_per_rotation: default_m_per_rotation(),
            max_rpm: default_max_rpm(),
            rpm: default_rpm(),
            steps_per_rotation: default_steps_per_rotation(),
            sim: SimConfig::default(),
        }
    }

    /// Reference X wiring (header pins).
    pub fn x_axis() -> Self {
        Self::with_wiring([13, 11, 15, 12], 40)
    }

    /// Reference Y wiring (header pins).
    pub fn y_axis() -> Self {
        Self::with_wiring([35, 33, 37, 31], 38)
    }

    pub fn motor_params(&self) -> MotorParams {
        MotorParams {
            rpm: self.rpm,
            max_rpm: self.max_rpm,
            steps_per_rotation: self.steps_per_rotation,
        }
    }

    fn metres_to_steps(&self, metres: f64) -> i64 {
        (metres / self.m_per_rotation * self.steps_per_rotation as f64).round() as i64
    }

    pub fn wiring(&self) -> AxisWiring {
        AxisWiring {
            motor_pins: self.motor_pins,
            min_switch: self.min_switch,
            max_switch: self.max_switch,
            switch_active_low: self.switch_active_low,
            travel_steps: self.metres_to_steps(self.sim.travel_m),
            start_steps: self.metres_to_steps(self.sim.start_m),
        }
    }

    /// Every channel this axis uses.
    fn channels(&self) -> HashSet<Channel> {
        let mut channels: HashSet<Channel> = self.motor_pins.into_iter().collect();
        channels.insert(self.min_switch);
        channels.insert(self.max_switch);
        channels
    }

    fn validate(&self, section: &str) -> Result<(), String> {
        let unique: HashSet<Channel> = self.motor_pins.into_iter().collect();
        if unique.len() != self.motor_pins.len() {
            return Err(format!("[{}].motor_pins must be four distinct pins", section));
        }
        for (key, switch) in [("min_switch", self.min_switch), ("max_switch", self.max_switch)] {
            if unique.contains(&switch) {
                return Err(format!(
                    "[{}].{} {} is also a motor pin",
                    section, key, switch
                ));
            }
        }
        if !(self.m_per_rotation.is_finite() && self.m_per_rotation > 0.0) {
            return Err(format!("[{}].m_per_rotation must be > 0", section));
        }
        if !(self.max_rpm.is_finite() && self.max_rpm > 0.0) {
            return Err(format!("[{}].max_rpm must be > 0", section));
        }
        if !(self.rpm.is_finite() && self.rpm > 0.0) {
            return Err(format!("[{}].rpm must be > 0", section));
        }
        if self.rpm.round() > self.max_rpm.round() {
            return Err(format!(
                "[{}].rpm {} exceeds max_rpm {}",
                section, self.rpm, self.max_rpm
            ));
        }
        if self.steps_per_rotation == 0 {
            return Err(format!("[{}].steps_per_rotation must be > 0", section));
        }
        if !(self.sim.travel_m.is_finite() && self.sim.travel_m > 0.0) {
            return Err(format!("[{}.sim].travel_m must be > 0", section));
        }
        if !(0.0..=self.sim.travel_m).contains(&self.sim.start_m) {
            return Err(format!(
                "[{}.sim].start_m must be within 0..={}",
                section, self.sim.travel_m
            ));
        }
        Ok(())
    }
}

impl StageConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.backend.kind.trim().is_empty() {
            return Err("[backend].kind must not be empty".to_string());
        }

        let calibration = &self.calibration;
        if !(calibration.search_degrees.is_finite() && calibration.search_degrees > 0.0) {
            return Err("[calibration].search_degrees must be > 0".to_string());
        }
        if !(calibration.margin_rotations.is_finite() && calibration.margin_rotations >= 0.0) {
            return Err("[calibration].margin_rotations must be >= 0".to_string());
        }

        self.x.validate("x")?;
        self.y.validate("y")?;

        let mut shared: Vec<Channel> = self
            .x
            .channels()
            .intersection(&self.y.channels())
            .copied()
            .collect();
        if !shared.is_empty() {
            shared.sort_unstable();
            return Err(format!(
                "[x] and [y] share pins {:?}; every channel belongs to one axis",
                shared
            ));
        }
        Ok(())
    }

    pub fn rail_params(&self, axis: &AxisConfig) -> RailParams {
        RailParams {
            m_per_rotation: axis.m_per_rotation,
            margin_rotations: self.calibration.margin_rotations,
            search_degrees: self.calibration.search_degrees,
            require_limit_trip: self.calibration.require_limit_trip,
        }
    }

    pub fn stage_wiring(&self) -> StageWiring {
        StageWiring {
            numbering: self.backend.numbering,
            x: self.x.wiring(),
            y: self.y.wiring(),
        }
    }

    /// Generate an example configuration wrapped under the `[xystage]`
    /// section header.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "xystage")]
            inner: StageConfig,
        }
        let example = StageConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            ..StageConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

impl ConfigFile for StageConfig {
    fn section_key() -> &'static str {
        "xystage"
    }
}

pub fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "log level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}
