// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Digital I/O capabilities consumed by the motion engine.
//!
//! Backends implement [`DigitalOutput`] for the motor coil pins and
//! [`DigitalInput`] for the limit switches. The engine never touches a pin
//! through anything else.

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend-defined pin identifier (header pin or BCM number, see [`PinNumbering`]).
pub type Channel = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Self::Output {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "0"),
            Self::High => write!(f, "1"),
        }
    }
}

/// How channel numbers in the configuration map onto the GPIO controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// Physical pin on the 40-pin header.
    #[default]
    Board,
    /// Broadcom GPIO number.
    Bcm,
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("channel {0} has not been claimed")]
    NotClaimed(Channel),

    #[error("channel {channel} is not usable: {reason}")]
    Unavailable { channel: Channel, reason: String },

    #[error("{0}")]
    Backend(String),
}

pub type GpioResult<T> = Result<T, GpioError>;

/// Bank of output pins driving one motor.
pub trait DigitalOutput: Send {
    /// Configure `channel` as an output. Claiming twice is a no-op.
    fn claim(&mut self, channel: Channel) -> GpioResult<()>;

    fn write(&mut self, channel: Channel, level: Level) -> GpioResult<()>;

    /// Read back the level currently driven on an output channel.
    fn read(&self, channel: Channel) -> GpioResult<Level>;

    /// Return the channel to the controller.
    fn release(&mut self, _channel: Channel) {}
}

/// Read-only bank of input pins. Shared between switches, so reads take `&self`.
pub trait DigitalInput: Send + Sync {
    fn read(&self, channel: Channel) -> GpioResult<Level>;
}

/// A mechanical end-of-travel switch.
#[derive(Clone)]
pub struct LimitSwitch {
    input: Arc<dyn DigitalInput>,
    channel: Channel,
    active: Level,
}

impl LimitSwitch {
    /// Switch that reads `High` when closed.
    pub fn new(input: Arc<dyn DigitalInput>, channel: Channel) -> Self {
        Self {
            input,
            channel,
            active: Level::High,
        }
    }

    /// Switch that pulls its input `Low` when closed.
    pub fn active_low(mut self) -> Self {
        self.active = Level::Low;
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_pressed(&self) -> GpioResult<bool> {
        Ok(self.input.read(self.channel)? == self.active)
    }
}

impl fmt::Debug for LimitSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitSwitch")
            .field("channel", &self.channel)
            .field("active", &self.active)
            .finish()
    }
}
