// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Raspberry Pi GPIO backend built on `rppal`.
//!
//! Channels in the configuration are header pin numbers by default and are
//! translated to Broadcom numbers before they reach the GPIO controller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rppal::gpio::{self, Gpio, InputPin, OutputPin};
use tracing::debug;
use xystage_core::{Channel, DigitalInput, DigitalOutput, GpioError, Level, PinNumbering};

/// Header pin to BCM GPIO number on the 40-pin header. Power and ground
/// pins have no entry.
const BOARD_TO_BCM: [(u8, u8); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// Translate a header pin number, `None` for power, ground and out-of-range pins.
pub fn board_to_bcm(pin: u8) -> Option<u8> {
    BOARD_TO_BCM
        .iter()
        .find(|(board, _)| *board == pin)
        .map(|(_, bcm)| *bcm)
}

/// Resolve a configured channel to the BCM number rppal expects.
pub fn resolve_channel(numbering: PinNumbering, channel: Channel) -> Result<u8, GpioError> {
    match numbering {
        PinNumbering::Bcm => Ok(channel),
        PinNumbering::Board => board_to_bcm(channel).ok_or_else(|| GpioError::Unavailable {
            channel,
            reason: "header pin is not a GPIO".to_string(),
        }),
    }
}

fn open_pin(gpio: &Gpio, numbering: PinNumbering, channel: Channel) -> Result<gpio::Pin, GpioError> {
    let bcm = resolve_channel(numbering, channel)?;
    gpio.get(bcm).map_err(|e| GpioError::Unavailable {
        channel,
        reason: e.to_string(),
    })
}

fn to_rppal(level: Level) -> gpio::Level {
    match level {
        Level::Low => gpio::Level::Low,
        Level::High => gpio::Level::High,
    }
}

fn from_rppal(level: gpio::Level) -> Level {
    Level::from(level == gpio::Level::High)
}

/// Coil outputs of one motor.
pub struct RppalOutput {
    gpio: Gpio,
    numbering: PinNumbering,
    pins: HashMap<Channel, OutputPin>,
}

impl RppalOutput {
    pub fn new(numbering: PinNumbering) -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Backend(e.to_string()))?;
        Ok(Self {
            gpio,
            numbering,
            pins: HashMap::new(),
        })
    }
}

impl DigitalOutput for RppalOutput {
    fn claim(&mut self, channel: Channel) -> Result<(), GpioError> {
        if self.pins.contains_key(&channel) {
            return Ok(());
        }
        let pin = open_pin(&self.gpio, self.numbering, channel)?.into_output_low();
        debug!("Claimed output channel {}", channel);
        self.pins.insert(channel, pin);
        Ok(())
    }

    fn write(&mut self, channel: Channel, level: Level) -> Result<(), GpioError> {
        let pin = self
            .pins
            .get_mut(&channel)
            .ok_or(GpioError::NotClaimed(channel))?;
        pin.write(to_rppal(level));
        Ok(())
    }

    fn read(&self, channel: Channel) -> Result<Level, GpioError> {
        let pin = self.pins.get(&channel).ok_or(GpioError::NotClaimed(channel))?;
        Ok(Level::from(pin.is_set_high()))
    }

    fn release(&mut self, channel: Channel) {
        // Dropping the pin resets it to its original mode.
        if self.pins.remove(&channel).is_some() {
            debug!("Released output channel {}", channel);
        }
    }
}

/// Limit switch inputs of one axis, configured when built.
pub struct RppalInput {
    pins: Mutex<HashMap<Channel, InputPin>>,
}

impl RppalInput {
    pub fn new(numbering: PinNumbering, channels: &[Channel]) -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Backend(e.to_string()))?;
        let mut pins = HashMap::new();
        for &channel in channels {
            if pins.contains_key(&channel) {
                continue;
            }
            pins.insert(channel, open_pin(&gpio, numbering, channel)?.into_input());
        }
        Ok(Self {
            pins: Mutex::new(pins),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Channel, InputPin>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DigitalInput for RppalInput {
    fn read(&self, channel: Channel) -> Result<Level, GpioError> {
        let pins = self.lock();
        let pin = pins.get(&channel).ok_or(GpioError::NotClaimed(channel))?;
        Ok(from_rppal(pin.read()))
    }
}
