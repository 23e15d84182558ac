// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Acceptable-value limits and change thresholds.

use serde::{Deserialize, Serialize};

use crate::config::device::SensorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Readings repeating within this epsilon of their predecessor are
    /// flagged as stale.
    #[serde(default = "default_stale_epsilon")]
    pub stale_epsilon: f64,

    /// Decimal places kept when a raw value enters the reading store.
    #[serde(default = "default_precision")]
    pub precision: u32,

    #[serde(default = "default_temperature_min")]
    pub temperature_min: f64,

    #[serde(default = "default_temperature_max")]
    pub temperature_max: f64,

    #[serde(default = "default_humidity_min")]
    pub humidity_min: f64,

    #[serde(default = "default_humidity_max")]
    pub humidity_max: f64,
}

fn default_stale_epsilon() -> f64 {
    0.001
}

fn default_precision() -> u32 {
    3
}

fn default_temperature_min() -> f64 {
    -50.0
}

fn default_temperature_max() -> f64 {
    100.0
}

fn default_humidity_min() -> f64 {
    0.0
}

fn default_humidity_max() -> f64 {
    100.0
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            stale_epsilon: default_stale_epsilon(),
            precision: default_precision(),
            temperature_min: default_temperature_min(),
            temperature_max: default_temperature_max(),
            humidity_min: default_humidity_min(),
            humidity_max: default_humidity_max(),
        }
    }
}

impl LimitsConfig {
    /// Whether an archived value is plausible for the given sensor kind.
    pub fn in_range(&self, kind: SensorKind, value: f64) -> bool {
        match kind {
            SensorKind::Temperature => {
                value >= self.temperature_min && value <= self.temperature_max
            }
            SensorKind::Humidity => value >= self.humidity_min && value <= self.humidity_max,
        }
    }

    /// Round to the configured precision.
    pub fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.precision as i32);
        (value * factor).round() / factor
    }
}
