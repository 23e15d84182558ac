// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Section, device and sensor topology.
//!
//! Sections are the logical dashboard units (a cold room or production
//! section); each owns exactly one network device which in turn owns an
//! ordered list of sensors. The topology is loaded once at startup and is
//! immutable afterwards; section and sensor identifiers are generated at
//! load time (`section_<n>` and `<section id>.<type>_<n>`), so a sensor id
//! always prefix-encodes its section.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default Modbus unit address when a sensor does not specify one.
pub const DEFAULT_UNIT_ADDRESS: u8 = 2;

/// Default number of registers per sensor (two registers encode one f32).
pub const DEFAULT_REGISTER_COUNT: u16 = 2;

/// Physical quantity measured by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Temperature => write!(f, "temperature"),
            SensorKind::Humidity => write!(f, "humidity"),
        }
    }
}

/// One sensor on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Generated identifier, `<section id>.<type>_<counter>`. Never read
    /// from the configuration file.
    #[serde(default)]
    pub id: String,

    /// Optional display name used in series legends.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub kind: SensorKind,

    /// First holding register of this sensor.
    pub register: u16,

    /// Number of registers the sensor occupies.
    #[serde(default = "default_register_count")]
    pub length: u16,

    /// Modbus unit (slave) address.
    #[serde(default = "default_unit_address")]
    pub address: u8,
}

fn default_register_count() -> u16 {
    DEFAULT_REGISTER_COUNT
}

fn default_unit_address() -> u8 {
    DEFAULT_UNIT_ADDRESS
}

/// Network device exposing a section's sensors over Modbus TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub ip: String,
    pub port: u16,
    pub sensors: Vec<SensorConfig>,
}

impl DeviceConfig {
    /// Human-readable endpoint used in log messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// A monitored section and its device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionConfig {
    /// Generated identifier, `section_<index>`. Never read from the file.
    #[serde(default)]
    pub id: String,

    pub name: String,
    pub device: DeviceConfig,
}

impl SectionConfig {
    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorConfig> {
        self.device.sensors.iter().find(|s| s.id == sensor_id)
    }
}
