// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the coldwatch collector.
//!
//! The configuration is backed by a YAML file organized in sections:
//! - `polling`: poll loop timing, timeouts and retries
//! - `archive`: archive directories, writer/compactor timers, retention
//! - `history`: query range, aggregation interval and cache settings
//! - `limits`: acceptable-value limits and change thresholds
//! - `sections`: the monitored sections with their devices and sensors
//!
//! Loading a missing file writes a default one so a fresh deployment has
//! something to edit. After deserialization, section and sensor ids are
//! generated (`section_<n>`, `<section id>.<type>_<n>`) and the result is
//! validated; the topology is immutable from then on.
//!
//! ## Usage
//!
//! ```no_run
//! use coldwatch::config::Config;
//! use std::path::Path;
//!
//! let config = Config::from_file(Path::new("config.yaml")).unwrap();
//! println!("poll interval: {}ms", config.polling.interval_ms);
//! ```

pub mod archive;
pub mod device;
pub mod history;
pub mod limits;
pub mod polling;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use archive::ArchiveConfig;
pub use device::{DeviceConfig, SectionConfig, SensorConfig, SensorKind};
pub use history::{parse_range, HistoryConfig};
pub use limits::LimitsConfig;
pub use polling::PollingConfig;

/// Root configuration structure for the coldwatch collector.
///
/// Deserialized from and serialized to YAML via serde. Every section has
/// defaults so a minimal file only needs the `sections` topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Monitored sections. Empty by default; the collector idles without
    /// any, which is still useful for serving archived history.
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

impl Config {
    /// Load configuration from a file, creating a default one when absent.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let mut default_config = Self::default();
            default_config.save_to_file(path)?;
            default_config.assign_ids();
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let mut config: Config = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        config.assign_ids();
        config.validate()?;

        Ok(config)
    }

    /// Save the configuration to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory for {:?}", path.as_ref())
                })?;
            }
        }

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Generate section and sensor identifiers from list positions.
    ///
    /// Sensor ids carry the section id as a prefix and a per-type counter,
    /// e.g. `section_1.temperature_2` for the second temperature sensor of
    /// the first section.
    pub fn assign_ids(&mut self) {
        for (index, section) in self.sections.iter_mut().enumerate() {
            section.id = format!("section_{}", index + 1);

            let mut counters: HashMap<SensorKind, u32> = HashMap::new();
            for sensor in &mut section.device.sensors {
                let counter = counters.entry(sensor.kind).or_insert(0);
                *counter += 1;
                sensor.id = format!("{}.{}_{}", section.id, sensor.kind, counter);
            }
        }
    }

    /// Cross-field validation that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        self.history
            .range_duration()
            .context("invalid history.range")?;

        if self.history.aggregation_interval_secs == 0 {
            bail!("history.aggregation_interval_secs must be positive");
        }
        if self.history.cache_capacity == 0 {
            bail!("history.cache_capacity must be positive");
        }
        if self.polling.connect_attempts == 0 {
            bail!("polling.connect_attempts must be positive");
        }
        if self.limits.stale_epsilon <= 0.0 {
            bail!("limits.stale_epsilon must be positive");
        }

        for section in &self.sections {
            if section.device.sensors.is_empty() {
                bail!("section '{}' has no sensors", section.name);
            }
            for sensor in &section.device.sensors {
                if sensor.length < 2 {
                    bail!(
                        "sensor '{}' of section '{}' needs at least 2 registers",
                        sensor.id,
                        section.name
                    );
                }
                if sensor.register as u32 + sensor.length as u32 > 65536 {
                    bail!(
                        "sensor '{}' of section '{}' exceeds the register address space",
                        sensor.id,
                        section.name
                    );
                }
            }
        }

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    pub fn apply_args(
        &mut self,
        archive_dir: Option<PathBuf>,
        poll_interval_ms: Option<u64>,
        range: Option<String>,
    ) {
        if let Some(dir) = archive_dir {
            debug!("Overriding archive directory from command line: {:?}", dir);
            self.archive.set_dir(dir);
        }
        if let Some(interval) = poll_interval_ms {
            debug!("Overriding poll interval from command line: {}ms", interval);
            self.polling.interval_ms = interval;
        }
        if let Some(range) = range {
            debug!("Overriding history range from command line: {}", range);
            self.history.range = range;
        }
    }

    pub fn section(&self, section_id: &str) -> Option<&SectionConfig> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    /// Map every sensor id to its sensor and owning section.
    pub fn sensor_index(&self) -> HashMap<&str, (&SectionConfig, &SensorConfig)> {
        let mut index = HashMap::new();
        for section in &self.sections {
            for sensor in &section.device.sensors {
                index.insert(sensor.id.as_str(), (section, sensor));
            }
        }
        index
    }
}
