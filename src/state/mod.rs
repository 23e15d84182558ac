// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Owned application state.
//!
//! The reading store is the authoritative "current" view: one [`Reading`]
//! per sensor, overwritten every poll cycle. It is the only state shared
//! between the poller and the archive/query paths, and every reading is
//! read and written under a single lock so observers never see a
//! partially-updated value. All of it lives in an explicitly owned
//! [`AppState`] injected into the poller, the archive writer and the query
//! handlers; there are no globals.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use log::{debug, error, warn};
use serde::Serialize;
use thiserror::Error;

use crate::archive::{timefmt, ArchiveGeneration};
use crate::config::{Config, SectionConfig, SensorConfig, SensorKind};
use crate::metrics::MetricsRecorder;

/// Error taxonomy for failed readings.
///
/// `Connection` marks a whole device offline, `Timeout` and `Sensor` a
/// register group, `Decode` a single sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FaultKind {
    Connection,
    Timeout,
    Sensor,
    #[serde(rename = "DecodeError")]
    Decode,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Connection => write!(f, "Connection"),
            FaultKind::Timeout => write!(f, "Timeout"),
            FaultKind::Sensor => write!(f, "Sensor"),
            FaultKind::Decode => write!(f, "DecodeError"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Ok,
    Error,
    Offline,
}

/// Last-known state of one sensor.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    pub value: Option<f64>,
    pub status: ReadingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FaultKind>,
    #[serde(with = "timefmt")]
    pub timestamp: NaiveDateTime,
}

impl Reading {
    pub fn is_ok(&self) -> bool {
        self.status == ReadingStatus::Ok
    }
}

/// One sensor in the current view served to operators.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentItem {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    pub value: Option<f64>,
    pub error: bool,
    #[serde(with = "timefmt")]
    pub timestamp: NaiveDateTime,
    pub name: String,
}

/// Current readings grouped by kind. `stale` is set when the view is a
/// last-known-good snapshot served during a total sensor failure.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentView {
    pub temperature: Vec<CurrentItem>,
    pub humidity: Vec<CurrentItem>,
    pub stale: bool,
}

#[derive(Debug, Error)]
pub enum CurrentError {
    /// No live data and the last good snapshot has expired. Never answered
    /// with a fabricated reading.
    #[error("sensor data unavailable")]
    Unavailable,
}

struct StoreInner {
    readings: HashMap<String, Reading>,
    last_good: Option<(CurrentView, Instant)>,
}

/// In-memory last-known-value table with stale-value detection.
pub struct ReadingStore {
    config: Arc<Config>,
    inner: RwLock<StoreInner>,
}

impl ReadingStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner {
                readings: HashMap::new(),
                last_good: None,
            }),
        }
    }

    /// Record a decoded value for a sensor.
    ///
    /// The raw value is rounded to the configured precision; non-finite
    /// input is rejected. A value repeating within the stale epsilon of its
    /// predecessor feeds the stale-data ledger; a genuine change clears it.
    /// The first-ever reading of a sensor is never flagged.
    pub fn update(&self, sensor: &SensorConfig, raw: f64, metrics: &MetricsRecorder) -> bool {
        if !raw.is_finite() {
            error!("Rejecting non-finite value for sensor {}", sensor.id);
            return false;
        }

        let value = self.config.limits.round(raw);
        let now = Local::now().naive_local();
        let epsilon = self.config.limits.stale_epsilon;

        let mut inner = self.inner.write().unwrap();
        let previous = inner
            .readings
            .get(&sensor.id)
            .and_then(|reading| reading.value);

        inner.readings.insert(
            sensor.id.clone(),
            Reading {
                id: sensor.id.clone(),
                kind: sensor.kind,
                value: Some(value),
                status: ReadingStatus::Ok,
                error_kind: None,
                timestamp: now,
            },
        );
        drop(inner);

        if let Some(previous) = previous {
            let difference = (previous - value).abs();
            debug!(
                "Sensor {} difference from previous value: {:.3}",
                sensor.id, difference
            );
            if difference < epsilon {
                metrics.flag_stale(&sensor.id, value, now);
            } else {
                metrics.clear_stale(&sensor.id);
            }
        }

        true
    }

    /// Record a sensor-level failure (decode errors). The sensor keeps its
    /// slot but loses its value; absence of data is not staleness, so the
    /// ledger entry is cleared.
    pub fn mark_sensor_error(&self, sensor: &SensorConfig, kind: FaultKind, metrics: &MetricsRecorder) {
        let now = Local::now().naive_local();
        let mut inner = self.inner.write().unwrap();
        inner.readings.insert(
            sensor.id.clone(),
            Reading {
                id: sensor.id.clone(),
                kind: sensor.kind,
                value: None,
                status: ReadingStatus::Error,
                error_kind: Some(kind),
                timestamp: now,
            },
        );
        drop(inner);
        metrics.clear_stale(&sensor.id);
    }

    /// Mark every sensor of a section offline after a device-level failure.
    pub fn mark_section_offline(
        &self,
        section: &SectionConfig,
        kind: FaultKind,
        metrics: &MetricsRecorder,
    ) {
        let now = Local::now().naive_local();
        let mut inner = self.inner.write().unwrap();
        for sensor in &section.device.sensors {
            inner.readings.insert(
                sensor.id.clone(),
                Reading {
                    id: sensor.id.clone(),
                    kind: sensor.kind,
                    value: None,
                    status: ReadingStatus::Offline,
                    error_kind: Some(kind),
                    timestamp: now,
                },
            );
        }
        drop(inner);

        for sensor in &section.device.sensors {
            metrics.clear_stale(&sensor.id);
        }
        warn!(
            "{} ({}) - all sensors marked offline",
            section.name,
            section.device.endpoint()
        );
    }

    pub fn get(&self, sensor_id: &str) -> Option<Reading> {
        self.inner.read().unwrap().readings.get(sensor_id).cloned()
    }

    /// Stable snapshot of all readings, ordered by sensor id.
    pub fn snapshot(&self) -> Vec<Reading> {
        let inner = self.inner.read().unwrap();
        let mut readings: Vec<Reading> = inner.readings.values().cloned().collect();
        readings.sort_by(|a, b| a.id.cmp(&b.id));
        readings
    }

    /// Drop all readings. Used by the metrics reset.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.readings.clear();
        inner.last_good = None;
    }

    /// Build the current view for operators.
    ///
    /// While at least one sensor is Ok the live table is returned and
    /// remembered. During a total failure the remembered snapshot is served
    /// marked stale for a short TTL, after which the data is declared
    /// unavailable rather than fabricated.
    pub fn current_view(&self) -> Result<CurrentView, CurrentError> {
        let index = self.config.sensor_index();
        let mut view = CurrentView {
            temperature: Vec::new(),
            humidity: Vec::new(),
            stale: false,
        };

        let mut inner = self.inner.write().unwrap();
        let mut any_ok = false;

        let mut readings: Vec<&Reading> = inner.readings.values().collect();
        readings.sort_by(|a, b| a.id.cmp(&b.id));
        for reading in readings {
            let Some((section, sensor)) = index.get(reading.id.as_str()) else {
                debug!("Sensor {} not present in configuration", reading.id);
                continue;
            };
            let name = sensor
                .name
                .clone()
                .unwrap_or_else(|| format!("{} ({})", sensor.kind, section.name));
            let item = CurrentItem {
                sensor_id: reading.id.clone(),
                kind: reading.kind,
                value: if reading.is_ok() { reading.value } else { None },
                error: !reading.is_ok(),
                timestamp: reading.timestamp,
                name,
            };
            any_ok = any_ok || reading.is_ok();
            match reading.kind {
                SensorKind::Temperature => view.temperature.push(item),
                SensorKind::Humidity => view.humidity.push(item),
            }
        }

        if any_ok {
            inner.last_good = Some((view.clone(), Instant::now()));
            return Ok(view);
        }

        if let Some((snapshot, taken_at)) = &inner.last_good {
            if taken_at.elapsed() <= self.config.history.current_ttl() {
                let mut stale_view = snapshot.clone();
                stale_view.stale = true;
                return Ok(stale_view);
            }
        }

        Err(CurrentError::Unavailable)
    }
}

/// Shared application state injected into the poller, the archive jobs and
/// the query handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: ReadingStore,
    pub metrics: MetricsRecorder,
    pub generation: Arc<ArchiveGeneration>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let config = Arc::new(config);
        Arc::new(Self {
            store: ReadingStore::new(config.clone()),
            metrics: MetricsRecorder::new(),
            generation: Arc::new(ArchiveGeneration::new()),
            config,
        })
    }

    /// Reset metrics and clear the current readings table.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        self.store.clear();
    }
}
