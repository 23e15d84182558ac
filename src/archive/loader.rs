// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! History loader.
//!
//! Reads archive entries back for a time window. Candidate daily files are
//! picked by the date in their name; files above the streaming threshold
//! are parsed entry by entry through a serde sequence visitor to bound
//! memory, smaller ones in one shot. Malformed files, entries and sensor
//! samples are skipped and logged, never fatal.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::{debug, error};
use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::Deserialize;

use crate::archive::{parse_daily_file_name, ArchivedSensor, TIME_FORMAT};
use crate::config::{Config, LimitsConfig, SensorKind};

/// One raw sensor sample inside the query window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    /// Seconds since the epoch of the entry's local wall-clock timestamp.
    pub timestamp: i64,
    pub value: f64,
}

/// Raw points keyed by sensor id, split by kind.
#[derive(Debug, Default)]
pub struct RawHistory {
    pub temperature: HashMap<String, Vec<RawPoint>>,
    pub humidity: HashMap<String, Vec<RawPoint>>,
}

impl RawHistory {
    pub fn by_kind(&self, kind: SensorKind) -> &HashMap<String, Vec<RawPoint>> {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
        }
    }

    fn push(&mut self, kind: SensorKind, sensor_id: String, point: RawPoint) {
        let map = match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
        };
        map.entry(sensor_id).or_default().push(point);
    }

    fn merge(&mut self, other: RawHistory) {
        for (sensor_id, points) in other.temperature {
            self.temperature.entry(sensor_id).or_default().extend(points);
        }
        for (sensor_id, points) in other.humidity {
            self.humidity.entry(sensor_id).or_default().extend(points);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty() && self.humidity.is_empty()
    }
}

pub struct HistoryLoader {
    config: Arc<Config>,
}

impl HistoryLoader {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Load all raw points whose entries fall inside `[start, end]`.
    pub async fn load(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<RawHistory> {
        let mut raw = RawHistory::default();
        let dir = &self.config.archive.dir;

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(raw),
        };

        let mut candidates: Vec<(String, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list archive directory {:?}", dir))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = parse_daily_file_name(&name) else {
                if name.ends_with(".json") {
                    error!("Invalid archive file name: {}", name);
                }
                continue;
            };
            if date >= start.date() && date <= end.date() {
                candidates.push((name, entry.path()));
            }
        }
        candidates.sort();

        for (name, path) in candidates {
            let size = tokio::fs::metadata(&path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0);

            let loaded = if size > self.config.archive.streaming_threshold_bytes {
                load_file_streaming(path, name.clone(), start, end, self.config.limits.clone())
                    .await
            } else {
                load_file(path, &name, start, end, &self.config.limits).await
            };

            match loaded {
                Ok(partial) => raw.merge(partial),
                Err(err) => error!("Failed to load archive file {}: {:#}", name, err),
            }
        }

        Ok(raw)
    }
}

/// One-shot parse for small files.
async fn load_file(
    path: PathBuf,
    name: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    limits: &LimitsConfig,
) -> Result<RawHistory> {
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;

    let mut raw = RawHistory::default();
    let values: Vec<serde_json::Value> = match serde_json::from_str(&contents) {
        Ok(values) => values,
        Err(err) => {
            error!("Invalid JSON structure in {}: {}", name, err);
            return Ok(raw);
        }
    };

    let mut processed = 0usize;
    for value in values {
        if consume_entry(value, start, end, limits, &mut raw) {
            processed += 1;
        }
    }
    debug!("Processed {} entries from {}", processed, name);
    Ok(raw)
}

/// Streaming parse for files above the size threshold. The file is walked
/// entry by entry on a blocking thread; only in-window points are kept.
async fn load_file_streaming(
    path: PathBuf,
    name: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
    limits: LimitsConfig,
) -> Result<RawHistory> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        let reader = std::io::BufReader::new(file);

        let mut raw = RawHistory::default();
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let processed = deserializer
            .deserialize_seq(EntrySeq {
                raw: &mut raw,
                start,
                end,
                limits: &limits,
            })
            .with_context(|| format!("Streaming parse of {} failed", name))?;

        debug!("Processed {} entries from {} (streaming)", processed, name);
        Ok(raw)
    })
    .await
    .context("Streaming load task failed")?
}

/// Sequence visitor feeding entries through [`consume_entry`] one at a
/// time, so large daily files never materialize in memory at once.
struct EntrySeq<'a> {
    raw: &'a mut RawHistory,
    start: NaiveDateTime,
    end: NaiveDateTime,
    limits: &'a LimitsConfig,
}

impl<'de, 'a> Visitor<'de> for EntrySeq<'a> {
    type Value = usize;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array of archive entries")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<usize, A::Error> {
        let mut processed = 0usize;
        while let Some(value) = seq.next_element::<serde_json::Value>()? {
            if consume_entry(value, self.start, self.end, self.limits, self.raw) {
                processed += 1;
            }
        }
        Ok(processed)
    }
}

#[derive(Deserialize)]
struct LooseEntry {
    timestamp: String,
    sensors: Vec<serde_json::Value>,
}

/// Fold one archive entry into the raw history. Returns whether the entry
/// was inside the window and structurally sound.
fn consume_entry(
    value: serde_json::Value,
    start: NaiveDateTime,
    end: NaiveDateTime,
    limits: &LimitsConfig,
    raw: &mut RawHistory,
) -> bool {
    let entry: LooseEntry = match serde_json::from_value(value) {
        Ok(entry) => entry,
        Err(err) => {
            debug!("Skipping entry with invalid structure: {}", err);
            return false;
        }
    };

    let timestamp = match NaiveDateTime::parse_from_str(&entry.timestamp, TIME_FORMAT) {
        Ok(timestamp) => timestamp,
        Err(_) => {
            debug!("Skipping entry with invalid timestamp: {}", entry.timestamp);
            return false;
        }
    };

    if timestamp < start || timestamp > end {
        return false;
    }

    let seconds = timestamp.and_utc().timestamp();
    for sensor_value in entry.sensors {
        let sensor: ArchivedSensor = match serde_json::from_value(sensor_value) {
            Ok(sensor) => sensor,
            Err(err) => {
                debug!("Skipping sensor sample with invalid structure: {}", err);
                continue;
            }
        };
        if !sensor.value.is_finite() || !limits.in_range(sensor.kind, sensor.value) {
            debug!(
                "Skipping out-of-range {} value: {}",
                sensor.kind, sensor.value
            );
            continue;
        }
        raw.push(
            sensor.kind,
            sensor.sensor_id,
            RawPoint {
                timestamp: seconds,
                value: sensor.value,
            },
        );
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn window() -> (NaiveDateTime, NaiveDateTime) {
        let start = NaiveDateTime::parse_from_str("2025-03-14 00:00:00", TIME_FORMAT).unwrap();
        let end = NaiveDateTime::parse_from_str("2025-03-14 23:59:59", TIME_FORMAT).unwrap();
        (start, end)
    }

    #[test]
    fn in_window_entries_are_kept() {
        let (start, end) = window();
        let mut raw = RawHistory::default();
        let entry = json!({
            "timestamp": "2025-03-14 12:00:00",
            "sensors": [
                {"sensorId": "section_1.temperature_1", "type": "temperature", "value": -18.5},
                {"sensorId": "section_1.humidity_1", "type": "humidity", "value": 85.0}
            ]
        });
        assert!(consume_entry(entry, start, end, &LimitsConfig::default(), &mut raw));
        assert_eq!(raw.temperature["section_1.temperature_1"].len(), 1);
        assert_eq!(raw.humidity["section_1.humidity_1"].len(), 1);
    }

    #[test]
    fn out_of_window_entries_are_dropped() {
        let (start, end) = window();
        let mut raw = RawHistory::default();
        let entry = json!({
            "timestamp": "2025-03-15 00:00:01",
            "sensors": [{"sensorId": "s", "type": "temperature", "value": 1.0}]
        });
        assert!(!consume_entry(entry, start, end, &LimitsConfig::default(), &mut raw));
        assert!(raw.is_empty());
    }

    #[test]
    fn malformed_sensors_are_skipped_without_losing_the_entry() {
        let (start, end) = window();
        let mut raw = RawHistory::default();
        let entry = json!({
            "timestamp": "2025-03-14 12:00:00",
            "sensors": [
                {"sensorId": "good", "type": "temperature", "value": 4.0},
                {"type": "temperature", "value": 4.0},
                {"sensorId": "bad_kind", "type": "pressure", "value": 4.0},
                {"sensorId": "bad_value", "type": "temperature", "value": null}
            ]
        });
        assert!(consume_entry(entry, start, end, &LimitsConfig::default(), &mut raw));
        assert_eq!(raw.temperature.len(), 1);
        assert!(raw.temperature.contains_key("good"));
    }

    #[test]
    fn out_of_range_values_are_skipped() {
        let (start, end) = window();
        let mut raw = RawHistory::default();
        let entry = json!({
            "timestamp": "2025-03-14 12:00:00",
            "sensors": [
                {"sensorId": "cold", "type": "temperature", "value": -80.0},
                {"sensorId": "wet", "type": "humidity", "value": 120.0}
            ]
        });
        assert!(consume_entry(entry, start, end, &LimitsConfig::default(), &mut raw));
        assert!(raw.is_empty());
    }
}
