// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Append-only daily archive.
//!
//! Persistence is one JSON array per calendar day (`YYYY-MM-DD.json`): the
//! writer appends one [`ArchiveEntry`] per tick, the compactor moves whole
//! days past the retention window into zipped cold storage, and the loader
//! reads windows of entries back for aggregation. Daily files are
//! append-only while hot and never mutated once compacted.

pub mod compactor;
pub mod loader;
pub mod writer;

pub use compactor::ArchiveCompactor;
pub use loader::{HistoryLoader, RawHistory, RawPoint};
pub use writer::ArchiveWriter;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::SensorKind;

/// Timestamp format used in archive entries and API payloads (local time).
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format used for daily file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One sensor sample inside an archive entry. Only validated `ok` readings
/// are ever written, so `value` is always present and finite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedSensor {
    #[serde(rename = "sensorId", alias = "sensor_id")]
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    pub value: f64,
}

/// One appended snapshot of all valid sensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    #[serde(with = "timefmt")]
    pub timestamp: chrono::NaiveDateTime,
    pub sensors: Vec<ArchivedSensor>,
}

/// Monotonic counter bumped after every successful archive append.
///
/// The history cache remembers the generation a result was computed under
/// and treats any advance as an invalidation, which gives the
/// "invalidation happens-before the next read" guarantee without an event
/// bus.
#[derive(Debug, Default)]
pub struct ArchiveGeneration(AtomicU64);

impl ArchiveGeneration {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }
}

/// File name of the daily archive for a date.
pub fn daily_file_name(date: NaiveDate) -> String {
    format!("{}.json", date.format(DATE_FORMAT))
}

/// Date encoded in a daily archive file name, if the name is well-formed.
pub fn parse_daily_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(".json")?;
    NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
}

/// Serde adapter for the `YYYY-MM-DD HH:mm:ss` local-time format.
pub mod timefmt {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, TIME_FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod opt {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        use super::TIME_FORMAT;

        pub fn serialize<S: Serializer>(
            value: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&value.format(TIME_FORMAT).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            match text {
                Some(text) => NaiveDateTime::parse_from_str(&text, TIME_FORMAT)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_file_names_round_trip() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let name = daily_file_name(date);
        assert_eq!(name, "2025-03-14.json");
        assert_eq!(parse_daily_file_name(&name), Some(date));
    }

    #[test]
    fn malformed_file_names_are_rejected() {
        assert_eq!(parse_daily_file_name("notes.txt"), None);
        assert_eq!(parse_daily_file_name("14-03-2025.json"), None);
        assert_eq!(parse_daily_file_name("2025-03-14.json.zip"), None);
    }

    #[test]
    fn entries_accept_legacy_sensor_id_field() {
        let json = r#"{
            "timestamp": "2025-03-14 12:00:00",
            "sensors": [{"sensor_id": "section_1.temperature_1", "type": "temperature", "value": -18.5}]
        }"#;
        let entry: ArchiveEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.sensors[0].sensor_id, "section_1.temperature_1");
    }
}
