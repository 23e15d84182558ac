// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Time-bucketed max aggregation.
//!
//! Raw points are reduced into fixed buckets (`floor(t / interval) *
//! interval`) keeping the maximum value per bucket. Detail views get one
//! series per sensor; overviews combine all sensors of a section before
//! bucketing. Empty buckets are omitted and output is ascending by bucket
//! time, which makes the aggregation idempotent over its own output.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use crate::archive::{timefmt, RawHistory, RawPoint};
use crate::config::{Config, LimitsConfig, SensorKind};

/// One aggregated bucket.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeriesPoint {
    #[serde(with = "timefmt")]
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// One plotted line: a sensor (detail view) or a whole section (overview).
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub id: String,
    pub name: String,
    #[serde(rename = "sectionId")]
    pub section_id: String,
    pub points: Vec<SeriesPoint>,
}

/// All series of one scope, split by kind.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesBundle {
    pub temperature: Vec<Series>,
    pub humidity: Vec<Series>,
}

impl SeriesBundle {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty() && self.humidity.is_empty()
    }
}

/// Reduce raw points into max-per-bucket series points.
pub fn aggregate_max(
    points: &[RawPoint],
    interval_secs: i64,
    limits: &LimitsConfig,
) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for point in points {
        let bucket = point.timestamp - point.timestamp.rem_euclid(interval_secs);
        buckets
            .entry(bucket)
            .and_modify(|max| *max = max.max(point.value))
            .or_insert(point.value);
    }

    buckets
        .into_iter()
        .filter_map(|(bucket, value)| {
            let timestamp = DateTime::from_timestamp(bucket, 0)?.naive_utc();
            Some(SeriesPoint {
                timestamp,
                value: limits.round(value),
            })
        })
        .collect()
}

/// One series per sensor, for section detail views.
///
/// Sensors absent from the current configuration (renamed sections, retired
/// probes) still chart under their archived id.
pub fn sensor_series(raw: &RawHistory, kind: SensorKind, config: &Config) -> Vec<Series> {
    let index = config.sensor_index();
    let interval = config.history.aggregation_interval_secs_i64();

    let mut series: Vec<Series> = raw
        .by_kind(kind)
        .iter()
        .map(|(sensor_id, points)| {
            let (name, section_id) = match index.get(sensor_id.as_str()) {
                Some((section, sensor)) => (
                    sensor
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{} ({})", sensor.kind, section.name)),
                    section.id.clone(),
                ),
                None => (sensor_id.clone(), section_prefix(sensor_id).to_string()),
            };
            Series {
                id: sensor_id.clone(),
                name,
                section_id,
                points: aggregate_max(points, interval, &config.limits),
            }
        })
        .collect();

    series.sort_by(|a, b| a.id.cmp(&b.id));
    series
}

/// One combined series per section, for the overview.
///
/// All points of a section's sensors are merged before bucketing, so the
/// section line shows the worst (warmest / wettest) probe per bucket.
pub fn section_series(raw: &RawHistory, kind: SensorKind, config: &Config) -> Vec<Series> {
    let interval = config.history.aggregation_interval_secs_i64();

    let mut combined: BTreeMap<String, Vec<RawPoint>> = BTreeMap::new();
    for (sensor_id, points) in raw.by_kind(kind) {
        combined
            .entry(section_prefix(sensor_id).to_string())
            .or_default()
            .extend(points.iter().copied());
    }

    combined
        .into_iter()
        .map(|(section_id, points)| {
            let name = config
                .section(&section_id)
                .map(|section| section.name.clone())
                .unwrap_or_else(|| section_id.clone());
            Series {
                id: section_id.clone(),
                name,
                section_id,
                points: aggregate_max(&points, interval, &config.limits),
            }
        })
        .collect()
}

/// Section part of a `<section id>.<type>_<n>` sensor id.
fn section_prefix(sensor_id: &str) -> &str {
    sensor_id.split('.').next().unwrap_or(sensor_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: i64, value: f64) -> RawPoint {
        RawPoint { timestamp, value }
    }

    #[test]
    fn buckets_keep_the_maximum() {
        let points = vec![
            point(0, 1.0),
            point(60, 3.5),
            point(299, 2.0),
            point(300, -4.0),
        ];
        let series = aggregate_max(&points, 300, &LimitsConfig::default());
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, 3.5);
        assert_eq!(series[1].value, -4.0);
    }

    #[test]
    fn buckets_are_ascending_and_sparse() {
        let points = vec![point(3000, 1.0), point(0, 2.0)];
        let series = aggregate_max(&points, 300, &LimitsConfig::default());
        assert_eq!(series.len(), 2);
        assert!(series[0].timestamp < series[1].timestamp);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let points = vec![point(10, 1.25), point(20, 7.5), point(400, 3.0)];
        let limits = LimitsConfig::default();
        let once = aggregate_max(&points, 300, &limits);
        let reinput: Vec<RawPoint> = once
            .iter()
            .map(|p| point(p.timestamp.and_utc().timestamp(), p.value))
            .collect();
        let twice = aggregate_max(&reinput, 300, &limits);
        assert_eq!(once, twice);
    }

    #[test]
    fn section_prefix_is_taken_from_the_sensor_id() {
        assert_eq!(section_prefix("section_3.temperature_2"), "section_3");
        assert_eq!(section_prefix("plain"), "plain");
    }
}
