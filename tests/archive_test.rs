// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Archive write/reload, compaction and history cache tests.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local};
use coldwatch::archive::{
    daily_file_name, ArchiveCompactor, ArchiveWriter, HistoryLoader,
};
use coldwatch::config::{Config, DeviceConfig, SectionConfig, SensorConfig, SensorKind};
use coldwatch::history::{HistoryScope, HistoryService};
use coldwatch::state::AppState;
use tempfile::TempDir;

fn sensor(kind: SensorKind, register: u16) -> SensorConfig {
    SensorConfig {
        id: String::new(),
        name: None,
        kind,
        register,
        length: 2,
        address: 2,
    }
}

/// One section with a temperature and a humidity probe, archiving into a
/// temp directory.
fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        sections: vec![SectionConfig {
            id: String::new(),
            name: "Cold room 1".to_string(),
            device: DeviceConfig {
                ip: "127.0.0.1".to_string(),
                port: 502,
                sensors: vec![
                    sensor(SensorKind::Temperature, 2250),
                    sensor(SensorKind::Humidity, 2200),
                ],
            },
        }],
        ..Config::default()
    };
    config.archive.set_dir(dir.path());
    config
}

fn test_state(dir: &TempDir) -> Arc<AppState> {
    state_from(test_config(dir))
}

fn state_from(mut config: Config) -> Arc<AppState> {
    config.assign_ids();
    config.validate().unwrap();
    AppState::new(config)
}

fn record(state: &AppState, temperature: f64, humidity: f64) {
    let sensors = &state.config.sections[0].device.sensors;
    state.store.update(&sensors[0], temperature, &state.metrics);
    state.store.update(&sensors[1], humidity, &state.metrics);
}

#[tokio::test]
async fn written_entries_reload_with_the_same_values() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

    record(&state, -18.456789, 85.2);
    writer.archive_current(&state.store).await.unwrap();

    record(&state, -17.9, 84.1);
    writer.archive_current(&state.store).await.unwrap();

    let loader = HistoryLoader::new(state.config.clone());
    let now = Local::now().naive_local();
    let raw = loader
        .load(now - ChronoDuration::hours(1), now + ChronoDuration::minutes(1))
        .await
        .unwrap();

    let temps = &raw.temperature["section_1.temperature_1"];
    let mut values: Vec<f64> = temps.iter().map(|p| p.value).collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![-18.457, -17.9]);

    let hums = &raw.humidity["section_1.humidity_1"];
    assert_eq!(hums.len(), 2);
}

#[tokio::test]
async fn large_files_reload_through_the_streaming_reader() {
    let dir = TempDir::new().unwrap();
    // A one-byte threshold forces every daily file down the streaming path.
    let mut config = test_config(&dir);
    config.archive.streaming_threshold_bytes = 1;
    let state = state_from(config);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

    record(&state, -18.5, 85.0);
    writer.archive_current(&state.store).await.unwrap();
    record(&state, -17.2, 84.0);
    writer.archive_current(&state.store).await.unwrap();

    let loader = HistoryLoader::new(state.config.clone());
    let now = Local::now().naive_local();
    let raw = loader
        .load(now - ChronoDuration::hours(1), now + ChronoDuration::minutes(1))
        .await
        .unwrap();

    let mut values: Vec<f64> = raw.temperature["section_1.temperature_1"]
        .iter()
        .map(|p| p.value)
        .collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![-18.5, -17.2]);
    assert_eq!(raw.humidity["section_1.humidity_1"].len(), 2);
}

#[tokio::test]
async fn negative_humidity_is_clamped_to_zero() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

    record(&state, -20.0, -0.3);
    writer.archive_current(&state.store).await.unwrap();

    let loader = HistoryLoader::new(state.config.clone());
    let now = Local::now().naive_local();
    let raw = loader
        .load(now - ChronoDuration::hours(1), now + ChronoDuration::minutes(1))
        .await
        .unwrap();

    assert_eq!(raw.humidity["section_1.humidity_1"][0].value, 0.0);
}

#[tokio::test]
async fn error_readings_are_never_archived() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

    // No valid readings at all: nothing written, no invalidation.
    writer.archive_current(&state.store).await.unwrap();
    assert_eq!(state.generation.current(), 0);
    assert!(!dir.path().join(daily_file_name(Local::now().date_naive())).exists());

    // One valid reading, one offline section later: only the valid value
    // lands in the file.
    record(&state, -18.0, 90.0);
    let section = &state.config.sections[0];
    state.store.mark_section_offline(
        section,
        coldwatch::state::FaultKind::Connection,
        &state.metrics,
    );
    writer.archive_current(&state.store).await.unwrap();
    assert_eq!(state.generation.current(), 0, "offline-only snapshot must not write");
}

#[tokio::test]
async fn unreadable_daily_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

    let path = dir.path().join(daily_file_name(Local::now().date_naive()));
    std::fs::write(&path, "not json at all").unwrap();

    record(&state, -18.0, 85.0);
    writer.archive_current(&state.store).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let entries: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn old_daily_files_move_to_cold_storage() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let old = dir.path().join("2024-01-01.json");
    std::fs::write(&old, "[]").unwrap();
    let fresh = dir.path().join(daily_file_name(Local::now().date_naive()));
    std::fs::write(&fresh, "[]").unwrap();

    let compactor = ArchiveCompactor::new(state.config.clone());
    compactor.compact().await.unwrap();

    assert!(!old.exists(), "old file should be gone from hot storage");
    assert!(dir.path().join("OLD").join("2024-01-01.json.zip").exists());
    assert!(fresh.exists(), "recent file must stay hot");
}

#[tokio::test]
async fn disk_usage_counts_hot_and_cold_bytes() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

    record(&state, -18.5, 85.0);
    writer.archive_current(&state.store).await.unwrap();

    let old = dir.path().join("2024-01-01.json");
    std::fs::write(&old, "[]").unwrap();
    let compactor = ArchiveCompactor::new(state.config.clone());
    compactor.compact().await.unwrap();

    let usage = state.metrics.disk_usage(&state.config.archive).await;
    assert!(usage.active_bytes > 0, "daily file should count as hot");
    assert!(usage.archived_bytes > 0, "zip should count as cold");
    assert_eq!(usage.total_bytes, usage.active_bytes + usage.archived_bytes);

    // Second call inside the cache window returns the same figure.
    let cached = state.metrics.disk_usage(&state.config.archive).await;
    assert_eq!(cached.total_bytes, usage.total_bytes);
}

#[tokio::test]
async fn history_is_aggregated_and_cached() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());
    let service = HistoryService::new(state.config.clone(), state.generation.clone());

    record(&state, -18.5, 85.0);
    writer.archive_current(&state.store).await.unwrap();

    let overview = service.history(HistoryScope::Overview).await.unwrap();
    assert_eq!(overview.temperature.len(), 1);
    assert_eq!(overview.temperature[0].id, "section_1");
    assert_eq!(overview.temperature[0].points.len(), 1);
    assert_eq!(overview.temperature[0].points[0].value, -18.5);

    // Second identical query is served from the cache.
    let again = service.history(HistoryScope::Overview).await.unwrap();
    assert!(Arc::ptr_eq(&overview, &again));

    // A new archive entry advances the generation and forces a reload.
    record(&state, -10.0, 85.0);
    writer.archive_current(&state.store).await.unwrap();
    let reloaded = service.history(HistoryScope::Overview).await.unwrap();
    assert!(!Arc::ptr_eq(&overview, &reloaded));
    // Max aggregation: the warmer value wins the shared bucket when both
    // fall inside one interval, and either way the series has data.
    assert!(!reloaded.temperature[0].points.is_empty());
    let max = reloaded.temperature[0]
        .points
        .iter()
        .map(|p| p.value)
        .fold(f64::MIN, f64::max);
    assert_eq!(max, -10.0);
}

#[tokio::test]
async fn section_scope_charts_individual_sensors() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());
    let service = HistoryService::new(state.config.clone(), state.generation.clone());

    record(&state, -18.5, 85.0);
    writer.archive_current(&state.store).await.unwrap();

    let detail = service
        .history(HistoryScope::Section("section_1".to_string()))
        .await
        .unwrap();
    assert_eq!(detail.temperature.len(), 1);
    assert_eq!(detail.temperature[0].id, "section_1.temperature_1");
    assert_eq!(detail.humidity[0].id, "section_1.humidity_1");

    let unknown = service
        .history(HistoryScope::Section("section_99".to_string()))
        .await;
    assert!(unknown.is_err());
}
