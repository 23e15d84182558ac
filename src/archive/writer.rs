// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Archive writer.
//!
//! Runs on a fixed timer: snapshots the reading store, keeps only `ok`
//! readings and appends one entry to the current daily file. Appending is
//! read-modify-rewrite of the whole array, which keeps daily files plain
//! JSON readable by anything. A reentrancy guard turns an overlapping tick
//! into a no-op instead of a queued retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info, warn};

use crate::archive::{daily_file_name, ArchiveEntry, ArchiveGeneration, ArchivedSensor};
use crate::config::{Config, SensorKind};
use crate::state::ReadingStore;

pub struct ArchiveWriter {
    config: Arc<Config>,
    generation: Arc<ArchiveGeneration>,
    saving: AtomicBool,
}

impl ArchiveWriter {
    pub fn new(config: Arc<Config>, generation: Arc<ArchiveGeneration>) -> Self {
        Self {
            config,
            generation,
            saving: AtomicBool::new(false),
        }
    }

    /// Append the current valid readings to today's daily file.
    ///
    /// With zero valid sensors nothing is written and no invalidation is
    /// signalled.
    pub async fn archive_current(&self, store: &ReadingStore) -> Result<()> {
        if self
            .saving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Archive save already running, skipping this tick");
            return Ok(());
        }

        let result = self.archive_inner(store).await;
        self.saving.store(false, Ordering::SeqCst);
        result
    }

    async fn archive_inner(&self, store: &ReadingStore) -> Result<()> {
        let readings = store.snapshot();
        if readings.is_empty() {
            return Ok(());
        }

        let sensors: Vec<ArchivedSensor> = readings
            .iter()
            .filter(|reading| reading.is_ok())
            .filter_map(|reading| {
                let mut value = reading.value?;
                // A humidity probe can report slightly negative values near
                // zero; clamp rather than drop them.
                if reading.kind == SensorKind::Humidity && value < 0.0 {
                    value = 0.0;
                }
                Some(ArchivedSensor {
                    sensor_id: reading.id.clone(),
                    kind: reading.kind,
                    value: self.config.limits.round(value),
                })
            })
            .collect();

        if sensors.is_empty() {
            debug!("No valid sensors to archive, skipping tick");
            return Ok(());
        }

        let dir = &self.config.archive.dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create archive directory {:?}", dir))?;

        let now = Local::now().naive_local();
        let filename = daily_file_name(now.date());
        let filepath = dir.join(&filename);

        let mut entries: Vec<ArchiveEntry> = match tokio::fs::read_to_string(&filepath).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Daily file {} was unreadable, starting fresh: {}", filename, err);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let entry = ArchiveEntry {
            timestamp: now,
            sensors,
        };
        let sensor_count = entry.sensors.len();
        entries.push(entry);

        let json = serde_json::to_string_pretty(&entries)
            .context("Failed to serialize archive entries")?;
        tokio::fs::write(&filepath, json)
            .await
            .with_context(|| format!("Failed to write daily file {:?}", filepath))?;

        info!("Archived: {} ({} sensors)", filename, sensor_count);
        self.generation.bump();

        Ok(())
    }
}
