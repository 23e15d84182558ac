// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Archive compactor.
//!
//! Moves daily files past the retention window into cold storage: each
//! file is zipped individually (the zip contains exactly that file under
//! its original name) and the hot original is deleted only after the zip
//! succeeded, so a mid-run failure leaves the hot copy intact. Files are
//! processed three at a time; a reentrancy guard prevents overlapping
//! runs.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Months, NaiveDate};
use log::{error, info, warn};
use tokio::task::JoinSet;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::parse_daily_file_name;
use crate::config::Config;

/// Daily files compacted concurrently per batch.
const CONCURRENT_LIMIT: usize = 3;

pub struct ArchiveCompactor {
    config: Arc<Config>,
    compacting: AtomicBool,
}

impl ArchiveCompactor {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            compacting: AtomicBool::new(false),
        }
    }

    /// Compact every daily file older than the retention threshold.
    pub async fn compact(&self) -> Result<()> {
        if self
            .compacting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Archive compaction already running, skipping this tick");
            return Ok(());
        }

        let result = self.compact_inner().await;
        self.compacting.store(false, Ordering::SeqCst);
        result
    }

    async fn compact_inner(&self) -> Result<()> {
        let cutoff = retention_cutoff(self.config.archive.retention_months);
        let old_files = self.list_files_older_than(cutoff).await?;
        if old_files.is_empty() {
            return Ok(());
        }

        let cold_dir = self.config.archive.cold_dir();
        tokio::fs::create_dir_all(&cold_dir)
            .await
            .with_context(|| format!("Failed to create cold storage directory {:?}", cold_dir))?;

        info!("Compacting {} old daily file(s)", old_files.len());

        for batch in old_files.chunks(CONCURRENT_LIMIT) {
            let mut tasks = JoinSet::new();
            for name in batch {
                let name = name.clone();
                let source = self.config.archive.dir.join(&name);
                let target = cold_dir.join(format!("{}.zip", name));
                tasks.spawn_blocking(move || compact_one(&name, &source, &target));
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(name)) => info!("Compacted daily file: {}", name),
                    Ok(Err(err)) => error!("Compaction failed: {:#}", err),
                    Err(err) => error!("Compaction task panicked: {}", err),
                }
            }
        }

        info!("Finished compacting {} old daily file(s)", old_files.len());
        Ok(())
    }

    async fn list_files_older_than(&self, cutoff: NaiveDate) -> Result<Vec<String>> {
        let dir = &self.config.archive.dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut old_files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list archive directory {:?}", dir))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(date) = parse_daily_file_name(&name) {
                if date < cutoff {
                    old_files.push(name);
                }
            }
        }
        old_files.sort();
        Ok(old_files)
    }
}

/// First day still kept hot.
fn retention_cutoff(retention_months: u32) -> NaiveDate {
    let today = Local::now().date_naive();
    today
        .checked_sub_months(Months::new(retention_months))
        .unwrap_or(today)
}

/// Zip one daily file into cold storage, then delete the hot original.
fn compact_one(name: &str, source: &PathBuf, target: &PathBuf) -> Result<String> {
    let data = std::fs::read(source)
        .with_context(|| format!("Failed to read daily file {:?}", source))?;

    let file = std::fs::File::create(target)
        .with_context(|| format!("Failed to create zip file {:?}", target))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(6));
    zip.start_file(name, options)
        .with_context(|| format!("Failed to start zip entry for {}", name))?;
    zip.write_all(&data)
        .with_context(|| format!("Failed to write zip entry for {}", name))?;
    zip.finish()
        .with_context(|| format!("Failed to finish zip file {:?}", target))?;

    // The hot copy goes away only once the zip is complete on disk.
    std::fs::remove_file(source)
        .with_context(|| format!("Failed to remove hot daily file {:?}", source))?;

    Ok(name.to_string())
}
