// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Archive directories, timers and retention.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding the hot daily JSON files.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Directory for compacted zip files. Defaults to `<dir>/OLD`.
    #[serde(default)]
    pub cold_dir: Option<PathBuf>,

    /// Interval between archive writer ticks, in milliseconds.
    #[serde(default = "default_write_interval_ms")]
    pub write_interval_ms: u64,

    /// Interval between compactor runs, in milliseconds.
    #[serde(default = "default_compact_interval_ms")]
    pub compact_interval_ms: u64,

    /// Daily files older than this many months are compacted.
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,

    /// Files larger than this are parsed with the streaming reader.
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold_bytes: u64,

    /// How long a computed disk usage figure stays cached, in milliseconds.
    #[serde(default = "default_disk_usage_cache_ms")]
    pub disk_usage_cache_ms: u64,
}

fn default_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_write_interval_ms() -> u64 {
    300_000
}

fn default_compact_interval_ms() -> u64 {
    3_600_000
}

fn default_retention_months() -> u32 {
    2
}

fn default_streaming_threshold() -> u64 {
    5 * 1024 * 1024
}

fn default_disk_usage_cache_ms() -> u64 {
    600_000
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            cold_dir: None,
            write_interval_ms: default_write_interval_ms(),
            compact_interval_ms: default_compact_interval_ms(),
            retention_months: default_retention_months(),
            streaming_threshold_bytes: default_streaming_threshold(),
            disk_usage_cache_ms: default_disk_usage_cache_ms(),
        }
    }
}

impl ArchiveConfig {
    /// Effective cold-storage directory.
    pub fn cold_dir(&self) -> PathBuf {
        match &self.cold_dir {
            Some(dir) => dir.clone(),
            None => self.dir.join("OLD"),
        }
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_millis(self.compact_interval_ms)
    }

    pub fn disk_usage_cache(&self) -> Duration {
        Duration::from_millis(self.disk_usage_cache_ms)
    }

    /// Override both directories, keeping `cold_dir` nested under `dir`
    /// unless it was set explicitly.
    pub fn set_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.dir = dir.as_ref().to_path_buf();
    }
}
