// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rolling performance statistics, error counters and ledgers.
//!
//! Everything the observability endpoint serves comes from here: one
//! counter per fault kind, a one-hour rolling window of poll durations,
//! the stale-data ledger fed by the reading store, the active-client
//! ledger maintained by the HTTP layer, and cached archive disk usage.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use serde::Serialize;

use crate::archive::timefmt;
use crate::config::ArchiveConfig;
use crate::state::FaultKind;

/// Poll samples older than this fall out of the rolling window.
const POLL_WINDOW: Duration = Duration::from_secs(3600);

/// Clients silent for longer than this are dropped from the ledger.
pub const CLIENT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ErrorCounters {
    pub connection: u64,
    pub sensor: u64,
    pub timeout: u64,
    pub decode: u64,
}

#[derive(Debug, Clone)]
struct PollSample {
    at: Instant,
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PollStats {
    pub last_poll_duration_ms: f64,
    pub avg_poll_duration_ms: f64,
    pub last_hour_polls: usize,
    pub last_hour_failed_polls: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleEntry {
    #[serde(with = "timefmt")]
    pub first_occurrence: NaiveDateTime,
    pub count: u64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StaleData {
    /// Number of sensors currently flagged as stale.
    pub count: u64,
    #[serde(with = "timefmt::opt")]
    pub last_flagged: Option<NaiveDateTime>,
    pub affected_sensors: HashMap<String, StaleEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientEntry {
    pub ip: String,
    pub user_agent: String,
    #[serde(with = "timefmt")]
    pub last_seen: NaiveDateTime,
    pub last_path: String,
    pub request_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub archived_bytes: u64,
    pub active_bytes: u64,
}

/// Full snapshot handed to the observability endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub errors: ErrorCounters,
    pub performance: PollStats,
    #[serde(with = "timefmt::opt")]
    pub last_error_time: Option<NaiveDateTime>,
    pub stale_data: StaleData,
    pub active_clients: HashMap<String, ClientEntry>,
    pub disk_usage: DiskUsage,
}

#[derive(Default)]
struct MetricsInner {
    errors: ErrorCounters,
    last_error_time: Option<NaiveDateTime>,
    poll_history: Vec<PollSample>,
    last_poll_duration_ms: f64,
    stale: StaleData,
    clients: HashMap<String, ClientEntry>,
    disk_cache: Option<(DiskUsage, Instant)>,
}

/// Thread-safe metrics recorder shared across the process.
pub struct MetricsRecorder {
    inner: Mutex<MetricsInner>,
    measuring_disk: AtomicBool,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner::default()),
            measuring_disk: AtomicBool::new(false),
        }
    }

    /// Count a fault and remember when it happened.
    pub fn record_fault(&self, kind: FaultKind) {
        let mut inner = self.inner.lock().unwrap();
        match kind {
            FaultKind::Connection => inner.errors.connection += 1,
            FaultKind::Timeout => inner.errors.timeout += 1,
            FaultKind::Sensor => inner.errors.sensor += 1,
            FaultKind::Decode => inner.errors.decode += 1,
        }
        inner.last_error_time = Some(Local::now().naive_local());
    }

    /// Record a device poll duration into the rolling window.
    pub fn record_poll(&self, duration: Duration, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let duration_ms = duration.as_secs_f64() * 1000.0;
        inner.poll_history.push(PollSample {
            at: Instant::now(),
            duration_ms,
            success,
        });
        inner.poll_history.retain(|s| s.at.elapsed() < POLL_WINDOW);
        inner.last_poll_duration_ms = duration_ms;
    }

    /// Flag a sensor whose value repeated within the stale epsilon.
    pub fn flag_stale(&self, sensor_id: &str, value: f64, at: NaiveDateTime) {
        let mut inner = self.inner.lock().unwrap();
        inner.stale.last_flagged = Some(at);
        inner
            .stale
            .affected_sensors
            .entry(sensor_id.to_string())
            .and_modify(|entry| entry.count += 1)
            .or_insert(StaleEntry {
                first_occurrence: at,
                count: 1,
                value,
            });
        inner.stale.count = inner.stale.affected_sensors.len() as u64;
    }

    /// Remove a sensor from the stale ledger (fresh value, or no value at
    /// all).
    pub fn clear_stale(&self, sensor_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.stale.affected_sensors.remove(sensor_id);
        inner.stale.count = inner.stale.affected_sensors.len() as u64;
    }

    pub fn stale_entry(&self, sensor_id: &str) -> Option<StaleEntry> {
        let inner = self.inner.lock().unwrap();
        inner.stale.affected_sensors.get(sensor_id).cloned()
    }

    /// Register an API client sighting. Called by the HTTP layer.
    pub fn register_client(&self, client_id: &str, ip: &str, user_agent: &str, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        let now = Local::now().naive_local();
        inner
            .clients
            .entry(client_id.to_string())
            .and_modify(|entry| {
                entry.last_seen = now;
                entry.last_path = path.to_string();
                entry.request_count += 1;
            })
            .or_insert(ClientEntry {
                ip: ip.to_string(),
                user_agent: user_agent.to_string(),
                last_seen: now,
                last_path: path.to_string(),
                request_count: 1,
            });
    }

    /// Drop clients not seen within the inactivity timeout.
    pub fn cleanup_inactive_clients(&self, timeout: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let now = Local::now().naive_local();
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(6));
        inner.clients.retain(|client_id, entry| {
            let keep = now - entry.last_seen <= timeout;
            if !keep {
                debug!("Client {} dropped after inactivity", client_id);
            }
            keep
        });
    }

    /// Measure archive disk usage, with a cache and an in-flight guard.
    ///
    /// A concurrent caller gets the previous figure (possibly stale) rather
    /// than a second directory walk.
    pub async fn disk_usage(&self, archive: &ArchiveConfig) -> DiskUsage {
        {
            let inner = self.inner.lock().unwrap();
            if let Some((usage, at)) = inner.disk_cache {
                if at.elapsed() < archive.disk_usage_cache() {
                    debug!("Returning archive disk usage from cache");
                    return usage;
                }
            }
        }

        if self
            .measuring_disk
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Disk usage measurement already running, returning last figure");
            return self
                .inner
                .lock()
                .unwrap()
                .disk_cache
                .map(|(usage, _)| usage)
                .unwrap_or_default();
        }

        let active_bytes = dir_size(&archive.dir, Some("json")).await;
        let archived_bytes = dir_size(&archive.cold_dir(), None).await;
        let usage = DiskUsage {
            total_bytes: active_bytes + archived_bytes,
            archived_bytes,
            active_bytes,
        };

        let mut inner = self.inner.lock().unwrap();
        inner.disk_cache = Some((usage, Instant::now()));
        self.measuring_disk.store(false, Ordering::SeqCst);
        usage
    }

    /// Current snapshot for the observability endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut inner = self.inner.lock().unwrap();
        inner.poll_history.retain(|s| s.at.elapsed() < POLL_WINDOW);

        let polls = inner.poll_history.len();
        let failed = inner.poll_history.iter().filter(|s| !s.success).count();
        let avg = if polls > 0 {
            inner.poll_history.iter().map(|s| s.duration_ms).sum::<f64>() / polls as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            errors: inner.errors,
            performance: PollStats {
                last_poll_duration_ms: inner.last_poll_duration_ms,
                avg_poll_duration_ms: avg,
                last_hour_polls: polls,
                last_hour_failed_polls: failed,
            },
            last_error_time: inner.last_error_time,
            stale_data: inner.stale.clone(),
            active_clients: inner.clients.clone(),
            disk_usage: inner.disk_cache.map(|(usage, _)| usage).unwrap_or_default(),
        }
    }

    /// Reset all counters and ledgers.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MetricsInner::default();
        info!("Metrics reset");
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum of regular-file sizes in a directory, optionally filtered by
/// extension. A missing directory counts as empty.
async fn dir_size(dir: &Path, extension: Option<&str>) -> u64 {
    let mut total = 0u64;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Directory {:?} not readable: {}", dir, err);
            return 0;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(wanted) = extension {
            let matches = entry
                .path()
                .extension()
                .map(|ext| ext == wanted)
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        if let Ok(metadata) = entry.metadata().await {
            if metadata.is_file() {
                total += metadata.len();
            }
        }
    }

    total
}
