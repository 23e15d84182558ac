// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Polling loop timing and retry settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between the end of one full poll cycle and the start of the
    /// next, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// TCP connect timeout per attempt, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Holding-register read timeout per attempt, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Connect attempts before a device is declared unreachable.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Additional read attempts after the first failed one.
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// Fixed backoff between retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Settle delay between devices and between register groups, in
    /// milliseconds. Keeps the field bus stable.
    #[serde(default = "default_inter_device_delay_ms")]
    pub inter_device_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_connect_attempts() -> u32 {
    2
}

fn default_read_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_inter_device_delay_ms() -> u64 {
    500
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            read_retries: default_read_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            inter_device_delay_ms: default_inter_device_delay_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn inter_device_delay(&self) -> Duration {
        Duration::from_millis(self.inter_device_delay_ms)
    }
}
