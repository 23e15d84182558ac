// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! History query range, aggregation and cache settings.
//!
//! The query range is deliberately a configuration value rather than a
//! hard-coded behavior: deployments that only chart the last hour set
//! `range: 1h`, while long-horizon dashboards can select `24h`, `14d` or
//! `60d` without code changes.

use anyhow::{bail, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Query window, `<n>h` or `<n>d`.
    #[serde(default = "default_range")]
    pub range: String,

    /// Aggregation bucket width in seconds.
    #[serde(default = "default_aggregation_interval_secs")]
    pub aggregation_interval_secs: u64,

    /// Maximum number of cached history results.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Cache entry lifetime in seconds. Kept short because new points
    /// arrive every poll cycle.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// How long a last-known-good current snapshot may be served once all
    /// sensors are failing, in seconds.
    #[serde(default = "default_current_ttl_secs")]
    pub current_ttl_secs: u64,
}

fn default_range() -> String {
    "1h".to_string()
}

fn default_aggregation_interval_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    100
}

fn default_cache_ttl_secs() -> u64 {
    10
}

fn default_current_ttl_secs() -> u64 {
    15
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            range: default_range(),
            aggregation_interval_secs: default_aggregation_interval_secs(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            current_ttl_secs: default_current_ttl_secs(),
        }
    }
}

impl HistoryConfig {
    /// Parse the configured range string into a duration.
    pub fn range_duration(&self) -> Result<ChronoDuration> {
        parse_range(&self.range)
    }

    pub fn aggregation_interval_secs_i64(&self) -> i64 {
        self.aggregation_interval_secs as i64
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn current_ttl(&self) -> Duration {
        Duration::from_secs(self.current_ttl_secs)
    }
}

/// Parse `<n>h` / `<n>d` range expressions.
pub fn parse_range(range: &str) -> Result<ChronoDuration> {
    let (value, unit) = range.split_at(range.len().saturating_sub(1));
    let n: i64 = match value.parse() {
        Ok(n) if n > 0 => n,
        _ => bail!("invalid history range '{}'", range),
    };
    match unit {
        "h" => Ok(ChronoDuration::hours(n)),
        "d" => Ok(ChronoDuration::days(n)),
        _ => bail!("invalid history range unit '{}'", range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hour_and_day_ranges() {
        assert_eq!(parse_range("1h").unwrap(), ChronoDuration::hours(1));
        assert_eq!(parse_range("24h").unwrap(), ChronoDuration::hours(24));
        assert_eq!(parse_range("14d").unwrap(), ChronoDuration::days(14));
        assert_eq!(parse_range("60d").unwrap(), ChronoDuration::days(60));
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(parse_range("").is_err());
        assert!(parse_range("h").is_err());
        assert!(parse_range("-1h").is_err());
        assert!(parse_range("5m").is_err());
    }
}
