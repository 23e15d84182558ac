// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bounded retry with fixed backoff, shared by the connect and read paths.

use std::time::Duration;

use crate::config::PollingConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Policy for TCP connects.
    pub fn connect(polling: &PollingConfig) -> Self {
        Self::new(polling.connect_attempts, polling.retry_delay())
    }

    /// Policy for register reads. `read_retries` counts extra attempts, so
    /// the total is one more.
    pub fn read(polling: &PollingConfig) -> Self {
        Self::new(polling.read_retries + 1, polling.retry_delay())
    }

    /// Total attempts, never zero.
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Fixed delay between attempts.
    pub async fn backoff(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_policy_counts_the_first_attempt() {
        let polling = PollingConfig::default();
        assert_eq!(RetryPolicy::read(&polling).attempts(), polling.read_retries + 1);
        assert_eq!(RetryPolicy::connect(&polling).attempts(), polling.connect_attempts);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }
}
