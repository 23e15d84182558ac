// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sensor polling over Modbus TCP.
//!
//! One poller task walks the configured sections strictly in sequence, with
//! a settle delay between devices, so cycles never overlap and the field
//! bus only ever sees one client. Per device: connect with bounded retries,
//! read each register group with bounded retries, decode, feed the reading
//! store, always close the connection. A device that cannot be reached, or
//! that failed any of its register groups, gets all its sensors marked
//! offline once the connection is cleaned up.

pub mod retry;

pub use retry::RetryPolicy;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

use crate::config::SectionConfig;
use crate::protocol::{decode_registers, group_sensors, DecodeError, RegisterGroup};
use crate::state::{AppState, FaultKind};

/// Why a poll step failed. Mirrors the [`FaultKind`] taxonomy recorded in
/// metrics and readings.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("register read timed out")]
    Timeout,

    #[error("device error: {0}")]
    Sensor(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PollError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            PollError::Connection(_) => FaultKind::Connection,
            PollError::Timeout => FaultKind::Timeout,
            PollError::Sensor(_) => FaultKind::Sensor,
            PollError::Decode(_) => FaultKind::Decode,
        }
    }
}

pub struct Poller {
    state: Arc<AppState>,
    running: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(state: Arc<AppState>, running: Arc<AtomicBool>) -> Self {
        Self { state, running }
    }

    /// Poll forever at the configured interval until the stop flag drops.
    ///
    /// The interval is measured from the end of one cycle to the start of
    /// the next, so a slow cycle delays the next instead of overlapping it.
    pub async fn run(&self) {
        let interval = self.state.config.polling.interval();
        info!(
            "Polling {} section(s) every {}ms",
            self.state.config.sections.len(),
            self.state.config.polling.interval_ms
        );

        while self.running.load(Ordering::SeqCst) {
            self.poll_cycle().await;

            // Sleep the interval in slices so shutdown stays responsive.
            let mut slept = std::time::Duration::ZERO;
            while self.running.load(Ordering::SeqCst) && slept < interval {
                let slice = std::cmp::min(std::time::Duration::from_secs(1), interval - slept);
                tokio::time::sleep(slice).await;
                slept += slice;
            }
        }
        info!("Polling stopped");
    }

    /// One pass over every configured device.
    pub async fn poll_cycle(&self) {
        let delay = self.state.config.polling.inter_device_delay();

        for (index, section) in self.state.config.sections.iter().enumerate() {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if index > 0 {
                tokio::time::sleep(delay).await;
            }
            self.poll_device(section).await;
        }
    }

    /// Poll one device, recording the duration whatever the outcome.
    async fn poll_device(&self, section: &SectionConfig) {
        let started = Instant::now();
        let result = self.poll_device_inner(section).await;
        let success = matches!(&result, Ok(true));
        self.state.metrics.record_poll(started.elapsed(), success);

        match result {
            Ok(true) => {}
            // A partial read leaves the device in an untrusted state: the
            // whole section goes offline, not just the failed group.
            Ok(false) => {
                self.state.store.mark_section_offline(
                    section,
                    FaultKind::Connection,
                    &self.state.metrics,
                );
            }
            Err(err) => {
                warn!(
                    "{} ({}): {}",
                    section.name,
                    section.device.endpoint(),
                    err
                );
                self.state.metrics.record_fault(err.fault_kind());
                self.state
                    .store
                    .mark_section_offline(section, err.fault_kind(), &self.state.metrics);
            }
        }
    }

    /// Connect, read all groups, disconnect. `Ok(true)` when every group
    /// succeeded; `Ok(false)` when some group failed after a successful
    /// connect, `Err` on a device-level failure. In both failure cases the
    /// caller marks the whole section offline.
    async fn poll_device_inner(&self, section: &SectionConfig) -> Result<bool, PollError> {
        let endpoint: SocketAddr = section
            .device
            .endpoint()
            .parse()
            .map_err(|_| PollError::Connection(format!("invalid endpoint {}", section.device.endpoint())))?;

        let groups = group_sensors(&section.device.sensors);
        let Some(first) = groups.first() else {
            return Ok(true);
        };

        let mut ctx = self.connect(endpoint, Slave(first.address)).await?;
        let delay = self.state.config.polling.inter_device_delay();
        let mut all_ok = true;

        for (index, group) in groups.iter().enumerate() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if index > 0 {
                tokio::time::sleep(delay).await;
                ctx.set_slave(Slave(group.address));
            }

            match self.read_group(&mut ctx, group).await {
                Ok(registers) => self.apply_group(group, &registers),
                Err(err) => {
                    all_ok = false;
                    warn!(
                        "{}: group {}-{} failed: {}",
                        section.name, group.start_register, group.end_register, err
                    );
                    self.state.metrics.record_fault(err.fault_kind());
                    for sensor in &group.sensors {
                        self.state
                            .store
                            .mark_sensor_error(sensor, err.fault_kind(), &self.state.metrics);
                    }
                }
            }
        }

        if let Err(err) = ctx.disconnect().await {
            debug!("Disconnect from {} failed: {}", endpoint, err);
        }

        Ok(all_ok)
    }

    /// Open a TCP Modbus context with bounded retries and a per-attempt
    /// connect timeout.
    async fn connect(&self, endpoint: SocketAddr, slave: Slave) -> Result<Context, PollError> {
        let policy = RetryPolicy::connect(&self.state.config.polling);
        let connect_timeout = self.state.config.polling.connect_timeout();

        let mut last = PollError::Connection(format!("no attempt made for {}", endpoint));
        for attempt in 1..=policy.attempts() {
            debug!(
                "Connect attempt {}/{} to {}",
                attempt,
                policy.attempts(),
                endpoint
            );
            match timeout(connect_timeout, tcp::connect_slave(endpoint, slave)).await {
                Ok(Ok(ctx)) => return Ok(ctx),
                Ok(Err(err)) => last = PollError::Connection(err.to_string()),
                Err(_) => {
                    last = PollError::Connection(format!("connect to {} timed out", endpoint))
                }
            }
            if attempt < policy.attempts() {
                policy.backoff().await;
            }
        }
        Err(last)
    }

    /// Read one register span with bounded retries. A timeout and a device
    /// error are recorded as different faults.
    async fn read_group(
        &self,
        ctx: &mut Context,
        group: &RegisterGroup,
    ) -> Result<Vec<u16>, PollError> {
        let policy = RetryPolicy::read(&self.state.config.polling);
        let read_timeout = self.state.config.polling.read_timeout();

        let mut last = PollError::Timeout;
        for attempt in 1..=policy.attempts() {
            let request = ctx.read_holding_registers(group.start_register, group.register_count());
            match timeout(read_timeout, request).await {
                Ok(Ok(Ok(registers))) => return Ok(registers),
                Ok(Ok(Err(exception))) => last = PollError::Sensor(exception.to_string()),
                Ok(Err(err)) => last = PollError::Sensor(err.to_string()),
                Err(_) => last = PollError::Timeout,
            }
            debug!(
                "Read attempt {}/{} for registers {}-{} failed: {}",
                attempt,
                policy.attempts(),
                group.start_register,
                group.end_register,
                last
            );
            if attempt < policy.attempts() {
                policy.backoff().await;
            }
        }
        Err(last)
    }

    /// Decode each member sensor out of a group response and feed the
    /// reading store. A decode failure only affects its own sensor.
    fn apply_group(&self, group: &RegisterGroup, registers: &[u16]) {
        for sensor in &group.sensors {
            let offset = group.offset_of(sensor);
            let slice = registers
                .get(offset..offset + sensor.length as usize)
                .unwrap_or(&[]);

            match decode_registers(slice) {
                Ok(value) => {
                    debug!("Sensor {}: {:.3}", sensor.id, value);
                    self.state
                        .store
                        .update(sensor, value as f64, &self.state.metrics);
                }
                Err(err) => {
                    warn!("Sensor {}: {}", sensor.id, err);
                    self.state.metrics.record_fault(FaultKind::Decode);
                    self.state
                        .store
                        .mark_sensor_error(sensor, FaultKind::Decode, &self.state.metrics);
                }
            }
        }
    }
}
