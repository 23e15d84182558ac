// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register grouping.
//!
//! A device's sensors rarely sit on consecutive registers. Reading them one
//! by one costs a protocol round-trip each; reading the full span in one
//! request wastes bandwidth when the registers are far apart. The grouper
//! batches sensors sharing a unit address into the fewest contiguous spans,
//! bridging gaps of up to [`MAX_REGISTER_GAP`] registers and splitting on
//! anything larger. Groups are recomputed every cycle and never persisted.

use std::collections::BTreeMap;

use log::debug;

use crate::config::SensorConfig;

/// Largest register gap bridged within one read span.
pub const MAX_REGISTER_GAP: u16 = 10;

/// A contiguous register span read in a single request.
#[derive(Debug, Clone)]
pub struct RegisterGroup {
    /// Modbus unit (slave) address shared by the member sensors.
    pub address: u8,
    pub start_register: u16,
    pub end_register: u16,
    pub sensors: Vec<SensorConfig>,
}

impl RegisterGroup {
    /// Number of registers covered by the span.
    pub fn register_count(&self) -> u16 {
        self.end_register - self.start_register + 1
    }

    /// Byte offset of a member sensor inside the span's response.
    pub fn offset_of(&self, sensor: &SensorConfig) -> usize {
        (sensor.register - self.start_register) as usize
    }
}

/// Batch a device's sensors into minimal contiguous register spans.
pub fn group_sensors(sensors: &[SensorConfig]) -> Vec<RegisterGroup> {
    // BTreeMap keeps the per-address iteration order deterministic.
    let mut by_address: BTreeMap<u8, Vec<&SensorConfig>> = BTreeMap::new();
    for sensor in sensors {
        by_address.entry(sensor.address).or_default().push(sensor);
    }

    let mut groups = Vec::new();

    for (address, mut address_sensors) in by_address {
        address_sensors.sort_by_key(|s| s.register);

        let mut current: Option<RegisterGroup> = None;
        for sensor in address_sensors {
            // Saturating: a span can never extend past the register space.
            let sensor_end = sensor
                .register
                .saturating_add(sensor.length.saturating_sub(1));

            match current.as_mut() {
                Some(group)
                    if (sensor.register as u32)
                        <= group.end_register as u32 + MAX_REGISTER_GAP as u32 =>
                {
                    group.end_register = group.end_register.max(sensor_end);
                    group.sensors.push(sensor.clone());
                }
                _ => {
                    if let Some(done) = current.take() {
                        groups.push(done);
                    }
                    current = Some(RegisterGroup {
                        address,
                        start_register: sensor.register,
                        end_register: sensor_end,
                        sensors: vec![sensor.clone()],
                    });
                }
            }
        }
        if let Some(done) = current.take() {
            groups.push(done);
        }
    }

    for group in &groups {
        debug!(
            "Register group: address={}, registers {}-{}, {} sensor(s)",
            group.address,
            group.start_register,
            group.end_register,
            group.sensors.len()
        );
    }

    groups
}
