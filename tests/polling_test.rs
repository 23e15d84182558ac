// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end polling test against an in-process Modbus TCP server.
//!
//! The server simulates a cold-room device exposing a temperature probe at
//! register 2250 and a humidity probe at register 2200, each as an f32 over
//! two holding registers.

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use coldwatch::config::{Config, DeviceConfig, SectionConfig, SensorConfig, SensorKind};
use coldwatch::polling::Poller;
use coldwatch::protocol::encode_registers;
use coldwatch::state::{AppState, FaultKind, ReadingStatus};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

/// Simulated cold-room device backed by a holding-register map.
struct FreezerSimulator {
    holding_registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl FreezerSimulator {
    fn new() -> Self {
        let mut registers = HashMap::new();
        let temperature = encode_registers(-18.5);
        registers.insert(2250, temperature[0]);
        registers.insert(2251, temperature[1]);
        let humidity = encode_registers(85.0);
        registers.insert(2200, humidity[0]);
        registers.insert(2201, humidity[1]);
        Self {
            holding_registers: Arc::new(Mutex::new(registers)),
        }
    }

    /// A device whose temperature registers stopped answering: only the
    /// humidity pair at 2200-2201 is mapped.
    fn humidity_only() -> Self {
        let mut registers = HashMap::new();
        let humidity = encode_registers(85.0);
        registers.insert(2200, humidity[0]);
        registers.insert(2201, humidity[1]);
        Self {
            holding_registers: Arc::new(Mutex::new(registers)),
        }
    }
}

fn register_read(
    registers: &HashMap<u16, u16>,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    let mut response = Vec::with_capacity(cnt as usize);
    for i in 0..cnt {
        match registers.get(&(addr + i)) {
            Some(value) => response.push(*value),
            None => return Err(ExceptionCode::IllegalDataAddress),
        }
    }
    Ok(response)
}

impl tokio_modbus::server::Service for FreezerSimulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                register_read(&self.holding_registers.lock().unwrap(), addr, cnt)
                    .map(Response::ReadHoldingRegisters)
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(res)
    }
}

/// Bind a simulator on an ephemeral port and serve until aborted.
async fn start_simulator() -> (SocketAddr, JoinHandle<()>) {
    start_simulator_with(FreezerSimulator::new).await
}

async fn start_simulator_with(make: fn() -> FreezerSimulator) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(listener);

    let handle = tokio::spawn(async move {
        let on_connected = move |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| Ok(Some(make())))
        };
        let on_process_error = |err| {
            eprintln!("Simulator error: {err}");
        };
        let _ = server.serve(&on_connected, on_process_error).await;
    });

    (addr, handle)
}

/// One section pointing at the simulator, with fast test timings.
fn test_state(addr: SocketAddr) -> Arc<AppState> {
    let mut config = Config {
        sections: vec![SectionConfig {
            id: String::new(),
            name: "Cold room 1".to_string(),
            device: DeviceConfig {
                ip: addr.ip().to_string(),
                port: addr.port(),
                sensors: vec![
                    SensorConfig {
                        id: String::new(),
                        name: None,
                        kind: SensorKind::Temperature,
                        register: 2250,
                        length: 2,
                        address: 2,
                    },
                    SensorConfig {
                        id: String::new(),
                        name: None,
                        kind: SensorKind::Humidity,
                        register: 2200,
                        length: 2,
                        address: 2,
                    },
                ],
            },
        }],
        ..Config::default()
    };
    config.polling.connect_timeout_ms = 500;
    config.polling.read_timeout_ms = 500;
    config.polling.retry_delay_ms = 10;
    config.polling.inter_device_delay_ms = 1;
    config.assign_ids();
    config.validate().unwrap();
    AppState::new(config)
}

#[tokio::test]
async fn poll_cycle_reads_both_sensors() {
    let (addr, server) = start_simulator().await;
    let state = test_state(addr);
    let running = Arc::new(AtomicBool::new(true));
    let poller = Poller::new(state.clone(), running);

    poller.poll_cycle().await;

    let temperature = state.store.get("section_1.temperature_1").unwrap();
    assert_eq!(temperature.status, ReadingStatus::Ok);
    assert_eq!(temperature.value, Some(-18.5));

    let humidity = state.store.get("section_1.humidity_1").unwrap();
    assert_eq!(humidity.status, ReadingStatus::Ok);
    assert_eq!(humidity.value, Some(85.0));

    let view = state.store.current_view().unwrap();
    assert_eq!(view.temperature.len(), 1);
    assert_eq!(view.humidity.len(), 1);
    assert!(!view.stale);

    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.performance.last_hour_polls, 1);
    assert_eq!(snapshot.performance.last_hour_failed_polls, 0);

    server.abort();
}

#[tokio::test]
async fn unreachable_device_marks_the_section_offline() {
    let (addr, server) = start_simulator().await;
    let state = test_state(addr);
    let running = Arc::new(AtomicBool::new(true));
    let poller = Poller::new(state.clone(), running);

    poller.poll_cycle().await;
    assert_eq!(
        state.store.get("section_1.temperature_1").unwrap().status,
        ReadingStatus::Ok
    );
    // Take a live view so the store remembers a last-known-good snapshot.
    assert!(!state.store.current_view().unwrap().stale);

    // Kill the device and poll again.
    server.abort();
    let _ = server.await;

    poller.poll_cycle().await;

    for sensor_id in ["section_1.temperature_1", "section_1.humidity_1"] {
        let reading = state.store.get(sensor_id).unwrap();
        assert_eq!(reading.status, ReadingStatus::Offline);
        assert_eq!(reading.error_kind, Some(FaultKind::Connection));
        assert_eq!(reading.value, None);
    }

    let snapshot = state.metrics.snapshot();
    assert!(snapshot.errors.connection >= 1);
    assert_eq!(snapshot.performance.last_hour_failed_polls, 1);

    // The last good snapshot is still served, marked stale.
    let view = state.store.current_view().unwrap();
    assert!(view.stale);
    assert_eq!(view.temperature[0].value, Some(-18.5));
}

#[tokio::test]
async fn failed_group_takes_the_whole_section_offline() {
    // Registers 2200-2201 answer, the temperature span at 2250 does not,
    // so the device has one good group and one failing group.
    let (addr, server) = start_simulator_with(FreezerSimulator::humidity_only).await;
    let state = test_state(addr);
    let running = Arc::new(AtomicBool::new(true));
    let poller = Poller::new(state.clone(), running);

    poller.poll_cycle().await;

    // The humidity read succeeded mid-cycle, but a device that failed any
    // group is untrusted as a whole: both sensors end up offline.
    for sensor_id in ["section_1.temperature_1", "section_1.humidity_1"] {
        let reading = state.store.get(sensor_id).unwrap();
        assert_eq!(reading.status, ReadingStatus::Offline, "{sensor_id}");
        assert_eq!(reading.error_kind, Some(FaultKind::Connection));
        assert_eq!(reading.value, None);
    }

    let snapshot = state.metrics.snapshot();
    assert!(snapshot.errors.sensor >= 1);
    assert_eq!(snapshot.performance.last_hour_failed_polls, 1);

    server.abort();
}

#[tokio::test]
async fn repeated_identical_values_feed_the_stale_ledger() {
    let (addr, server) = start_simulator().await;
    let state = test_state(addr);
    let running = Arc::new(AtomicBool::new(true));
    let poller = Poller::new(state.clone(), running);

    poller.poll_cycle().await;
    assert!(
        state.metrics.stale_entry("section_1.temperature_1").is_none(),
        "first reading must never be flagged"
    );

    poller.poll_cycle().await;
    let entry = state
        .metrics
        .stale_entry("section_1.temperature_1")
        .unwrap();
    assert_eq!(entry.count, 1);
    assert_eq!(entry.value, -18.5);

    server.abort();
}
