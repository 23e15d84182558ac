//! Coldwatch library
//!
//! This library provides the acquisition and archival pipeline for
//! cold-storage temperature and humidity monitoring: Modbus TCP polling,
//! a current-readings table, append-only daily archives with background
//! compaction, and cached history aggregation.

pub mod archive;
pub mod config;
pub mod daemon;
pub mod history;
pub mod metrics;
pub mod polling;
pub mod protocol;
pub mod state;
