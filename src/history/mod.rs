// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Aggregated history views.
//!
//! [`HistoryService`] answers "what did the last range look like" queries:
//! it loads raw archive points for the configured range, aggregates them
//! into max-per-bucket series and caches the result per scope. The overview
//! scope charts one combined line per section; a section scope charts each
//! of its sensors.

pub mod aggregate;
pub mod cache;

pub use aggregate::{aggregate_max, Series, SeriesBundle, SeriesPoint};
pub use cache::HistoryCache;

use std::sync::{Arc, Mutex};

use chrono::Local;
use log::debug;
use thiserror::Error;

use crate::archive::{ArchiveGeneration, HistoryLoader, RawHistory};
use crate::config::{Config, SensorKind};

/// What a history query charts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryScope {
    /// One combined series per section.
    Overview,
    /// One series per sensor of the named section.
    Section(String),
}

impl HistoryScope {
    fn cache_key(&self) -> String {
        match self {
            HistoryScope::Overview => "all".to_string(),
            HistoryScope::Section(id) => id.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("unknown section: {0}")]
    UnknownSection(String),
    #[error(transparent)]
    Load(#[from] anyhow::Error),
}

pub struct HistoryService {
    config: Arc<Config>,
    generation: Arc<ArchiveGeneration>,
    loader: HistoryLoader,
    cache: Mutex<HistoryCache>,
}

impl HistoryService {
    pub fn new(config: Arc<Config>, generation: Arc<ArchiveGeneration>) -> Self {
        let cache = HistoryCache::new(
            config.history.cache_capacity,
            config.history.cache_ttl(),
        );
        Self {
            loader: HistoryLoader::new(config.clone()),
            config,
            generation,
            cache: Mutex::new(cache),
        }
    }

    /// Aggregated series for a scope over the configured range.
    ///
    /// Results are shared through the cache until their TTL runs out or the
    /// archive gains an entry.
    pub async fn history(&self, scope: HistoryScope) -> Result<Arc<SeriesBundle>, HistoryError> {
        if let HistoryScope::Section(id) = &scope {
            if self.config.section(id).is_none() {
                return Err(HistoryError::UnknownSection(id.clone()));
            }
        }

        let key = scope.cache_key();
        let generation = self.generation.current();
        if let Some(bundle) = self.cache.lock().unwrap().get(&key, generation) {
            debug!("History cache hit for scope '{}'", key);
            return Ok(bundle);
        }

        // Range errors are caught by Config::validate, but the range can be
        // overridden after load, so it stays a soft failure here.
        let range = self.config.history.range_duration()?;
        let end = Local::now().naive_local();
        let start = end - range;

        let raw = self.loader.load(start, end).await?;
        let bundle = Arc::new(self.build_bundle(&scope, &raw));

        self.cache
            .lock()
            .unwrap()
            .put(key, generation, bundle.clone());
        Ok(bundle)
    }

    fn build_bundle(&self, scope: &HistoryScope, raw: &RawHistory) -> SeriesBundle {
        match scope {
            HistoryScope::Overview => SeriesBundle {
                temperature: aggregate::section_series(raw, SensorKind::Temperature, &self.config),
                humidity: aggregate::section_series(raw, SensorKind::Humidity, &self.config),
            },
            HistoryScope::Section(id) => {
                let filter = |series: Vec<Series>| -> Vec<Series> {
                    series
                        .into_iter()
                        .filter(|series| series.section_id == *id)
                        .collect()
                };
                SeriesBundle {
                    temperature: filter(aggregate::sensor_series(
                        raw,
                        SensorKind::Temperature,
                        &self.config,
                    )),
                    humidity: filter(aggregate::sensor_series(
                        raw,
                        SensorKind::Humidity,
                        &self.config,
                    )),
                }
            }
        }
    }
}
