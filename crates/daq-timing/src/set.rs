//! One adjuster per sample stream.

use crate::adjuster::TimetagAdjuster;
use daq_core::config::TimetagConfig;
use daq_core::{DaqError, SampleId, TimeTag};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Adjusters keyed by [`SampleId`], created on first sight of each id.
#[derive(Debug, Clone)]
pub struct AdjusterSet {
    config: TimetagConfig,
    adjusters: HashMap<SampleId, TimetagAdjuster>,
}

impl AdjusterSet {
    /// Empty set sharing `config`, which is validated here.
    pub fn new(config: TimetagConfig) -> Result<Self, DaqError> {
        config.validate()?;
        Ok(Self {
            config,
            adjusters: HashMap::new(),
        })
    }

    /// Corrected time tag for a sample of stream `id`.
    pub fn adjust(&mut self, id: SampleId, tt: TimeTag) -> Result<TimeTag, DaqError> {
        let id = id.full_id();
        let adjuster = match self.adjusters.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(TimetagAdjuster::from_config(&self.config)?),
        };
        Ok(adjuster.adjust(tt))
    }

    /// The adjuster of stream `id`, if it has been seen.
    pub fn get(&self, id: SampleId) -> Option<&TimetagAdjuster> {
        self.adjusters.get(&id.full_id())
    }

    /// Streams seen.
    pub fn len(&self) -> usize {
        self.adjusters.len()
    }

    /// Whether no stream has been seen.
    pub fn is_empty(&self) -> bool {
        self.adjusters.is_empty()
    }

    /// Log every adjuster's counters, in id order.
    pub fn log_statistics(&self) {
        let mut ids: Vec<_> = self.adjusters.keys().copied().collect();
        ids.sort_by_key(|id| id.raw());
        for id in ids {
            if let Some(adjuster) = self.adjusters.get(&id) {
                adjuster.log_statistics(&id.to_string());
            }
        }
    }
}
