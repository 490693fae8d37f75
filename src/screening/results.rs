// ResultsStore: ordered threshold measurements of one exam

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ear::{Ear, EarFrequencyMap};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMeasurement {
    pub ear: Ear,
    pub frequency_hz: u32,
    pub level_db_hl: f64,
}

#[derive(Debug, Default)]
struct ResultsInner {
    rows: Vec<ThresholdMeasurement>,
    notes: String,
}

/// Shared, cloneable handle; clones see the same list
#[derive(Debug, Clone, Default)]
pub struct ResultsStore {
    inner: Arc<Mutex<ResultsInner>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResultsInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, ear: Ear, frequency_hz: u32, level_db_hl: f64) {
        self.lock().rows.push(ThresholdMeasurement {
            ear,
            frequency_hz,
            level_db_hl,
        });
    }

    pub fn clear(&self) {
        self.lock().rows.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    /// Snapshot in insertion order
    pub fn measurements(&self) -> Vec<ThresholdMeasurement> {
        self.lock().rows.clone()
    }

    /// Drain all measurements, leaving the store empty
    pub fn take(&self) -> Vec<ThresholdMeasurement> {
        std::mem::take(&mut self.lock().rows)
    }

    /// Per-ear view; a later measurement of the same point wins
    pub fn to_map_by_ear(&self) -> EarFrequencyMap {
        let mut map = EarFrequencyMap::new();
        for row in self.lock().rows.iter() {
            map.insert(row.ear, row.frequency_hz, row.level_db_hl);
        }
        map
    }

    pub fn set_notes(&self, notes: &str) {
        self.lock().notes = notes.to_string();
    }

    pub fn notes(&self) -> String {
        self.lock().notes.clone()
    }
}
