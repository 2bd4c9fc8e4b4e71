/// Per-tank consumption state, keyed by tank id.
///
/// The ledger is what survives restarts: it is loaded from a `StateStore`
/// once at startup and written back after each successful cycle. Entries for
/// tanks that disappear from the portal are kept, so a tank that comes back
/// resumes its running total.

use super::ConsumptionState;
use crate::model::QualityFlag;
use crate::store::{StateStore, StoreDocument, StoreError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumptionLedger {
    states: BTreeMap<String, ConsumptionState>,
}

impl ConsumptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds state from a stored document. A tank with a total but no
    /// previous reading keeps its total and waits for a fresh baseline.
    pub fn from_document(doc: &StoreDocument) -> Self {
        let mut states = BTreeMap::new();
        for (tank_id, total) in &doc.consumption_totals {
            states.insert(
                tank_id.clone(),
                ConsumptionState {
                    previous_volume: doc.previous_readings.get(tank_id).copied(),
                    cumulative_energy: *total,
                    quality_flag: QualityFlag::Unknown,
                },
            );
        }
        for (tank_id, volume) in &doc.previous_readings {
            states.entry(tank_id.clone()).or_insert_with(|| ConsumptionState {
                previous_volume: Some(*volume),
                ..ConsumptionState::new()
            });
        }
        Self { states }
    }

    pub fn to_document(&self, now: DateTime<Utc>) -> StoreDocument {
        let mut doc = StoreDocument::empty(now);
        for (tank_id, state) in &self.states {
            doc.consumption_totals.insert(tank_id.clone(), state.cumulative_energy);
            if let Some(volume) = state.previous_volume {
                doc.previous_readings.insert(tank_id.clone(), volume);
            }
        }
        doc
    }

    /// Loads the ledger, starting empty when nothing was saved before.
    pub fn load(store: &dyn StateStore) -> Result<Self, StoreError> {
        Ok(store
            .load()?
            .map(|doc| Self::from_document(&doc))
            .unwrap_or_default())
    }

    pub fn save(&self, store: &dyn StateStore, now: DateTime<Utc>) -> Result<(), StoreError> {
        store.save(&self.to_document(now))
    }

    pub fn get(&self, tank_id: &str) -> Option<&ConsumptionState> {
        self.states.get(tank_id)
    }

    pub fn update(&mut self, tank_id: impl Into<String>, state: ConsumptionState) {
        self.states.insert(tank_id.into(), state);
    }

    pub fn tank_ids(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
