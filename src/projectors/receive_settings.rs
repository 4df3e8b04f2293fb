//! Per-participant receive settings slice.
//!
//! Settings are keyed by session id; the reserved `base` entry is the
//! fallback for ids without own settings. An update event replaces per-id
//! entries wholesale and resets ids that disappeared from the payload to
//! the empty default, mirroring the SDK's full-payload semantics.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;

use crate::sdk::{ReceiveSettings, BASE_RECEIVE_SETTINGS_ID};
use crate::store::cell::Cell;

pub struct ReceiveSettingsSlice {
    cells: DashMap<String, Arc<Cell<Value>>>,
}

impl Default for ReceiveSettingsSlice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveSettingsSlice {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    fn cell(&self, id: &str) -> Arc<Cell<Value>> {
        self.cells
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Cell::new(Value::Null)))
            .clone()
    }

    /// Raw settings stored for `id`, Null when none.
    pub fn raw(&self, id: &str) -> Value {
        self.cell(id).get()
    }

    /// Effective settings for `id`: its own entry when present and
    /// non-empty, else the base entry.
    pub fn effective(&self, id: &str) -> Value {
        let own = self.cell(id).get();
        let empty = match &own {
            Value::Null => true,
            Value::Object(fields) => fields.is_empty(),
            _ => false,
        };
        if id != BASE_RECEIVE_SETTINGS_ID && empty {
            self.cell(BASE_RECEIVE_SETTINGS_ID).get()
        } else {
            own
        }
    }

    pub fn watch(&self, id: &str) -> watch::Receiver<Value> {
        self.cell(id).watch()
    }

    /// Apply a full settings payload. Ids absent from the payload reset to
    /// the empty default.
    pub fn apply(&self, settings: &ReceiveSettings) {
        let stale: Vec<String> = self
            .cells
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| !settings.contains_key(id))
            .collect();
        for id in stale {
            self.cell(&id).set_if_changed(Value::Null);
        }
        for (id, value) in settings {
            self.cell(id).set_if_changed(value.clone());
        }
    }

    pub fn reset(&self) {
        for entry in self.cells.iter() {
            entry.value().set_if_changed(Value::Null);
        }
    }
}
