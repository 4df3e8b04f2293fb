//! Normalized participant store.
//!
//! Single source of truth for the roster and field-level participant state:
//! - ordered id roster (arrival order, append-only on join)
//! - per-id full-record cell
//! - per-(id, path) fine-grained property cells
//! - waiting-participant roster with placeholder-preserving removal
//! - derived counts and filtered/sorted id views (see [`selectors`])
//!
//! All mutating operations are defensive no-ops on missing ids: events may
//! race with a concurrent leave, and that is not an error.

pub mod cell;
pub mod record;
pub mod selectors;

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::paths::{compute_paths, resolve_path, PropertyPath};
use crate::sdk::RosterSnapshot;
use cell::Cell;
use record::{ParticipantRecord, WaitingParticipant, LAST_ACTIVE_FIELD};
use selectors::{CustomIdsView, PropertyViewKey, ViewKey};

/// Present/hidden participant counts derived from the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCounts {
    pub present: usize,
    pub hidden: usize,
}

pub struct ParticipantStore {
    pub(crate) roster: Cell<Vec<String>>,
    pub(crate) local_id: Cell<String>,
    pub(crate) active_id: Cell<Option<String>>,
    pub(crate) local_joined_at: Cell<Option<DateTime<Utc>>>,
    pub(crate) counts: Cell<ParticipantCounts>,

    pub(crate) records: DashMap<String, Arc<Cell<Option<ParticipantRecord>>>>,
    pub(crate) path_sets: DashMap<String, Vec<PropertyPath>>,
    pub(crate) properties: DashMap<(String, PropertyPath), Arc<Cell<Value>>>,

    pub(crate) waiting_ids: Cell<Vec<String>>,
    pub(crate) waiting: DashMap<String, Arc<Cell<WaitingParticipant>>>,

    pub(crate) views: DashMap<ViewKey, Arc<Cell<Vec<String>>>>,
    pub(crate) property_views: DashMap<PropertyViewKey, Arc<Cell<Vec<Value>>>>,
    pub(crate) custom_views: Mutex<Vec<Weak<CustomIdsView>>>,
}

impl Default for ParticipantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantStore {
    pub fn new() -> Self {
        Self {
            roster: Cell::new(Vec::new()),
            local_id: Cell::new(String::new()),
            active_id: Cell::new(None),
            local_joined_at: Cell::new(None),
            counts: Cell::default(),
            records: DashMap::new(),
            path_sets: DashMap::new(),
            properties: DashMap::new(),
            waiting_ids: Cell::new(Vec::new()),
            waiting: DashMap::new(),
            views: DashMap::new(),
            property_views: DashMap::new(),
            custom_views: Mutex::new(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    pub fn roster(&self) -> Vec<String> {
        self.roster.get()
    }

    pub fn watch_roster(&self) -> watch::Receiver<Vec<String>> {
        self.roster.watch()
    }

    /// Local participant's session id, empty string while unknown.
    pub fn local_id(&self) -> String {
        self.local_id.get()
    }

    pub fn watch_local_id(&self) -> watch::Receiver<String> {
        self.local_id.watch()
    }

    pub fn active_id(&self) -> Option<String> {
        self.active_id.get()
    }

    pub fn watch_active_id(&self) -> watch::Receiver<Option<String>> {
        self.active_id.watch()
    }

    pub fn local_joined_at(&self) -> Option<DateTime<Utc>> {
        self.local_joined_at.get()
    }

    pub fn counts(&self) -> ParticipantCounts {
        self.counts.get()
    }

    pub fn watch_counts(&self) -> watch::Receiver<ParticipantCounts> {
        self.counts.watch()
    }

    pub fn record(&self, id: &str) -> Option<ParticipantRecord> {
        self.record_cell(id).get()
    }

    /// Subscribe to one participant's full record. The cell is created
    /// lazily, so subscribing before the participant joins is fine.
    pub fn watch_record(&self, id: &str) -> watch::Receiver<Option<ParticipantRecord>> {
        self.record_cell(id).watch()
    }

    /// Resolved value at `(id, path)`, [`Value::Null`] while absent.
    pub fn property(&self, id: &str, path: &str) -> Value {
        self.property_cell(id, path).get()
    }

    pub fn watch_property(&self, id: &str, path: &str) -> watch::Receiver<Value> {
        self.property_cell(id, path).watch()
    }

    /// Multi-path batch read, aligned by index with `paths`.
    pub fn properties<S: AsRef<str>>(&self, id: &str, paths: &[S]) -> Vec<Value> {
        paths
            .iter()
            .map(|path| self.property(id, path.as_ref()))
            .collect()
    }

    pub fn waiting_ids(&self) -> Vec<String> {
        self.waiting_ids.get()
    }

    pub fn watch_waiting_ids(&self) -> watch::Receiver<Vec<String>> {
        self.waiting_ids.watch()
    }

    /// Waiting-participant record; removed entries resolve to the blank
    /// placeholder, never to an absent value.
    pub fn waiting(&self, id: &str) -> WaitingParticipant {
        self.waiting_cell(id).get()
    }

    pub fn watch_waiting(&self, id: &str) -> watch::Receiver<WaitingParticipant> {
        self.waiting_cell(id).watch()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Replace the entire roster and all per-id cells from a full snapshot.
    /// Also stores the local participant's id.
    pub fn bulk_init(&self, snapshot: &RosterSnapshot) {
        let new_ids: Vec<String> = snapshot
            .participants
            .iter()
            .map(|p| p.session_id().to_string())
            .collect();

        // ids present before but not in the snapshot are cleared outright
        for id in self.roster.get() {
            if !new_ids.contains(&id) {
                self.clear_participant(&id);
            }
        }

        if let Some(local) = snapshot.local() {
            self.local_id
                .set_if_changed(local.session_id().to_string());
        }

        self.roster.set_if_changed(new_ids);
        for participant in &snapshot.participants {
            let id = participant.session_id().to_string();
            self.record_cell(&id).set_if_changed(Some(participant.clone()));
            self.sync_paths(&id, participant);
        }
        self.refresh_counts();
    }

    /// Append a newly joined participant. Idempotent: a second join for an
    /// id already in the roster leaves roster and record cell unchanged.
    pub fn apply_join(&self, participant: &ParticipantRecord) {
        let id = participant.session_id().to_string();
        if id.is_empty() {
            return;
        }
        let appended = self.roster.update_with(|ids| {
            if ids.contains(&id) {
                false
            } else {
                ids.push(id.clone());
                true
            }
        });
        if !appended {
            return;
        }
        self.record_cell(&id).set_if_changed(Some(participant.clone()));
        self.sync_paths(&id, participant);
        self.refresh_counts();
    }

    /// Merge an update into an existing record. Top-level shallow merge:
    /// nested objects in the update replace the prior nested object. No-op
    /// for ids not in the roster.
    pub fn apply_update(&self, update: &ParticipantRecord) {
        let id = update.session_id().to_string();
        if !self.roster.get().contains(&id) {
            return;
        }
        let cell = self.record_cell(&id);
        let mut merged = match cell.get() {
            Some(existing) => existing,
            None => return,
        };
        merged.merge_update(update);

        if merged.is_local() {
            self.local_id.set_if_changed(id.clone());
        }

        self.sync_paths(&id, &merged);
        cell.set_if_changed(Some(merged));
        self.refresh_counts();
    }

    /// Remove a participant: roster entry, record cell, every fine-grained
    /// cell of its last-known path set, and the path set itself. No-op for
    /// unknown ids.
    pub fn apply_leave(&self, id: &str) {
        let removed = self.roster.update_with(|ids| {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            ids.len() != before
        });
        if !removed {
            return;
        }
        self.clear_participant(id);
        self.refresh_counts();
    }

    /// Record the active speaker and stamp that participant's `last_active`.
    /// The stamp is skipped when the record no longer exists.
    pub fn apply_active_speaker(&self, id: &str, now: DateTime<Utc>) {
        self.active_id.set_if_changed(Some(id.to_string()));
        let cell = self.record_cell(id);
        let stamped = cell.update_with(|record| match record {
            Some(record) => {
                record.set_last_active(now);
                true
            }
            None => false,
        });
        if stamped {
            self.property_cell(id, LAST_ACTIVE_FIELD)
                .set_if_changed(Value::String(now.to_rfc3339()));
            if let Some(mut paths) = self.path_sets.get_mut(id) {
                if !paths.iter().any(|p| p == LAST_ACTIVE_FIELD) {
                    paths.push(LAST_ACTIVE_FIELD.to_string());
                }
            }
        }
    }

    pub fn set_local_joined_at(&self, at: DateTime<Utc>) {
        self.local_joined_at.set_if_changed(Some(at));
    }

    // -----------------------------------------------------------------------
    // Waiting participants
    // -----------------------------------------------------------------------

    pub fn waiting_add(&self, participant: &WaitingParticipant) {
        let id = participant.id.clone();
        self.waiting_ids.update_with(|ids| {
            if ids.contains(&id) {
                false
            } else {
                ids.push(id.clone());
                true
            }
        });
        self.waiting_cell(&id).set_if_changed(participant.clone());
    }

    pub fn waiting_update(&self, participant: &WaitingParticipant) {
        self.waiting_cell(&participant.id)
            .set_if_changed(participant.clone());
    }

    /// Remove from the waiting roster; the record resets to the blank
    /// placeholder instead of being deleted.
    pub fn waiting_remove(&self, id: &str) {
        self.waiting_ids.update_with(|ids| {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            ids.len() != before
        });
        self.waiting_cell(id)
            .set_if_changed(WaitingParticipant::blank(id));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Clear everything for session teardown: local id, active speaker,
    /// roster, all record and property cells, waiting roster, counts.
    pub fn reset(&self) {
        self.local_id.set_if_changed(String::new());
        self.active_id.set_if_changed(None);
        self.local_joined_at.set_if_changed(None);
        for id in self.roster.get() {
            self.clear_participant(&id);
        }
        self.roster.set_if_changed(Vec::new());
        for id in self.waiting_ids.get() {
            self.waiting_cell(&id)
                .set_if_changed(WaitingParticipant::blank(&id));
        }
        self.waiting_ids.set_if_changed(Vec::new());
        self.counts.set_if_changed(ParticipantCounts::default());
        self.refresh_views();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    pub(crate) fn record_cell(&self, id: &str) -> Arc<Cell<Option<ParticipantRecord>>> {
        self.records
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Cell::new(None)))
            .clone()
    }

    pub(crate) fn property_cell(&self, id: &str, path: &str) -> Arc<Cell<Value>> {
        self.properties
            .entry((id.to_string(), path.to_string()))
            .or_insert_with(|| Arc::new(Cell::new(Value::Null)))
            .clone()
    }

    fn waiting_cell(&self, id: &str) -> Arc<Cell<WaitingParticipant>> {
        self.waiting
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Cell::new(WaitingParticipant::blank(id))))
            .clone()
    }

    /// Recompute the path set for `record` and reconcile the fine-grained
    /// cells: removed paths are cleared to the Null sentinel, current paths
    /// are written through the equality gate.
    fn sync_paths(&self, id: &str, record: &ParticipantRecord) {
        let value = record.as_value();
        let new_paths = compute_paths(&value);

        let old_paths = self
            .path_sets
            .get(id)
            .map(|paths| paths.clone())
            .unwrap_or_default();
        for removed in old_paths.iter().filter(|p| !new_paths.contains(p)) {
            self.property_cell(id, removed).set_if_changed(Value::Null);
        }

        for path in &new_paths {
            let resolved = resolve_path(&value, path);
            self.property_cell(id, path).set_if_changed(resolved);
        }

        if old_paths != new_paths {
            self.path_sets.insert(id.to_string(), new_paths);
        }
    }

    /// Clear the record cell, all fine-grained cells of the last-known path
    /// set, and the path set itself.
    fn clear_participant(&self, id: &str) {
        self.record_cell(id).set_if_changed(None);
        if let Some((_, old_paths)) = self.path_sets.remove(id) {
            for path in old_paths {
                self.property_cell(id, &path).set_if_changed(Value::Null);
            }
        }
    }

    fn refresh_counts(&self) {
        let mut present = 0;
        let mut hidden = 0;
        for id in self.roster.get() {
            let Some(record) = self.record(&id) else {
                continue;
            };
            let has_presence = resolve_path(&record.as_value(), "permissions.hasPresence")
                .as_bool()
                .unwrap_or(true);
            if has_presence {
                present += 1;
            } else {
                hidden += 1;
            }
        }
        self.counts
            .set_if_changed(ParticipantCounts { present, hidden });
    }
}
