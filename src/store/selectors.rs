//! Derived selector layer.
//!
//! Memoized, equality-gated derived views over the participant store:
//! filtered+sorted id lists keyed by `(filter, sort)` tag pairs, and
//! multi-path batch reads. Tag-based views read only the relevant
//! fine-grained cells; function-valued filters/sorts recompute against full
//! records and are deep-equality gated before publication.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use super::cell::Cell;
use super::record::ParticipantRecord;
use super::ParticipantStore;
use crate::paths::PropertyPath;

// ---------------------------------------------------------------------------
// Filters and sorts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTag {
    #[default]
    All,
    Local,
    Remote,
    Owner,
    Record,
    Screen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortTag {
    #[default]
    None,
    JoinedAt,
    SessionId,
    UserId,
    UserName,
}

impl SortTag {
    fn field(&self) -> Option<&'static str> {
        match self {
            SortTag::None => None,
            SortTag::JoinedAt => Some("joined_at"),
            SortTag::SessionId => Some("session_id"),
            SortTag::UserId => Some("user_id"),
            SortTag::UserName => Some("user_name"),
        }
    }
}

pub type FilterFn = Arc<dyn Fn(&ParticipantRecord) -> bool + Send + Sync>;
pub type SortFn = Arc<dyn Fn(&ParticipantRecord, &ParticipantRecord) -> Ordering + Send + Sync>;

#[derive(Clone)]
pub enum Filter {
    Tag(FilterTag),
    Custom(FilterFn),
}

impl From<FilterTag> for Filter {
    fn from(tag: FilterTag) -> Self {
        Filter::Tag(tag)
    }
}

#[derive(Clone)]
pub enum Sort {
    Tag(SortTag),
    Custom(SortFn),
}

impl From<SortTag> for Sort {
    fn from(tag: SortTag) -> Self {
        Sort::Tag(tag)
    }
}

/// Memo key for tag-based id views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewKey {
    pub filter: FilterTag,
    pub sort: SortTag,
}

/// Memo key for multi-path batch reads.
pub type PropertyViewKey = (String, Vec<PropertyPath>);

// ---------------------------------------------------------------------------
// Value ordering
// ---------------------------------------------------------------------------

/// Ascending order over resolved field values. Entries lacking the field
/// (Null sentinel) sort after those that have it.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .total_cmp(&b.as_f64().unwrap_or(f64::NAN)),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

fn track_is_live(state: &Value) -> bool {
    matches!(state.as_str(), Some("sendable" | "loading" | "playable"))
}

// ---------------------------------------------------------------------------
// Store-side evaluation
// ---------------------------------------------------------------------------

impl ParticipantStore {
    /// Subscribe to a memoized filtered+sorted id view. The view is created
    /// on first access and recomputed (equality-gated) by
    /// [`ParticipantStore::refresh_views`] after each applied event batch.
    pub fn ids_view(&self, filter: FilterTag, sort: SortTag) -> watch::Receiver<Vec<String>> {
        let key = ViewKey { filter, sort };
        let cell = self
            .views
            .entry(key)
            .or_insert_with(|| Arc::new(Cell::new(self.tag_filtered_sorted_ids(filter, sort))))
            .clone();
        cell.watch()
    }

    /// Subscribe to a memoized multi-path batch read for one participant.
    pub fn properties_view<S: AsRef<str>>(
        &self,
        id: &str,
        paths: &[S],
    ) -> watch::Receiver<Vec<Value>> {
        let key = (
            id.to_string(),
            paths.iter().map(|p| p.as_ref().to_string()).collect(),
        );
        let cell = self
            .property_views
            .entry(key)
            .or_insert_with(|| Arc::new(Cell::new(self.properties(id, paths))))
            .clone();
        cell.watch()
    }

    /// Register a function-valued filter/sort view. The view is computed
    /// immediately and recomputed by [`ParticipantStore::refresh_views`]
    /// after each applied event batch until the last `Arc` is dropped.
    pub fn custom_ids_view(&self, filter: Filter, sort: Sort) -> Arc<CustomIdsView> {
        let view = Arc::new(CustomIdsView::new(filter, sort));
        view.refresh(self);
        self.custom_views
            .lock()
            .expect("custom views mutex poisoned")
            .push(Arc::downgrade(&view));
        view
    }

    /// Recompute every registered derived view. Structurally identical
    /// results do not notify downstream subscribers.
    pub fn refresh_views(&self) {
        for entry in self.views.iter() {
            let key = *entry.key();
            entry
                .value()
                .set_if_changed(self.tag_filtered_sorted_ids(key.filter, key.sort));
        }
        for entry in self.property_views.iter() {
            let (id, paths) = entry.key();
            entry.value().set_if_changed(self.properties(id, paths));
        }
        let mut customs = self
            .custom_views
            .lock()
            .expect("custom views mutex poisoned");
        customs.retain(|weak| match weak.upgrade() {
            Some(view) => {
                view.refresh(self);
                true
            }
            None => false,
        });
    }

    /// One-shot filtered+sorted id list. Tag filters/sorts read only the
    /// relevant fine-grained cells; custom functions read full records.
    pub fn filtered_sorted_ids(&self, filter: &Filter, sort: &Sort) -> Vec<String> {
        match (filter, sort) {
            (Filter::Tag(filter), Sort::Tag(sort)) => self.tag_filtered_sorted_ids(*filter, *sort),
            _ => self.custom_filtered_sorted_ids(filter, sort),
        }
    }

    fn tag_filtered_sorted_ids(&self, filter: FilterTag, sort: SortTag) -> Vec<String> {
        let mut ids: Vec<String> = self
            .roster
            .get()
            .into_iter()
            .filter(|id| self.matches_tag(id, filter))
            .collect();
        if let Some(field) = sort.field() {
            ids.sort_by(|a, b| compare_values(&self.property(a, field), &self.property(b, field)));
        }
        ids
    }

    fn matches_tag(&self, id: &str, filter: FilterTag) -> bool {
        match filter {
            FilterTag::All => true,
            FilterTag::Local => self.property(id, "local") == Value::Bool(true),
            FilterTag::Remote => self.property(id, "local") != Value::Bool(true),
            FilterTag::Owner => self.property(id, "owner") == Value::Bool(true),
            FilterTag::Record => self.property(id, "record") == Value::Bool(true),
            FilterTag::Screen => {
                let states = self.properties(
                    id,
                    &["tracks.screenAudio.state", "tracks.screenVideo.state"],
                );
                states.iter().any(track_is_live)
            }
        }
    }

    fn custom_filtered_sorted_ids(&self, filter: &Filter, sort: &Sort) -> Vec<String> {
        let mut records: Vec<ParticipantRecord> = self
            .roster
            .get()
            .iter()
            .filter_map(|id| self.record(id))
            .collect();

        records.retain(|record| match filter {
            Filter::Tag(tag) => self.matches_tag(record.session_id(), *tag),
            Filter::Custom(f) => f(record),
        });
        match sort {
            Sort::Tag(tag) => {
                if let Some(field) = tag.field() {
                    records.sort_by(|a, b| {
                        compare_values(
                            &crate::paths::resolve_path(&a.as_value(), field),
                            &crate::paths::resolve_path(&b.as_value(), field),
                        )
                    });
                }
            }
            Sort::Custom(f) => records.sort_by(|a, b| f(a, b)),
        }
        records
            .iter()
            .map(|record| record.session_id().to_string())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Custom views
// ---------------------------------------------------------------------------

/// Equality-gated holder for a function-valued filter/sort view. Obtain one
/// through [`ParticipantStore::custom_ids_view`] to have the store refresh
/// it on each relevant event batch; structurally identical results do not
/// notify.
pub struct CustomIdsView {
    filter: Filter,
    sort: Sort,
    cell: Cell<Vec<String>>,
}

impl CustomIdsView {
    pub fn new(filter: Filter, sort: Sort) -> Self {
        Self {
            filter,
            sort,
            cell: Cell::new(Vec::new()),
        }
    }

    /// Recompute against the store; returns whether subscribers were
    /// notified.
    pub fn refresh(&self, store: &ParticipantStore) -> bool {
        self.cell
            .set_if_changed(store.filtered_sorted_ids(&self.filter, &self.sort))
    }

    pub fn get(&self) -> Vec<String> {
        self.cell.get()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.cell.watch()
    }
}
