//! Throttled event aggregation.
//!
//! High-frequency events (active-speaker changes, bursts of joins) must not
//! each trigger a full downstream recompute. The aggregator buffers events
//! of watched kinds per `(kinds, window)` scope and delivers the whole
//! ordered buffer once per window. The window is fixed, not a debounce: an
//! event arriving after a flush was scheduled rides along in that flush and
//! does not push the deadline out.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use uuid::Uuid;

use crate::events::{CallEvent, EventKind};
use crate::SyncError;

pub type BatchHandler = Box<dyn FnMut(&[CallEvent]) -> Result<(), SyncError> + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchScope {
    kinds: BTreeSet<EventKind>,
    window: Duration,
}

struct BatchEntry {
    id: Uuid,
    active: AtomicBool,
    handler: Mutex<BatchHandler>,
}

impl BatchEntry {
    fn invoke(&self, batch: &[CallEvent]) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let result = {
            let mut handler = self.handler.lock().expect("batch handler mutex poisoned");
            handler(batch)
        };
        if let Err(e) = result {
            tracing::warn!(batch_len = batch.len(), "batch handler failed: {e}");
        }
    }
}

#[derive(Default)]
struct ScopeState {
    buffer: Vec<CallEvent>,
    handlers: Vec<Arc<BatchEntry>>,
    flush_scheduled: bool,
    last_batch: Option<Vec<CallEvent>>,
}

/// Collects events of watched kinds into per-scope ordered buffers and
/// flushes each buffer once per window to every handler of that scope.
/// Handlers sharing an identical `(kinds, window)` scope share one buffer
/// and one timer.
pub struct ThrottledAggregator {
    scopes: Mutex<HashMap<BatchScope, ScopeState>>,
}

impl ThrottledAggregator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scopes: Mutex::new(HashMap::new()),
        })
    }

    /// Register `handler` for batches of the given kinds. With
    /// `replay_last`, the handler is invoked once immediately with the
    /// scope's most recently flushed batch, if any.
    pub fn subscribe_batch(
        self: &Arc<Self>,
        kinds: impl IntoIterator<Item = EventKind>,
        window: Duration,
        handler: BatchHandler,
        replay_last: bool,
    ) -> BatchSubscription {
        let scope = BatchScope {
            kinds: kinds.into_iter().collect(),
            window,
        };
        let entry = Arc::new(BatchEntry {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            handler: Mutex::new(handler),
        });

        let replay = {
            let mut scopes = self.scopes.lock().expect("aggregator mutex poisoned");
            let state = scopes.entry(scope.clone()).or_default();
            state.handlers.push(Arc::clone(&entry));
            if replay_last {
                state.last_batch.clone()
            } else {
                None
            }
        };
        if let Some(batch) = replay {
            entry.invoke(&batch);
        }

        BatchSubscription {
            scope,
            id: entry.id,
            aggregator: Arc::downgrade(self),
        }
    }

    /// Feed one event through. Appends to every scope watching the event's
    /// kind and schedules a flush for scopes that don't have one pending.
    pub fn ingest(self: &Arc<Self>, event: &CallEvent) {
        let kind = event.kind();
        let mut to_schedule = Vec::new();
        {
            let mut scopes = self.scopes.lock().expect("aggregator mutex poisoned");
            for (scope, state) in scopes.iter_mut() {
                if !scope.kinds.contains(&kind) {
                    continue;
                }
                state.buffer.push(event.clone());
                if !state.flush_scheduled {
                    state.flush_scheduled = true;
                    to_schedule.push(scope.clone());
                }
            }
        }
        for scope in to_schedule {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(scope.window).await;
                this.flush(&scope);
            });
        }
    }

    /// Drop all pending buffers and cached batches, for session teardown.
    /// Registered handlers stay; they simply see no further deliveries
    /// until new events arrive.
    pub fn clear(&self) {
        let mut scopes = self.scopes.lock().expect("aggregator mutex poisoned");
        for state in scopes.values_mut() {
            state.buffer.clear();
            state.last_batch = None;
        }
    }

    fn flush(&self, scope: &BatchScope) {
        let (batch, handlers) = {
            let mut scopes = self.scopes.lock().expect("aggregator mutex poisoned");
            let Some(state) = scopes.get_mut(scope) else {
                // scope dropped after its last handler unsubscribed
                return;
            };
            state.flush_scheduled = false;
            if state.buffer.is_empty() {
                return;
            }
            let batch = std::mem::take(&mut state.buffer);
            state.last_batch = Some(batch.clone());
            (batch, state.handlers.clone())
        };
        for entry in handlers {
            entry.invoke(&batch);
        }
    }

    fn unsubscribe(&self, scope: &BatchScope, id: Uuid) {
        let mut scopes = self.scopes.lock().expect("aggregator mutex poisoned");
        if let Some(state) = scopes.get_mut(scope) {
            for entry in &state.handlers {
                if entry.id == id {
                    entry.active.store(false, Ordering::Release);
                }
            }
            state.handlers.retain(|entry| entry.id != id);
            // timer/buffer lifecycle follows the union of interested
            // consumers; the last one leaving drops the scope
            if state.handlers.is_empty() {
                scopes.remove(scope);
            }
        }
    }
}

/// Handle for one batch subscription.
pub struct BatchSubscription {
    scope: BatchScope,
    id: Uuid,
    aggregator: Weak<ThrottledAggregator>,
}

impl BatchSubscription {
    pub fn unsubscribe(&self) {
        if let Some(aggregator) = self.aggregator.upgrade() {
            aggregator.unsubscribe(&self.scope, self.id);
        }
    }
}
