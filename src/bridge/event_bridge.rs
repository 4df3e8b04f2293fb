//! Per-event immediate dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use uuid::Uuid;

use crate::events::{CallEvent, EventKind};
use crate::SyncError;

pub type EventHandler = Box<dyn FnMut(&CallEvent) -> Result<(), SyncError> + Send>;

struct HandlerEntry {
    id: Uuid,
    active: AtomicBool,
    handler: Mutex<EventHandler>,
}

impl HandlerEntry {
    fn invoke(&self, event: &CallEvent) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let result = {
            let mut handler = self.handler.lock().expect("handler mutex poisoned");
            handler(event)
        };
        if let Err(e) = result {
            tracing::warn!(event = ?event.kind(), "event handler failed: {e}");
        }
    }
}

/// Subscribes handlers to named SDK events and dispatches each event to all
/// handlers registered for its kind. Handler failures are isolated per
/// handler and logged; they never abort sibling handlers.
pub struct EventBridge {
    handlers: DashMap<EventKind, Vec<Arc<HandlerEntry>>>,
    last_events: DashMap<EventKind, CallEvent>,
}

impl EventBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            last_events: DashMap::new(),
        })
    }

    /// Register `handler` for events of `kind`. With `replay_last`, the
    /// handler is additionally invoked once synchronously with the most
    /// recent event of that kind, if one was seen, so a late subscriber
    /// starts consistent instead of waiting for the next event.
    pub fn subscribe(
        self: &Arc<Self>,
        kind: EventKind,
        handler: EventHandler,
        replay_last: bool,
    ) -> Subscription {
        let entry = Arc::new(HandlerEntry {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
            handler: Mutex::new(handler),
        });
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::clone(&entry));

        if replay_last {
            let cached = self.last_events.get(&kind).map(|ev| ev.clone());
            if let Some(event) = cached {
                entry.invoke(&event);
            }
        }

        Subscription {
            kind,
            id: entry.id,
            bridge: Arc::downgrade(self),
        }
    }

    /// Seed the last-event cache without dispatching, so that a subscriber
    /// with `replay_last` observes SDK state that predates the bridge.
    pub fn prime(&self, event: CallEvent) {
        self.last_events.insert(event.kind(), event);
    }

    /// Deliver `event` to every handler registered for its kind.
    pub fn dispatch(&self, event: &CallEvent) {
        self.last_events.insert(event.kind(), event.clone());

        // snapshot outside the shard lock so handlers may (un)subscribe freely
        let entries: Vec<Arc<HandlerEntry>> = self
            .handlers
            .get(&event.kind())
            .map(|entries| entries.clone())
            .unwrap_or_default();
        for entry in entries {
            entry.invoke(event);
        }
    }

    /// Drop the last-event cache, for session teardown.
    pub fn clear_cache(&self) {
        self.last_events.clear();
    }

    fn unsubscribe(&self, kind: EventKind, id: Uuid) {
        if let Some(mut entries) = self.handlers.get_mut(&kind) {
            for entry in entries.iter() {
                if entry.id == id {
                    entry.active.store(false, Ordering::Release);
                }
            }
            entries.retain(|entry| entry.id != id);
        }
    }
}

/// Handle for one bridge subscription. Safe to revoke at any time,
/// including from within a handler.
pub struct Subscription {
    kind: EventKind,
    id: Uuid,
    bridge: Weak<EventBridge>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.unsubscribe(self.kind, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recording_handler(log: &Arc<StdMutex<Vec<CallEvent>>>) -> EventHandler {
        let log = Arc::clone(log);
        Box::new(move |ev| {
            log.lock().unwrap().push(ev.clone());
            Ok(())
        })
    }

    #[tokio::test]
    async fn dispatches_to_all_handlers_of_kind() {
        let bridge = EventBridge::new();
        let a = Arc::new(StdMutex::new(Vec::new()));
        let b = Arc::new(StdMutex::new(Vec::new()));
        let _sa = bridge.subscribe(EventKind::LeftMeeting, recording_handler(&a), false);
        let _sb = bridge.subscribe(EventKind::LeftMeeting, recording_handler(&b), false);

        bridge.dispatch(&CallEvent::LeftMeeting);
        bridge.dispatch(&CallEvent::RecordingStopped);

        assert_eq!(a.lock().unwrap().len(), 1);
        assert_eq!(b.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_does_not_abort_siblings() {
        let bridge = EventBridge::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let _failing = bridge.subscribe(
            EventKind::LeftMeeting,
            Box::new(|_| Err(SyncError::Handler("boom".into()))),
            false,
        );
        let _ok = bridge.subscribe(EventKind::LeftMeeting, recording_handler(&log), false);

        bridge.dispatch(&CallEvent::LeftMeeting);

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_last_invokes_late_subscriber_synchronously() {
        let bridge = EventBridge::new();
        bridge.dispatch(&CallEvent::ActiveSpeakerChange {
            session_id: "p1".into(),
        });

        let log = Arc::new(StdMutex::new(Vec::new()));
        let _sub = bridge.subscribe(
            EventKind::ActiveSpeakerChange,
            recording_handler(&log),
            true,
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec![CallEvent::ActiveSpeakerChange {
                session_id: "p1".into()
            }]
        );
    }

    #[tokio::test]
    async fn primed_event_replays_without_dispatch() {
        let bridge = EventBridge::new();
        let eager = Arc::new(StdMutex::new(Vec::new()));
        let _listening = bridge.subscribe(EventKind::RecordingStopped, recording_handler(&eager), false);

        bridge.prime(CallEvent::RecordingStopped);
        assert!(eager.lock().unwrap().is_empty());

        let late = Arc::new(StdMutex::new(Vec::new()));
        let _sub = bridge.subscribe(EventKind::RecordingStopped, recording_handler(&late), true);
        assert_eq!(*late.lock().unwrap(), vec![CallEvent::RecordingStopped]);
    }

    #[tokio::test]
    async fn no_replay_without_cached_event() {
        let bridge = EventBridge::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let _sub = bridge.subscribe(EventKind::LeftMeeting, recording_handler(&log), true);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bridge = EventBridge::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sub = bridge.subscribe(EventKind::LeftMeeting, recording_handler(&log), false);

        bridge.dispatch(&CallEvent::LeftMeeting);
        sub.unsubscribe();
        bridge.dispatch(&CallEvent::LeftMeeting);

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_from_within_handler_is_safe() {
        let bridge = EventBridge::new();
        let slot: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));
        let count = Arc::new(StdMutex::new(0usize));

        let sub = {
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            bridge.subscribe(
                EventKind::LeftMeeting,
                Box::new(move |_| {
                    *count.lock().unwrap() += 1;
                    if let Some(sub) = slot.lock().unwrap().take() {
                        sub.unsubscribe();
                    }
                    Ok(())
                }),
                false,
            )
        };
        *slot.lock().unwrap() = Some(sub);

        bridge.dispatch(&CallEvent::LeftMeeting);
        bridge.dispatch(&CallEvent::LeftMeeting);

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
