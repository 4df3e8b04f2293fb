//! Session wiring.
//!
//! `CallStateSync` owns the bridge, the aggregator, the participant store,
//! and every feature slice for the lifetime of one call session. The SDK
//! binding feeds normalized events into [`CallStateSync::dispatch`]; UI
//! consumers subscribe to the read-only cells exposed here. Teardown fully
//! resets all state so a new session starts clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::bridge::{BatchSubscription, EventBridge, Subscription, ThrottledAggregator};
use crate::events::{CallEvent, EventKind};
use crate::projectors::meeting::{
    reduce_fatal_error, reduce_nonfatal_error, reduce_session_data, FatalError, NonfatalError,
};
use crate::projectors::network::{self, NetworkState};
use crate::projectors::receive_settings::ReceiveSettingsSlice;
use crate::projectors::recording::{self, RecordingState};
use crate::projectors::transcription::{self, TranscriptionState};
use crate::sdk::{
    CallSdk, MeetingSessionData, MeetingState, ReceiveSettings, SdkError, TrackSubscriptions,
};
use crate::store::cell::Cell;
use crate::store::record::ParticipantRecord;
use crate::store::selectors::{FilterTag, SortTag};
use crate::store::ParticipantStore;

/// Fixed interval for the initial roster poll. The SDK has no readiness
/// notification for this concept, so we ask until it answers.
const ROSTER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Throttle window for participant and waiting-participant event bursts.
const PARTICIPANT_BATCH_WINDOW: Duration = Duration::from_millis(100);

pub struct CallStateSync {
    sdk: Arc<dyn CallSdk>,
    bridge: Arc<EventBridge>,
    aggregator: Arc<ThrottledAggregator>,
    store: Arc<ParticipantStore>,

    network: Arc<Cell<NetworkState>>,
    recording: Arc<Cell<RecordingState>>,
    transcription: Arc<Cell<TranscriptionState>>,
    meeting_state: Arc<Cell<MeetingState>>,
    session_data: Arc<Cell<MeetingSessionData>>,
    fatal_error: Arc<Cell<Option<FatalError>>>,
    nonfatal_error: Arc<Cell<Option<NonfatalError>>>,
    receive_settings: Arc<ReceiveSettingsSlice>,

    initialized: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    batch_subscriptions: Mutex<Vec<BatchSubscription>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl CallStateSync {
    /// Construct the sync layer for one call session, wire all event
    /// handlers, and start the initial roster poll.
    pub fn start(sdk: Arc<dyn CallSdk>) -> Arc<Self> {
        let this = Arc::new(Self {
            meeting_state: Arc::new(Cell::new(sdk.meeting_state())),
            sdk,
            bridge: EventBridge::new(),
            aggregator: ThrottledAggregator::new(),
            store: Arc::new(ParticipantStore::new()),
            network: Arc::new(Cell::default()),
            recording: Arc::new(Cell::default()),
            transcription: Arc::new(Cell::default()),
            session_data: Arc::new(Cell::default()),
            fatal_error: Arc::new(Cell::new(None)),
            nonfatal_error: Arc::new(Cell::new(None)),
            receive_settings: Arc::new(ReceiveSettingsSlice::new()),
            initialized: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            batch_subscriptions: Mutex::new(Vec::new()),
            poll_task: Mutex::new(None),
        });
        this.wire(&this);
        this.spawn_roster_poll(&this);
        this
    }

    /// Entry point for the SDK binding: every normalized SDK event goes
    /// through here, fanning out to immediate handlers and batch buffers.
    pub fn dispatch(&self, event: CallEvent) {
        self.bridge.dispatch(&event);
        self.aggregator.ingest(&event);
    }

    // -----------------------------------------------------------------------
    // Observable surface
    // -----------------------------------------------------------------------

    pub fn store(&self) -> &Arc<ParticipantStore> {
        &self.store
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn aggregator(&self) -> &Arc<ThrottledAggregator> {
        &self.aggregator
    }

    pub fn network(&self) -> NetworkState {
        self.network.get()
    }

    pub fn watch_network(&self) -> watch::Receiver<NetworkState> {
        self.network.watch()
    }

    pub fn recording(&self) -> RecordingState {
        self.recording.get()
    }

    pub fn watch_recording(&self) -> watch::Receiver<RecordingState> {
        self.recording.watch()
    }

    pub fn transcription(&self) -> TranscriptionState {
        self.transcription.get()
    }

    pub fn watch_transcription(&self) -> watch::Receiver<TranscriptionState> {
        self.transcription.watch()
    }

    pub fn meeting_state(&self) -> MeetingState {
        self.meeting_state.get()
    }

    pub fn watch_meeting_state(&self) -> watch::Receiver<MeetingState> {
        self.meeting_state.watch()
    }

    pub fn session_data(&self) -> MeetingSessionData {
        self.session_data.get()
    }

    pub fn watch_session_data(&self) -> watch::Receiver<MeetingSessionData> {
        self.session_data.watch()
    }

    pub fn fatal_error(&self) -> Option<FatalError> {
        self.fatal_error.get()
    }

    pub fn nonfatal_error(&self) -> Option<NonfatalError> {
        self.nonfatal_error.get()
    }

    pub fn receive_settings(&self) -> &Arc<ReceiveSettingsSlice> {
        &self.receive_settings
    }

    // -----------------------------------------------------------------------
    // Mutators forwarded to the SDK
    // -----------------------------------------------------------------------

    /// Forward receive-settings changes to the SDK. Silently ignored unless
    /// the meeting is in the joined state.
    pub fn update_receive_settings(&self, settings: ReceiveSettings) -> Result<(), SdkError> {
        if self.sdk.is_destroyed() || self.meeting_state.get() != MeetingState::JoinedMeeting {
            tracing::debug!("update_receive_settings ignored outside joined state");
            return Ok(());
        }
        self.sdk.update_receive_settings(settings)
    }

    /// Subscribe to a participant's tracks when the SDK does not do so
    /// automatically.
    pub fn ensure_subscribed(&self, session_id: &str) -> Result<(), SdkError> {
        if self.sdk.is_destroyed() || self.sdk.auto_subscribe() {
            return Ok(());
        }
        self.sdk
            .update_subscribed_tracks(session_id, TrackSubscriptions::all())
    }

    pub async fn network_stats(&self) -> Result<Value, SdkError> {
        self.sdk.network_stats().await
    }

    /// Fetch the topology from the SDK and fold it into the network slice.
    /// Unknown answers leave the cached value untouched; failures are not
    /// retried.
    pub async fn refresh_topology(&self) {
        match self.sdk.network_topology().await {
            Ok(topology) => {
                self.network
                    .set_if_changed(network::with_topology(&self.network.get(), topology));
            }
            Err(e) => tracing::debug!("topology fetch failed: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Tear the session down: stop the poll, revoke all internal
    /// subscriptions, and reset every slice to its default.
    pub fn dispose(&self) {
        if let Some(task) = self.poll_task.lock().expect("poll mutex poisoned").take() {
            task.abort();
        }
        for sub in self.subscriptions.lock().expect("subs mutex poisoned").drain(..) {
            sub.unsubscribe();
        }
        for sub in self
            .batch_subscriptions
            .lock()
            .expect("subs mutex poisoned")
            .drain(..)
        {
            sub.unsubscribe();
        }
        self.teardown_state();
    }

    /// Reset every slice, as after a `call-instance-destroyed` event.
    fn teardown_state(&self) {
        self.store.reset();
        self.network.set_if_changed(NetworkState::default());
        self.recording.set_if_changed(RecordingState::default());
        self.transcription
            .set_if_changed(TranscriptionState::default());
        self.meeting_state.set_if_changed(MeetingState::New);
        self.session_data
            .set_if_changed(MeetingSessionData::default());
        self.fatal_error.set_if_changed(None);
        self.nonfatal_error.set_if_changed(None);
        self.receive_settings.reset();
        self.bridge.clear_cache();
        self.aggregator.clear();
        self.initialized.store(false, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Wiring
    // -----------------------------------------------------------------------

    fn wire(&self, this: &Arc<Self>) {
        let mut subs = Vec::new();

        subs.push(self.on(this, EventKind::JoiningMeeting, |this, event| {
            if let CallEvent::JoiningMeeting { at } = event {
                this.store.set_local_joined_at(*at);
            }
            this.refresh_meeting_state();
            this.try_init_from_snapshot();
            Ok(())
        }));

        subs.push(self.on(this, EventKind::JoinedMeeting, |this, event| {
            if let CallEvent::JoinedMeeting { participants } = event {
                this.store.bulk_init(participants);
                this.store.refresh_views();
                this.sync_recording_with_roster();
                this.initialized.store(true, Ordering::Release);
            }
            this.refresh_meeting_state();
            this.session_data
                .set_if_changed(this.sdk.meeting_session_state());
            this.spawn_topology_fetch();
            this.spawn_receive_settings_fetch();
            Ok(())
        }));

        subs.push(self.on(this, EventKind::LeftMeeting, |this, event| {
            this.refresh_meeting_state();
            this.store.reset();
            this.reduce_feature_slices(event);
            Ok(())
        }));

        subs.push(self.on(this, EventKind::CallInstanceDestroyed, |this, _event| {
            this.teardown_state();
            Ok(())
        }));

        subs.push(self.on(this, EventKind::Error, |this, event| {
            this.fatal_error
                .set_if_changed(reduce_fatal_error(&this.fatal_error.get(), event));
            this.refresh_meeting_state();
            Ok(())
        }));

        subs.push(self.on(this, EventKind::NonfatalError, |this, event| {
            this.nonfatal_error
                .set_if_changed(reduce_nonfatal_error(&this.nonfatal_error.get(), event));
            Ok(())
        }));

        for kind in [EventKind::NetworkConnection, EventKind::NetworkQualityChange] {
            subs.push(self.on(this, kind, |this, event| {
                this.network
                    .set_if_changed(network::reduce(&this.network.get(), event));
                Ok(())
            }));
        }

        for kind in [
            EventKind::RecordingStarted,
            EventKind::RecordingStopped,
            EventKind::RecordingError,
        ] {
            subs.push(self.on(this, kind, |this, event| {
                let next = recording::reduce(
                    &this.recording.get(),
                    event,
                    &this.store.local_id(),
                    Utc::now(),
                );
                this.recording.set_if_changed(next);
                Ok(())
            }));
        }

        for kind in [
            EventKind::TranscriptionStarted,
            EventKind::TranscriptionStopped,
            EventKind::TranscriptionError,
            EventKind::AppMessage,
        ] {
            subs.push(self.on(this, kind, |this, event| {
                let next = transcription::reduce(&this.transcription.get(), event, Utc::now());
                this.transcription.set_if_changed(next);
                Ok(())
            }));
        }

        subs.push(self.on(this, EventKind::MeetingSessionStateUpdated, |this, event| {
            this.session_data
                .set_if_changed(reduce_session_data(&this.session_data.get(), event));
            Ok(())
        }));

        subs.push(self.on(this, EventKind::ReceiveSettingsUpdated, |this, event| {
            if let CallEvent::ReceiveSettingsUpdated { settings } = event {
                this.receive_settings.apply(settings);
            }
            Ok(())
        }));

        subs.push(self.on(this, EventKind::TrackStarted, |this, event| {
            if let CallEvent::TrackStarted { session_id, track } = event {
                this.merge_track_state(session_id, track.kind.field(), &track.state);
            }
            Ok(())
        }));

        *self.subscriptions.lock().expect("subs mutex poisoned") = subs;

        let mut batch_subs = Vec::new();
        {
            let weak = Arc::downgrade(this);
            batch_subs.push(self.aggregator.subscribe_batch(
                [
                    EventKind::ActiveSpeakerChange,
                    EventKind::ParticipantJoined,
                    EventKind::ParticipantUpdated,
                    EventKind::ParticipantLeft,
                ],
                PARTICIPANT_BATCH_WINDOW,
                Box::new(move |batch| {
                    if let Some(this) = weak.upgrade() {
                        this.apply_participant_batch(batch);
                    }
                    Ok(())
                }),
                false,
            ));
        }
        {
            let weak = Arc::downgrade(this);
            batch_subs.push(self.aggregator.subscribe_batch(
                [
                    EventKind::WaitingParticipantAdded,
                    EventKind::WaitingParticipantUpdated,
                    EventKind::WaitingParticipantRemoved,
                ],
                PARTICIPANT_BATCH_WINDOW,
                Box::new(move |batch| {
                    if let Some(this) = weak.upgrade() {
                        this.apply_waiting_batch(batch);
                    }
                    Ok(())
                }),
                false,
            ));
        }
        *self
            .batch_subscriptions
            .lock()
            .expect("subs mutex poisoned") = batch_subs;
    }

    /// Bridge subscription helper binding a weak self reference.
    fn on(
        &self,
        this: &Arc<Self>,
        kind: EventKind,
        handler: fn(&Arc<Self>, &CallEvent) -> Result<(), crate::SyncError>,
    ) -> Subscription {
        let weak = Arc::downgrade(this);
        self.bridge.subscribe(
            kind,
            Box::new(move |event| match weak.upgrade() {
                Some(this) => handler(&this, event),
                None => Ok(()),
            }),
            false,
        )
    }

    // -----------------------------------------------------------------------
    // Event application
    // -----------------------------------------------------------------------

    fn apply_participant_batch(&self, batch: &[CallEvent]) {
        if batch.is_empty() {
            return;
        }
        for event in batch {
            match event {
                CallEvent::ParticipantJoined { participant } => {
                    self.store.apply_join(participant);
                }
                CallEvent::ParticipantUpdated { participant } => {
                    self.store.apply_update(participant);
                }
                CallEvent::ParticipantLeft { participant } => {
                    self.store.apply_leave(participant.session_id());
                }
                CallEvent::ActiveSpeakerChange { session_id } => {
                    self.store.apply_active_speaker(session_id, Utc::now());
                }
                _ => {}
            }
        }
        self.store.refresh_views();
        self.sync_recording_with_roster();
    }

    fn apply_waiting_batch(&self, batch: &[CallEvent]) {
        for event in batch {
            match event {
                CallEvent::WaitingParticipantAdded { participant } => {
                    self.store.waiting_add(participant);
                }
                CallEvent::WaitingParticipantUpdated { participant } => {
                    self.store.waiting_update(participant);
                }
                CallEvent::WaitingParticipantRemoved { id } => {
                    self.store.waiting_remove(id);
                }
                _ => {}
            }
        }
    }

    /// Fold the current set of `record`-flagged participants into the
    /// recording slice.
    fn sync_recording_with_roster(&self) {
        let recording_ids = self
            .store
            .filtered_sorted_ids(&FilterTag::Record.into(), &SortTag::None.into());
        let next = recording::sync_with_recording_participants(
            &self.recording.get(),
            &recording_ids,
            &self.store.local_id(),
        );
        self.recording.set_if_changed(next);
    }

    fn reduce_feature_slices(&self, event: &CallEvent) {
        self.network
            .set_if_changed(network::reduce(&self.network.get(), event));
        self.recording.set_if_changed(recording::reduce(
            &self.recording.get(),
            event,
            &self.store.local_id(),
            Utc::now(),
        ));
        self.transcription.set_if_changed(transcription::reduce(
            &self.transcription.get(),
            event,
            Utc::now(),
        ));
        self.session_data
            .set_if_changed(reduce_session_data(&self.session_data.get(), event));
    }

    fn refresh_meeting_state(&self) {
        self.meeting_state.set_if_changed(self.sdk.meeting_state());
    }

    /// Merge one track's state into the participant's record without
    /// clobbering its other tracks.
    fn merge_track_state(&self, session_id: &str, field: &str, state: &crate::events::TrackState) {
        let Some(record) = self.store.record(session_id) else {
            return;
        };
        let mut tracks = record
            .get("tracks")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let Some(tracks_map) = tracks.as_object_mut() else {
            return;
        };
        let entry = tracks_map
            .entry(field.to_string())
            .or_insert_with(|| json!({}));
        if let Some(entry_map) = entry.as_object_mut() {
            entry_map.insert("state".to_string(), json!(state));
        }
        self.store
            .apply_update(&ParticipantRecord::new(session_id).with("tracks", tracks));
        self.store.refresh_views();
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// One-shot init from the SDK's synchronous snapshot, used by events
    /// that imply the roster may have become available.
    fn try_init_from_snapshot(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        if let Some(snapshot) = self.sdk.participants() {
            if snapshot.has_local() {
                self.store.bulk_init(&snapshot);
                self.store.refresh_views();
                self.sync_recording_with_roster();
                self.initialized.store(true, Ordering::Release);
            }
        }
    }

    /// Poll the SDK on a fixed interval until it reports a roster with the
    /// local participant, apply it once, then stop.
    fn spawn_roster_poll(&self, this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        let task = tokio::spawn(async move {
            let mut interval = time::interval(ROSTER_POLL_INTERVAL);
            loop {
                interval.tick().await;
                let Some(this) = weak.upgrade() else { break };
                this.try_init_from_snapshot();
                if this.initialized.load(Ordering::Acquire) {
                    break;
                }
            }
        });
        *self.poll_task.lock().expect("poll mutex poisoned") = Some(task);
    }

    fn spawn_topology_fetch(&self) {
        let sdk = Arc::clone(&self.sdk);
        let network = Arc::clone(&self.network);
        tokio::spawn(async move {
            match sdk.network_topology().await {
                Ok(topology) => {
                    network.set_if_changed(network::with_topology(&network.get(), topology));
                }
                Err(e) => tracing::debug!("topology fetch failed: {e}"),
            }
        });
    }

    fn spawn_receive_settings_fetch(&self) {
        let sdk = Arc::clone(&self.sdk);
        let slice = Arc::clone(&self.receive_settings);
        tokio::spawn(async move {
            match sdk.receive_settings().await {
                Ok(settings) => slice.apply(&settings),
                Err(e) => tracing::debug!("receive-settings fetch failed: {e}"),
            }
        });
    }
}
