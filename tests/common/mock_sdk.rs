// tests/common/mock_sdk.rs
//! Scriptable mock SDK for sync-layer integration testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use callsync::sdk::{
    CallSdk, MeetingSessionData, MeetingState, NetworkTopology, ReceiveSettings, SdkError,
    TrackSubscriptions,
};
use callsync::RosterSnapshot;

/// A mock SDK whose accessors are scripted per test and whose mutator calls
/// are recorded for assertion.
pub struct MockCallSdk {
    participants: Mutex<Option<RosterSnapshot>>,
    meeting_state: Mutex<MeetingState>,
    session: Mutex<MeetingSessionData>,
    topology: Mutex<NetworkTopology>,
    receive_settings: Mutex<ReceiveSettings>,
    destroyed: AtomicBool,
    auto_subscribe: AtomicBool,
    fail_async: AtomicBool,

    pub subscribed_tracks: Mutex<Vec<(String, TrackSubscriptions)>>,
    pub pushed_receive_settings: Mutex<Vec<ReceiveSettings>>,
}

impl Default for MockCallSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCallSdk {
    pub fn new() -> Self {
        Self {
            participants: Mutex::new(None),
            meeting_state: Mutex::new(MeetingState::New),
            session: Mutex::new(MeetingSessionData::default()),
            topology: Mutex::new(NetworkTopology::None),
            receive_settings: Mutex::new(ReceiveSettings::new()),
            destroyed: AtomicBool::new(false),
            auto_subscribe: AtomicBool::new(true),
            fail_async: AtomicBool::new(false),
            subscribed_tracks: Mutex::new(Vec::new()),
            pushed_receive_settings: Mutex::new(Vec::new()),
        }
    }

    pub fn set_participants(&self, snapshot: Option<RosterSnapshot>) {
        *self.participants.lock().unwrap() = snapshot;
    }

    pub fn set_meeting_state(&self, state: MeetingState) {
        *self.meeting_state.lock().unwrap() = state;
    }

    pub fn set_session(&self, session: MeetingSessionData) {
        *self.session.lock().unwrap() = session;
    }

    pub fn set_topology(&self, topology: NetworkTopology) {
        *self.topology.lock().unwrap() = topology;
    }

    pub fn set_receive_settings(&self, settings: ReceiveSettings) {
        *self.receive_settings.lock().unwrap() = settings;
    }

    pub fn set_auto_subscribe(&self, auto: bool) {
        self.auto_subscribe.store(auto, Ordering::Release);
    }

    /// Make every async accessor fail with [`SdkError::NotReady`].
    pub fn set_fail_async(&self, fail: bool) {
        self.fail_async.store(fail, Ordering::Release);
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    fn async_gate(&self) -> Result<(), SdkError> {
        if self.fail_async.load(Ordering::Acquire) {
            Err(SdkError::NotReady("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CallSdk for MockCallSdk {
    fn participants(&self) -> Option<RosterSnapshot> {
        self.participants.lock().unwrap().clone()
    }

    fn meeting_state(&self) -> MeetingState {
        *self.meeting_state.lock().unwrap()
    }

    fn meeting_session_state(&self) -> MeetingSessionData {
        self.session.lock().unwrap().clone()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn auto_subscribe(&self) -> bool {
        self.auto_subscribe.load(Ordering::Acquire)
    }

    async fn network_topology(&self) -> Result<NetworkTopology, SdkError> {
        self.async_gate()?;
        Ok(*self.topology.lock().unwrap())
    }

    async fn network_stats(&self) -> Result<Value, SdkError> {
        self.async_gate()?;
        Ok(json!({"latest": {}}))
    }

    async fn receive_settings(&self) -> Result<ReceiveSettings, SdkError> {
        self.async_gate()?;
        Ok(self.receive_settings.lock().unwrap().clone())
    }

    fn update_subscribed_tracks(
        &self,
        session_id: &str,
        tracks: TrackSubscriptions,
    ) -> Result<(), SdkError> {
        self.subscribed_tracks
            .lock()
            .unwrap()
            .push((session_id.to_string(), tracks));
        Ok(())
    }

    fn update_receive_settings(&self, settings: ReceiveSettings) -> Result<(), SdkError> {
        if self.is_destroyed() {
            return Err(SdkError::Destroyed);
        }
        self.pushed_receive_settings.lock().unwrap().push(settings);
        Ok(())
    }
}
