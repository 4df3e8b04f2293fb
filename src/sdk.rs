//! External call SDK surface.
//!
//! The core never talks to a concrete SDK binding. Everything it needs is
//! behind the [`CallSdk`] trait: synchronous accessors for cached SDK state,
//! asynchronous fetches, and the two mutators the state layer forwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::store::record::ParticipantRecord;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("sdk not ready: {0}")]
    NotReady(String),
    #[error("call instance destroyed")]
    Destroyed,
    #[error("sdk error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Cached SDK state shapes
// ---------------------------------------------------------------------------

/// Coarse meeting lifecycle state mirrored from the SDK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeetingState {
    #[default]
    New,
    Loading,
    Loaded,
    JoiningMeeting,
    JoinedMeeting,
    LeftMeeting,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTopology {
    #[default]
    None,
    Peer,
    Sfu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkThreshold {
    #[default]
    Good,
    Low,
    VeryLow,
}

/// Arbitrary per-session data plus the topology tag it was observed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingSessionData {
    pub data: Value,
    pub topology: NetworkTopology,
}

impl Default for MeetingSessionData {
    fn default() -> Self {
        Self {
            data: Value::Null,
            topology: NetworkTopology::None,
        }
    }
}

/// Full roster snapshot as reported by the SDK's synchronous accessor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterSnapshot {
    pub participants: Vec<ParticipantRecord>,
}

impl RosterSnapshot {
    pub fn new(participants: Vec<ParticipantRecord>) -> Self {
        Self { participants }
    }

    /// The snapshot is usable once the SDK knows about the local participant.
    pub fn has_local(&self) -> bool {
        self.participants.iter().any(|p| p.is_local())
    }

    pub fn local(&self) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| p.is_local())
    }
}

/// Per-participant receive settings, keyed by session id. The reserved
/// `"base"` entry is the fallback applied to ids without own settings.
pub type ReceiveSettings = BTreeMap<String, Value>;

/// Reserved receive-settings key for the base fallback entry.
pub const BASE_RECEIVE_SETTINGS_ID: &str = "base";

/// Per-track subscription flags forwarded to the SDK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSubscriptions {
    pub audio: bool,
    pub video: bool,
    pub screen_audio: bool,
    pub screen_video: bool,
}

impl TrackSubscriptions {
    pub fn all() -> Self {
        Self {
            audio: true,
            video: true,
            screen_audio: true,
            screen_video: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The surface of the call SDK consumed by the sync layer.
#[async_trait]
pub trait CallSdk: Send + Sync {
    /// Current roster snapshot, or `None` while the SDK has not produced one.
    fn participants(&self) -> Option<RosterSnapshot>;

    fn meeting_state(&self) -> MeetingState;

    fn meeting_session_state(&self) -> MeetingSessionData;

    fn is_destroyed(&self) -> bool;

    /// Whether the SDK subscribes to remote tracks automatically.
    fn auto_subscribe(&self) -> bool;

    async fn network_topology(&self) -> Result<NetworkTopology, SdkError>;

    async fn network_stats(&self) -> Result<Value, SdkError>;

    async fn receive_settings(&self) -> Result<ReceiveSettings, SdkError>;

    fn update_subscribed_tracks(
        &self,
        session_id: &str,
        tracks: TrackSubscriptions,
    ) -> Result<(), SdkError>;

    fn update_receive_settings(&self, settings: ReceiveSettings) -> Result<(), SdkError>;
}
