//! Call event model.
//!
//! `CallEvent` is the normalized shape of everything the external call SDK
//! can emit. `EventKind` is the payload-free discriminant used to scope
//! subscriptions on the bridge and the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sdk::{MeetingSessionData, NetworkThreshold, ReceiveSettings, RosterSnapshot};
use crate::store::record::{ParticipantRecord, WaitingParticipant};

// ---------------------------------------------------------------------------
// Track payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Audio,
    Video,
    ScreenAudio,
    ScreenVideo,
}

impl TrackKind {
    /// Field name under the record's `tracks` object.
    pub fn field(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::ScreenAudio => "screenAudio",
            TrackKind::ScreenVideo => "screenVideo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Blocked,
    Off,
    Sendable,
    Loading,
    Interrupted,
    Playable,
}

impl TrackState {
    /// A track counts as off when it is not sending nor about to send.
    pub fn is_off(&self) -> bool {
        matches!(
            self,
            TrackState::Blocked | TrackState::Off | TrackState::Interrupted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub state: TrackState,
}

// ---------------------------------------------------------------------------
// Feature event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStartedPayload {
    /// Whether the recording runs on the local machine.
    #[serde(default)]
    pub local: Option<bool>,
    #[serde(default)]
    pub recording_id: Option<String>,
    /// Session id of the participant who started the recording.
    #[serde(default)]
    pub started_by: Option<String>,
    /// Recording type as reported by the SDK (`local`, `cloud`, ...).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Cloud recording layout config, kept opaque.
    #[serde(default)]
    pub layout: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionStartedPayload {
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default = "default_transcription_language")]
    pub language: String,
    #[serde(default)]
    pub started_by: Option<String>,
}

pub(crate) fn default_transcription_model() -> String {
    "general".to_string()
}

pub(crate) fn default_transcription_language() -> String {
    "en".to_string()
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One normalized event from the call SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CallEvent {
    JoiningMeeting {
        at: DateTime<Utc>,
    },
    JoinedMeeting {
        participants: RosterSnapshot,
    },
    LeftMeeting,
    ParticipantJoined {
        participant: ParticipantRecord,
    },
    ParticipantUpdated {
        participant: ParticipantRecord,
    },
    ParticipantLeft {
        participant: ParticipantRecord,
    },
    ActiveSpeakerChange {
        session_id: String,
    },
    TrackStarted {
        session_id: String,
        track: TrackInfo,
    },
    NetworkConnection {
        /// Connection lifecycle tag, e.g. `connected`.
        state: String,
        /// Transport type, `peer-to-peer` or `sfu`.
        #[serde(rename = "type")]
        kind: String,
    },
    NetworkQualityChange {
        quality: u32,
        threshold: NetworkThreshold,
    },
    RecordingStarted(RecordingStartedPayload),
    RecordingStopped,
    RecordingError {
        message: String,
    },
    TranscriptionStarted(TranscriptionStartedPayload),
    TranscriptionStopped {
        updated_by: Option<String>,
    },
    TranscriptionError {
        message: String,
    },
    AppMessage {
        from_id: String,
        data: Value,
    },
    WaitingParticipantAdded {
        participant: WaitingParticipant,
    },
    WaitingParticipantUpdated {
        participant: WaitingParticipant,
    },
    WaitingParticipantRemoved {
        id: String,
    },
    ReceiveSettingsUpdated {
        settings: ReceiveSettings,
    },
    MeetingSessionStateUpdated {
        session: MeetingSessionData,
    },
    Error {
        message: String,
    },
    NonfatalError {
        #[serde(rename = "type")]
        kind: String,
        message: String,
    },
    CallInstanceDestroyed,
}

/// Payload-free event discriminant, used as subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    JoiningMeeting,
    JoinedMeeting,
    LeftMeeting,
    ParticipantJoined,
    ParticipantUpdated,
    ParticipantLeft,
    ActiveSpeakerChange,
    TrackStarted,
    NetworkConnection,
    NetworkQualityChange,
    RecordingStarted,
    RecordingStopped,
    RecordingError,
    TranscriptionStarted,
    TranscriptionStopped,
    TranscriptionError,
    AppMessage,
    WaitingParticipantAdded,
    WaitingParticipantUpdated,
    WaitingParticipantRemoved,
    ReceiveSettingsUpdated,
    MeetingSessionStateUpdated,
    Error,
    NonfatalError,
    CallInstanceDestroyed,
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CallEvent::JoiningMeeting { .. } => EventKind::JoiningMeeting,
            CallEvent::JoinedMeeting { .. } => EventKind::JoinedMeeting,
            CallEvent::LeftMeeting => EventKind::LeftMeeting,
            CallEvent::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            CallEvent::ParticipantUpdated { .. } => EventKind::ParticipantUpdated,
            CallEvent::ParticipantLeft { .. } => EventKind::ParticipantLeft,
            CallEvent::ActiveSpeakerChange { .. } => EventKind::ActiveSpeakerChange,
            CallEvent::TrackStarted { .. } => EventKind::TrackStarted,
            CallEvent::NetworkConnection { .. } => EventKind::NetworkConnection,
            CallEvent::NetworkQualityChange { .. } => EventKind::NetworkQualityChange,
            CallEvent::RecordingStarted(_) => EventKind::RecordingStarted,
            CallEvent::RecordingStopped => EventKind::RecordingStopped,
            CallEvent::RecordingError { .. } => EventKind::RecordingError,
            CallEvent::TranscriptionStarted(_) => EventKind::TranscriptionStarted,
            CallEvent::TranscriptionStopped { .. } => EventKind::TranscriptionStopped,
            CallEvent::TranscriptionError { .. } => EventKind::TranscriptionError,
            CallEvent::AppMessage { .. } => EventKind::AppMessage,
            CallEvent::WaitingParticipantAdded { .. } => EventKind::WaitingParticipantAdded,
            CallEvent::WaitingParticipantUpdated { .. } => EventKind::WaitingParticipantUpdated,
            CallEvent::WaitingParticipantRemoved { .. } => EventKind::WaitingParticipantRemoved,
            CallEvent::ReceiveSettingsUpdated { .. } => EventKind::ReceiveSettingsUpdated,
            CallEvent::MeetingSessionStateUpdated { .. } => EventKind::MeetingSessionStateUpdated,
            CallEvent::Error { .. } => EventKind::Error,
            CallEvent::NonfatalError { .. } => EventKind::NonfatalError,
            CallEvent::CallInstanceDestroyed => EventKind::CallInstanceDestroyed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_serialized_tag() {
        let ev = CallEvent::ActiveSpeakerChange {
            session_id: "abc".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "active-speaker-change");
        assert_eq!(ev.kind(), EventKind::ActiveSpeakerChange);
    }

    #[test]
    fn network_connection_round_trips_alongside_the_tag() {
        let ev = CallEvent::NetworkConnection {
            state: "connected".into(),
            kind: "sfu".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "network-connection");
        assert_eq!(json["state"], "connected");
        assert_eq!(json["type"], "sfu");

        let back: CallEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn track_off_states() {
        assert!(TrackState::Blocked.is_off());
        assert!(TrackState::Off.is_off());
        assert!(TrackState::Interrupted.is_off());
        assert!(!TrackState::Playable.is_off());
        assert!(!TrackState::Sendable.is_off());
        assert!(!TrackState::Loading.is_off());
    }
}
