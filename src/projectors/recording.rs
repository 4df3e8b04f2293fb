//! Recording state slice.
//!
//! Two inputs feed this slice: explicit recording events, and the set of
//! participants flagged `record`. The latter covers local recordings that
//! never produce a `recording-started` event on this client: any remote
//! participant with the flag implies a running local-type recording as long
//! as the last-known type is `local` or unset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::CallEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingState {
    /// Whether an error occurred during the last recording attempt.
    pub error: bool,
    /// Whether the local participant is being recorded.
    pub is_local_participant_recorded: bool,
    pub is_recording: bool,
    /// Last applied cloud recording layout config, kept opaque.
    pub layout: Option<Value>,
    /// Whether the recording runs locally.
    pub local: Option<bool>,
    pub recording_id: Option<String>,
    /// When the `recording-started` event was received; not necessarily
    /// when the recording actually started.
    pub started_at: Option<DateTime<Utc>>,
    /// Session id of the participant who started the recording.
    pub started_by: Option<String>,
    /// Recording type (`local`, `cloud`, ...).
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Fold one event into the slice. `local_id` is the local participant's
/// session id, used to judge single-participant cloud layouts; `now` stamps
/// the start date.
pub fn reduce(
    prior: &RecordingState,
    event: &CallEvent,
    local_id: &str,
    now: DateTime<Utc>,
) -> RecordingState {
    match event {
        CallEvent::RecordingStarted(payload) => {
            let mut is_local_participant_recorded = true;
            if matches!(payload.kind.as_deref(), Some("cloud" | "cloud-beta")) {
                let preset = payload
                    .layout
                    .as_ref()
                    .and_then(|l| l.get("preset"))
                    .and_then(Value::as_str);
                let layout_session = payload
                    .layout
                    .as_ref()
                    .and_then(|l| l.get("session_id"))
                    .and_then(Value::as_str);
                if !local_id.is_empty()
                    && preset == Some("single-participant")
                    && layout_session != Some(local_id)
                {
                    is_local_participant_recorded = false;
                }
            }
            RecordingState {
                error: false,
                is_local_participant_recorded,
                is_recording: true,
                layout: payload.layout.clone(),
                local: payload.local,
                recording_id: payload.recording_id.clone(),
                started_at: Some(now),
                started_by: payload.started_by.clone(),
                kind: payload.kind.clone(),
            }
        }
        CallEvent::RecordingStopped => RecordingState {
            is_local_participant_recorded: false,
            is_recording: false,
            ..prior.clone()
        },
        CallEvent::RecordingError { .. } => RecordingState {
            error: true,
            is_local_participant_recorded: false,
            is_recording: false,
            ..prior.clone()
        },
        CallEvent::LeftMeeting | CallEvent::CallInstanceDestroyed => RecordingState::default(),
        _ => prior.clone(),
    }
}

/// Reconcile the slice with the current set of `record`-flagged participant
/// ids. Only applies while the last-known recording type is `local` or
/// unset; an explicit cloud recording is never overridden by the flags.
pub fn sync_with_recording_participants(
    prior: &RecordingState,
    recording_ids: &[String],
    local_id: &str,
) -> RecordingState {
    let has_recording_participants = !recording_ids.is_empty();
    let local_is_recording = recording_ids.iter().any(|id| id == local_id);
    let type_is_local = matches!(prior.kind.as_deref(), Some("local") | None);

    RecordingState {
        is_local_participant_recorded: if type_is_local {
            has_recording_participants
        } else {
            prior.is_local_participant_recorded
        },
        is_recording: if type_is_local {
            has_recording_participants
        } else {
            prior.is_recording
        },
        local: if type_is_local && has_recording_participants {
            Some(local_is_recording)
        } else {
            prior.local
        },
        // the record flag is only set on participants for local recordings
        kind: if has_recording_participants {
            Some("local".to_string())
        } else {
            prior.kind.clone()
        },
        ..prior.clone()
    }
}
