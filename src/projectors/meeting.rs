//! Meeting state, session data, and error slices.
//!
//! The meeting-state slice mirrors the SDK's own coarse lifecycle enum; the
//! session-data slice carries the arbitrary per-session payload plus its
//! topology tag. Session data resets on leave and teardown; the error
//! slices reset only on teardown.

use serde::{Deserialize, Serialize};

use crate::events::CallEvent;
use crate::sdk::MeetingSessionData;

/// Last fatal call error, cleared only on full teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    pub message: String,
}

/// Last non-fatal error; a newer event of any kind replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonfatalError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

pub fn reduce_session_data(prior: &MeetingSessionData, event: &CallEvent) -> MeetingSessionData {
    match event {
        CallEvent::MeetingSessionStateUpdated { session } => session.clone(),
        CallEvent::LeftMeeting | CallEvent::CallInstanceDestroyed => MeetingSessionData::default(),
        _ => prior.clone(),
    }
}

pub fn reduce_fatal_error(prior: &Option<FatalError>, event: &CallEvent) -> Option<FatalError> {
    match event {
        CallEvent::Error { message } => Some(FatalError {
            message: message.clone(),
        }),
        CallEvent::CallInstanceDestroyed => None,
        _ => prior.clone(),
    }
}

pub fn reduce_nonfatal_error(
    prior: &Option<NonfatalError>,
    event: &CallEvent,
) -> Option<NonfatalError> {
    match event {
        CallEvent::NonfatalError { kind, message } => Some(NonfatalError {
            kind: kind.clone(),
            message: message.clone(),
        }),
        CallEvent::CallInstanceDestroyed => None,
        _ => prior.clone(),
    }
}
