//! Transcription state slice.
//!
//! Transcript lines arrive as app-messages from the reserved
//! `transcription` sender. A client that joined after the
//! `transcription-started` event never sees that event, so receipt of a
//! transcript message alone flips `is_transcribing` on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{
    default_transcription_language, default_transcription_model, CallEvent,
};

/// Reserved app-message sender id carrying transcript lines.
pub const TRANSCRIPTION_SENDER_ID: &str = "transcription";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionState {
    /// Whether an error occurred during the last transcription attempt.
    pub error: bool,
    pub is_transcribing: bool,
    pub model: String,
    pub language: String,
    /// When the `transcription-started` event was received.
    pub started_at: Option<DateTime<Utc>>,
    pub started_by: Option<String>,
    pub updated_by: Option<String>,
    /// All transcript lines received so far.
    pub transcriptions: Vec<TranscriptMessage>,
}

impl Default for TranscriptionState {
    fn default() -> Self {
        Self {
            error: false,
            is_transcribing: false,
            model: default_transcription_model(),
            language: default_transcription_language(),
            started_at: None,
            started_by: None,
            updated_by: None,
            transcriptions: Vec::new(),
        }
    }
}

pub fn reduce(prior: &TranscriptionState, event: &CallEvent, now: DateTime<Utc>) -> TranscriptionState {
    match event {
        CallEvent::TranscriptionStarted(payload) => TranscriptionState {
            error: false,
            is_transcribing: true,
            model: payload.model.clone(),
            language: payload.language.clone(),
            started_at: Some(now),
            started_by: payload.started_by.clone(),
            updated_by: None,
            transcriptions: prior.transcriptions.clone(),
        },
        CallEvent::TranscriptionStopped { updated_by } => TranscriptionState {
            is_transcribing: false,
            updated_by: updated_by.clone(),
            ..prior.clone()
        },
        CallEvent::TranscriptionError { .. } => TranscriptionState {
            error: true,
            is_transcribing: false,
            ..prior.clone()
        },
        CallEvent::AppMessage { from_id, data } if from_id == TRANSCRIPTION_SENDER_ID => {
            match serde_json::from_value::<TranscriptMessage>(data.clone()) {
                Ok(message) => {
                    let mut transcriptions = prior.transcriptions.clone();
                    transcriptions.push(message);
                    TranscriptionState {
                        // a transcript line proves a transcription is running,
                        // even if this client never saw the started event
                        is_transcribing: true,
                        transcriptions,
                        ..prior.clone()
                    }
                }
                Err(e) => {
                    tracing::debug!("undecodable transcription app-message: {e}");
                    prior.clone()
                }
            }
        }
        // leaving stops the flag but keeps the collected transcript
        CallEvent::LeftMeeting => TranscriptionState {
            is_transcribing: false,
            ..prior.clone()
        },
        CallEvent::CallInstanceDestroyed => TranscriptionState::default(),
        _ => prior.clone(),
    }
}
