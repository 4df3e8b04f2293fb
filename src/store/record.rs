//! Participant record types.
//!
//! A participant record is a path-addressable bag of fields. It is kept as a
//! JSON object map rather than a rigid struct so that the property path
//! resolver can enumerate whatever shape the SDK sends, including fields this
//! crate never heard of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Record field holding the derived most-recent-activity timestamp.
pub const LAST_ACTIVE_FIELD: &str = "last_active";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantRecord(Map<String, Value>);

impl ParticipantRecord {
    /// New record carrying only the session id.
    pub fn new(session_id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("session_id".into(), Value::String(session_id.into()));
        Self(fields)
    }

    /// Builder-style field setter, mostly for tests and fakes.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn session_id(&self) -> &str {
        self.0
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn is_local(&self) -> bool {
        self.0.get("local").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn user_name(&self) -> Option<&str> {
        self.0.get("user_name").and_then(Value::as_str)
    }

    /// Whole record as a JSON value for path computation/resolution.
    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Shallow merge at the top level: fields present in `update` replace the
    /// prior field wholesale, nested objects included. Fields absent from
    /// `update` are left untouched.
    pub fn merge_update(&mut self, update: &ParticipantRecord) {
        for (key, value) in &update.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn set_last_active(&mut self, at: DateTime<Utc>) {
        self.0
            .insert(LAST_ACTIVE_FIELD.into(), json!(at.to_rfc3339()));
    }
}

// ---------------------------------------------------------------------------
// Waiting participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Full,
    Lobby,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitingAccess {
    pub level: AccessLevel,
}

/// A participant waiting for admission. Lifecycle is independent from the
/// main roster; removal resets the record to [`WaitingParticipant::blank`]
/// instead of deleting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingParticipant {
    pub id: String,
    pub name: String,
    pub awaiting_access: AwaitingAccess,
}

impl WaitingParticipant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            awaiting_access: AwaitingAccess::default(),
        }
    }

    /// The default placeholder a removed waiting participant resets to.
    pub fn blank(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            awaiting_access: AwaitingAccess {
                level: AccessLevel::Full,
            },
        }
    }
}
