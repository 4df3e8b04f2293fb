//! callsync: reactive state synchronization for real-time call SDKs.
//!
//! Mirrors a call SDK's event stream into a fine-grained observable state
//! graph: an ordered participant roster with per-field watch cells, plus
//! feature slices for network, recording, transcription, waiting room, and
//! meeting session state. Consumers subscribe to exactly the cells they
//! care about; a cell only notifies when its resolved value actually
//! changed, compared by deep equality.
//!
//! Data flow:
//!
//! ```text
//! SDK events -> CallStateSync::dispatch
//!                 |- EventBridge          (immediate, per-kind handlers)
//!                 '- ThrottledAggregator  (100ms batches for bursty kinds)
//!                       '- ParticipantStore / feature slices -> watch cells
//! ```
//!
//! [`session::CallStateSync`] is the entry point; [`sdk::CallSdk`] is the
//! trait a concrete SDK binding implements.

pub mod bridge;
pub mod events;
pub mod paths;
pub mod projectors;
pub mod sdk;
pub mod session;
pub mod store;

use thiserror::Error;

/// Errors surfaced by event and batch handlers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("handler error: {0}")]
    Handler(String),

    #[error("sdk error: {0}")]
    Sdk(#[from] sdk::SdkError),

    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub use bridge::{EventBridge, ThrottledAggregator};
pub use events::{CallEvent, EventKind};
pub use sdk::{CallSdk, MeetingState, RosterSnapshot};
pub use session::CallStateSync;
pub use store::record::ParticipantRecord;
pub use store::ParticipantStore;
