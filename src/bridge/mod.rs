//! Event delivery layer between the SDK binding and the state stores.
//!
//! Events flow from the SDK binding → [`EventBridge`] (immediate, per-kind
//! dispatch) and → [`ThrottledAggregator`] (windowed batches for
//! high-frequency kinds):
//! - `EventBridge`: per-kind handler registry with last-event replay for
//!   late subscribers
//! - `ThrottledAggregator`: buffers events per `(kinds, window)` scope and
//!   delivers each non-empty window once, in arrival order

mod aggregator;
mod event_bridge;

pub use aggregator::{BatchHandler, BatchSubscription, ThrottledAggregator};
pub use event_bridge::{EventBridge, EventHandler, Subscription};
