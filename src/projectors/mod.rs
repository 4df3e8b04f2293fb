//! Domain state projectors.
//!
//! Each submodule is a pure reducer over one feature's events:
//! `(prior state, event) -> next state`, invoked by the session wiring via
//! the event bridge or the aggregator. The slices are small immutable
//! records published through equality-gated cells, so a reduce that lands
//! on the same state notifies nobody.

pub mod meeting;
pub mod network;
pub mod receive_settings;
pub mod recording;
pub mod transcription;
