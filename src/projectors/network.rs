//! Network state slice: topology, quality, threshold.
//!
//! Topology is fetched once after join (and on demand while unknown) via
//! the SDK's async accessor; the fetch result and the connection events
//! funnel through the same reducer path.

use serde::{Deserialize, Serialize};

use crate::events::CallEvent;
use crate::sdk::{NetworkThreshold, NetworkTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub topology: NetworkTopology,
    /// Quality score 0..=100 as reported by the SDK.
    pub quality: u32,
    pub threshold: NetworkThreshold,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            topology: NetworkTopology::None,
            quality: 100,
            threshold: NetworkThreshold::Good,
        }
    }
}

pub fn reduce(prior: &NetworkState, event: &CallEvent) -> NetworkState {
    match event {
        CallEvent::NetworkConnection { state, kind } if state == "connected" => {
            let topology = match kind.as_str() {
                "peer-to-peer" => NetworkTopology::Peer,
                "sfu" => NetworkTopology::Sfu,
                _ => prior.topology,
            };
            NetworkState { topology, ..*prior }
        }
        CallEvent::NetworkQualityChange { quality, threshold } => NetworkState {
            quality: *quality,
            threshold: *threshold,
            ..*prior
        },
        CallEvent::LeftMeeting | CallEvent::CallInstanceDestroyed => NetworkState::default(),
        _ => *prior,
    }
}

/// Fold a fetched topology in; `None` answers from the SDK leave the cached
/// value untouched.
pub fn with_topology(prior: &NetworkState, topology: NetworkTopology) -> NetworkState {
    if topology == NetworkTopology::None {
        *prior
    } else {
        NetworkState { topology, ..*prior }
    }
}
