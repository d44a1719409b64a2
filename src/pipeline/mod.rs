/*!
Pipelines turn decoded BMP/BGP events into the two writer-facing streams described in §4.5-§4.8:
current-route state (Loc-RIB + Adj-RIB-In) and append-only history. Both pipelines share the same
batch/flush/commit shape (§5 "Scheduling model") but accumulate different row types, so the shape
lives here and `state`/`history` each supply their own writer trait implementation.
*/
pub mod decode;
pub mod history;
pub mod state;

use crate::models::{Afi, RouteEvent};
use std::collections::HashMap;

/// One decoded BMP message's worth of routing-table mutation, keyed so that a single broker
/// record carrying both Loc-RIB and Adj-RIB-In content never suffers last-writer-wins corruption
/// between the two logical streams (§4.5).
#[derive(Debug, Clone, Default)]
pub struct ProcessedRecord {
    pub loc_routes: Vec<crate::models::CurrentRouteRow>,
    pub adj_routes: Vec<crate::models::AdjRibInRow>,
    pub loc_action: Option<ControlAction>,
    pub adj_action: Option<ControlAction>,
}

/// A non-route-data event that forces an immediate flush before it executes (§4.5).
#[derive(Debug, Clone)]
pub enum ControlAction {
    Eor {
        router_id: String,
        table_name: String,
        afi: Afi,
    },
    AdjRibInEor {
        router_id: String,
        peer_address: String,
        table_name: String,
        afi: Afi,
    },
    PeerUp {
        router: crate::models::RouterUpsert,
        table_name: String,
    },
    AdjRibInPeerUp {
        router_id: String,
        peer_address: String,
        peer_asn: Option<u32>,
    },
    PeerDown {
        router_id: String,
        table_name: Option<String>,
    },
    AdjRibInPeerDown {
        router_id: String,
        peer_address: String,
    },
}

/// Maps an OpenBMP `router_hash` to the real router BGP id learned from a non-Loc-RIB Peer Up's
/// Sent OPEN (§4.5 "the pipeline maintains an in-memory map"). Session loss purges entries
/// implicitly: a lost session's next Peer Up simply repopulates the slot.
#[derive(Debug, Default)]
pub struct RouterIdentityCache {
    by_hash: HashMap<[u8; 16], String>,
    asn_by_router: HashMap<String, u32>,
}

impl RouterIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, router_hash: [u8; 16], router_id: String) {
        self.by_hash.insert(router_hash, router_id);
    }

    pub fn resolve(&self, router_hash: &[u8; 16]) -> Option<&String> {
        self.by_hash.get(router_hash)
    }

    /// Returns `true` when `asn` is new for `router_id` (an AS migration, or first sighting) and
    /// records it, so the caller knows whether a fresh router upsert is warranted (§4.7).
    pub fn note_asn(&mut self, router_id: &str, asn: u32) -> bool {
        match self.asn_by_router.get(router_id) {
            Some(&existing) if existing == asn => false,
            _ => {
                self.asn_by_router.insert(router_id.to_string(), asn);
                true
            }
        }
    }
}

/// Renders an [`RouteEvent`]'s AFI the way metric labels and log lines in §6 expect ("4"/"6").
pub fn afi_label(afi: Afi) -> &'static str {
    match afi {
        Afi::Ipv4 => "4",
        Afi::Ipv6 => "6",
    }
}

pub fn action_label(event: &RouteEvent) -> &'static str {
    match event.action {
        crate::models::RouteAction::Announce => "A",
        crate::models::RouteAction::Withdraw => "D",
    }
}
