//! Row types shared between the pipelines (§4.5, §4.7) and the writers (§4.6, §4.8), mirroring
//! the relational schema's contract (§6 "Output: relational schema").

use super::bgp::RouteEvent;
use chrono::{DateTime, Utc};

/// One Loc-RIB route, keyed by (router_id, table_name, afi, prefix, path_id).
#[derive(Debug, Clone)]
pub struct CurrentRouteRow {
    pub router_id: String,
    pub table_name: String,
    pub event: RouteEvent,
}

/// One Adj-RIB-In route, additionally keyed by peer_address and is_post_policy.
#[derive(Debug, Clone)]
pub struct AdjRibInRow {
    pub router_id: String,
    pub peer_address: String,
    pub peer_asn: Option<u32>,
    pub peer_bgp_id: String,
    pub is_post_policy: bool,
    pub table_name: String,
    pub event: RouteEvent,
}

/// One append-only `route_events` row (§6, §4.8).
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub event_id: [u8; 32],
    pub ingest_time: DateTime<Utc>,
    pub router_id: String,
    pub table_name: String,
    pub event: RouteEvent,
    pub topic: String,
    pub bmp_raw: Option<Vec<u8>>,
}

/// A router upsert candidate (§4.6 `upsert_router`, §4.7 Peer Up handling).
#[derive(Debug, Clone, Default)]
pub struct RouterUpsert {
    pub router_id: String,
    pub router_ip: Option<String>,
    pub hostname: Option<String>,
    pub description: Option<String>,
    pub asn: Option<u32>,
    pub display_name: Option<String>,
    pub location: Option<String>,
}
