//! The flat, string-rendered output of the BGP UPDATE parser (§4.3), shared verbatim by the
//! state pipeline (current-route upsert/delete) and the history pipeline (append-only event row).

use std::collections::BTreeMap;

/// Announce or withdraw, matching the `action char` column in both `current_routes` and
/// `route_events` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    Announce,
    Withdraw,
}

impl RouteAction {
    pub const fn as_char(&self) -> char {
        match self {
            RouteAction::Announce => 'A',
            RouteAction::Withdraw => 'D',
        }
    }
}

/// One decoded prefix-level event out of a single BGP UPDATE (§4.3 "Outputs").
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEvent {
    pub afi: crate::models::Afi,
    pub prefix: crate::models::NetworkPrefix,
    pub path_id: u32,
    pub action: RouteAction,
    pub nexthop: Option<String>,
    pub as_path: Option<String>,
    pub origin: Option<String>,
    pub origin_asn: Option<u32>,
    pub local_pref: Option<u32>,
    pub med: Option<u32>,
    pub communities_std: Vec<String>,
    pub communities_ext: Vec<String>,
    pub communities_large: Vec<String>,
    /// Opaque/unrecognized path attributes, hex-encoded value keyed by decimal attribute type.
    pub unknown_attrs: BTreeMap<u8, String>,
}

impl RouteEvent {
    pub fn prefix_text(&self) -> String {
        self.prefix.to_string()
    }

    /// Renders [`Self::unknown_attrs`] as the `attrs jsonb` column shared by `current_routes`,
    /// `adj_rib_in`, and `route_events` (§6) — string keys since jsonb object keys can't be numeric.
    #[cfg(feature = "serde_json")]
    pub fn attrs_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.unknown_attrs
                .iter()
                .map(|(type_code, hex)| (type_code.to_string(), serde_json::Value::String(hex.clone())))
                .collect(),
        )
    }
}
