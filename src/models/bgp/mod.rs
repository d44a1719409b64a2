//! BGP message and route-event model types.
//!
//! Unlike the attribute-rich models a general-purpose MRT/BGP library needs, this crate only
//! ever needs enough of a BGP message to (a) extract the fields Peer Up/Down care about from an
//! OPEN/NOTIFICATION, and (b) turn an UPDATE into the flat, string-rendered [RouteEvent] rows the
//! state and history pipelines persist (§4.3).

mod route_event;

pub use route_event::*;

use crate::models::Asn;
use bytes::Bytes;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq)]
pub enum BgpMessage {
    Open(BgpOpenMessage),
    Update(BgpUpdateMessage),
    Notification(BgpNotificationMessage),
    KeepAlive,
}

/// BGP OPEN message, RFC 4271 §4.2.
#[derive(Debug, Clone, PartialEq)]
pub struct BgpOpenMessage {
    pub version: u8,
    /// The 2-byte My Autonomous System field, *not* yet resolved against AS_TRANS; callers that
    /// need the real ASN must check `asn == Asn::TRANSITION` and consult `opt_params` (§4.2).
    pub asn: Asn,
    pub hold_time: u16,
    pub sender_ip: Ipv4Addr,
    pub opt_params: Vec<OptParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptParam {
    pub param_type: u8,
    pub param_value: Bytes,
}

/// BMP Route Monitoring / Route Mirroring wrap a full BGP UPDATE. The withdrawn/NLRI/attribute
/// decoding that produces [RouteEvent] rows lives in [crate::parser::bgp], not here: this struct
/// only carries the raw sub-slices so the caller can decide how to process them (e.g. the
/// history pipeline hashes `path_attrs_raw` unchanged while the state pipeline decodes it).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BgpUpdateMessage {
    pub withdrawn_prefixes_raw: Bytes,
    pub path_attrs_raw: Bytes,
    pub nlri_raw: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgpNotificationMessage {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}
