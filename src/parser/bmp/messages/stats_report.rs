//! Statistics Report (type 1), §4.2: acknowledged but not decoded further — the per-peer header
//! is parsed so the message can still be attributed to a router, but the stat-type TLVs that
//! follow produce no routes and are discarded.

use crate::error::BmpParseError;
use crate::parser::bmp::headers::{parse_per_peer_header, BmpPerPeerHeader};
use bytes::Bytes;

pub fn parse_stats_report(body: &mut Bytes) -> Result<BmpPerPeerHeader, BmpParseError> {
    parse_per_peer_header(body)
}
