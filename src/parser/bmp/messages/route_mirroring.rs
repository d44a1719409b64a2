//! Route Mirroring (type 6), §4.2: acknowledged but not decoded further, no routes produced.

use crate::error::BmpParseError;
use crate::parser::bmp::headers::{parse_per_peer_header, BmpPerPeerHeader};
use bytes::Bytes;

pub fn parse_route_mirroring(body: &mut Bytes) -> Result<BmpPerPeerHeader, BmpParseError> {
    parse_per_peer_header(body)
}
