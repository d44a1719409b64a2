//! Route Monitoring (type 0), §4.2.

use crate::error::BmpParseError;
use crate::parser::bmp::headers::{parse_per_peer_header, BmpPerPeerHeader};
use crate::parser::bmp::{parse_tlvs, split_bgp_message};
use bytes::{Buf, Bytes};

#[derive(Debug, Clone)]
pub struct RouteMonitoringMessage {
    pub peer_header: BmpPerPeerHeader,
    /// The full BGP message (19-byte header + body), unparsed — the UPDATE parser (§4.3) and
    /// the event-ID hasher (§4.4) both need the exact bytes.
    pub bgp_message_raw: Bytes,
    /// Loc-RIB table name from the type-0 trailing TLV, when present.
    pub table_name: Option<String>,
}

pub fn parse_route_monitoring(body: &mut Bytes) -> Result<RouteMonitoringMessage, BmpParseError> {
    let peer_header = parse_per_peer_header(body)?;

    if peer_header.is_loc_rib {
        let bgp_message_raw = split_bgp_message(body)?;
        let tlvs = parse_tlvs(body)?;
        let table_name = tlvs
            .iter()
            .find(|t| t.typ == 0)
            .map(|t| String::from_utf8_lossy(&t.value).into_owned());
        Ok(RouteMonitoringMessage {
            peer_header,
            bgp_message_raw,
            table_name,
        })
    } else {
        let bgp_message_raw = body.split_to(body.remaining());
        Ok(RouteMonitoringMessage {
            peer_header,
            bgp_message_raw,
            table_name: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn peer_header_bytes(peer_type: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(peer_type);
        buf.put_u8(0x00);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32(65001);
        buf.put_slice(&[10, 0, 0, 1]);
        buf.put_u32(0);
        buf.put_u32(0);
        buf
    }

    #[test]
    fn test_non_loc_rib_takes_whole_remainder() {
        let mut buf = peer_header_bytes(0);
        buf.put_slice(&[1, 2, 3, 4, 5]);
        let mut body = buf.freeze();
        let msg = parse_route_monitoring(&mut body).unwrap();
        assert_eq!(msg.bgp_message_raw.as_ref(), &[1, 2, 3, 4, 5]);
        assert!(msg.table_name.is_none());
    }

    #[test]
    fn test_loc_rib_splits_bgp_message_and_reads_table_name_tlv() {
        let mut buf = peer_header_bytes(3);
        let mut bgp = vec![0u8; 16];
        bgp.extend_from_slice(&23u16.to_be_bytes()); // length
        bgp.push(4); // KEEPALIVE
        bgp.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]); // 4 filler bytes -> total 23
        buf.put_slice(&bgp);
        buf.put_u16(0); // TLV type 0 (table name)
        buf.put_u16(4);
        buf.put_slice(b"rib1");
        let mut body = buf.freeze();
        let msg = parse_route_monitoring(&mut body).unwrap();
        assert_eq!(msg.bgp_message_raw.len(), 23);
        assert_eq!(msg.table_name.as_deref(), Some("rib1"));
    }
}
