//! Peer Down Notification (type 2), §4.2.

use crate::error::BmpParseError;
use crate::parser::bmp::headers::{parse_per_peer_header, BmpPerPeerHeader};
use crate::parser::bmp::{parse_tlvs, Tlv};
use crate::parser::utils::ReadUtils;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct PeerDownNotificationMessage {
    pub peer_header: BmpPerPeerHeader,
    pub reason_code: u8,
    pub tlvs: Vec<Tlv>,
    /// Loc-RIB table name from the type-0 trailing TLV, when present (mirrors
    /// `route_monitoring::parse_route_monitoring`).
    pub table_name: Option<String>,
}

pub fn parse_peer_down(body: &mut Bytes) -> Result<PeerDownNotificationMessage, BmpParseError> {
    let peer_header = parse_per_peer_header(body)?;
    let reason_code = body.read_u8()?;
    let tlvs = if peer_header.is_loc_rib {
        parse_tlvs(body)?
    } else {
        Vec::new()
    };
    let table_name = tlvs
        .iter()
        .find(|t| t.typ == 0)
        .map(|t| String::from_utf8_lossy(&t.value).into_owned());
    Ok(PeerDownNotificationMessage {
        peer_header,
        reason_code,
        tlvs,
        table_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_loc_rib_peer_down_reason_and_tlvs() {
        let mut buf = BytesMut::new();
        buf.put_u8(3); // peer_type = Loc-RIB
        buf.put_u8(0);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32(0);
        buf.put_slice(&[10, 0, 0, 1]);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u8(1); // reason code: local system closed session
        buf.put_u16(0); // TLV type 0
        buf.put_u16(4);
        buf.put_slice(b"rib1");
        let mut body = buf.freeze();
        let msg = parse_peer_down(&mut body).unwrap();
        assert_eq!(msg.reason_code, 1);
        assert_eq!(msg.tlvs.len(), 1);
        assert_eq!(msg.table_name.as_deref(), Some("rib1"));
    }
}
