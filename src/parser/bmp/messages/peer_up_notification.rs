//! Peer Up Notification (type 3), §4.2.

use crate::error::BmpParseError;
use crate::models::{Asn, BgpOpenMessage, OptParam};
use crate::parser::bmp::headers::{parse_per_peer_header, BmpPerPeerHeader};
use crate::parser::bmp::split_bgp_message;
use crate::parser::utils::ReadUtils;
use bytes::{Buf, Bytes};
use std::net::Ipv4Addr;

/// The 4-octet-ASN capability, RFC 6793 §4.
const CAPABILITY_CODE_4_BYTE_ASN: u8 = 65;
/// The Capabilities optional parameter, RFC 5492 §4.
const OPT_PARAM_CAPABILITIES: u8 = 2;

#[derive(Debug, Clone)]
pub struct PeerUpNotificationMessage {
    pub peer_header: BmpPerPeerHeader,
    /// The peer's local ASN, resolved past AS_TRANS when a 4-octet-ASN capability was offered.
    pub local_asn: Asn,
    pub local_bgp_id: Ipv4Addr,
}

pub fn parse_peer_up(body: &mut Bytes) -> Result<PeerUpNotificationMessage, BmpParseError> {
    let peer_header = parse_per_peer_header(body)?;

    if peer_header.is_loc_rib {
        // No Sent/Received OPEN pair for Loc-RIB: local identity comes straight from the header.
        return Ok(PeerUpNotificationMessage {
            local_asn: peer_header.peer_as,
            local_bgp_id: peer_header.peer_bgp_id,
            peer_header,
        });
    }

    body.skip(16 + 2 + 2)?; // local address, local port, remote port
    let mut sent_open_bytes = split_bgp_message(body)?;
    let open = parse_open_message(&mut sent_open_bytes)?;
    // Received OPEN follows; this crate never needs its contents, just its span.
    let _received_open_bytes = split_bgp_message(body)?;

    let local_asn = resolve_local_asn(&open);
    Ok(PeerUpNotificationMessage {
        peer_header,
        local_asn,
        local_bgp_id: open.sender_ip,
    })
}

/// Resolves `my_as` past the AS_TRANS placeholder (§4.2): when the 2-byte field reads 23456, the
/// real ASN is found in a 4-octet-ASN capability (code 65) nested in a Capabilities optional
/// parameter (type 2).
fn resolve_local_asn(open: &BgpOpenMessage) -> Asn {
    if open.asn != Asn::TRANSITION {
        return open.asn;
    }
    for param in &open.opt_params {
        if param.param_type != OPT_PARAM_CAPABILITIES {
            continue;
        }
        let mut caps = param.param_value.clone();
        while caps.remaining() >= 2 {
            let code = match caps.read_u8() {
                Ok(c) => c,
                Err(_) => break,
            };
            let len = match caps.read_u8() {
                Ok(l) => l as usize,
                Err(_) => break,
            };
            if caps.remaining() < len {
                break;
            }
            let value = caps.split_to(len);
            if code == CAPABILITY_CODE_4_BYTE_ASN && value.len() == 4 {
                let asn = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                return Asn::from(asn);
            }
        }
    }
    open.asn
}

fn parse_open_message(msg: &mut Bytes) -> Result<BgpOpenMessage, BmpParseError> {
    msg.skip(16)?; // marker
    let _length = msg.read_u16()?;
    let msg_type = msg.read_u8()?;
    if msg_type != 1 {
        return Err(BmpParseError::InvalidCommonHeader(format!(
            "expected OPEN message (1), got type {msg_type}"
        )));
    }
    let version = msg.read_u8()?;
    let my_as = msg.read_u16()?;
    let hold_time = msg.read_u16()?;
    let sender_ip = msg.read_ipv4_address()?;
    let opt_param_len = msg.read_u8()? as usize;
    if msg.remaining() < opt_param_len {
        return Err(BmpParseError::InvalidCommonHeader(
            "truncated OPEN optional parameters".to_string(),
        ));
    }
    let mut opt_bytes = msg.split_to(opt_param_len);
    let mut opt_params = Vec::new();
    while opt_bytes.remaining() >= 2 {
        let param_type = opt_bytes.read_u8()?;
        let param_len = opt_bytes.read_u8()? as usize;
        if opt_bytes.remaining() < param_len {
            break;
        }
        let param_value = opt_bytes.split_to(param_len);
        opt_params.push(OptParam {
            param_type,
            param_value,
        });
    }
    Ok(BgpOpenMessage {
        version,
        asn: Asn::from(my_as),
        hold_time,
        sender_ip,
        opt_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn open_message(my_as: u16, bgp_id: [u8; 4], opt_params: &[u8]) -> Vec<u8> {
        let total_len = 19 + 1 + 2 + 2 + 4 + 1 + opt_params.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&(total_len as u16).to_be_bytes());
        buf.push(1); // OPEN
        buf.push(4); // version
        buf.extend_from_slice(&my_as.to_be_bytes());
        buf.extend_from_slice(&180u16.to_be_bytes()); // hold time
        buf.extend_from_slice(&bgp_id);
        buf.push(opt_params.len() as u8);
        buf.extend_from_slice(opt_params);
        buf
    }

    fn peer_up_non_loc_rib(sent_open: &[u8], received_open: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(0); // peer_type = global instance
        buf.put_u8(0);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32(0);
        buf.put_slice(&[192, 0, 2, 1]);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_slice(&[0u8; 16]); // local address
        buf.put_u16(179); // local port
        buf.put_u16(54321); // remote port
        buf.put_slice(sent_open);
        buf.put_slice(received_open);
        buf
    }

    #[test]
    fn test_loc_rib_peer_up_uses_header_identity() {
        let mut buf = BytesMut::new();
        buf.put_u8(3); // Loc-RIB
        buf.put_u8(0);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32(65055);
        buf.put_slice(&[10, 1, 1, 1]);
        buf.put_u32(0);
        buf.put_u32(0);
        let mut body = buf.freeze();
        let msg = parse_peer_up(&mut body).unwrap();
        assert_eq!(u32::from(msg.local_asn), 65055);
        assert_eq!(msg.local_bgp_id, Ipv4Addr::new(10, 1, 1, 1));
    }

    #[test]
    fn test_non_loc_rib_peer_up_plain_asn() {
        let sent = open_message(65010, [198, 51, 100, 1], &[]);
        let received = open_message(65020, [198, 51, 100, 2], &[]);
        let mut body = peer_up_non_loc_rib(&sent, &received).freeze();
        let msg = parse_peer_up(&mut body).unwrap();
        assert_eq!(u32::from(msg.local_asn), 65010);
        assert_eq!(msg.local_bgp_id, Ipv4Addr::new(198, 51, 100, 1));
    }

    #[test]
    fn test_non_loc_rib_peer_up_as_trans_resolved_via_capability() {
        // Capabilities optional param (type 2) wrapping a 4-byte-ASN capability (code 65).
        let capability = [CAPABILITY_CODE_4_BYTE_ASN, 4, 0, 1, 0xA4, 0x31]; // ASN 70001
        let mut opt_param = vec![OPT_PARAM_CAPABILITIES, capability.len() as u8];
        opt_param.extend_from_slice(&capability);
        let sent = open_message(23456, [198, 51, 100, 9], &opt_param);
        let received = open_message(65020, [198, 51, 100, 2], &[]);
        let mut body = peer_up_non_loc_rib(&sent, &received).freeze();
        let msg = parse_peer_up(&mut body).unwrap();
        assert_eq!(u32::from(msg.local_asn), 70001);
    }
}
