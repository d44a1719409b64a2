use crate::error::BmpParseError;
use crate::models::Asn;
use crate::parser::frame::ipv16_to_addr;
use crate::parser::utils::ReadUtils;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::net::{IpAddr, Ipv4Addr};

/// BMP common header, RFC 7854 §4.1: version(1)=3, msg_length(4), msg_type(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmpCommonHeader {
    pub version: u8,
    pub msg_length: u32,
    pub msg_type: BmpMsgType,
}

pub const BMP_COMMON_HEADER_LEN: usize = 6;

#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum BmpMsgType {
    RouteMonitoring = 0,
    StatisticsReport = 1,
    PeerDownNotification = 2,
    PeerUpNotification = 3,
    InitiationMessage = 4,
    TerminationMessage = 5,
    RouteMirroringMessage = 6,
}

pub fn parse_bmp_common_header(data: &mut Bytes) -> Result<BmpCommonHeader, BmpParseError> {
    let version = data.read_u8()?;
    if version != 3 {
        return Err(BmpParseError::InvalidCommonHeader(format!(
            "unsupported BMP version {version}"
        )));
    }
    let msg_length = data.read_u32()?;
    if msg_length < BMP_COMMON_HEADER_LEN as u32 {
        return Err(BmpParseError::InvalidCommonHeader(format!(
            "msg_length {msg_length} shorter than the common header itself"
        )));
    }
    let msg_type = BmpMsgType::try_from(data.read_u8()?)?;
    Ok(BmpCommonHeader {
        version,
        msg_length,
        msg_type,
    })
}

pub const PER_PEER_HEADER_LEN: usize = 42;

/// BMP per-peer header, RFC 7854 §4.2 / RFC 9069 §4.2.
///
/// The peer-flags octet is interpreted per this crate's own redesigned semantics rather than
/// the RFC's IPv6/post-policy/legacy-AS bits: bit 0x80 is the Add-Path F-bit and bit 0x40 is the
/// post-policy L-bit (§9 design note). Peer address family is instead recovered structurally
/// from the 16-byte peer-address field's zero-padding, the same heuristic the frame codec uses
/// for the OpenBMP router-IP field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BmpPerPeerHeader {
    pub peer_type: u8,
    pub peer_flags: u8,
    pub is_loc_rib: bool,
    pub has_add_path: bool,
    pub is_post_policy: bool,
    pub peer_distinguisher: [u8; 8],
    pub peer_address: Option<IpAddr>,
    pub peer_as: Asn,
    pub peer_bgp_id: Ipv4Addr,
}

impl BmpPerPeerHeader {
    /// Derives the textual identifier described in §4.2: the router ID for Loc-RIB peers
    /// (falling back to the BGP Identifier when the peer-address field is zeroed), or the
    /// neighbor's address for Adj-RIB-In peers.
    pub fn identity_text(&self) -> String {
        match self.peer_address {
            Some(addr) => addr.to_string(),
            None => self.peer_bgp_id.to_string(),
        }
    }
}

pub fn parse_per_peer_header(data: &mut Bytes) -> Result<BmpPerPeerHeader, BmpParseError> {
    if data.len() < PER_PEER_HEADER_LEN {
        return Err(BmpParseError::InvalidCommonHeader(
            "truncated per-peer header".to_string(),
        ));
    }
    let peer_type = data.read_u8()?;
    let peer_flags = data.read_u8()?;
    let has_add_path = peer_flags & 0x80 != 0;
    let is_post_policy = peer_flags & 0x40 != 0;

    let mut peer_distinguisher = [0u8; 8];
    peer_distinguisher.copy_from_slice(&data.read_n_bytes(8)?);

    let mut peer_address_bytes = [0u8; 16];
    peer_address_bytes.copy_from_slice(&data.read_n_bytes(16)?);
    let peer_address = ipv16_to_addr(&peer_address_bytes);

    let peer_as = Asn::from(data.read_u32()?);
    let peer_bgp_id = data.read_ipv4_address()?;
    let _timestamp_sec = data.read_u32()?;
    let _timestamp_usec = data.read_u32()?;

    Ok(BmpPerPeerHeader {
        peer_type,
        peer_flags,
        is_loc_rib: peer_type == 3,
        has_add_path,
        is_post_policy,
        peer_distinguisher,
        peer_address,
        peer_as,
        peer_bgp_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn sample_header(peer_type: u8, flags: u8, addr: [u8; 16]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(peer_type);
        buf.put_u8(flags);
        buf.put_slice(&[0u8; 8]); // distinguisher
        buf.put_slice(&addr);
        buf.put_u32(65001); // peer_as
        buf.put_slice(&[10, 0, 0, 1]); // peer_bgp_id
        buf.put_u32(0); // ts_sec
        buf.put_u32(0); // ts_usec
        buf.freeze()
    }

    #[test]
    fn test_loc_rib_zero_peer_address() {
        let mut data = sample_header(3, 0x00, [0u8; 16]);
        let header = parse_per_peer_header(&mut data).unwrap();
        assert!(header.is_loc_rib);
        assert!(!header.has_add_path);
        assert_eq!(header.identity_text(), "10.0.0.1");
    }

    #[test]
    fn test_add_path_and_post_policy_flags() {
        let mut data = sample_header(0, 0xC0, [0u8; 16]);
        let header = parse_per_peer_header(&mut data).unwrap();
        assert!(!header.is_loc_rib);
        assert!(header.has_add_path);
        assert!(header.is_post_policy);
    }

    #[test]
    fn test_ipv4_peer_address() {
        let mut addr = [0u8; 16];
        addr[12..16].copy_from_slice(&[192, 168, 1, 1]);
        let mut data = sample_header(0, 0x00, addr);
        let header = parse_per_peer_header(&mut data).unwrap();
        assert_eq!(header.identity_text(), "192.168.1.1");
    }
}
