/*!
The binary frame codec (§4.1): decodes the outer OpenBMP envelope, in either of its two wire
variants, into a BMP payload plus whatever router identity the envelope carries.
*/
use crate::error::FrameError;
use crate::parser::utils::ReadUtils;
use bytes::{Buf, Bytes};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const OPENBMP_V2_VERSION: u16 = 2;
pub const OPENBMP_V17_MAGIC: &[u8; 4] = b"OBMP";

/// Result of decoding one OpenBMP-wrapped record (§4.1).
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub bmp_bytes: Bytes,
    pub router_ip: Option<IpAddr>,
    pub router_hash: Option<[u8; 16]>,
}

/// Decodes one OpenBMP envelope, enforcing `max_payload_bytes` against the declared message
/// length before any payload allocation.
pub fn decode_frame(data: &[u8], max_payload_bytes: usize) -> Result<DecodedFrame, FrameError> {
    if data.len() < 4 {
        return Err(FrameError::FrameTooShort);
    }

    if data[0] == 0x00 && data[1] == 0x02 {
        decode_v2(data, max_payload_bytes)
    } else if &data[0..4] == OPENBMP_V17_MAGIC {
        decode_v17(data, max_payload_bytes)
    } else {
        Err(FrameError::BadMagicOrVersion)
    }
}

fn decode_v2(data: &[u8], max_payload_bytes: usize) -> Result<DecodedFrame, FrameError> {
    const HEADER_LEN: usize = 10;
    if data.len() < HEADER_LEN {
        return Err(FrameError::FrameTooShort);
    }
    let mut header = &data[0..HEADER_LEN];
    let _version = header.read_u16().map_err(|_| FrameError::FrameTooShort)?;
    let collector_hash = header.read_u32().map_err(|_| FrameError::FrameTooShort)?;
    let msg_len = header.read_u32().map_err(|_| FrameError::FrameTooShort)? as usize;

    if msg_len == 0 {
        return Err(FrameError::ZeroMsgLen);
    }
    if msg_len > max_payload_bytes {
        return Err(FrameError::MsgLenExceedsLimit);
    }
    let payload = &data[HEADER_LEN..];
    if payload.len() < msg_len {
        return Err(FrameError::FrameTruncated);
    }

    // V2 has no dedicated router-identity field; best-effort, treat a non-zero collector_hash
    // as an IPv4 router address (the convention test fixtures and collectors in this lineage
    // rely on), matching the "IPv4 in leading bytes" encoding used by the V17 router_ip field.
    let router_ip = if collector_hash != 0 {
        Some(IpAddr::V4(Ipv4Addr::from(collector_hash)))
    } else {
        None
    };

    Ok(DecodedFrame {
        bmp_bytes: Bytes::copy_from_slice(&payload[..msg_len]),
        router_ip,
        router_hash: None,
    })
}

fn decode_v17(data: &[u8], max_payload_bytes: usize) -> Result<DecodedFrame, FrameError> {
    const FIXED_PREFIX_LEN: usize = 12;
    if data.len() < FIXED_PREFIX_LEN {
        return Err(FrameError::FrameTooShort);
    }
    let mut cursor = &data[4..FIXED_PREFIX_LEN];
    let _major = cursor.read_u8().map_err(|_| FrameError::FrameTooShort)?;
    let _minor = cursor.read_u8().map_err(|_| FrameError::FrameTooShort)?;
    let header_len = cursor.read_u16().map_err(|_| FrameError::FrameTooShort)? as usize;
    let msg_len = cursor.read_u32().map_err(|_| FrameError::FrameTooShort)? as usize;

    if data.len() < FIXED_PREFIX_LEN + 10 {
        return Err(FrameError::FrameTooShort);
    }
    let mut trailer = &data[FIXED_PREFIX_LEN..];
    let _flags = trailer.read_u8().map_err(|_| FrameError::FrameTooShort)?;
    let _obj_type = trailer.read_u8().map_err(|_| FrameError::FrameTooShort)?;
    let _ts_sec = trailer.read_u32().map_err(|_| FrameError::FrameTooShort)?;
    let _ts_usec = trailer.read_u32().map_err(|_| FrameError::FrameTooShort)?;

    if trailer.remaining() < 16 + 2 {
        return Err(FrameError::FrameTooShort);
    }
    let mut collector_hash = [0u8; 16];
    collector_hash.copy_from_slice(&trailer[0..16]);
    trailer.skip(16).map_err(|_| FrameError::FrameTooShort)?;

    let admin_id_len = trailer.read_u16().map_err(|_| FrameError::FrameTooShort)? as usize;
    if trailer.remaining() < admin_id_len {
        return Err(FrameError::FrameTooShort);
    }
    trailer.skip(admin_id_len).map_err(|_| FrameError::FrameTooShort)?;

    if trailer.remaining() < 16 + 16 + 2 {
        return Err(FrameError::FrameTooShort);
    }
    let mut router_hash = [0u8; 16];
    router_hash.copy_from_slice(&trailer[0..16]);
    trailer.skip(16).map_err(|_| FrameError::FrameTooShort)?;

    let mut router_ip_bytes = [0u8; 16];
    router_ip_bytes.copy_from_slice(&trailer[0..16]);
    trailer.skip(16).map_err(|_| FrameError::FrameTooShort)?;

    let router_group_len = trailer.read_u16().map_err(|_| FrameError::FrameTooShort)? as usize;
    if trailer.remaining() < router_group_len {
        return Err(FrameError::FrameTooShort);
    }
    trailer.skip(router_group_len).map_err(|_| FrameError::FrameTooShort)?;
    let _row_count = trailer.read_u32().map_err(|_| FrameError::FrameTooShort)?;

    if msg_len == 0 {
        return Err(FrameError::ZeroMsgLen);
    }
    if msg_len > max_payload_bytes {
        return Err(FrameError::MsgLenExceedsLimit);
    }
    if header_len > data.len() {
        return Err(FrameError::FrameTruncated);
    }
    let payload = &data[header_len..];
    if payload.len() < msg_len {
        return Err(FrameError::FrameTruncated);
    }

    Ok(DecodedFrame {
        bmp_bytes: Bytes::copy_from_slice(&payload[..msg_len]),
        router_ip: ipv16_to_addr(&router_ip_bytes),
        router_hash: Some(router_hash),
    })
}

/// Handles the four address encodings a raw 16-byte field is known to carry across both the
/// V17 trailer's router-IP field and the BMP per-peer header's peer-address field (§4.1, §4.2):
/// IPv4 in the first four bytes with trailing zeros, IPv4 in the last four bytes with leading
/// zeros, IPv4-mapped IPv6 (`::ffff:a.b.c.d`), and full IPv6. `None` when the field is all zero.
pub(crate) fn ipv16_to_addr(bytes: &[u8; 16]) -> Option<IpAddr> {
    if bytes.iter().all(|&b| b == 0) {
        return None;
    }
    if bytes[4..16].iter().all(|&b| b == 0) {
        return Some(IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])));
    }
    if bytes[0..12].iter().all(|&b| b == 0) {
        return Some(IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15])));
    }
    if bytes[0..10].iter().all(|&b| b == 0) && bytes[10] == 0xff && bytes[11] == 0xff {
        return Some(IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15])));
    }
    Some(IpAddr::V6(Ipv6Addr::from(*bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2_frame(collector_hash: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x00, 0x02];
        buf.extend_from_slice(&collector_hash.to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_decode_v2_happy_path() {
        let payload = [1, 2, 3, 4, 5];
        let frame = v2_frame(Ipv4Addr::new(10, 0, 0, 1).into(), &payload);
        let decoded = decode_frame(&frame, 1 << 20).unwrap();
        assert_eq!(decoded.bmp_bytes.as_ref(), &payload);
        assert_eq!(decoded.router_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[test]
    fn test_decode_v2_zero_msg_len() {
        let frame = v2_frame(0, &[]);
        assert_eq!(decode_frame(&frame, 1 << 20), Err(FrameError::ZeroMsgLen));
    }

    #[test]
    fn test_decode_v2_truncated() {
        let mut frame = v2_frame(0, &[1, 2, 3]);
        frame.truncate(frame.len() - 1);
        assert_eq!(decode_frame(&frame, 1 << 20), Err(FrameError::FrameTruncated));
    }

    #[test]
    fn test_decode_v2_exceeds_limit() {
        let frame = v2_frame(0, &[1, 2, 3]);
        assert_eq!(decode_frame(&frame, 2), Err(FrameError::MsgLenExceedsLimit));
    }

    #[test]
    fn test_bad_magic() {
        let frame = vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE];
        assert_eq!(decode_frame(&frame, 1 << 20), Err(FrameError::BadMagicOrVersion));
    }

    #[test]
    fn test_ipv16_to_addr_encodings() {
        let mut b = [0u8; 16];
        assert_eq!(ipv16_to_addr(&b), None);

        b[0..4].copy_from_slice(&[10, 0, 0, 1]);
        assert_eq!(ipv16_to_addr(&b), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));

        let mut b2 = [0u8; 16];
        b2[12..16].copy_from_slice(&[10, 0, 0, 2]);
        assert_eq!(ipv16_to_addr(&b2), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));

        let mut b3 = [0u8; 16];
        b3[10] = 0xff;
        b3[11] = 0xff;
        b3[12..16].copy_from_slice(&[10, 0, 0, 3]);
        assert_eq!(ipv16_to_addr(&b3), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))));

        let b4 = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(ipv16_to_addr(&b4), Some(IpAddr::V6(Ipv6Addr::from(b4))));
    }

    #[test]
    fn test_decode_v17_real_fixture() {
        // Reused from the inherited OpenBMP header test fixture (a real RouteMonitoring frame).
        let input = "4f424d500107006400000033800c6184b9c2000c602cbf4f072f3ae149d23486024bc3dadfc4000a69732d63632d626d7031c677060bdd020a9e92be000200de2e3180df3369000000000000000000000000000c726f7574652d76696577733500000001030000003302000000000000000000000000000000000000000000003fda060e00000da30000000061523c36000c0e1c0200000a";
        let decoded_bytes = hex::decode(input).unwrap();
        let decoded = decode_frame(&decoded_bytes, 1 << 20).unwrap();
        assert_eq!(decoded.bmp_bytes.len(), 0x33);
    }
}
