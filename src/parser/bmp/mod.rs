/*!
BMP message parsing (§4.2): iterates the concatenated BMP messages inside one decoded frame
payload and dispatches each on its common-header message type.
*/
pub mod headers;
pub mod messages;

use crate::error::BmpParseError;
use crate::parser::utils::ReadUtils;
pub use headers::{
    parse_bmp_common_header, parse_per_peer_header, BmpCommonHeader, BmpMsgType,
    BmpPerPeerHeader, BMP_COMMON_HEADER_LEN,
};
pub use messages::{
    parse_initiation, parse_peer_down, parse_peer_up, parse_route_mirroring,
    parse_route_monitoring, parse_stats_report, InitiationMessage, PeerDownNotificationMessage,
    PeerUpNotificationMessage, RouteMonitoringMessage,
};
use bytes::{Buf, Bytes};

/// One decoded BMP message out of a concatenated batch.
#[derive(Debug, Clone)]
pub enum BmpMessage {
    RouteMonitoring(RouteMonitoringMessage),
    PeerDown(PeerDownNotificationMessage),
    PeerUp(PeerUpNotificationMessage),
    Initiation(InitiationMessage),
    Termination,
    StatisticsReport(BmpPerPeerHeader),
    RouteMirroring(BmpPerPeerHeader),
}

/// A TLV as used by Initiation, Peer Up/Down (Loc-RIB) and Statistics Report messages:
/// type(2), length(2), value.
#[derive(Debug, Clone)]
pub struct Tlv {
    pub typ: u16,
    pub value: Bytes,
}

pub(crate) fn parse_tlvs(data: &mut Bytes) -> Result<Vec<Tlv>, BmpParseError> {
    let mut tlvs = Vec::new();
    while data.remaining() >= 4 {
        let typ = data.read_u16()?;
        let len = data.read_u16()? as usize;
        if data.remaining() < len {
            return Err(BmpParseError::InvalidCommonHeader(
                "truncated TLV value".to_string(),
            ));
        }
        let value = data.split_to(len);
        tlvs.push(Tlv { typ, value });
    }
    Ok(tlvs)
}

/// Splits off one BGP message (19-byte header + body) by peeking the header's length field,
/// without consuming `body` if the length is invalid.
pub(crate) fn split_bgp_message(body: &mut Bytes) -> Result<Bytes, BmpParseError> {
    if body.remaining() < 19 {
        return Err(BmpParseError::InvalidCommonHeader(
            "truncated BGP message header".to_string(),
        ));
    }
    let msg_len = u16::from_be_bytes([body[16], body[17]]) as usize;
    if !(19..=body.remaining()).contains(&msg_len) {
        return Err(BmpParseError::InvalidCommonHeader(format!(
            "invalid BGP message length {msg_len}"
        )));
    }
    Ok(body.split_to(msg_len))
}

fn decode_one_message(msg_type: BmpMsgType, body: &mut Bytes) -> Result<BmpMessage, BmpParseError> {
    match msg_type {
        BmpMsgType::RouteMonitoring => parse_route_monitoring(body).map(BmpMessage::RouteMonitoring),
        BmpMsgType::PeerDownNotification => parse_peer_down(body).map(BmpMessage::PeerDown),
        BmpMsgType::PeerUpNotification => parse_peer_up(body).map(BmpMessage::PeerUp),
        BmpMsgType::InitiationMessage => parse_initiation(body).map(BmpMessage::Initiation),
        BmpMsgType::TerminationMessage => Ok(BmpMessage::Termination),
        BmpMsgType::StatisticsReport => parse_stats_report(body).map(BmpMessage::StatisticsReport),
        BmpMsgType::RouteMirroringMessage => parse_route_mirroring(body).map(BmpMessage::RouteMirroring),
    }
}

/// Decodes every BMP message concatenated in `payload` (§4.2).
///
/// A message whose declared length exceeds the remaining bytes terminates the iteration. A
/// single message that fails to decode past its common header is skipped (we already know where
/// the next message starts) and logged; only a wholly empty result with zero bytes consumed is
/// reported as an error.
pub fn decode_bmp_messages(mut payload: Bytes) -> Result<Vec<BmpMessage>, BmpParseError> {
    let mut messages = Vec::new();
    let mut consumed = 0usize;

    while payload.remaining() >= BMP_COMMON_HEADER_LEN {
        let mut peek = payload.clone();
        let header = match parse_bmp_common_header(&mut peek) {
            Ok(header) => header,
            Err(_) => break,
        };
        let msg_length = header.msg_length as usize;
        if msg_length > payload.remaining() {
            break;
        }

        let mut msg_bytes = payload.split_to(msg_length);
        consumed += msg_length;
        Buf::advance(&mut msg_bytes, BMP_COMMON_HEADER_LEN);

        match decode_one_message(header.msg_type, &mut msg_bytes) {
            Ok(message) => messages.push(message),
            Err(err) => {
                log::warn!("skipping malformed BMP message (type {:?}): {err}", header.msg_type);
            }
        }
    }

    if messages.is_empty() && consumed == 0 {
        return Err(BmpParseError::EmptyResult);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn common_header(msg_type: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(3);
        buf.put_u32((6 + body.len()) as u32);
        buf.put_u8(msg_type);
        buf.put_slice(body);
        buf.to_vec()
    }

    #[test]
    fn test_decode_termination_only() {
        let frame = common_header(5, &[]);
        let messages = decode_bmp_messages(Bytes::from(frame)).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], BmpMessage::Termination));
    }

    #[test]
    fn test_empty_payload_is_error() {
        let err = decode_bmp_messages(Bytes::new()).unwrap_err();
        assert!(matches!(err, BmpParseError::EmptyResult));
    }

    #[test]
    fn test_oversized_declared_length_terminates_without_error() {
        let mut buf = BytesMut::new();
        buf.put_u8(3);
        buf.put_u32(1000); // declared length exceeds the actual payload
        buf.put_u8(5);
        let messages = decode_bmp_messages(buf.freeze()).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_recoverable_skip_past_bad_message() {
        // First message: Peer Down with a too-short body (fails past the common header); it
        // still advances by its own declared length so the second, valid message is recovered.
        let mut bad = common_header(2, &[0xAA]);
        let good = common_header(5, &[]);
        bad.extend_from_slice(&good);
        let messages = decode_bmp_messages(Bytes::from(bad)).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], BmpMessage::Termination));
    }
}
