/*!
BGP UPDATE decoding (§4.3): withdrawn routes, path attributes, and NLRI, flattened into
[RouteEvent] rows. Unlike a general-purpose BGP attribute model this crate renders every
attribute straight to the text the relational store persists — there is no intermediate typed
attribute tree to keep in sync with future address families.
*/
use crate::error::{BgpParseError, ParserError};
use crate::models::{Afi, NetworkPrefix, RouteAction, RouteEvent};
use crate::parser::utils::ReadUtils;
use bytes::{Buf, Bytes};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ATTR_ORIGIN: u8 = 1;
const ATTR_AS_PATH: u8 = 2;
const ATTR_NEXT_HOP: u8 = 3;
const ATTR_MULTI_EXIT_DISC: u8 = 4;
const ATTR_LOCAL_PREF: u8 = 5;
const ATTR_COMMUNITY: u8 = 8;
const ATTR_MP_REACH_NLRI: u8 = 14;
const ATTR_MP_UNREACH_NLRI: u8 = 15;
const ATTR_EXT_COMMUNITIES: u8 = 16;
const ATTR_LARGE_COMMUNITIES: u8 = 32;

const FLAG_EXTENDED_LENGTH: u8 = 0x10;

const AS_PATH_SEGMENT_SET: u8 = 1;
const AS_PATH_SEGMENT_SEQUENCE: u8 = 2;

/// Scalar path attributes that apply uniformly to every prefix an UPDATE announces, whether
/// carried in the base NLRI or in MP_REACH_NLRI.
#[derive(Debug, Clone, Default)]
struct ScalarAttrs {
    origin: Option<String>,
    origin_asn: Option<u32>,
    as_path: Option<String>,
    next_hop: Option<Ipv4Addr>,
    med: Option<u32>,
    local_pref: Option<u32>,
    communities_std: Vec<String>,
    communities_ext: Vec<String>,
    communities_large: Vec<String>,
    unknown_attrs: BTreeMap<u8, String>,
}

#[derive(Debug, Clone)]
struct MpReach {
    afi: Afi,
    nexthop: IpAddr,
    prefixes: Vec<NetworkPrefix>,
}

#[derive(Debug, Clone)]
struct MpUnreach {
    afi: Afi,
    prefixes: Vec<NetworkPrefix>,
}

struct ParsedAttrs {
    scalar: ScalarAttrs,
    mp_reach: Option<MpReach>,
    mp_unreach: Option<MpUnreach>,
}

/// Outcome of decoding one BGP UPDATE (§4.3 "Outputs" and "Add-Path auto-detection").
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub events: Vec<RouteEvent>,
    pub detected_add_path: bool,
    /// Present only when `events` is empty: the AFI of the implied End-of-RIB marker.
    pub eor_afi: Option<Afi>,
}

/// Decodes one full BGP message (19-byte header + body) that is known to be an UPDATE,
/// auto-detecting Add-Path when the caller's `has_add_path` guess produces suspicious output.
pub fn parse_update(bgp_message: &Bytes, has_add_path: bool) -> Result<UpdateOutcome, BgpParseError> {
    if has_add_path {
        let (events, eor_afi) = parse_update_once(bgp_message, true)?;
        return Ok(UpdateOutcome {
            events,
            detected_add_path: true,
            eor_afi,
        });
    }

    let first = parse_update_once(bgp_message, false);
    let first_suspicious = matches!(&first, Err(_)) || first.as_ref().is_ok_and(|(events, _)| events.iter().any(is_suspicious));

    if !first_suspicious {
        let (events, eor_afi) = first?;
        return Ok(UpdateOutcome {
            events,
            detected_add_path: false,
            eor_afi,
        });
    }

    if let Ok((events_ap, eor_afi_ap)) = parse_update_once(bgp_message, true) {
        let first_len = first.as_ref().map(|(events, _)| events.len()).unwrap_or(0);
        if events_ap.len() > first_len && !events_ap.iter().any(is_suspicious) {
            return Ok(UpdateOutcome {
                events: events_ap,
                detected_add_path: true,
                eor_afi: eor_afi_ap,
            });
        }
    }

    match first {
        Ok((events, eor_afi)) => Ok(UpdateOutcome {
            events,
            detected_add_path: false,
            eor_afi,
        }),
        Err(_) => Ok(UpdateOutcome {
            events: Vec::new(),
            detected_add_path: false,
            eor_afi: Some(Afi::Ipv4),
        }),
    }
}

fn is_suspicious(event: &RouteEvent) -> bool {
    match event.prefix.prefix {
        IpNet::V4(net) => net.addr() != net.network(),
        IpNet::V6(net) => net.addr() != net.network(),
    }
}

fn parse_update_once(bgp_message: &Bytes, has_add_path: bool) -> Result<(Vec<RouteEvent>, Option<Afi>), BgpParseError> {
    let mut data = bgp_message.clone();
    if data.remaining() < 19 {
        return Err(BgpParseError::Parser(ParserError::Truncated(
            "BGP message shorter than its own header".to_string(),
        )));
    }
    data.skip(16)?; // marker
    let _length = data.read_u16()?;
    let msg_type = data.read_u8()?;
    if msg_type != 2 {
        return Err(BgpParseError::WrongMessageType(msg_type));
    }

    let withdrawn_len = data.read_u16()? as usize;
    if data.remaining() < withdrawn_len {
        return Err(BgpParseError::Parser(ParserError::Truncated(
            "withdrawn routes length exceeds remaining bytes".to_string(),
        )));
    }
    let mut withdrawn_data = data.split_to(withdrawn_len);
    let withdrawn_v4 = read_nlri_prefixes(&mut withdrawn_data, Afi::Ipv4, has_add_path)?;

    let attr_len = data.read_u16()? as usize;
    if data.remaining() < attr_len {
        return Err(BgpParseError::Parser(ParserError::Truncated(
            "path attribute length exceeds remaining bytes".to_string(),
        )));
    }
    let mut attr_data = data.split_to(attr_len);
    let attrs = parse_path_attributes(&mut attr_data, has_add_path)?;

    let nlri_v4 = read_nlri_prefixes(&mut data, Afi::Ipv4, has_add_path)?;

    let mut events = Vec::new();

    for prefix in withdrawn_v4 {
        events.push(withdraw_event(Afi::Ipv4, prefix));
    }
    for prefix in nlri_v4 {
        events.push(announce_event(Afi::Ipv4, prefix, &attrs.scalar, attrs.scalar.next_hop.map(|ip| ip.to_string())));
    }
    if let Some(mp_reach) = &attrs.mp_reach {
        let nexthop = mp_reach.nexthop.to_string();
        for prefix in &mp_reach.prefixes {
            events.push(announce_event(mp_reach.afi, prefix.clone(), &attrs.scalar, Some(nexthop.clone())));
        }
    }
    if let Some(mp_unreach) = &attrs.mp_unreach {
        for prefix in &mp_unreach.prefixes {
            events.push(withdraw_event(mp_unreach.afi, prefix.clone()));
        }
    }

    let eor_afi = if events.is_empty() {
        match &attrs.mp_unreach {
            Some(mp_unreach) if mp_unreach.afi == Afi::Ipv6 => Some(Afi::Ipv6),
            _ => Some(Afi::Ipv4),
        }
    } else {
        None
    };

    Ok((events, eor_afi))
}

fn withdraw_event(afi: Afi, prefix: NetworkPrefix) -> RouteEvent {
    RouteEvent {
        afi,
        path_id: prefix.path_id.unwrap_or(0),
        prefix,
        action: RouteAction::Withdraw,
        nexthop: None,
        as_path: None,
        origin: None,
        origin_asn: None,
        local_pref: None,
        med: None,
        communities_std: Vec::new(),
        communities_ext: Vec::new(),
        communities_large: Vec::new(),
        unknown_attrs: BTreeMap::new(),
    }
}

fn announce_event(afi: Afi, prefix: NetworkPrefix, scalar: &ScalarAttrs, nexthop: Option<String>) -> RouteEvent {
    RouteEvent {
        afi,
        path_id: prefix.path_id.unwrap_or(0),
        prefix,
        action: RouteAction::Announce,
        nexthop,
        as_path: scalar.as_path.clone(),
        origin: scalar.origin.clone(),
        origin_asn: scalar.origin_asn,
        local_pref: scalar.local_pref,
        med: scalar.med,
        communities_std: scalar.communities_std.clone(),
        communities_ext: scalar.communities_ext.clone(),
        communities_large: scalar.communities_large.clone(),
        unknown_attrs: scalar.unknown_attrs.clone(),
    }
}

fn read_nlri_prefixes(data: &mut Bytes, afi: Afi, has_add_path: bool) -> Result<Vec<NetworkPrefix>, BgpParseError> {
    let mut out = Vec::new();
    while data.remaining() > 0 {
        let path_id = if has_add_path {
            Some(data.read_u32()?)
        } else {
            None
        };
        if data.remaining() == 0 {
            return Err(BgpParseError::Parser(ParserError::Eof));
        }
        let prefix_len = data.read_u8()?;
        let max_bits = afi.max_prefix_bits();
        if prefix_len > max_bits {
            return Err(BgpParseError::InvalidPrefixLength(prefix_len, afi));
        }
        let byte_len = (prefix_len as usize).div_ceil(8);
        if data.remaining() < byte_len {
            return Err(BgpParseError::Parser(ParserError::Eof));
        }
        let raw = data.read_n_bytes(byte_len)?;
        let net = match afi {
            Afi::Ipv4 => {
                let mut octets = [0u8; 4];
                octets[..raw.len()].copy_from_slice(&raw);
                IpNet::V4(
                    Ipv4Net::new(Ipv4Addr::from(octets), prefix_len)
                        .map_err(|_| BgpParseError::InvalidPrefixLength(prefix_len, afi))?,
                )
            }
            Afi::Ipv6 => {
                let mut octets = [0u8; 16];
                octets[..raw.len()].copy_from_slice(&raw);
                IpNet::V6(
                    Ipv6Net::new(Ipv6Addr::from(octets), prefix_len)
                        .map_err(|_| BgpParseError::InvalidPrefixLength(prefix_len, afi))?,
                )
            }
        };
        out.push(NetworkPrefix::new(net, path_id));
    }
    Ok(out)
}

fn parse_path_attributes(data: &mut Bytes, has_add_path: bool) -> Result<ParsedAttrs, BgpParseError> {
    let mut scalar = ScalarAttrs::default();
    let mut mp_reach = None;
    let mut mp_unreach = None;

    while data.remaining() >= 2 {
        let flags = data.read_u8()?;
        let typ = data.read_u8()?;
        let len = if flags & FLAG_EXTENDED_LENGTH != 0 {
            data.read_u16()? as usize
        } else {
            data.read_u8()? as usize
        };
        if data.remaining() < len {
            return Err(BgpParseError::Parser(ParserError::Truncated(format!(
                "attribute type {typ} declares length {len} beyond remaining bytes"
            ))));
        }
        let mut value = data.split_to(len);

        match typ {
            ATTR_ORIGIN => {
                let code = value.read_u8()?;
                scalar.origin = Some(match code {
                    0 => "IGP".to_string(),
                    1 => "EGP".to_string(),
                    2 => "INCOMPLETE".to_string(),
                    other => format!("UNKNOWN({other})"),
                });
            }
            ATTR_AS_PATH => {
                let (text, origin_asn) = decode_as_path(&mut value)?;
                scalar.as_path = Some(text);
                scalar.origin_asn = origin_asn;
            }
            ATTR_NEXT_HOP => {
                scalar.next_hop = Some(value.read_ipv4_address()?);
            }
            ATTR_MULTI_EXIT_DISC => {
                scalar.med = Some(value.read_u32()?);
            }
            ATTR_LOCAL_PREF => {
                scalar.local_pref = Some(value.read_u32()?);
            }
            ATTR_COMMUNITY => {
                while value.remaining() >= 4 {
                    let high = value.read_u16()?;
                    let low = value.read_u16()?;
                    scalar.communities_std.push(format!("{high}:{low}"));
                }
            }
            ATTR_MP_REACH_NLRI => {
                if let Some(reach) = decode_mp_reach(&mut value, has_add_path)? {
                    mp_reach = Some(reach);
                }
            }
            ATTR_MP_UNREACH_NLRI => {
                if let Some(unreach) = decode_mp_unreach(&mut value, has_add_path)? {
                    mp_unreach = Some(unreach);
                }
            }
            ATTR_EXT_COMMUNITIES => {
                while value.remaining() >= 8 {
                    scalar.communities_ext.push(decode_ext_community(&mut value)?);
                }
            }
            ATTR_LARGE_COMMUNITIES => {
                while value.remaining() >= 12 {
                    let global = value.read_u32()?;
                    let data1 = value.read_u32()?;
                    let data2 = value.read_u32()?;
                    scalar
                        .communities_large
                        .push(format!("{global}:{data1}:{data2}"));
                }
            }
            other => {
                scalar.unknown_attrs.insert(other, hex::encode(&value));
            }
        }
    }

    Ok(ParsedAttrs {
        scalar,
        mp_reach,
        mp_unreach,
    })
}

/// Returns the rendered AS_PATH text plus its origin ASN: the last ASN of the
/// terminal segment, or `None` if that segment is an AS_SET (no single "last
/// ASN" for a set) or the path is empty.
fn decode_as_path(value: &mut Bytes) -> Result<(String, Option<u32>), BgpParseError> {
    let mut segments = Vec::new();
    let mut last_segment: Option<(u8, Vec<u32>)> = None;
    while value.remaining() >= 2 {
        let seg_type = value.read_u8()?;
        let count = value.read_u8()? as usize;
        if value.remaining() < count * 4 {
            return Err(BgpParseError::Parser(ParserError::Truncated(
                "AS_PATH segment declares more ASNs than remain".to_string(),
            )));
        }
        let mut asns = Vec::with_capacity(count);
        for _ in 0..count {
            asns.push(value.read_u32()?);
        }
        let rendered = match seg_type {
            AS_PATH_SEGMENT_SEQUENCE => asns.iter().map(u32::to_string).collect::<Vec<_>>().join(" "),
            AS_PATH_SEGMENT_SET => format!(
                "{{{}}}",
                asns.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
            ),
            _ => asns.iter().map(u32::to_string).collect::<Vec<_>>().join(" "),
        };
        segments.push(rendered);
        last_segment = Some((seg_type, asns));
    }
    let origin_asn = last_segment.and_then(|(seg_type, asns)| {
        if seg_type == AS_PATH_SEGMENT_SET {
            None
        } else {
            asns.last().copied()
        }
    });
    Ok((segments.join(" "), origin_asn))
}

fn decode_mp_reach(value: &mut Bytes, has_add_path: bool) -> Result<Option<MpReach>, BgpParseError> {
    let afi_raw = value.read_u16()?;
    let afi = Afi::try_from(afi_raw)?;
    let safi = value.read_u8()?;
    if safi != 1 {
        return Ok(None);
    }
    let nh_len = value.read_u8()? as usize;
    let nexthop = match nh_len {
        4 => IpAddr::V4(value.read_ipv4_address()?),
        16 | 32 => {
            let bytes16 = value.read_n_bytes(16)?;
            if nh_len == 32 {
                value.skip(nh_len - 16)?;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes16);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(BgpParseError::Parser(ParserError::Unsupported(format!(
                "unsupported MP_REACH_NLRI next-hop length {other}"
            ))))
        }
    };
    let snpa_count = value.read_u8()?;
    for _ in 0..snpa_count {
        let semi_octets = value.read_u8()? as usize;
        value.skip(semi_octets.div_ceil(2))?;
    }
    let prefixes = read_nlri_prefixes(value, afi, has_add_path)?;
    Ok(Some(MpReach {
        afi,
        nexthop,
        prefixes,
    }))
}

fn decode_mp_unreach(value: &mut Bytes, has_add_path: bool) -> Result<Option<MpUnreach>, BgpParseError> {
    let afi_raw = value.read_u16()?;
    let afi = Afi::try_from(afi_raw)?;
    let safi = value.read_u8()?;
    if safi != 1 {
        return Ok(None);
    }
    let prefixes = read_nlri_prefixes(value, afi, has_add_path)?;
    Ok(Some(MpUnreach { afi, prefixes }))
}

fn decode_ext_community(value: &mut Bytes) -> Result<String, BgpParseError> {
    let raw = value.read_n_bytes(8)?;
    let type_high = raw[0] & !0x40; // mask the transitive bit
    let subtype = raw[1];
    let body = &raw[2..8];

    let label = match subtype {
        0x02 => "RT",
        0x03 => "SOO",
        _ => return Ok(hex::encode(&raw)),
    };

    let rendered = match type_high {
        0x00 => {
            let asn = u16::from_be_bytes([body[0], body[1]]);
            let local = u32::from_be_bytes([body[2], body[3], body[4], body[5]]);
            format!("{label}:{asn}:{local}")
        }
        0x01 => {
            let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let local = u16::from_be_bytes([body[4], body[5]]);
            format!("{label}:{ip}:{local}")
        }
        0x02 => {
            let asn = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let local = u16::from_be_bytes([body[4], body[5]]);
            format!("{label}:{asn}:{local}")
        }
        _ => return Ok(hex::encode(&raw)),
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgp_header(msg_type: u8, body_len: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 16];
        buf.extend_from_slice(&(19 + body_len).to_be_bytes());
        buf.push(msg_type);
        buf
    }

    #[test]
    fn test_simple_ipv4_announce() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes()); // withdrawn len
        let attrs = {
            let mut a = Vec::new();
            a.extend_from_slice(&[0x40, ATTR_ORIGIN, 1, 0]); // IGP
            a.extend_from_slice(&[0x40, ATTR_NEXT_HOP, 4, 10, 0, 0, 1]);
            a.extend_from_slice(&[0x40, ATTR_LOCAL_PREF, 4, 0, 0, 0, 100]);
            a
        };
        body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        body.extend_from_slice(&attrs);
        body.extend_from_slice(&[24, 192, 168, 1]); // 192.168.1.0/24

        let mut msg = bgp_header(2, body.len() as u16);
        msg.extend_from_slice(&body);

        let outcome = parse_update(&Bytes::from(msg), false).unwrap();
        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.action, RouteAction::Announce);
        assert_eq!(event.prefix.to_string(), "192.168.1.0/24");
        assert_eq!(event.nexthop.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.origin.as_deref(), Some("IGP"));
        assert_eq!(event.local_pref, Some(100));
    }

    #[test]
    fn test_as_path_origin_asn_is_last_segment_last_asn() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes()); // withdrawn len
        let attrs = {
            let mut a = Vec::new();
            a.extend_from_slice(&[0x40, ATTR_ORIGIN, 1, 0]); // IGP
            a.extend_from_slice(&[0x40, ATTR_AS_PATH, 10, AS_PATH_SEGMENT_SEQUENCE, 2]);
            a.extend_from_slice(&65001u32.to_be_bytes());
            a.extend_from_slice(&65002u32.to_be_bytes());
            a
        };
        body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        body.extend_from_slice(&attrs);
        body.extend_from_slice(&[24, 192, 168, 1]);

        let mut msg = bgp_header(2, body.len() as u16);
        msg.extend_from_slice(&body);

        let outcome = parse_update(&Bytes::from(msg), false).unwrap();
        let event = &outcome.events[0];
        assert_eq!(event.as_path.as_deref(), Some("65001 65002"));
        assert_eq!(event.origin_asn, Some(65002));
    }

    #[test]
    fn test_as_path_origin_asn_none_when_terminal_segment_is_as_set() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes());
        let attrs = {
            let mut a = Vec::new();
            a.extend_from_slice(&[0x40, ATTR_AS_PATH, 6, AS_PATH_SEGMENT_SET, 1]);
            a.extend_from_slice(&65010u32.to_be_bytes());
            a
        };
        body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        body.extend_from_slice(&attrs);
        body.extend_from_slice(&[24, 192, 168, 1]);

        let mut msg = bgp_header(2, body.len() as u16);
        msg.extend_from_slice(&body);

        let outcome = parse_update(&Bytes::from(msg), false).unwrap();
        let event = &outcome.events[0];
        assert_eq!(event.as_path.as_deref(), Some("{65010}"));
        assert_eq!(event.origin_asn, None);
    }

    #[test]
    fn test_mp_unreach_non_unicast_safi_is_ignored() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes()); // withdrawn len
        let attrs = {
            let mut a = Vec::new();
            // MP_UNREACH_NLRI: AFI=1 (IPv4), SAFI=128 (vpn, out of scope), one /24 NLRI
            a.extend_from_slice(&[0x80, ATTR_MP_UNREACH_NLRI, 6, 0, 1, 128, 24, 10, 0, 0]);
            a
        };
        body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        body.extend_from_slice(&attrs);

        let mut msg = bgp_header(2, body.len() as u16);
        msg.extend_from_slice(&body);

        let outcome = parse_update(&Bytes::from(msg), false).unwrap();
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_withdrawal_only_is_not_eor() {
        let mut body = Vec::new();
        let withdrawn = vec![24u8, 172, 16, 0];
        body.extend_from_slice(&(withdrawn.len() as u16).to_be_bytes());
        body.extend_from_slice(&withdrawn);
        body.extend_from_slice(&0u16.to_be_bytes()); // attr len

        let mut msg = bgp_header(2, body.len() as u16);
        msg.extend_from_slice(&body);

        let outcome = parse_update(&Bytes::from(msg), false).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].action, RouteAction::Withdraw);
        assert!(outcome.eor_afi.is_none());
    }

    #[test]
    fn test_empty_update_is_eor_ipv4() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        let mut msg = bgp_header(2, body.len() as u16);
        msg.extend_from_slice(&body);

        let outcome = parse_update(&Bytes::from(msg), false).unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.eor_afi, Some(Afi::Ipv4));
    }

    #[test]
    fn test_wrong_message_type_rejected() {
        let mut msg = bgp_header(4, 0); // KEEPALIVE
        msg.truncate(19);
        let err = parse_update(&Bytes::from(msg), false).unwrap_err();
        assert!(matches!(err, BgpParseError::WrongMessageType(4)));
    }

    #[test]
    fn test_ext_community_route_target() {
        let mut value = Bytes::from(vec![0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05]);
        let rendered = decode_ext_community(&mut value).unwrap();
        assert_eq!(rendered, "RT:1:5");
    }
}
