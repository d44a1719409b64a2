//! Initiation Message (type 4), §4.2.

use crate::error::BmpParseError;
use crate::parser::bmp::parse_tlvs;
use bytes::Bytes;

/// Information-type TLV values carrying collector-free-form text, RFC 7854 §4.3.
const TLV_TYPE_SYS_DESCR: u16 = 1;
const TLV_TYPE_SYS_NAME: u16 = 2;

#[derive(Debug, Clone)]
pub struct InitiationMessage {
    pub sys_name: Option<String>,
    pub sys_descr: Option<String>,
}

pub fn parse_initiation(body: &mut Bytes) -> Result<InitiationMessage, BmpParseError> {
    let tlvs = parse_tlvs(body)?;
    let text = |typ: u16| {
        tlvs.iter()
            .find(|t| t.typ == typ)
            .map(|t| String::from_utf8_lossy(&t.value).into_owned())
    };
    Ok(InitiationMessage {
        sys_name: text(TLV_TYPE_SYS_NAME),
        sys_descr: text(TLV_TYPE_SYS_DESCR),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_sys_name_and_descr_extracted() {
        let mut buf = BytesMut::new();
        buf.put_u16(TLV_TYPE_SYS_DESCR);
        buf.put_u16(6);
        buf.put_slice(b"IOS-XR");
        buf.put_u16(TLV_TYPE_SYS_NAME);
        buf.put_u16(7);
        buf.put_slice(b"router1");
        let mut body = buf.freeze();
        let msg = parse_initiation(&mut body).unwrap();
        assert_eq!(msg.sys_descr.as_deref(), Some("IOS-XR"));
        assert_eq!(msg.sys_name.as_deref(), Some("router1"));
    }
}
