/*!
IO utility functions for reading fixed-width integers and addresses out of a [bytes::Buf],
returning a classified [ParserError] instead of panicking when the buffer runs short.
*/
use crate::error::ParserError;
use crate::models::{Afi, Asn, AsnLength};
use bytes::Buf;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub trait ReadUtils: Buf {
    #[inline]
    fn read_u8(&mut self) -> Result<u8, ParserError> {
        if self.remaining() < 1 {
            return Err(ParserError::Eof);
        }
        Ok(Buf::get_u8(self))
    }

    #[inline]
    fn read_u16(&mut self) -> Result<u16, ParserError> {
        if self.remaining() < 2 {
            return Err(ParserError::Eof);
        }
        Ok(Buf::get_u16(self))
    }

    #[inline]
    fn read_u32(&mut self) -> Result<u32, ParserError> {
        if self.remaining() < 4 {
            return Err(ParserError::Eof);
        }
        Ok(Buf::get_u32(self))
    }

    #[inline]
    fn read_u64(&mut self) -> Result<u64, ParserError> {
        if self.remaining() < 8 {
            return Err(ParserError::Eof);
        }
        Ok(Buf::get_u64(self))
    }

    /// Advances the cursor by `n` bytes, or fails if fewer than `n` remain. Named `skip` rather
    /// than `advance` to avoid clashing with [Buf::advance], which panics instead of erroring.
    fn skip(&mut self, n: usize) -> Result<(), ParserError> {
        if self.remaining() < n {
            return Err(ParserError::Eof);
        }
        Buf::advance(self, n);
        Ok(())
    }

    fn read_n_bytes(&mut self, n: usize) -> Result<Vec<u8>, ParserError> {
        if self.remaining() < n {
            return Err(ParserError::Eof);
        }
        let mut buf = vec![0u8; n];
        self.copy_to_slice(&mut buf);
        Ok(buf)
    }

    /// Reads `n` bytes and renders them as a string, stopping at the first NUL byte
    /// (matching the C-string convention used by BMP/OpenBMP TLV text fields).
    fn read_n_bytes_to_string(&mut self, n: usize) -> Result<String, ParserError> {
        let bytes = self.read_n_bytes(n)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    fn read_ipv4_address(&mut self) -> Result<Ipv4Addr, ParserError> {
        Ok(Ipv4Addr::from(self.read_u32()?))
    }

    fn read_ipv6_address(&mut self) -> Result<Ipv6Addr, ParserError> {
        let mut buf = [0u8; 16];
        if self.remaining() < 16 {
            return Err(ParserError::Eof);
        }
        self.copy_to_slice(&mut buf);
        Ok(Ipv6Addr::from(buf))
    }

    fn read_address(&mut self, afi: &Afi) -> Result<IpAddr, ParserError> {
        match afi {
            Afi::Ipv4 => Ok(IpAddr::V4(self.read_ipv4_address()?)),
            Afi::Ipv6 => Ok(IpAddr::V6(self.read_ipv6_address()?)),
        }
    }

    fn read_asn(&mut self, length: &AsnLength) -> Result<Asn, ParserError> {
        match length {
            AsnLength::Bits16 => Ok(Asn::from(self.read_u16()?)),
            AsnLength::Bits32 => Ok(Asn::from(self.read_u32()?)),
        }
    }
}

impl<T: Buf + ?Sized> ReadUtils for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_read_primitives() {
        let mut data = Bytes::from_static(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(data.read_u16().unwrap(), 1);
        assert_eq!(data.read_u32().unwrap(), 2);
    }

    #[test]
    fn test_read_eof() {
        let mut data = Bytes::from_static(&[0x01]);
        assert!(data.read_u32().is_err());
    }

    #[test]
    fn test_read_n_bytes_to_string_stops_at_nul() {
        let mut data = Bytes::from_static(b"abc\0\0");
        assert_eq!(data.read_n_bytes_to_string(5).unwrap(), "abc");
    }

    #[test]
    fn test_read_ipv4_address() {
        let mut data = Bytes::from_static(&[10, 0, 0, 1]);
        assert_eq!(data.read_ipv4_address().unwrap(), Ipv4Addr::new(10, 0, 0, 1));
    }
}
