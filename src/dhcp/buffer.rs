//! Cursor helpers for reading and writing the DHCP fixed header.
//!
//! The shape here (`get_u8`/`get_u16_be`/`get_u32_be`/`get_ipv4`/`get_bytes`/
//! `get_string_with_null`/`get_remains`, and the mirrored `write_*` methods)
//! follows the call pattern used to parse and emit the fixed header in other
//! Rust DHCPv4 clients; this crate needs the same small set of operations
//! but over `std::net::Ipv4Addr` instead of a `byte_struct`-derived newtype.

use std::net::Ipv4Addr;

use crate::error::DhcpError;

/// Read cursor over an immutable byte slice.
pub(crate) struct Buffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Buffer<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Buffer { data, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), DhcpError> {
        if self.pos + n > self.data.len() {
            Err(DhcpError::Codec(format!(
                "truncated DHCP message: need {n} byte(s) at offset {}, have {}",
                self.pos,
                self.data.len()
            )))
        } else {
            Ok(())
        }
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8, DhcpError> {
        self.need(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn get_u16_be(&mut self) -> Result<u16, DhcpError> {
        self.need(2)?;
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub(crate) fn get_u32_be(&mut self) -> Result<u32, DhcpError> {
        self.need(4)?;
        let v = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub(crate) fn get_ipv4(&mut self) -> Result<Ipv4Addr, DhcpError> {
        Ok(Ipv4Addr::from(self.get_u32_be()?))
    }

    pub(crate) fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DhcpError> {
        self.need(n)?;
        let v = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(v)
    }

    /// Read a fixed-width field and return it verbatim, with no NUL
    /// stripping — used where the caller (the `sname`/`file` overload logic)
    /// needs the raw bytes rather than a display string.
    pub(crate) fn get_array<const N: usize>(&mut self) -> Result<[u8; N], DhcpError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_bytes(N)?);
        Ok(out)
    }

    /// Everything from the cursor to the end of the buffer.
    pub(crate) fn get_remains(&mut self) -> &'a [u8] {
        let v = &self.data[self.pos..];
        self.pos = self.data.len();
        v
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

/// Write cursor growing a `Vec<u8>`.
pub(crate) struct BufferMut {
    pub(crate) data: Vec<u8>,
}

impl BufferMut {
    pub(crate) fn new(capacity: usize) -> Self {
        BufferMut {
            data: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub(crate) fn write_u16_be(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_u32_be(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_ipv4(&mut self, v: Ipv4Addr) {
        self.data.extend_from_slice(&v.octets());
    }

    pub(crate) fn write_bytes(&mut self, v: &[u8]) {
        self.data.extend_from_slice(v);
    }

    /// Extract a null-terminated, human-readable string out of a raw fixed
    /// field (used for `sname`/`file` when they have not been overloaded as
    /// option storage).
    pub(crate) fn string_from_field(raw: &[u8]) -> String {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_u32_and_ipv4() {
        let mut w = BufferMut::new(8);
        w.write_u32_be(0xdead_beef);
        w.write_ipv4(Ipv4Addr::new(192, 168, 1, 1));
        let mut r = Buffer::new(&w.data);
        assert_eq!(r.get_u32_be().unwrap(), 0xdead_beef);
        assert_eq!(r.get_ipv4().unwrap(), Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn get_array_reads_fixed_width() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let mut r = Buffer::new(&data);
        let chaddr: [u8; 6] = r.get_array().unwrap();
        assert_eq!(chaddr, data);
        assert_eq!(r.position(), 6);
    }

    #[test]
    fn get_u8_past_end_errors() {
        let mut r = Buffer::new(&[]);
        assert!(r.get_u8().is_err());
    }

    #[test]
    fn string_from_field_stops_at_first_nul() {
        let mut raw = [0u8; 8];
        raw[..5].copy_from_slice(b"host\0");
        assert_eq!(BufferMut::string_from_field(&raw), "host");
    }
}
