//! The 236-byte fixed DHCP header plus the raw options trailer.
//!
//! Option decoding proper (RFC 3396 concatenation, the RFC 1533
//! `sname`/`file` overload, and the typed sub-options) lives in
//! [`crate::dhcp::options`]; this module only knows how to get the fixed
//! fields and the magic cookie on and off the wire.

use std::net::Ipv4Addr;

use static_assertions::const_assert_eq;

use crate::dhcp::buffer::{Buffer, BufferMut};
use crate::enum_with_unknown;
use crate::error::{DhcpError, Result};

/// Length of `chaddr`, the client hardware address field.
pub const CHADDR_LEN: usize = 16;
/// Length of `sname`, the (legacy) server host name field.
pub const SNAME_LEN: usize = 64;
/// Length of `file`, the (legacy) boot file name field.
pub const FILE_LEN: usize = 128;

/// Size in bytes of the fixed header, `op` through `file`, not counting the
/// magic cookie or the options trailer.
pub const FIXED_LEN: usize = 1 + 1 + 1 + 1 + 4 + 2 + 2 + 4 + 4 + 4 + 4 + CHADDR_LEN + SNAME_LEN + FILE_LEN;
const_assert_eq!(FIXED_LEN, 236);

/// Magic cookie that must follow the fixed header, identifying the payload
/// as DHCP rather than plain BOOTP.
pub const COOKIE: u32 = 0x6382_5363;

enum_with_unknown! {
    /// The legacy BOOTP `op` field: which side of the exchange sent this
    /// message.
    pub enum DhcpOperation(u8) {
        /// Sent by a client.
        BootRequest = 1,
        /// Sent by a server.
        BootReply = 2,
    }
}

/// Hardware type in `htype`; always `Ethernet` for the wired/WiFi case this
/// crate targets.
pub const HTYPE_ETHERNET: u8 = 1;

/// A decoded or to-be-encoded DHCP message: the fixed header fields plus the
/// raw, still-undecoded options trailer (after the magic cookie).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    /// `op`: request or reply.
    pub op: DhcpOperation,
    /// `htype`: hardware address type, `HTYPE_ETHERNET` in practice.
    pub htype: u8,
    /// `hlen`: hardware address length, 6 for Ethernet.
    pub hlen: u8,
    /// `hops`: relay-agent hop count, always 0 from a client.
    pub hops: u8,
    /// `xid`: transaction id correlating a request with its replies.
    pub xid: u32,
    /// `secs`: seconds elapsed since the client began this transaction.
    pub secs: u16,
    /// `flags`: only bit 0 (the broadcast flag) is defined.
    pub flags: u16,
    /// `ciaddr`: client's own address, filled in only when it can already
    /// answer ARP for it (RENEW/REBIND/BOUND).
    pub ciaddr: Ipv4Addr,
    /// `yiaddr`: "your" address, filled in by the server.
    pub yiaddr: Ipv4Addr,
    /// `siaddr`: next-server address for bootstrapping.
    pub siaddr: Ipv4Addr,
    /// `giaddr`: relay agent address.
    pub giaddr: Ipv4Addr,
    /// `chaddr`: client hardware address, left-padded with the real address
    /// and zero-filled for the remaining bytes.
    pub chaddr: [u8; CHADDR_LEN],
    /// Raw `sname` field; only a hostname string unless option 52 (overload)
    /// says otherwise.
    pub sname: [u8; SNAME_LEN],
    /// Raw `file` field; only a boot file name unless option 52 says
    /// otherwise.
    pub file: [u8; FILE_LEN],
    /// Everything after the magic cookie, not yet decoded into options.
    pub options: Vec<u8>,
}

/// Broadcast bit of `flags`.
pub const FLAG_BROADCAST: u16 = 0x8000;

impl DhcpMessage {
    /// Build an otherwise-empty message with the flags common to every
    /// client-originated message: `op = BootRequest`, `htype`/`hlen` set for
    /// Ethernet, and `hops = 0`.
    pub fn new_request(xid: u32, chaddr: [u8; 6]) -> Self {
        let mut padded = [0u8; CHADDR_LEN];
        padded[..6].copy_from_slice(&chaddr);
        DhcpMessage {
            op: DhcpOperation::BootRequest,
            htype: HTYPE_ETHERNET,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: padded,
            sname: [0u8; SNAME_LEN],
            file: [0u8; FILE_LEN],
            options: Vec::new(),
        }
    }

    /// Parse a message out of a raw UDP payload (lower layers already
    /// stripped by the socket factory).
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < FIXED_LEN + 4 {
            return Err(DhcpError::Codec(format!(
                "DHCP payload is {} bytes, shorter than the {}-byte fixed header plus cookie",
                raw.len(),
                FIXED_LEN + 4
            )));
        }
        let mut buf = Buffer::new(raw);
        let op = DhcpOperation::from(buf.get_u8()?);
        let htype = buf.get_u8()?;
        let hlen = buf.get_u8()?;
        let hops = buf.get_u8()?;
        let xid = buf.get_u32_be()?;
        let secs = buf.get_u16_be()?;
        let flags = buf.get_u16_be()?;
        let ciaddr = buf.get_ipv4()?;
        let yiaddr = buf.get_ipv4()?;
        let siaddr = buf.get_ipv4()?;
        let giaddr = buf.get_ipv4()?;
        let chaddr = buf.get_array::<CHADDR_LEN>()?;
        let sname = buf.get_array::<SNAME_LEN>()?;
        let file = buf.get_array::<FILE_LEN>()?;

        let cookie = buf.get_u32_be()?;
        if cookie != COOKIE {
            return Err(DhcpError::Codec(format!(
                "bad magic cookie 0x{cookie:08x}, expected 0x{COOKIE:08x}"
            )));
        }
        let options = buf.get_remains().to_vec();

        Ok(DhcpMessage {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Serialize the fixed header, magic cookie, and the already-encoded
    /// options trailer into bytes ready for [`crate::collab::SocketFactory::send_udp`].
    pub fn emit(&self) -> Vec<u8> {
        let mut buf = BufferMut::new(FIXED_LEN + 4 + self.options.len());
        buf.write_u8(u8::from(self.op));
        buf.write_u8(self.htype);
        buf.write_u8(self.hlen);
        buf.write_u8(self.hops);
        buf.write_u32_be(self.xid);
        buf.write_u16_be(self.secs);
        buf.write_u16_be(self.flags);
        buf.write_ipv4(self.ciaddr);
        buf.write_ipv4(self.yiaddr);
        buf.write_ipv4(self.siaddr);
        buf.write_ipv4(self.giaddr);
        buf.write_bytes(&self.chaddr);
        buf.write_bytes(&self.sname);
        buf.write_bytes(&self.file);
        buf.write_u32_be(COOKIE);
        buf.write_bytes(&self.options);
        buf.data
    }

    /// The broadcast bit of `flags`.
    pub fn broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    /// `sname` as a display string, valid only when option 52 has not
    /// redirected it to option storage.
    pub fn sname_str(&self) -> String {
        BufferMut::string_from_field(&self.sname)
    }

    /// `file` as a display string, valid only when option 52 has not
    /// redirected it to option storage.
    pub fn file_str(&self) -> String {
        BufferMut::string_from_field(&self.file)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_len_is_236() {
        assert_eq!(FIXED_LEN, 236);
    }

    #[test]
    fn round_trips_through_parse_and_emit() {
        let mut msg = DhcpMessage::new_request(0x1234_5678, [2, 0, 0, 0, 0, 1]);
        msg.flags = FLAG_BROADCAST;
        msg.secs = 3;
        msg.options = vec![53, 1, 1, 255];

        let bytes = msg.emit();
        assert_eq!(bytes.len(), FIXED_LEN + 4 + 4);

        let parsed = DhcpMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, msg);
        assert!(parsed.broadcast());
    }

    #[test]
    fn rejects_bad_cookie() {
        let msg = DhcpMessage::new_request(1, [0; 6]);
        let mut bytes = msg.emit();
        let cookie_offset = FIXED_LEN;
        bytes[cookie_offset] ^= 0xff;
        let err = DhcpMessage::parse(&bytes).unwrap_err();
        assert!(matches!(err, DhcpError::Codec(_)));
    }

    #[test]
    fn rejects_short_payload() {
        let err = DhcpMessage::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, DhcpError::Codec(_)));
    }

    #[test]
    fn sname_str_stops_at_nul() {
        let mut msg = DhcpMessage::new_request(1, [0; 6]);
        msg.sname[..4].copy_from_slice(b"foo\0");
        assert_eq!(msg.sname_str(), "foo");
    }
}
