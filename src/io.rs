//! Mediates between the state machine and the injected [`SocketFactory`]:
//! picks raw-vs-UDP transport per state, opens/closes sockets as
//! the automaton demands, and applies the inbound filtering rules
//! before a datagram is handed back to the caller.

use std::net::Ipv4Addr;

use crate::collab::{EventLoop, SocketFactory};
use crate::dhcp::message::DhcpMessage;
use crate::dhcp::state::InboundFilter;
use crate::error::{DhcpError, Result};
use crate::MacAddr;

/// Receive buffer sized for the largest frame this crate ever parses
/// (fixed header + cookie + a full option trailer).
pub const RECV_BUFFER_LEN: usize = 1500;

/// Per-interface socket bookkeeping and the send/receive entry points used
/// by [`crate::engine::Engine`].
#[derive(Debug, Default)]
pub struct IoAdapter {
    raw_fd: Option<i32>,
    udp_fd: Option<i32>,
}

impl IoAdapter {
    /// No sockets open yet.
    pub fn new() -> Self {
        IoAdapter::default()
    }

    /// Open the raw broadcast/listen socket if not already open, and
    /// register its fd with the event loop so `FdReadable` can fire for it.
    pub fn ensure_raw_open(&mut self, sockets: &mut dyn SocketFactory, events: &mut dyn EventLoop, iface: &str) -> Result<i32> {
        if let Some(fd) = self.raw_fd {
            return Ok(fd);
        }
        let fd = sockets.open_raw(iface)?;
        events.add_fd(iface, fd);
        self.raw_fd = Some(fd);
        Ok(fd)
    }

    /// Open the bound UDP socket (used for unicast RENEW) if not already
    /// open, and register its fd with the event loop.
    pub fn ensure_udp_open(&mut self, sockets: &mut dyn SocketFactory, events: &mut dyn EventLoop, iface: &str) -> Result<i32> {
        if let Some(fd) = self.udp_fd {
            return Ok(fd);
        }
        let fd = sockets.open_udp(iface)?;
        events.add_fd(iface, fd);
        self.udp_fd = Some(fd);
        Ok(fd)
    }

    /// Close every socket currently open for this interface, deregistering
    /// each fd from the event loop first.
    pub fn close_all(&mut self, sockets: &mut dyn SocketFactory, events: &mut dyn EventLoop) {
        if let Some(fd) = self.raw_fd.take() {
            events.delete_fd(fd);
            sockets.close(fd);
        }
        if let Some(fd) = self.udp_fd.take() {
            events.delete_fd(fd);
            sockets.close(fd);
        }
    }

    /// Send `msg`: broadcast over the raw socket, or unicast over UDP to
    /// `unicast_to` when the caller supplies a known server (RENEW).
    pub fn send(
        &mut self,
        sockets: &mut dyn SocketFactory,
        events: &mut dyn EventLoop,
        iface: &str,
        msg: &DhcpMessage,
        unicast_to: Option<Ipv4Addr>,
    ) -> Result<()> {
        let bytes = msg.emit();
        match unicast_to {
            Some(dst) => {
                self.ensure_udp_open(sockets, events, iface)?;
                sockets.send_udp(iface, dst, &bytes)
            }
            None => {
                self.ensure_raw_open(sockets, events, iface)?;
                sockets.send_raw(iface, &bytes)
            }
        }
    }

    /// Read and validate exactly one inbound frame, applying the
    /// filtering rules. Returns `Ok(None)` for a frame that fails
    /// checksum/framing/source validation (not an error; just noise on the
    /// wire), and `Ok(Some(_))` for one that parses into a `DhcpMessage`
    /// and whose hardware identity can be checked by the caller.
    pub fn receive(
        &mut self,
        sockets: &mut dyn SocketFactory,
        iface: &str,
        filter: &InboundFilter,
    ) -> Result<Option<DhcpMessage>> {
        let mut buf = [0u8; RECV_BUFFER_LEN];
        let (n, partial_csum) = sockets.recv_raw(iface, &mut buf)?;
        let Some((from, start, len)) = sockets.valid_udp(&buf, n, partial_csum) else {
            log::debug!("{iface}: dropped frame with invalid UDP framing/checksum");
            return Ok(None);
        };
        if !filter.source_allowed(from) {
            log::debug!("{iface}: dropped frame from disallowed source {from}");
            return Ok(None);
        }
        filter.check_point_to_point(from);

        let payload = &buf[start..start + len];
        match DhcpMessage::parse(payload) {
            Ok(msg) => Ok(Some(msg)),
            Err(err) => {
                log::debug!("{iface}: discarding unparseable DHCP message from {from}: {err}");
                Ok(None)
            }
        }
    }

    /// Require a usable identity for a device: a hardware address is
    /// always required before any transaction may begin.
    pub fn require_hwaddr(hwaddr: &MacAddr) -> Result<()> {
        if *hwaddr == MacAddr::ANY {
            return Err(DhcpError::Config(
                "no client-id available and no hardware address configured".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn require_hwaddr_rejects_all_zero_address() {
        assert!(IoAdapter::require_hwaddr(&MacAddr::ANY).is_err());
        assert!(IoAdapter::require_hwaddr(&MacAddr::new([2, 0, 0, 0, 0, 1])).is_ok());
    }
}
