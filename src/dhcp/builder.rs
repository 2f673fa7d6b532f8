//! Builds outgoing [`DhcpMessage`]s for each step of the state machine.
//!
//! Per-kind constructors follow `nispor-mozim`'s `new_discovery`/
//! `new_request`/`new_renew`/`new_rebind`/`new_release` family (build from
//! `xid` + config + optionally a lease); the parameter-request-list
//! ordering and the one-helper-per-message-kind naming follow
//! `lancastr-rust-dhcp`'s `MessageBuilder`.

use std::net::Ipv4Addr;

use crate::config::InterfaceOptions;
use crate::dhcp::lease::Lease;
use crate::dhcp::message::{DhcpMessage, COOKIE, FLAG_BROADCAST};
use crate::dhcp::options::{self, DhcpMessageKind, OptionCode, OPTION_TABLE};

const BOOTP_MIN_SIZE: usize = 300;

/// Appends TLVs to a message's option trailer; callers finish with
/// [`OptionWriter::finish`], which appends the END marker and an optional
/// BOOTP pad.
struct OptionWriter {
    buf: Vec<u8>,
}

impl OptionWriter {
    fn new() -> Self {
        OptionWriter { buf: Vec::with_capacity(64) }
    }

    fn raw(&mut self, code: u8, value: &[u8]) {
        self.buf.push(code);
        self.buf.push(value.len() as u8);
        self.buf.extend_from_slice(value);
    }

    fn u8(&mut self, code: u8, v: u8) {
        self.raw(code, &[v]);
    }

    fn u16(&mut self, code: u8, v: u16) {
        self.raw(code, &v.to_be_bytes());
    }

    fn u32(&mut self, code: u8, v: u32) {
        self.raw(code, &v.to_be_bytes());
    }

    fn ipv4(&mut self, code: u8, v: Ipv4Addr) {
        self.raw(code, &v.octets());
    }

    fn string(&mut self, code: u8, v: &str) {
        self.raw(code, v.as_bytes());
    }

    fn finish(mut self, pad_to_bootp_minimum: bool) -> Vec<u8> {
        self.buf.push(u8::from(OptionCode::End));
        if pad_to_bootp_minimum && self.buf.len() < BOOTP_MIN_SIZE {
            self.buf.resize(BOOTP_MIN_SIZE, u8::from(OptionCode::Pad));
        }
        self.buf
    }
}

/// Encode a dotted name into RFC 1035 length-prefixed labels, stripping a
/// trailing dot and appending the terminating zero-length label.
pub fn encode_dns_labels(name: &str) -> Vec<u8> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut out = Vec::with_capacity(name.len() + 2);
    if !name.is_empty() {
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    out
}

/// Clamp an option-57 candidate to the legal range.
fn clamp_max_message_size(mtu: u16) -> u16 {
    mtu.clamp(576, 1500)
}

/// `secs` is uptime since the transaction started, clamped to a `u16`.
fn clamp_secs(uptime_secs: u64, start_uptime_secs: u64) -> u16 {
    let elapsed = uptime_secs.saturating_sub(start_uptime_secs);
    elapsed.min(u64::from(u16::MAX)) as u16
}

fn same_network(iface_addr: Ipv4Addr, lease: &Lease) -> bool {
    if iface_addr == Ipv4Addr::UNSPECIFIED {
        return false;
    }
    let mask = u32::from(lease.net);
    u32::from(iface_addr) & mask == u32::from(lease.addr) & mask
}

/// Builds `DhcpMessage`s for one interface's configuration.
pub struct MessageBuilder<'a> {
    config: &'a InterfaceOptions,
}

impl<'a> MessageBuilder<'a> {
    /// Wrap the configuration this builder will draw hardware/client
    /// identity from.
    pub fn new(config: &'a InterfaceOptions) -> Self {
        MessageBuilder { config }
    }

    fn base(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64) -> DhcpMessage {
        let mut msg = DhcpMessage::new_request(xid, self.config.hwaddr.octets());
        msg.htype = self.config.hwtype;
        msg.secs = clamp_secs(uptime_secs, start_uptime_secs);
        msg
    }

    fn set_broadcast_flag(&self, msg: &mut DhcpMessage, is_decline_or_release: bool) {
        if self.config.request_broadcast && msg.ciaddr == Ipv4Addr::UNSPECIFIED && !is_decline_or_release {
            msg.flags |= FLAG_BROADCAST;
        }
    }

    fn client_id(&self) -> Vec<u8> {
        self.config.effective_client_id()
    }

    /// Requested-address-aware parameter-request list: the table's own
    /// `REQUEST`-flagged codes, the caller's additions, minus the two
    /// renewal/rebinding-time codes when building an INFORM.
    fn parameter_request_list(&self, is_inform: bool) -> Vec<u8> {
        let mut codes: Vec<u8> = OPTION_TABLE
            .iter()
            .filter(|e| e.flags.contains(options::OptionTypeFlags::REQUEST))
            .map(|e| e.code)
            .collect();
        for &extra in &self.config.request_mask_additions {
            if !codes.contains(&extra) {
                codes.push(extra);
            }
        }
        if is_inform {
            codes.retain(|&c| c != u8::from(OptionCode::RenewalTime) && c != u8::from(OptionCode::RebindingTime));
        }
        // Classless static routes must precede Router/StaticRoute for
        // interoperability with servers that only honor the first of a
        // pair of overlapping routing options.
        codes.sort_by_key(|&c| match OptionCode::from(c) {
            OptionCode::ClasslessStaticRoute => 0u8,
            OptionCode::Router => 1,
            OptionCode::StaticRoute => 1,
            _ => 2,
        });
        codes
    }

    fn common_client_options(&self, w: &mut OptionWriter, kind: DhcpMessageKind) {
        w.u8(u8::from(OptionCode::DhcpMessageType), u8::from(kind));
        if let Some(id) = Some(self.client_id()).filter(|id| !id.is_empty()) {
            w.raw(u8::from(OptionCode::ClientId), &id);
        }
    }

    fn request_payload_options(&self, w: &mut OptionWriter, is_inform: bool) {
        let max_size = clamp_max_message_size(self.config.mtu);
        w.u16(u8::from(OptionCode::MaxDhcpMessageSize), max_size);
        if let Some(class) = &self.config.user_class {
            if !class.is_empty() {
                w.raw(u8::from(OptionCode::UserClass), class);
            }
        }
        if let Some(vendor_class) = &self.config.vendor_class_id {
            w.string(u8::from(OptionCode::VendorClassId), vendor_class);
        }
        if !is_inform {
            if let Some(lease_seconds) = self.config.requested_lease_time {
                w.u32(u8::from(OptionCode::IpAddressLeaseTime), lease_seconds);
            }
        }
        if let Some(hostname) = &self.config.hostname {
            let truncated = hostname.split('.').next().unwrap_or(hostname);
            w.string(u8::from(OptionCode::HostName), truncated);
            if self.config.send_fqdn {
                let flags = 0x04u8;
                let mut payload = vec![flags, 0u8, 0u8];
                payload.extend(encode_dns_labels(hostname));
                w.raw(81, &payload);
            }
        }
        let codes = self.parameter_request_list(is_inform);
        w.raw(u8::from(OptionCode::ParameterRequestList), &codes);
    }

    /// DHCPDISCOVER: broadcast, no `ciaddr`, optional requested-address hint.
    pub fn discover(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Discover);
        if let Some(addr) = self.config.requested_address {
            w.ipv4(u8::from(OptionCode::RequestedIpAddress), addr);
        }
        self.request_payload_options(&mut w, false);
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, false);
        msg
    }

    /// DHCPREQUEST after SELECTING: requested-address + server-id of the
    /// offer being accepted, `ciaddr` left at zero.
    pub fn request_selecting(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, lease: &Lease) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Request);
        w.ipv4(u8::from(OptionCode::RequestedIpAddress), lease.addr);
        w.ipv4(u8::from(OptionCode::ServerIdentifier), lease.server);
        self.request_payload_options(&mut w, false);
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, false);
        msg
    }

    /// DHCPREQUEST after a cached on-disk lease at daemon start
    /// (INIT-REBOOT): requested-address set, no server-id, broadcast.
    pub fn request_init_reboot(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, lease: &Lease) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Request);
        w.ipv4(u8::from(OptionCode::RequestedIpAddress), lease.addr);
        self.request_payload_options(&mut w, false);
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, false);
        msg
    }

    /// DHCPREQUEST sent unicast to the granting server at T1 (RENEW): no
    /// requested-address/server-id options, `ciaddr` filled in instead.
    pub fn request_renew(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, lease: &Lease, iface_addr: Ipv4Addr) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        if same_network(iface_addr, lease) && lease.cookie == COOKIE {
            msg.ciaddr = iface_addr;
        }
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Request);
        self.request_payload_options(&mut w, false);
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, false);
        msg
    }

    /// DHCPREQUEST broadcast at T2 (REBIND): same shape as renew, but the
    /// caller is expected to have cleared the stored server identity and
    /// to send this one broadcast rather than unicast.
    pub fn request_rebind(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, lease: &Lease, iface_addr: Ipv4Addr) -> DhcpMessage {
        self.request_renew(xid, uptime_secs, start_uptime_secs, lease, iface_addr)
    }

    /// DHCPINFORM: `ciaddr` set to the interface address, or the lease's
    /// address if the interface has none configured yet; no lease-time
    /// options are requested.
    pub fn inform(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, iface_addr: Ipv4Addr, lease: Option<&Lease>) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        msg.ciaddr = if iface_addr != Ipv4Addr::UNSPECIFIED {
            iface_addr
        } else {
            lease.map(|l| l.addr).unwrap_or(Ipv4Addr::UNSPECIFIED)
        };
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Inform);
        self.request_payload_options(&mut w, true);
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, false);
        msg
    }

    /// DHCPDECLINE: reports the offered address as already in use.
    /// Emits requested-address + server-id (since the offer is being
    /// rejected) plus a short human-readable reason in option 56.
    pub fn decline(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, lease: &Lease, iface_addr: Ipv4Addr) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Decline);
        if lease.addr != iface_addr {
            w.ipv4(u8::from(OptionCode::RequestedIpAddress), lease.addr);
            w.ipv4(u8::from(OptionCode::ServerIdentifier), lease.server);
        }
        w.string(u8::from(OptionCode::Message), "Duplicate address detected");
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, true);
        msg
    }

    /// DHCPRELEASE: unicast, `ciaddr` set, server-id only.
    pub fn release(&self, xid: u32, uptime_secs: u64, start_uptime_secs: u64, lease: &Lease, iface_addr: Ipv4Addr) -> DhcpMessage {
        let mut msg = self.base(xid, uptime_secs, start_uptime_secs);
        if same_network(iface_addr, lease) && lease.cookie == COOKIE {
            msg.ciaddr = iface_addr;
        }
        let mut w = OptionWriter::new();
        self.common_client_options(&mut w, DhcpMessageKind::Release);
        w.ipv4(u8::from(OptionCode::ServerIdentifier), lease.server);
        msg.options = w.finish(false);
        self.set_broadcast_flag(&mut msg, true);
        msg
    }
}
