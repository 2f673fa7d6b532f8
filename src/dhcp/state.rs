//! The per-interface DHCS automaton: states, retransmission/NAK backoff,
//! inbound filtering, and acceptance/bind decisions.
//!
//! The automaton here is deliberately I/O-free — it decides *what* to do
//! next (which message to (re)send, which timer to arm, whether an inbound
//! reply should be accepted and how to bind it) and hands the decision back
//! to [`crate::engine::Engine`], which drives the actual collaborators.

use std::net::Ipv4Addr;
use std::time::Duration;

use rand::Rng;

use crate::dhcp::lease::Lease;
use crate::dhcp::message::{DhcpMessage, COOKIE};
use crate::dhcp::options::{DhcpMessageKind, DhcpOptions, OptionCode};
use crate::MacAddr;

/// Identifies which per-interface timer fired, replacing the ambient
/// bare callback-function-pointer style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fire the next retransmit of the in-flight DISCOVER/REQUEST.
    Retransmit,
    /// T1: start renewing.
    Renew,
    /// T2: start rebinding.
    Rebind,
    /// Lease lifetime elapsed with no renewal.
    Expire,
    /// Restart the interface after a NAK backoff.
    NakRestart,
    /// Finish draining after RELEASE's 10 ms sleep.
    ReleaseDrain,
    /// DISCOVER retry budget exhausted; consider fallback/IPv4LL.
    DiscoverTimeout,
}

/// One state of the client automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    /// No lease, nothing in flight.
    Init,
    /// DISCOVER sent, waiting for an OFFER.
    Discover,
    /// REQUEST sent (selecting, init-reboot, renew, or rebind), waiting for
    /// ACK/NAK.
    Request,
    /// Reusing a cached on-disk lease at startup.
    Reboot,
    /// Unicast REQUEST in flight between T1 and T2.
    Renew,
    /// Broadcast REQUEST in flight between T2 and expiry.
    Rebind,
    /// Holding a valid lease; only timers are active.
    Bound,
    /// INFORM sent, waiting for an ACK-shaped acknowledgement.
    Inform,
    /// ARP-probing an address before committing to it.
    Probe,
    /// RELEASE sent; draining before the interface is dropped.
    Release,
}

/// Short tag describing why a bind happened, passed to the hook script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindReason {
    /// Ordinary SELECTING → BOUND transition.
    Bound,
    /// Renewed at T1.
    Renew,
    /// Rebound at T2.
    Rebind,
    /// Reconfirmed a cached lease at startup.
    Reboot,
    /// Statically assigned, no negotiation.
    Static,
    /// IPv4LL fallback claimed an address.
    Ipv4ll,
    /// INFORM accepted (no lease lifetime).
    Inform,
    /// Bound only because nothing better happened before a timeout.
    Timeout,
    /// Synthetic bind in a `RuntimeMode::Test` run.
    Test,
}

/// Everything the automaton tracks for one managed interface.
#[derive(Debug, Clone)]
pub struct StateBlock {
    /// Current automaton state.
    pub state: DhcpState,
    /// Current transaction id.
    pub xid: u32,
    /// Seconds used for the *next* retransmit's base interval (0 before the
    /// first send of a given exchange).
    pub interval: u32,
    /// Current NAK backoff in seconds, 0..=60.
    pub nakoff: u32,
    /// Successful ARP claims since start.
    pub claims: u32,
    /// ARP probes sent for the in-flight address.
    pub probes: u32,
    /// Address conflicts detected since start.
    pub conflicts: u32,
    /// Pending OFFER awaiting a REQUEST/ACK round.
    pub offer: Option<DhcpMessage>,
    /// The most recently bound message.
    pub new: Option<DhcpMessage>,
    /// The previously bound message, retained until the hook has run for
    /// the transition that replaced it.
    pub old: Option<DhcpMessage>,
    /// Decoded lease for `new`.
    pub lease: Option<Lease>,
    /// Tag describing the most recent bind/drop, passed to the hook.
    pub reason: BindReason,
    /// Monotonic uptime (seconds) at which the current exchange began;
    /// used to compute the `secs` field.
    pub start_uptime: u64,
}

impl StateBlock {
    /// A freshly created, unmanaged interface: `INIT`, no lease, no timers.
    pub fn new() -> Self {
        StateBlock {
            state: DhcpState::Init,
            xid: 0,
            interval: 0,
            nakoff: 0,
            claims: 0,
            probes: 0,
            conflicts: 0,
            offer: None,
            new: None,
            old: None,
            lease: None,
            reason: BindReason::Timeout,
            start_uptime: 0,
        }
    }
}

impl Default for StateBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Cap on the generic retransmit backoff.
pub const MAX_RETRANSMIT_INTERVAL: u32 = 64;
/// Starting point of the generic retransmit backoff.
pub const INITIAL_RETRANSMIT_INTERVAL: u32 = 4;
/// Cap on the NAK backoff.
pub const MAX_NAK_BACKOFF: u32 = 60;

/// Advance the generic send-retry backoff: 4, 8, 16, 32, 64, 64, ...
pub fn next_retransmit_interval(current: u32) -> u32 {
    if current == 0 {
        INITIAL_RETRANSMIT_INTERVAL
    } else {
        (current * 2).min(MAX_RETRANSMIT_INTERVAL)
    }
}

/// Advance the NAK backoff: 0, 1, 2, 4, 8, 16, 32, 60, 60, ...
pub fn next_nak_backoff(current: u32) -> u32 {
    if current == 0 {
        1
    } else {
        (current * 2).min(MAX_NAK_BACKOFF)
    }
}

/// Turn a backoff interval (whole seconds) into a jittered delay:
/// `interval + uniform[-1, +1]` seconds, floored at zero.
pub fn jittered_delay(interval_secs: u32) -> Duration {
    let jitter: f64 = rand::rng().random_range(-1.0..=1.0);
    let total = interval_secs as f64 + jitter;
    Duration::from_secs_f64(total.max(0.0))
}

/// A `(network, mask)` pair used by the inbound source whitelist/blacklist.
#[derive(Debug, Clone, Copy)]
pub struct SourceRange {
    /// Network prefix.
    pub network: Ipv4Addr,
    /// Prefix mask.
    pub mask: Ipv4Addr,
}

impl SourceRange {
    fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(addr) & mask == u32::from(self.network) & mask
    }
}

/// Inbound-message filtering rules, applied before a datagram is
/// handed to the automaton.
#[derive(Debug, Clone, Default)]
pub struct InboundFilter {
    /// If non-empty, only sources matching one of these ranges are kept.
    pub whitelist: Vec<SourceRange>,
    /// Sources matching one of these ranges are always dropped.
    pub blacklist: Vec<SourceRange>,
    /// On a point-to-point link, the expected peer address. A mismatch is
    /// logged as a warning but does not drop the packet.
    pub point_to_point_peer: Option<Ipv4Addr>,
}

impl InboundFilter {
    /// Whether `src` passes the whitelist/blacklist rule.
    pub fn source_allowed(&self, src: Ipv4Addr) -> bool {
        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|r| r.contains(src)) {
            return false;
        }
        !self.blacklist.iter().any(|r| r.contains(src))
    }

    /// Check the point-to-point peer rule; always returns `true` (never
    /// drops), but logs a warning on mismatch.
    pub fn check_point_to_point(&self, src: Ipv4Addr) -> bool {
        if let Some(peer) = self.point_to_point_peer {
            if peer != src {
                log::warn!("point-to-point source mismatch: expected {peer}, got {src}");
            }
        }
        true
    }
}

/// Validate a parsed message's fixed-field identity: the `xid` belongs to
/// our transaction, and `chaddr[0..hwlen]` matches our hardware address
/// whenever `hwlen <= 16`.
pub fn message_matches_transaction(msg: &DhcpMessage, xid: u32, hwaddr: &MacAddr) -> bool {
    if msg.xid != xid {
        return false;
    }
    let hwlen = msg.hlen as usize;
    if hwlen > msg.chaddr.len() {
        return true;
    }
    msg.chaddr[..hwlen] == hwaddr.octets()[..hwlen.min(hwaddr.octets().len())]
}

/// Outcome of applying the acceptance rules to a parsed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Accept as an ACK (or BOOTP reply, which behaves like one).
    Ack,
    /// Accept as a NAK; restart with NAK backoff.
    Nak,
    /// Reject outright; keep waiting for a better reply.
    Reject,
}

/// Apply the acceptance rules to a decoded reply.
///
/// `requiremask` lists option codes that must be present for the reply to
/// be trusted; a BOOTP-shaped reply (no option 53) is exempt from
/// requiring the server identifier specifically.
pub fn accept_reply(msg: &DhcpMessage, opts: &DhcpOptions, requiremask: &[u8]) -> Acceptance {
    let kind = opts.message_kind();
    let is_bootp = kind.is_none();

    for &code in requiremask {
        if is_bootp && code == u8::from(OptionCode::ServerIdentifier) {
            continue;
        }
        if opts.raw(code).is_none() {
            return Acceptance::Reject;
        }
    }

    match kind {
        None | Some(DhcpMessageKind::Offer) | Some(DhcpMessageKind::Ack) => {
            let ci = msg.ciaddr;
            let yi = msg.yiaddr;
            let zero_or_broadcast = |a: Ipv4Addr| a == Ipv4Addr::UNSPECIFIED || a == Ipv4Addr::BROADCAST;
            if zero_or_broadcast(ci) && zero_or_broadcast(yi) {
                return Acceptance::Reject;
            }
            Acceptance::Ack
        }
        Some(DhcpMessageKind::Nak) => {
            if requiremask.contains(&u8::from(OptionCode::ServerIdentifier))
                && opts.ipv4(u8::from(OptionCode::ServerIdentifier)).is_none()
            {
                return Acceptance::Reject;
            }
            Acceptance::Nak
        }
        _ => Acceptance::Reject,
    }
}

/// Decide the [`BindReason`] for a newly accepted lease, given the state
/// the transition originated from.
pub fn bind_reason_for_state(from: DhcpState, is_bootp: bool) -> BindReason {
    if is_bootp {
        return BindReason::Bound;
    }
    match from {
        DhcpState::Renew => BindReason::Renew,
        DhcpState::Rebind => BindReason::Rebind,
        DhcpState::Reboot => BindReason::Reboot,
        DhcpState::Inform => BindReason::Inform,
        DhcpState::Probe => BindReason::Bound,
        _ => BindReason::Bound,
    }
}

/// Whether `lease.cookie` is a genuine DHCP reply (versus a pre-DHCP BOOTP
/// packet that happened to carry the magic cookie incorrectly).
pub fn is_genuine_cookie(lease: &Lease) -> bool {
    lease.cookie == COOKIE
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retransmit_schedule_doubles_and_caps() {
        let mut interval = 0;
        let mut seq = Vec::new();
        for _ in 0..7 {
            interval = next_retransmit_interval(interval);
            seq.push(interval);
        }
        assert_eq!(seq, vec![4, 8, 16, 32, 64, 64, 64]);
    }

    #[test]
    fn nak_backoff_schedule_doubles_and_caps() {
        let mut nakoff = 0;
        let mut seq = Vec::new();
        for _ in 0..8 {
            nakoff = next_nak_backoff(nakoff);
            seq.push(nakoff);
        }
        assert_eq!(seq, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn jittered_delay_stays_within_one_second_of_base() {
        for _ in 0..20 {
            let d = jittered_delay(10).as_secs_f64();
            assert!((9.0..=11.0).contains(&d), "{d} out of range");
        }
    }

    #[test]
    fn source_range_whitelist_rejects_outsiders() {
        let filter = InboundFilter {
            whitelist: vec![SourceRange { network: Ipv4Addr::new(192, 0, 2, 0), mask: Ipv4Addr::new(255, 255, 255, 0) }],
            blacklist: vec![],
            point_to_point_peer: None,
        };
        assert!(filter.source_allowed(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(!filter.source_allowed(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn blacklist_wins_even_without_whitelist() {
        let filter = InboundFilter {
            whitelist: vec![],
            blacklist: vec![SourceRange { network: Ipv4Addr::new(10, 0, 0, 0), mask: Ipv4Addr::new(255, 0, 0, 0) }],
            point_to_point_peer: None,
        };
        assert!(!filter.source_allowed(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(filter.source_allowed(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[test]
    fn message_matches_transaction_checks_xid_and_chaddr() {
        let mac = MacAddr::new([2, 0, 0, 0, 0, 1]);
        let mut msg = DhcpMessage::new_request(42, mac.octets());
        assert!(message_matches_transaction(&msg, 42, &mac));
        msg.xid = 7;
        assert!(!message_matches_transaction(&msg, 42, &mac));
    }

    #[test]
    fn bootp_reply_is_exempt_from_server_id_requirement() {
        let mut msg = DhcpMessage::new_request(1, [0; 6]);
        msg.yiaddr = Ipv4Addr::new(192, 0, 2, 20);
        let opts = DhcpOptions::parse(&msg);
        let requiremask = [u8::from(OptionCode::ServerIdentifier)];
        assert_eq!(accept_reply(&msg, &opts, &requiremask), Acceptance::Ack);
    }

    #[test]
    fn offer_with_zero_ciaddr_and_yiaddr_is_rejected() {
        let mut msg = DhcpMessage::new_request(1, [0; 6]);
        msg.options = vec![53, 1, u8::from(DhcpMessageKind::Offer), 255];
        let opts = DhcpOptions::parse(&msg);
        assert_eq!(accept_reply(&msg, &opts, &[]), Acceptance::Reject);
    }

    #[test]
    fn ack_with_yiaddr_set_is_accepted() {
        let mut msg = DhcpMessage::new_request(1, [0; 6]);
        msg.yiaddr = Ipv4Addr::new(192, 0, 2, 10);
        msg.options = vec![53, 1, u8::from(DhcpMessageKind::Ack), 255];
        let opts = DhcpOptions::parse(&msg);
        assert_eq!(accept_reply(&msg, &opts, &[]), Acceptance::Ack);
    }

    #[test]
    fn nak_without_server_id_rejected_only_when_required() {
        let mut msg = DhcpMessage::new_request(1, [0; 6]);
        msg.options = vec![53, 1, u8::from(DhcpMessageKind::Nak), 255];
        let opts = DhcpOptions::parse(&msg);
        assert_eq!(accept_reply(&msg, &opts, &[]), Acceptance::Nak);
        let requiremask = [u8::from(OptionCode::ServerIdentifier)];
        assert_eq!(accept_reply(&msg, &opts, &requiremask), Acceptance::Reject);
    }
}
