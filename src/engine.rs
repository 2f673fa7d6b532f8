//! Top-level orchestration: ties the state machine, I/O adapter, and
//! injected collaborators together behind a single [`Engine::process`]
//! entry point.
//!
//! The engine owns no collaborators itself — they are borrowed for the
//! duration of one [`Engine::start`]/[`Engine::process`] call via
//! [`Collaborators`], keeping the engine's own state plain data that is
//! trivial to construct in tests.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::collab::{ArpProber, DhcpEvent, EventLoop, Ipv4Shim, Ipv4llFallback, ScriptRunner, SocketFactory};
use crate::config::InterfaceOptions;
use crate::dhcp::builder::MessageBuilder;
use crate::dhcp::env;
use crate::dhcp::lease::{self, Lease};
use crate::dhcp::message::DhcpMessage;
use crate::dhcp::options::{DhcpOptions, OptionCode};
use crate::dhcp::state::{self, Acceptance, BindReason, DhcpState, InboundFilter, StateBlock, TimerKind};
use crate::dhcp::xid;
use crate::error::{DhcpError, Result};
use crate::io::IoAdapter;

/// Borrowed collaborators for one call into the engine. Bundled together
/// so `process`/`start` don't carry five separate generic parameters.
pub struct Collaborators<'a> {
    /// Raw/UDP transport.
    pub sockets: &'a mut dyn SocketFactory,
    /// Timer/fd registration.
    pub events: &'a mut dyn EventLoop,
    /// Duplicate-address detection.
    pub arp: &'a mut dyn ArpProber,
    /// Kernel address table access.
    pub addr: &'a mut dyn Ipv4Shim,
    /// Hook script invocation.
    pub hook: &'a mut dyn ScriptRunner,
    /// IPv4LL fallback.
    pub ipv4ll: &'a mut dyn Ipv4llFallback,
}

/// One managed interface's DHCP client.
pub struct Engine {
    config: InterfaceOptions,
    io: IoAdapter,
    state: StateBlock,
    filter: InboundFilter,
    requiremask: Vec<u8>,
    lease_path: PathBuf,
}

impl Engine {
    /// Build an engine for `config`, persisting leases at `lease_path`.
    /// The default `requiremask` is `[ServerIdentifier]`, matching the
    /// classic SELECTING-state requirement; override via
    /// [`Engine::set_requiremask`] for a stricter or looser policy.
    pub fn new(config: InterfaceOptions, lease_path: PathBuf) -> Self {
        Engine {
            config,
            io: IoAdapter::new(),
            state: StateBlock::new(),
            filter: InboundFilter::default(),
            requiremask: vec![u8::from(OptionCode::ServerIdentifier)],
            lease_path,
        }
    }

    /// Current automaton state, for diagnostics/tests.
    pub fn state(&self) -> &StateBlock {
        &self.state
    }

    /// Replace the inbound source whitelist/blacklist/point-to-point rule.
    pub fn set_filter(&mut self, filter: InboundFilter) {
        self.filter = filter;
    }

    /// Replace the set of option codes a reply must carry to be trusted.
    pub fn set_requiremask(&mut self, requiremask: Vec<u8>) {
        self.requiremask = requiremask;
    }

    /// Enter service: reuse a valid cached lease (`INIT-REBOOT`) if one
    /// exists on disk, otherwise start a fresh `DISCOVER`.
    pub fn start(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        IoAdapter::require_hwaddr(&self.config.hwaddr)?;

        if let Some(cached) = lease::read_lease_file(&self.lease_path, &self.config.interface)? {
            let opts = DhcpOptions::parse(&cached);
            let candidate = Lease::from_message(&cached, &opts);
            let expired = lease::is_expired(
                &self.lease_path,
                candidate.leasetime,
                SystemTime::now(),
                &self.config.interface,
            )?;
            if !expired {
                self.state.lease = Some(candidate);
                self.state.new = Some(cached);
                return self.begin_reboot(collab, uptime_secs);
            }
        }
        self.begin_discover(collab, uptime_secs)
    }

    /// Dispatch one event from the host event loop.
    pub fn process(&mut self, event: DhcpEvent, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        match event {
            DhcpEvent::TimerFired { kind, .. } => self.on_timer(kind, collab, uptime_secs),
            DhcpEvent::FdReadable { .. } => self.on_readable(collab, uptime_secs),
            DhcpEvent::ArpConflict { .. } => self.on_arp_conflict(collab, uptime_secs),
            DhcpEvent::ArpClaimComplete { .. } => self.on_arp_claim_complete(collab),
        }
    }

    fn cancel_all_timers(&self, collab: &mut Collaborators) {
        collab.events.delete_timer(&self.config.interface, None);
    }

    fn begin_discover(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        self.cancel_all_timers(collab);
        self.state.state = DhcpState::Discover;
        self.state.xid = xid::next_xid(&self.config);
        self.state.interval = 0;
        self.state.start_uptime = uptime_secs;
        self.state.offer = None;
        let msg = MessageBuilder::new(&self.config).discover(self.state.xid, uptime_secs, self.state.start_uptime);
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, None)?;
        self.arm_retransmit(collab);
        let budget = std::time::Duration::from_secs(self.config.discover_timeout_secs as u64);
        collab.events.add_timer(&self.config.interface, budget, TimerKind::DiscoverTimeout);
        Ok(())
    }

    fn begin_reboot(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        self.cancel_all_timers(collab);
        let lease = self
            .state
            .lease
            .clone()
            .ok_or_else(|| DhcpError::Codec("begin_reboot requires a cached lease".into()))?;
        self.state.state = DhcpState::Reboot;
        self.state.xid = xid::next_xid(&self.config);
        self.state.interval = 0;
        self.state.start_uptime = uptime_secs;
        let msg = MessageBuilder::new(&self.config).request_init_reboot(self.state.xid, uptime_secs, self.state.start_uptime, &lease);
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, None)?;
        self.arm_retransmit(collab);
        Ok(())
    }

    fn begin_renew(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        self.cancel_all_timers(collab);
        let lease = self
            .state
            .lease
            .clone()
            .ok_or_else(|| DhcpError::Codec("begin_renew requires a bound lease".into()))?;
        self.state.state = DhcpState::Renew;
        self.state.xid = xid::next_xid(&self.config);
        self.state.interval = 0;
        self.state.start_uptime = uptime_secs;
        let iface_addr = collab.addr.get_address(&self.config.interface);
        let msg = MessageBuilder::new(&self.config).request_renew(self.state.xid, uptime_secs, self.state.start_uptime, &lease, iface_addr);
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, Some(lease.server))?;
        self.arm_renew_retransmit(collab, &lease, uptime_secs);
        Ok(())
    }

    fn begin_rebind(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        self.cancel_all_timers(collab);
        let lease = self
            .state
            .lease
            .clone()
            .ok_or_else(|| DhcpError::Codec("begin_rebind requires a bound lease".into()))?;
        self.state.state = DhcpState::Rebind;
        self.state.xid = xid::next_xid(&self.config);
        self.state.interval = 0;
        self.state.start_uptime = uptime_secs;
        let iface_addr = collab.addr.get_address(&self.config.interface);
        let msg = MessageBuilder::new(&self.config).request_rebind(self.state.xid, uptime_secs, self.state.start_uptime, &lease, iface_addr);
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, None)?;
        self.arm_rebind_retransmit(collab, &lease, uptime_secs);
        Ok(())
    }

    fn arm_retransmit(&mut self, collab: &mut Collaborators) {
        self.state.interval = state::next_retransmit_interval(self.state.interval);
        let delay = state::jittered_delay(self.state.interval);
        collab.events.add_timer(&self.config.interface, delay, TimerKind::Retransmit);
    }

    /// Like [`Engine::arm_retransmit`], but never schedules past T2.
    fn arm_renew_retransmit(&mut self, collab: &mut Collaborators, lease: &Lease, uptime_secs: u64) {
        self.state.interval = state::next_retransmit_interval(self.state.interval);
        let remaining = lease.rebindtime.saturating_sub(uptime_secs.saturating_sub(self.state.start_uptime) as u32);
        let capped = self.state.interval.min(remaining.max(1));
        let delay = state::jittered_delay(capped);
        collab.events.add_timer(&self.config.interface, delay, TimerKind::Retransmit);
    }

    /// Like [`Engine::arm_retransmit`], but never schedules past expiry.
    fn arm_rebind_retransmit(&mut self, collab: &mut Collaborators, lease: &Lease, uptime_secs: u64) {
        self.state.interval = state::next_retransmit_interval(self.state.interval);
        let remaining = lease.leasetime.saturating_sub(uptime_secs.saturating_sub(self.state.start_uptime) as u32);
        let capped = self.state.interval.min(remaining.max(1));
        let delay = state::jittered_delay(capped);
        collab.events.add_timer(&self.config.interface, delay, TimerKind::Retransmit);
    }

    fn on_timer(&mut self, kind: TimerKind, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        match kind {
            TimerKind::Retransmit => self.retransmit(collab, uptime_secs),
            TimerKind::Renew => self.begin_renew(collab, uptime_secs),
            TimerKind::Rebind => self.begin_rebind(collab, uptime_secs),
            TimerKind::Expire => self.on_expire(collab, uptime_secs),
            TimerKind::NakRestart => self.begin_discover(collab, uptime_secs),
            TimerKind::ReleaseDrain => {
                self.io.close_all(collab.sockets, collab.events);
                Ok(())
            }
            TimerKind::DiscoverTimeout => self.on_discover_timeout(collab),
        }
    }

    fn retransmit(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        let builder = MessageBuilder::new(&self.config);
        let msg = match self.state.state {
            DhcpState::Discover => builder.discover(self.state.xid, uptime_secs, self.state.start_uptime),
            DhcpState::Request => {
                let offer = self.state.offer.clone().ok_or_else(|| DhcpError::Codec("REQUEST retransmit with no pending offer".into()))?;
                let opts = DhcpOptions::parse(&offer);
                let lease = Lease::from_message(&offer, &opts);
                builder.request_selecting(self.state.xid, uptime_secs, self.state.start_uptime, &lease)
            }
            DhcpState::Reboot => {
                let lease = self.state.lease.clone().ok_or_else(|| DhcpError::Codec("REBOOT retransmit with no cached lease".into()))?;
                builder.request_init_reboot(self.state.xid, uptime_secs, self.state.start_uptime, &lease)
            }
            DhcpState::Renew | DhcpState::Rebind => {
                let lease = self.state.lease.clone().ok_or_else(|| DhcpError::Codec("RENEW/REBIND retransmit with no lease".into()))?;
                let iface_addr = collab.addr.get_address(&self.config.interface);
                builder.request_renew(self.state.xid, uptime_secs, self.state.start_uptime, &lease, iface_addr)
            }
            _ => return Ok(()),
        };
        let unicast = matches!(self.state.state, DhcpState::Renew).then(|| self.state.lease.as_ref().map(|l| l.server)).flatten();
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, unicast)?;
        self.arm_retransmit(collab);
        Ok(())
    }

    fn on_discover_timeout(&mut self, collab: &mut Collaborators) -> Result<()> {
        if self.config.fallback_profile.is_some() {
            log::info!("{}: DISCOVER exhausted, falling back to configured profile", self.config.interface);
        } else if self.config.ipv4ll_enabled {
            collab.ipv4ll.ipv4ll_start(&self.config.interface);
        }
        Ok(())
    }

    fn on_expire(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        log::warn!("{}: lease expired", self.config.interface);
        self.cancel_all_timers(collab);
        lease::remove_lease_file(&self.lease_path, &self.config.interface)?;
        self.state.old = self.state.new.take();
        self.state.lease = None;
        self.begin_discover(collab, uptime_secs)
    }

    fn on_readable(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        let Some(msg) = self.io.receive(collab.sockets, &self.config.interface, &self.filter)? else {
            return Ok(());
        };
        if !state::message_matches_transaction(&msg, self.state.xid, &self.config.hwaddr) {
            log::trace!("{}: ignoring reply for a different transaction", self.config.interface);
            return Ok(());
        }
        let opts = DhcpOptions::parse(&msg);

        match self.state.state {
            DhcpState::Discover => self.on_offer(msg, &opts, collab, uptime_secs),
            DhcpState::Request | DhcpState::Reboot | DhcpState::Renew | DhcpState::Rebind => {
                self.on_ack_or_nak(msg, &opts, collab, uptime_secs)
            }
            DhcpState::Inform => self.on_inform_reply(msg, &opts, collab),
            _ => Ok(()),
        }
    }

    /// A plain OFFER moves DISCOVER → REQUEST as usual. A legacy BOOTP
    /// reply (no `DHO_MESSAGETYPE`) carries no handshake at all, so it is
    /// accepted directly through the same acceptance/bind path as an ACK
    /// (the acceptance rules apply uniformly to type ∈ {absent, OFFER,
    /// ACK}).
    fn on_offer(&mut self, msg: DhcpMessage, opts: &DhcpOptions, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        match opts.message_kind() {
            Some(crate::dhcp::options::DhcpMessageKind::Offer) => {
                self.cancel_all_timers(collab);
                self.state.offer = Some(msg);
                self.state.state = DhcpState::Request;
                self.state.interval = 0;
                Ok(())
            }
            None => self.on_ack_or_nak(msg, opts, collab, uptime_secs),
            _ => Ok(()),
        }
    }

    fn on_ack_or_nak(&mut self, msg: DhcpMessage, opts: &DhcpOptions, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        match state::accept_reply(&msg, opts, &self.requiremask) {
            Acceptance::Reject => Ok(()),
            Acceptance::Nak => {
                log::info!("{}: received NAK, restarting with backoff", self.config.interface);
                self.cancel_all_timers(collab);
                lease::remove_lease_file(&self.lease_path, &self.config.interface)?;
                self.state.lease = None;
                self.state.nakoff = state::next_nak_backoff(self.state.nakoff);
                let delay = std::time::Duration::from_secs(self.state.nakoff as u64);
                collab.events.add_timer(&self.config.interface, delay, TimerKind::NakRestart);
                Ok(())
            }
            Acceptance::Ack => {
                self.state.nakoff = 0;
                let lease = Lease::from_message(&msg, opts);
                let from_state = self.state.state;
                let addr = lease.addr;
                let is_bootp = lease.is_bootp;
                self.state.new = Some(msg);
                self.state.lease = Some(lease);
                self.cancel_all_timers(collab);
                self.state.reason = state::bind_reason_for_state(from_state, is_bootp);
                if from_state == DhcpState::Request {
                    // PROBE is specific to the SELECTING path: the offered
                    // address hasn't been seen on this link before.
                    collab.arp.arp_probe(&self.config.interface, addr);
                    self.state.state = DhcpState::Probe;
                    Ok(())
                } else {
                    // REBOOT/RENEW/REBIND reconfirm an address already in
                    // use, so they bind directly without an ARP probe.
                    self.finish_bind(collab, uptime_secs)
                }
            }
        }
    }

    fn on_inform_reply(&mut self, msg: DhcpMessage, opts: &DhcpOptions, collab: &mut Collaborators) -> Result<()> {
        if opts.message_kind() != Some(crate::dhcp::options::DhcpMessageKind::Ack) {
            return Ok(());
        }
        self.cancel_all_timers(collab);
        self.state.reason = BindReason::Inform;
        self.state.new = Some(msg);
        self.finish_bind(collab, 0)
    }

    fn on_arp_conflict(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        self.state.conflicts += 1;
        let lease = self.state.lease.clone().ok_or_else(|| DhcpError::Conflict { addr: Ipv4Addr::UNSPECIFIED })?;
        log::warn!("{}: address conflict detected for {}", self.config.interface, lease.addr);
        let iface_addr = collab.addr.get_address(&self.config.interface);
        let decline = MessageBuilder::new(&self.config).decline(self.state.xid, uptime_secs, self.state.start_uptime, &lease, iface_addr);
        self.io.send(collab.sockets, collab.events, &self.config.interface, &decline, None)?;
        self.state.lease = None;
        self.state.state = DhcpState::Init;
        let delay = std::time::Duration::from_secs(state::INITIAL_RETRANSMIT_INTERVAL as u64);
        collab.events.add_timer(&self.config.interface, delay, TimerKind::NakRestart);
        Ok(())
    }

    fn on_arp_claim_complete(&mut self, collab: &mut Collaborators) -> Result<()> {
        self.state.claims += 1;
        self.finish_bind(collab, 0)
    }

    fn finish_bind(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        let msg = self.state.new.clone().ok_or_else(|| DhcpError::Codec("bind with no message".into()))?;
        let opts = DhcpOptions::parse(&msg);
        let is_bootp = opts.message_kind().is_none();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let lease = Lease::from_message(&msg, &opts).bind(uptime_secs, now, false);

        if is_bootp {
            lease::remove_lease_file(&self.lease_path, &self.config.interface)?;
        } else {
            lease::write_lease_file(&self.lease_path, &msg, &self.config.interface)?;
        }

        collab.addr.apply_addr(&self.config.interface, &lease)?;
        if let Some(mtu) = lease.mtu {
            collab.addr.set_mtu(&self.config.interface, mtu);
        }

        self.state.old = self.state.new.take();
        self.state.new = Some(msg.clone());
        self.state.lease = Some(lease.clone());
        self.state.state = DhcpState::Bound;

        if !is_bootp && lease.leasetime != lease::INFINITE_LEASE {
            self.cancel_all_timers(collab);
            collab.events.add_timer(&self.config.interface, std::time::Duration::from_secs(lease.renewaltime as u64), TimerKind::Renew);
            collab.events.add_timer(&self.config.interface, std::time::Duration::from_secs(lease.rebindtime as u64), TimerKind::Rebind);
            collab.events.add_timer(&self.config.interface, std::time::Duration::from_secs(lease.leasetime as u64), TimerKind::Expire);
        }

        let reason_str = format!("{:?}", self.state.reason).to_uppercase();
        let pairs = env::export("new_", &msg, &lease, &opts);
        collab.hook.script_run(&self.config.interface, &reason_str, &pairs);
        Ok(())
    }

    /// DHCPINFORM: confirm already-configured addressing without leasing.
    pub fn inform(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        self.cancel_all_timers(collab);
        self.state.state = DhcpState::Inform;
        self.state.xid = xid::next_xid(&self.config);
        self.state.start_uptime = uptime_secs;
        let iface_addr = collab.addr.get_address(&self.config.interface);
        let msg = MessageBuilder::new(&self.config).inform(self.state.xid, uptime_secs, self.state.start_uptime, iface_addr, self.state.lease.as_ref());
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, None)?;
        Ok(())
    }

    /// DHCPRELEASE: unicast the release, then drain for 10 ms before the
    /// caller drops the interface.
    pub fn release(&mut self, collab: &mut Collaborators, uptime_secs: u64) -> Result<()> {
        let Some(lease) = self.state.lease.clone() else {
            return Ok(());
        };
        self.cancel_all_timers(collab);
        self.state.xid = xid::next_xid(&self.config);
        let iface_addr = collab.addr.get_address(&self.config.interface);
        let msg = MessageBuilder::new(&self.config).release(self.state.xid, uptime_secs, self.state.start_uptime, &lease, iface_addr);
        self.io.send(collab.sockets, collab.events, &self.config.interface, &msg, Some(lease.server))?;
        self.state.state = DhcpState::Release;
        lease::remove_lease_file(&self.lease_path, &self.config.interface)?;
        self.state.lease = None;
        collab.events.add_timer(&self.config.interface, std::time::Duration::from_millis(10), TimerKind::ReleaseDrain);
        Ok(())
    }
}
