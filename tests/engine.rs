//! End-to-end scenarios against in-memory collaborator fakes: no kernel
//! sockets, no real clock, no real ARP.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;

use dhcp4::collab::{ArpProber, DhcpEvent, EventLoop, Ipv4Shim, Ipv4llFallback, ScriptRunner, SocketFactory};
use dhcp4::dhcp::lease::Lease;
use dhcp4::dhcp::message::{DhcpMessage, DhcpOperation, FLAG_BROADCAST};
use dhcp4::dhcp::options::DhcpOptions;
use dhcp4::dhcp::state::TimerKind;
use dhcp4::engine::Collaborators;
use dhcp4::error::Result;
use dhcp4::{Engine, InterfaceOptions, MacAddr};

struct FakeSockets {
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    from: Ipv4Addr,
}

impl FakeSockets {
    fn new() -> Self {
        FakeSockets {
            sent: Vec::new(),
            inbound: VecDeque::new(),
            from: Ipv4Addr::new(192, 0, 2, 1),
        }
    }

    fn last_parsed(&self) -> DhcpMessage {
        DhcpMessage::parse(self.sent.last().expect("at least one frame sent")).expect("valid frame")
    }
}

impl SocketFactory for FakeSockets {
    fn open_raw(&mut self, _iface: &str) -> Result<i32> {
        Ok(3)
    }
    fn open_udp(&mut self, _iface: &str) -> Result<i32> {
        Ok(4)
    }
    fn close(&mut self, _fd: i32) {}
    fn send_raw(&mut self, _iface: &str, bytes: &[u8]) -> Result<()> {
        self.sent.push(bytes.to_vec());
        Ok(())
    }
    fn send_udp(&mut self, _iface: &str, _dst: Ipv4Addr, bytes: &[u8]) -> Result<()> {
        self.sent.push(bytes.to_vec());
        Ok(())
    }
    fn recv_raw(&mut self, _iface: &str, buf: &mut [u8]) -> Result<(usize, bool)> {
        let payload = self.inbound.pop_front().unwrap_or_default();
        buf[..payload.len()].copy_from_slice(&payload);
        Ok((payload.len(), true))
    }
    fn valid_udp(&self, _buf: &[u8], n: usize, _partial_csum: bool) -> Option<(Ipv4Addr, usize, usize)> {
        Some((self.from, 0, n))
    }
}

#[derive(Default)]
struct FakeEvents {
    armed: Vec<(TimerKind, Duration)>,
    watched_fds: Vec<i32>,
}

impl EventLoop for FakeEvents {
    fn add_timer(&mut self, _iface: &str, after: Duration, kind: TimerKind) {
        self.armed.push((kind, after));
    }
    fn delete_timer(&mut self, _iface: &str, _kind: Option<TimerKind>) {}
    fn add_fd(&mut self, _iface: &str, fd: i32) {
        self.watched_fds.push(fd);
    }
    fn delete_fd(&mut self, fd: i32) {
        self.watched_fds.retain(|&w| w != fd);
    }
}

struct FakeArp {
    probed: Vec<Ipv4Addr>,
}

impl ArpProber for FakeArp {
    fn arp_probe(&mut self, _iface: &str, addr: Ipv4Addr) {
        self.probed.push(addr);
    }
    fn arp_announce(&mut self, _iface: &str, _addr: Ipv4Addr) {}
}

#[derive(Default)]
struct FakeAddr;

impl Ipv4Shim for FakeAddr {
    fn has_address(&self, _iface: &str, _addr: Ipv4Addr) -> bool {
        false
    }
    fn apply_addr(&mut self, _iface: &str, _lease: &Lease) -> Result<()> {
        Ok(())
    }
    fn get_address(&self, _iface: &str) -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }
    fn get_netmask(&self, _addr: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }
    fn get_mtu(&self, _iface: &str) -> u16 {
        1500
    }
    fn set_mtu(&mut self, _iface: &str, _mtu: u16) {}
}

#[derive(Default)]
struct FakeHook {
    reasons: Vec<String>,
}

impl ScriptRunner for FakeHook {
    fn script_run(&mut self, _iface: &str, reason: &str, _env: &[(String, String)]) {
        self.reasons.push(reason.to_string());
    }
}

struct FakeIpv4ll;

impl Ipv4llFallback for FakeIpv4ll {
    fn ipv4ll_start(&mut self, _iface: &str) {}
}

/// Expands inline into the caller's body so the borrow checker sees direct,
/// disjoint field projections off `$h` rather than a whole-struct borrow
/// through a helper method — `$h.engine` stays independently borrowable.
macro_rules! collab_of {
    ($h:expr) => {
        &mut Collaborators {
            sockets: &mut $h.sockets,
            events: &mut $h.events,
            arp: &mut $h.arp,
            addr: &mut $h.addr,
            hook: &mut $h.hook,
            ipv4ll: &mut $h.ipv4ll,
        }
    };
}

struct Harness {
    engine: Engine,
    sockets: FakeSockets,
    events: FakeEvents,
    arp: FakeArp,
    addr: FakeAddr,
    hook: FakeHook,
    ipv4ll: FakeIpv4ll,
    hwaddr: [u8; 6],
}

impl Harness {
    fn new(lease_path: std::path::PathBuf) -> Self {
        let hwaddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let config = InterfaceOptions::new("eth0", MacAddr::new(hwaddr));
        Harness {
            engine: Engine::new(config, lease_path),
            sockets: FakeSockets::new(),
            events: FakeEvents::default(),
            arp: FakeArp { probed: Vec::new() },
            addr: FakeAddr::default(),
            hook: FakeHook::default(),
            ipv4ll: FakeIpv4ll,
            hwaddr,
        }
    }

    fn start(&mut self) {
        self.engine.start(collab_of!(self), 0).expect("start");
    }

    fn deliver(&mut self, payload: Vec<u8>, uptime_secs: u64) {
        self.sockets.inbound.push_back(payload);
        self.engine
            .process(DhcpEvent::FdReadable { iface: "eth0".into(), fd: 3 }, collab_of!(self), uptime_secs)
            .expect("process FdReadable");
    }

    fn timer(&mut self, kind: TimerKind, uptime_secs: u64) {
        self.engine
            .process(DhcpEvent::TimerFired { iface: "eth0".into(), kind }, collab_of!(self), uptime_secs)
            .expect("process TimerFired");
    }

    fn claim_complete(&mut self) {
        self.engine
            .process(DhcpEvent::ArpClaimComplete { iface: "eth0".into() }, collab_of!(self), 0)
            .expect("process ArpClaimComplete");
    }

    fn xid(&self) -> u32 {
        self.engine.state().xid
    }
}

fn offer_or_ack(xid: u32, chaddr: [u8; 6], yiaddr: Ipv4Addr, kind: u8, extra: &[u8]) -> Vec<u8> {
    let mut msg = DhcpMessage::new_request(xid, chaddr);
    msg.op = DhcpOperation::BootReply;
    msg.yiaddr = yiaddr;
    let mut options = vec![53, 1, kind];
    options.extend_from_slice(extra);
    options.push(255);
    msg.options = options;
    msg.emit()
}

fn lease_time_option(secs: u32) -> Vec<u8> {
    let b = secs.to_be_bytes();
    vec![51, 4, b[0], b[1], b[2], b[3]]
}

fn server_id_option(addr: Ipv4Addr) -> Vec<u8> {
    let o = addr.octets();
    vec![54, 4, o[0], o[1], o[2], o[3]]
}

fn subnet_mask_option(addr: Ipv4Addr) -> Vec<u8> {
    let o = addr.octets();
    vec![1, 4, o[0], o[1], o[2], o[3]]
}

/// A. DISCOVER/OFFER/REQUEST/ACK happy path.
#[test]
fn discover_offer_request_ack_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(dir.path().join("eth0.lease"));

    h.start();
    let discover = h.sockets.last_parsed();
    assert_ne!(discover.flags & FLAG_BROADCAST, 0, "DISCOVER must set the broadcast flag");

    let xid = h.xid();
    let server = Ipv4Addr::new(192, 0, 2, 1);
    let offered = Ipv4Addr::new(192, 0, 2, 10);
    let mask = Ipv4Addr::new(255, 255, 255, 0);

    let mut extra = subnet_mask_option(mask);
    extra.extend(server_id_option(server));
    extra.extend(lease_time_option(3600));
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 2, &extra), 0);

    let request = h.sockets.last_parsed();
    let opts = DhcpOptions::parse(&request);
    assert_eq!(opts.ipv4(50), Some(offered), "REQUEST carries option 50");
    assert_eq!(opts.ipv4(54), Some(server), "REQUEST carries option 54");

    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 5, &extra), 0);
    assert_eq!(h.arp.probed, vec![offered]);

    h.claim_complete();

    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Bound);
    let lease = h.engine.state().lease.clone().expect("bound lease");
    assert_eq!(lease.addr, offered);
    assert_eq!(lease.subnet_cidr(), 24);

    let armed: Vec<u32> = h.events.armed.iter().map(|(_, d)| d.as_secs() as u32).collect();
    assert!(armed.contains(&1800), "renew at 1800s: {armed:?}");
    assert!(armed.contains(&3150), "rebind at 3150s: {armed:?}");
    assert!(armed.contains(&3600), "expire at 3600s: {armed:?}");
    assert_eq!(h.hook.reasons, vec!["BOUND".to_string()]);
}

/// B. NAK restart while renewing a previously bound lease.
#[test]
fn nak_restart_backs_off() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(dir.path().join("eth0.lease"));
    h.engine.set_requiremask(Vec::new());

    h.start();
    let xid = h.xid();
    let server = Ipv4Addr::new(192, 0, 2, 1);
    let offered = Ipv4Addr::new(192, 0, 2, 10);
    let mut extra = subnet_mask_option(Ipv4Addr::new(255, 255, 255, 0));
    extra.extend(server_id_option(server));
    extra.extend(lease_time_option(3600));
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 2, &extra), 0);
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 5, &extra), 0);
    h.claim_complete();
    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Bound);

    h.timer(TimerKind::Renew, 1800);
    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Renew);

    let nak_xid = h.xid();
    let mut nak = DhcpMessage::new_request(nak_xid, h.hwaddr);
    nak.op = DhcpOperation::BootReply;
    nak.options = vec![53, 1, 6, 255];
    h.deliver(nak.emit(), 1800);

    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Init);
    assert_eq!(h.engine.state().nakoff, 1);
    assert!(h.engine.state().lease.is_none());
    assert!(!dir.path().join("eth0.lease").exists());

    h.timer(TimerKind::NakRestart, 1801);
    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Discover);
}

/// C. INIT-REBOOT with a cached lease: the REQUEST carries ciaddr=0 and
/// option 50 but never option 54.
#[test]
fn init_reboot_requests_cached_address() {
    let dir = tempfile::tempdir().unwrap();
    let lease_path = dir.path().join("eth0.lease");

    let hwaddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    let cached_xid = 0x1234_5678;
    let cached_addr = Ipv4Addr::new(192, 0, 2, 10);
    let mut extra = subnet_mask_option(Ipv4Addr::new(255, 255, 255, 0));
    extra.extend(server_id_option(Ipv4Addr::new(192, 0, 2, 1)));
    extra.extend(lease_time_option(3600));
    let mut cached = DhcpMessage::new_request(cached_xid, hwaddr);
    cached.op = DhcpOperation::BootReply;
    cached.yiaddr = cached_addr;
    cached.options = {
        let mut o = vec![53, 1, 5u8];
        o.extend(extra);
        o.push(255);
        o
    };
    dhcp4::dhcp::lease::write_lease_file(&lease_path, &cached, "eth0").expect("seed cached lease");

    let mut h = Harness::new(lease_path.clone());
    h.start();

    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Reboot);
    let request = h.sockets.last_parsed();
    assert_eq!(request.ciaddr, Ipv4Addr::UNSPECIFIED);
    let opts = DhcpOptions::parse(&request);
    assert_eq!(opts.ipv4(50), Some(cached_addr));
    assert!(opts.ipv4(54).is_none(), "INIT-REBOOT must not carry a server-id");
}

/// D. A BOOTP reply (no option 53) yields an infinite lease, no lease
/// file, and no renew timer.
#[test]
fn bootp_reply_has_no_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let lease_path = dir.path().join("eth0.lease");
    let mut h = Harness::new(lease_path.clone());

    h.start();
    let xid = h.xid();
    let addr = Ipv4Addr::new(192, 0, 2, 20);
    let mut msg = DhcpMessage::new_request(xid, h.hwaddr);
    msg.op = DhcpOperation::BootReply;
    msg.yiaddr = addr;
    msg.options = {
        let mut o = subnet_mask_option(Ipv4Addr::new(255, 255, 255, 0));
        o.push(255);
        o
    };
    h.deliver(msg.emit(), 0);
    assert_eq!(h.arp.probed, vec![addr]);
    h.claim_complete();

    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Bound);
    let lease = h.engine.state().lease.clone().unwrap();
    assert!(lease.is_bootp);
    assert_eq!(lease.leasetime, dhcp4::dhcp::lease::INFINITE_LEASE);
    assert!(!lease_path.exists(), "a BOOTP reply must not be persisted");
    assert!(h.events.armed.iter().all(|(k, _)| *k != TimerKind::Renew));
}

/// E. RFC 3442 classless static routes decode into ordered routes.
#[test]
fn rfc3442_classless_routes_decode_in_order() {
    let raw = [0x12, 0x10, 0x00, 0x00, 0xc0, 0x00, 0x02, 0x01, 0x00, 0xc0, 0x00, 0x02, 0x01];
    let routes = dhcp4::dhcp::options::decode_classless_routes(&raw).expect("valid classless routes payload");
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].dest, Ipv4Addr::new(16, 0, 0, 0));
    assert_eq!(routes[0].prefix_len, 18);
    assert_eq!(routes[0].gateway, Ipv4Addr::new(192, 0, 2, 1));
    assert_eq!(routes[1].prefix_len, 0);
    assert_eq!(routes[1].gateway, Ipv4Addr::new(192, 0, 2, 1));
}

/// F. RELEASE unicasts to the bound server and drops the lease file.
#[test]
fn release_unicasts_and_drops_lease() {
    let dir = tempfile::tempdir().unwrap();
    let lease_path = dir.path().join("eth0.lease");
    let mut h = Harness::new(lease_path.clone());

    h.start();
    let xid = h.xid();
    let server = Ipv4Addr::new(192, 0, 2, 1);
    let offered = Ipv4Addr::new(192, 0, 2, 10);
    let mut extra = subnet_mask_option(Ipv4Addr::new(255, 255, 255, 0));
    extra.extend(server_id_option(server));
    extra.extend(lease_time_option(3600));
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 2, &extra), 0);
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 5, &extra), 0);
    h.claim_complete();
    assert!(lease_path.exists());

    h.engine.release(collab_of!(h), 0).expect("release");

    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Release);
    let release = h.sockets.last_parsed();
    let opts = DhcpOptions::parse(&release);
    assert_eq!(opts.message_kind(), Some(dhcp4::DhcpMessageKind::Release));
    assert_eq!(opts.ipv4(54), Some(server));
    assert!(h.engine.state().lease.is_none());
    assert!(!lease_path.exists());
    assert!(h.events.armed.iter().any(|(k, _)| *k == TimerKind::ReleaseDrain));
}

/// G. Entering DISCOVER arms an overall timeout budget alongside the
/// per-attempt retransmit, and opening the raw socket registers its fd.
#[test]
fn discover_arms_timeout_budget_and_registers_fd() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(dir.path().join("eth0.lease"));

    h.start();

    assert!(h.events.armed.iter().any(|(k, _)| *k == TimerKind::Retransmit));
    assert!(h.events.armed.iter().any(|(k, _)| *k == TimerKind::DiscoverTimeout));
    assert!(h.events.watched_fds.contains(&3), "raw socket fd must be registered with the event loop");
}

/// H. A RENEW ACK binds directly: no ARP probe, since the address is
/// already in use on the link.
#[test]
fn renew_ack_binds_without_arp_probe() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(dir.path().join("eth0.lease"));

    h.start();
    let xid = h.xid();
    let server = Ipv4Addr::new(192, 0, 2, 1);
    let offered = Ipv4Addr::new(192, 0, 2, 10);
    let mut extra = subnet_mask_option(Ipv4Addr::new(255, 255, 255, 0));
    extra.extend(server_id_option(server));
    extra.extend(lease_time_option(3600));
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 2, &extra), 0);
    h.deliver(offer_or_ack(xid, h.hwaddr, offered, 5, &extra), 0);
    h.claim_complete();
    assert_eq!(h.arp.probed, vec![offered]);

    h.timer(TimerKind::Renew, 1800);
    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Renew);

    let renew_xid = h.xid();
    h.deliver(offer_or_ack(renew_xid, h.hwaddr, offered, 5, &extra), 1800);

    assert_eq!(h.engine.state().state, dhcp4::dhcp::state::DhcpState::Bound);
    assert_eq!(h.arp.probed, vec![offered], "renew must not trigger a second ARP probe");
    assert_eq!(h.hook.reasons, vec!["RENEW".to_string()]);
}
