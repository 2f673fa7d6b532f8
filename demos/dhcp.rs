//! Drives the engine through a full DISCOVER/OFFER/REQUEST/ACK exchange
//! against in-memory collaborator stubs, with no kernel sockets involved.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;

use dhcp4::collab::{ArpProber, DhcpEvent, EventLoop, Ipv4Shim, Ipv4llFallback, ScriptRunner, SocketFactory};
use dhcp4::dhcp::lease::Lease;
use dhcp4::dhcp::message::{DhcpMessage, DhcpOperation};
use dhcp4::dhcp::state::TimerKind;
use dhcp4::engine::Collaborators;
use dhcp4::error::Result;
use dhcp4::{Engine, InterfaceOptions, MacAddr};

struct FakeSockets {
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    server: Ipv4Addr,
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
        Some((self.server, 0, n))
    }
}

struct FakeEvents;

impl EventLoop for FakeEvents {
    fn add_timer(&mut self, iface: &str, after: Duration, kind: TimerKind) {
        println!("{iface}: armed {kind:?} in {after:?}");
    }
    fn delete_timer(&mut self, _iface: &str, _kind: Option<TimerKind>) {}
    fn add_fd(&mut self, _iface: &str, _fd: i32) {}
    fn delete_fd(&mut self, _fd: i32) {}
}

struct FakeArp;

impl ArpProber for FakeArp {
    fn arp_probe(&mut self, iface: &str, addr: Ipv4Addr) {
        println!("{iface}: probing {addr} (demo treats every probe as clean)");
    }
    fn arp_announce(&mut self, _iface: &str, _addr: Ipv4Addr) {}
}

struct FakeAddr;

impl Ipv4Shim for FakeAddr {
    fn has_address(&self, _iface: &str, _addr: Ipv4Addr) -> bool {
        false
    }
    fn apply_addr(&mut self, iface: &str, lease: &Lease) -> Result<()> {
        println!("{iface}: would configure {}/{}", lease.addr, lease.subnet_cidr());
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

struct FakeHook;

impl ScriptRunner for FakeHook {
    fn script_run(&mut self, iface: &str, reason: &str, env: &[(String, String)]) {
        println!("{iface}: hook fired for {reason}");
        for (k, v) in env {
            println!("  {k}={v}");
        }
    }
}

struct FakeIpv4ll;

impl Ipv4llFallback for FakeIpv4ll {
    fn ipv4ll_start(&mut self, iface: &str) {
        println!("{iface}: would fall back to IPv4LL");
    }
}

/// Encode a minimal server reply: a fixed header plus a handful of options.
fn server_reply(xid: u32, chaddr: [u8; 6], yiaddr: Ipv4Addr, kind: u8) -> Vec<u8> {
    let mut msg = DhcpMessage::new_request(xid, chaddr);
    msg.op = DhcpOperation::BootReply;
    msg.yiaddr = yiaddr;
    msg.options = vec![
        53, 1, kind, // message type
        1, 4, 255, 255, 255, 0, // subnet mask
        54, 4, 10, 0, 0, 1, // server identifier
        51, 4, 0, 0, 0x0e, 0x10, // lease time, 3600s
        255,
    ];
    msg.emit()
}

fn main() {
    env_logger::init();

    let hwaddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let mut config = InterfaceOptions::new("eth0", hwaddr);
    config.xid_hwaddr = true; // keeps this demo's fake replies deterministic
    let xid = hwaddr.low_u32();

    let lease_path = std::env::temp_dir().join(format!("dhcp4-demo-{}.lease", std::process::id()));
    let mut engine = Engine::new(config, lease_path);

    let mut sockets = FakeSockets {
        sent: Vec::new(),
        inbound: VecDeque::new(),
        server: Ipv4Addr::new(10, 0, 0, 1),
    };
    let mut events = FakeEvents;
    let mut arp = FakeArp;
    let mut addr = FakeAddr;
    let mut hook = FakeHook;
    let mut ipv4ll = FakeIpv4ll;

    macro_rules! collab {
        () => {
            &mut Collaborators {
                sockets: &mut sockets,
                events: &mut events,
                arp: &mut arp,
                addr: &mut addr,
                hook: &mut hook,
                ipv4ll: &mut ipv4ll,
            }
        };
    }

    engine.start(collab!(), 0).expect("start sends DISCOVER");
    println!("sent {} frame(s) so far", sockets.sent.len());

    sockets
        .inbound
        .push_back(server_reply(xid, hwaddr.octets(), Ipv4Addr::new(10, 0, 0, 50), 2));
    engine
        .process(DhcpEvent::FdReadable { iface: "eth0".into(), fd: 3 }, collab!(), 1)
        .expect("OFFER moves to REQUEST");

    sockets
        .inbound
        .push_back(server_reply(xid, hwaddr.octets(), Ipv4Addr::new(10, 0, 0, 50), 5));
    engine
        .process(DhcpEvent::FdReadable { iface: "eth0".into(), fd: 3 }, collab!(), 1)
        .expect("ACK moves to PROBE");

    engine
        .process(DhcpEvent::ArpClaimComplete { iface: "eth0".into() }, collab!(), 1)
        .expect("claim completes the bind");

    println!("final state: {:?}", engine.state().state);
}
