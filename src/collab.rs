//! Collaborator traits the engine is built against.
//!
//! None of these are implemented here for production use — the event
//! loop, socket factory, ARP prober, IPv4 shim, script runner, and IPv4LL
//! fallback are all external to this crate. A deterministic in-memory
//! double of each lives under `#[cfg(test)]` test tooling so the state
//! machine and I/O adapter can be exercised without a kernel.

use std::net::Ipv4Addr;

use crate::dhcp::lease::Lease;
use crate::dhcp::state::TimerKind;
use crate::error::Result;

/// One event delivered to [`crate::engine::Engine::process`], replacing the
/// callback-pointer style of the ambient stack's event loop with a
/// tagged-variant enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpEvent {
    /// A registered file descriptor became readable.
    FdReadable {
        /// Owning interface.
        iface: String,
        /// The fd that fired.
        fd: i32,
    },
    /// A previously armed timer fired.
    TimerFired {
        /// Owning interface.
        iface: String,
        /// Which timer.
        kind: TimerKind,
    },
    /// The ARP prober detected another host already answering for the
    /// address under probe.
    ArpConflict {
        /// Owning interface.
        iface: String,
    },
    /// The ARP prober finished probing with no conflict.
    ArpClaimComplete {
        /// Owning interface.
        iface: String,
    },
}

/// Timer and fd registration, consumed by the engine.
pub trait EventLoop {
    /// Arm a timer that fires `after` from now.
    fn add_timer(&mut self, iface: &str, after: std::time::Duration, kind: TimerKind);
    /// Cancel a timer; `None` cancels every timer armed for `iface`.
    fn delete_timer(&mut self, iface: &str, kind: Option<TimerKind>);
    /// Start watching `fd` for readability.
    fn add_fd(&mut self, iface: &str, fd: i32);
    /// Stop watching `fd`.
    fn delete_fd(&mut self, fd: i32);
}

/// Raw and UDP transport, injected so the core never touches a socket
/// directly.
pub trait SocketFactory {
    /// Open a raw Ethernet socket bound to `iface`, returning its fd.
    fn open_raw(&mut self, iface: &str) -> Result<i32>;
    /// Open a UDP socket bound to port 68 on `iface`, returning its fd.
    fn open_udp(&mut self, iface: &str) -> Result<i32>;
    /// Close a previously opened socket.
    fn close(&mut self, fd: i32);
    /// Broadcast `bytes` as a complete Ethernet+IP+UDP frame.
    fn send_raw(&mut self, iface: &str, bytes: &[u8]) -> Result<()>;
    /// Unicast `bytes` as a UDP payload to `dst:67`.
    fn send_udp(&mut self, iface: &str, dst: Ipv4Addr, bytes: &[u8]) -> Result<()>;
    /// Read one raw frame into `buf`; returns the number of bytes read and
    /// whether the kernel already validated the UDP checksum (the
    /// "partial csum" offload flag).
    fn recv_raw(&mut self, iface: &str, buf: &mut [u8]) -> Result<(usize, bool)>;
    /// Validate an Ethernet+IP+UDP frame and return the sender address plus
    /// the UDP payload's `(offset, len)` within `buf`, or `None` if the
    /// checksum/framing is invalid.
    fn valid_udp(&self, buf: &[u8], n: usize, partial_csum: bool) -> Option<(Ipv4Addr, usize, usize)>;
}

/// Duplicate-address detection, invoked before committing an offered
/// address (the PROBE state).
pub trait ArpProber {
    /// Start probing `addr` on `iface`; completion is reported back to the
    /// engine as [`DhcpEvent::ArpConflict`]/[`DhcpEvent::ArpClaimComplete`].
    fn arp_probe(&mut self, iface: &str, addr: Ipv4Addr);
    /// Gratuitously announce `addr` on `iface` after a successful claim.
    fn arp_announce(&mut self, iface: &str, addr: Ipv4Addr);
}

/// Kernel address-table access, used to read the interface's current
/// address/MTU and to install a newly bound lease.
pub trait Ipv4Shim {
    /// Whether `iface` currently has `addr` configured.
    fn has_address(&self, iface: &str, addr: Ipv4Addr) -> bool;
    /// Install the lease's address/mask/broadcast onto `iface`.
    fn apply_addr(&mut self, iface: &str, lease: &Lease) -> Result<()>;
    /// The interface's current primary address, or `0.0.0.0` if none.
    fn get_address(&self, iface: &str) -> Ipv4Addr;
    /// The netmask currently configured for `addr`.
    fn get_netmask(&self, addr: Ipv4Addr) -> Ipv4Addr;
    /// The interface's current MTU.
    fn get_mtu(&self, iface: &str) -> u16;
    /// Update the interface's MTU (option 26 from the lease).
    fn set_mtu(&mut self, iface: &str, mtu: u16);
}

/// Invokes the user-supplied hook script after a bind/drop, handing it the
/// environment export already computed by the caller.
pub trait ScriptRunner {
    /// Run the hook script for `iface` with `reason` and the flattened
    /// environment pairs already computed by the caller.
    fn script_run(&mut self, iface: &str, reason: &str, env: &[(String, String)]);
}

/// Link-local (RFC 3927) fallback, started when DISCOVER exhausts its
/// retries and no fallback profile is configured.
pub trait Ipv4llFallback {
    /// Begin IPv4LL address selection for `iface`.
    fn ipv4ll_start(&mut self, iface: &str);
}
