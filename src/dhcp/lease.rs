//! Parsed lease model and raw on-disk persistence.
//!
//! Field shape follows `nispor-mozim`'s `DhcpV4Lease` (`TryFrom<&v4::Message>`
//! matching on each decoded option); the on-disk format is this crate's own,
//! storing the *raw* wire message (truncated at `End`) rather than a
//! serialized struct.

use std::io::Read;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::SystemTime;

use crate::dhcp::message::{DhcpMessage, COOKIE, FIXED_LEN};
use crate::dhcp::options::{self, ClasslessRoute, DhcpOptions};
use crate::error::{DhcpError, Result};

/// Shortest lease duration the client will honor; anything shorter is
/// clamped up to this on receipt.
pub const DHCP_MIN_LEASE: u32 = 20;
/// All-ones `leasetime` meaning "never expires".
pub const INFINITE_LEASE: u32 = u32::MAX;

/// A fully decoded lease: addressing, timers, and the supplemental fields
/// the environment-export component and hook contract need to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Assigned address (`yiaddr`).
    pub addr: Ipv4Addr,
    /// Subnet mask, from option 1 or inferred classfully.
    pub net: Ipv4Addr,
    /// Broadcast address, from option 28 or `addr | !net`.
    pub brd: Ipv4Addr,
    /// The server that granted this lease.
    pub server: Ipv4Addr,
    /// Lease duration in seconds; `INFINITE_LEASE` means no expiry.
    pub leasetime: u32,
    /// T1, renewal time.
    pub renewaltime: u32,
    /// T2, rebinding time.
    pub rebindtime: u32,
    /// The magic cookie this lease was parsed under (always [`COOKIE`] for
    /// anything that made it through [`DhcpMessage::parse`]).
    pub cookie: u32,
    /// Monotonic timestamp (seconds since an arbitrary epoch) at bind time;
    /// `0` until [`Lease::bind`] is called.
    pub boundtime: u64,
    /// Wall-clock Unix timestamp at bind time.
    pub leasedfrom: u64,
    /// Whether this lease was loaded from the on-disk cache rather than
    /// freshly negotiated.
    pub frominfo: bool,
    /// DNS servers (option 6).
    pub dns_servers: Vec<Ipv4Addr>,
    /// Domain name (option 15).
    pub domain_name: Option<String>,
    /// Domain search list (option 119, RFC 3397).
    pub domain_search: Vec<String>,
    /// Classless static routes (option 121/249, or inferred from 33+3).
    pub classless_routes: Vec<ClasslessRoute>,
    /// NTP servers (option 42).
    pub ntp_servers: Vec<Ipv4Addr>,
    /// Interface MTU (option 26).
    pub mtu: Option<u16>,
    /// Whether this lease came from a BOOTP reply (no option 53).
    pub is_bootp: bool,
}

impl Lease {
    /// Build a [`Lease`] from a decoded ACK/BOOTP-reply message and its
    /// options, applying the T1/T2/lease-time clamping invariants.
    pub fn from_message(msg: &DhcpMessage, opts: &DhcpOptions) -> Lease {
        let is_bootp = opts.message_kind().is_none();
        let addr = msg.yiaddr;

        let net = opts
            .ipv4(1)
            .unwrap_or_else(|| options::infer_classful_netmask(addr));
        let brd = opts
            .ipv4(28)
            .unwrap_or_else(|| Ipv4Addr::from(u32::from(addr) | !u32::from(net)));
        let server = opts.ipv4(54).unwrap_or(msg.siaddr);

        let (leasetime, renewaltime, rebindtime) = if is_bootp {
            (INFINITE_LEASE, INFINITE_LEASE, INFINITE_LEASE)
        } else {
            clamp_times(
                opts.u32(51).unwrap_or(0),
                opts.u32(58).unwrap_or(0),
                opts.u32(59).unwrap_or(0),
            )
        };

        let classless_routes = if let Some(raw) = opts.raw(121).or_else(|| opts.raw(249)) {
            options::decode_classless_routes(raw).unwrap_or_default()
        } else if let Some(raw33) = opts.raw(33) {
            options::infer_legacy_routes(raw33, &opts.ipv4_array(3))
        } else if !opts.ipv4_array(3).is_empty() {
            options::infer_legacy_routes(&[], &opts.ipv4_array(3))
        } else {
            Vec::new()
        };

        let domain_search = opts
            .raw(119)
            .and_then(|raw| options::decode_domain_search(raw).ok())
            .unwrap_or_default();

        Lease {
            addr,
            net,
            brd,
            server,
            leasetime,
            renewaltime,
            rebindtime,
            cookie: COOKIE,
            boundtime: 0,
            leasedfrom: 0,
            frominfo: false,
            dns_servers: opts.ipv4_array(6),
            domain_name: opts.string(15),
            domain_search,
            classless_routes,
            ntp_servers: opts.ipv4_array(42),
            mtu: opts.u16(26),
            is_bootp,
        }
    }

    /// Stamp bind-time bookkeeping fields. `boundtime` is a monotonic
    /// counter (seconds since the engine started), `leasedfrom` the
    /// wall-clock Unix time, both supplied by the state machine so this
    /// module never calls a clock itself.
    pub fn bind(mut self, boundtime: u64, leasedfrom: u64, frominfo: bool) -> Self {
        self.boundtime = boundtime;
        self.leasedfrom = leasedfrom;
        self.frominfo = frominfo;
        self
    }

    /// CIDR prefix length of `net`.
    pub fn subnet_cidr(&self) -> u32 {
        u32::from(self.net).count_ones()
    }
}

/// Clamp T1/T2/lease-time, logging when a server
/// violated the ordering and a value had to be recomputed.
fn clamp_times(mut leasetime: u32, mut renewaltime: u32, mut rebindtime: u32) -> (u32, u32, u32) {
    if leasetime == INFINITE_LEASE {
        return (INFINITE_LEASE, INFINITE_LEASE, INFINITE_LEASE);
    }
    if leasetime < DHCP_MIN_LEASE {
        log::warn!("server offered lease time {leasetime}s, clamping up to {DHCP_MIN_LEASE}s");
        leasetime = DHCP_MIN_LEASE;
    }
    if renewaltime == 0 && rebindtime == 0 {
        renewaltime = leasetime / 2;
        rebindtime = leasetime * 7 / 8;
    }
    if rebindtime > leasetime {
        log::warn!("server's rebind time {rebindtime}s exceeds lease time {leasetime}s, clamping");
        rebindtime = leasetime * 7 / 8;
    }
    if renewaltime > rebindtime {
        log::warn!("server's renewal time {renewaltime}s exceeds rebind time {rebindtime}s, clamping");
        renewaltime = leasetime / 2;
    }
    (leasetime, renewaltime, rebindtime)
}

/// Truncate an emitted message's bytes at (and including) the first `End`
/// (255) option, matching what gets persisted on disk.
fn truncate_at_end(bytes: &mut Vec<u8>) {
    let header_len = FIXED_LEN + 4;
    if bytes.len() <= header_len {
        return;
    }
    if let Some(pos) = bytes[header_len..].iter().position(|&b| b == 255) {
        bytes.truncate(header_len + pos + 1);
    }
}

/// Write `msg` to `path`, truncated at `End`, with file mode 0444.
pub fn write_lease_file(path: &Path, msg: &DhcpMessage, iface: &str) -> Result<()> {
    let mut bytes = msg.emit();
    truncate_at_end(&mut bytes);
    std::fs::write(path, &bytes).map_err(|source| DhcpError::Io {
        iface: iface.to_string(),
        source,
    })?;
    let mut perms = std::fs::metadata(path)
        .map_err(|source| DhcpError::Io {
            iface: iface.to_string(),
            source,
        })?
        .permissions();
    perms.set_mode(0o444);
    std::fs::set_permissions(path, perms).map_err(|source| DhcpError::Io {
        iface: iface.to_string(),
        source,
    })
}

/// Remove a lease file if present; a missing file is not an error.
pub fn remove_lease_file(path: &Path, iface: &str) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DhcpError::Io {
            iface: iface.to_string(),
            source,
        }),
    }
}

/// Read a cached lease message from `path`. A short file is zero-padded
/// before parsing; a missing file yields `None`, a parse failure
/// also yields `None` (the cache is simply treated as absent).
pub fn read_lease_file(path: &Path, iface: &str) -> Result<Option<DhcpMessage>> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DhcpError::Io {
                iface: iface.to_string(),
                source,
            })
        }
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|source| DhcpError::Io {
        iface: iface.to_string(),
        source,
    })?;
    if buf.len() < FIXED_LEN + 4 {
        buf.resize(FIXED_LEN + 4, 0);
    }
    match DhcpMessage::parse(&buf) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            log::debug!("cached lease at {} did not parse: {e}", path.display());
            Ok(None)
        }
    }
}

/// Whether the on-disk lease at `path` has already expired, given its
/// decoded `leasetime` and the current wall-clock time.
pub fn is_expired(path: &Path, leasetime: u32, now: SystemTime, iface: &str) -> Result<bool> {
    if leasetime == INFINITE_LEASE {
        return Ok(false);
    }
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| DhcpError::Io {
            iface: iface.to_string(),
            source,
        })?;
    let age = now.duration_since(mtime).unwrap_or_default().as_secs();
    Ok(age > u64::from(leasetime))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::message::DhcpMessage;
    use tempfile::tempdir;

    fn ack_with_options(yiaddr: Ipv4Addr, siaddr: Ipv4Addr, raw_options: Vec<u8>) -> DhcpMessage {
        let mut msg = DhcpMessage::new_request(1, [0; 6]);
        msg.yiaddr = yiaddr;
        msg.siaddr = siaddr;
        msg.options = raw_options;
        msg
    }

    #[test]
    fn short_lease_is_clamped_to_minimum() {
        let msg = ack_with_options(
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::UNSPECIFIED,
            vec![53, 1, 5, 51, 4, 0, 0, 0, 5, 255],
        );
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts);
        assert_eq!(lease.leasetime, DHCP_MIN_LEASE);
    }

    #[test]
    fn infinite_lease_skips_clamping() {
        let msg = ack_with_options(
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::UNSPECIFIED,
            vec![53, 1, 5, 51, 4, 0xff, 0xff, 0xff, 0xff, 255],
        );
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts);
        assert_eq!(lease.leasetime, INFINITE_LEASE);
        assert_eq!(lease.renewaltime, INFINITE_LEASE);
        assert_eq!(lease.rebindtime, INFINITE_LEASE);
    }

    #[test]
    fn missing_renew_rebind_default_to_half_and_seven_eighths() {
        let msg = ack_with_options(
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::UNSPECIFIED,
            vec![53, 1, 5, 51, 4, 0, 0, 0x0e, 0x10, 255],
        );
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts);
        assert_eq!(lease.leasetime, 3600);
        assert_eq!(lease.renewaltime, 1800);
        assert_eq!(lease.rebindtime, 3150);
    }

    #[test]
    fn rebind_beyond_lease_is_forced_down() {
        let msg = ack_with_options(
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::UNSPECIFIED,
            vec![
                53, 1, 5, 51, 4, 0, 0, 0x0e, 0x10, // leasetime 3600
                59, 4, 0, 0, 0x27, 0x10, // rebindtime 10000 (> lease)
                255,
            ],
        );
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts);
        assert_eq!(lease.rebindtime, 3150);
    }

    #[test]
    fn missing_subnet_mask_infers_classful() {
        let msg = ack_with_options(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::UNSPECIFIED, vec![255]);
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts);
        assert_eq!(lease.net, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(lease.brd, Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn bootp_reply_has_no_message_type_and_infinite_lease() {
        let msg = ack_with_options(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::UNSPECIFIED, vec![255]);
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts);
        assert!(lease.is_bootp);
        assert_eq!(lease.leasetime, INFINITE_LEASE);
    }

    #[test]
    fn write_then_read_round_trips_truncated_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lease");
        let mut msg = DhcpMessage::new_request(42, [2, 0, 0, 0, 0, 1]);
        msg.yiaddr = Ipv4Addr::new(192, 0, 2, 10);
        msg.options = vec![53, 1, 5, 255, 0, 0, 0, 0];

        write_lease_file(&path, &msg, "eth0").unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o444);

        let parsed = read_lease_file(&path, "eth0").unwrap().unwrap();
        assert_eq!(parsed.yiaddr, msg.yiaddr);
        assert_eq!(parsed.options, vec![53, 1, 5, 255]);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope");
        assert!(read_lease_file(&path, "eth0").unwrap().is_none());
    }
}
