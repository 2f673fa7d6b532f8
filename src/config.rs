//! Per-interface configuration consumed by the message builder and state
//! machine. Producing this value from an on-disk config file is out of
//! scope; only its shape and defaults live here.

use std::net::Ipv4Addr;

use crate::MacAddr;

/// Explicit per-interface runtime behavior, carried on the configuration
/// value instead of a global options bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeMode {
    /// Ordinary long-running client behavior.
    #[default]
    Normal,
    /// Acquire a lease, run the hook once, then stop instead of looping.
    OneShot,
    /// Exercise the state machine without ever touching the kernel address
    /// table (used by the test double collaborators).
    Test,
}

/// Typed configuration for one managed interface.
#[derive(Debug, Clone)]
pub struct InterfaceOptions {
    /// Interface name as known to the kernel (`eth0`, `wlan0`, ...).
    pub interface: String,
    /// Interface hardware address.
    pub hwaddr: MacAddr,
    /// `htype` value for this interface; `1` (Ethernet) for anything this
    /// crate currently targets.
    pub hwtype: u8,
    /// Requested hostname (option 12), truncated at the first dot by the
    /// builder.
    pub hostname: Option<String>,
    /// Vendor class identifier (option 60).
    pub vendor_class_id: Option<String>,
    /// Opaque user class payload (option 77).
    pub user_class: Option<Vec<u8>>,
    /// Client identifier override (option 61); defaults to `hwtype ++
    /// hwaddr` when absent.
    pub client_id: Option<Vec<u8>>,
    /// Request the server reply via broadcast.
    pub request_broadcast: bool,
    /// Derive `xid` from the low 4 bytes of the hardware address instead of
    /// the RNG.
    pub xid_hwaddr: bool,
    /// A statically requested address for DISCOVER/INIT-REBOOT.
    pub requested_address: Option<Ipv4Addr>,
    /// Name of a fallback profile to apply if DISCOVER times out.
    pub fallback_profile: Option<String>,
    /// Whether IPv4LL (link-local) fallback is enabled.
    pub ipv4ll_enabled: bool,
    /// Total time budget for the DISCOVER phase before falling back to
    /// `fallback_profile`/IPv4LL, armed once per DISCOVER attempt.
    pub discover_timeout_secs: u32,
    /// Requested lease duration (option 51), sent on DISCOVER/REQUEST but
    /// never on INFORM. `None` omits the option, leaving the duration to
    /// the server's default policy.
    pub requested_lease_time: Option<u32>,
    /// Additional option codes to append to the parameter-request list
    /// beyond the table's own `REQUEST`-flagged entries.
    pub request_mask_additions: Vec<u8>,
    /// Interface MTU, used to clamp the max-message-size option.
    pub mtu: u16,
    /// Requests an RFC 4702 FQDN option (81) be sent with `hostname`.
    pub send_fqdn: bool,
    /// Normal / one-shot / test runtime behavior.
    pub mode: RuntimeMode,
}

impl InterfaceOptions {
    /// Sensible defaults for `interface`/`hwaddr`; every other field starts
    /// at the RFC-minimal or disabled value.
    pub fn new(interface: impl Into<String>, hwaddr: MacAddr) -> Self {
        InterfaceOptions {
            interface: interface.into(),
            hwaddr,
            hwtype: crate::dhcp::message::HTYPE_ETHERNET,
            hostname: None,
            vendor_class_id: None,
            user_class: None,
            client_id: None,
            request_broadcast: true,
            xid_hwaddr: false,
            requested_address: None,
            fallback_profile: None,
            ipv4ll_enabled: false,
            discover_timeout_secs: 60,
            requested_lease_time: None,
            request_mask_additions: Vec::new(),
            mtu: 1500,
            send_fqdn: false,
            mode: RuntimeMode::Normal,
        }
    }

    /// The client identifier to send: the explicit override, or `hwtype ++
    /// hwaddr` when none was configured.
    pub fn effective_client_id(&self) -> Vec<u8> {
        match &self.client_id {
            Some(id) => id.clone(),
            None => {
                let mut id = Vec::with_capacity(7);
                id.push(self.hwtype);
                id.extend_from_slice(&self.hwaddr.octets());
                id
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn effective_client_id_defaults_to_hwtype_and_mac() {
        let opts = InterfaceOptions::new("eth0", MacAddr::new([2, 0, 0, 0, 0, 1]));
        assert_eq!(opts.effective_client_id(), vec![1, 2, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn effective_client_id_honors_override() {
        let mut opts = InterfaceOptions::new("eth0", MacAddr::new([2, 0, 0, 0, 0, 1]));
        opts.client_id = Some(vec![0xff, 0x01]);
        assert_eq!(opts.effective_client_id(), vec![0xff, 0x01]);
    }
}
