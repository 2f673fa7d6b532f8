//! The single error type threaded through every fallible operation in the
//! crate, grouped by error category.

use thiserror::Error;

/// Everything that can go wrong building, parsing, or acting on a DHCP
/// lease for one interface.
#[derive(Debug, Error)]
pub enum DhcpError {
    /// A received message's *fixed* header was structurally invalid (wrong
    /// size, bad magic cookie) and the whole message had to be discarded.
    /// Individual option parse failures do not produce this variant — see
    /// [`crate::dhcp::options::OptionValue::Malformed`].
    #[error("malformed DHCP message: {0}")]
    Codec(String),

    /// A send or receive on a collaborator-provided socket failed.
    #[error("I/O error on interface {iface}: {source}")]
    Io {
        /// The interface the failing socket belonged to.
        iface: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The server rejected the client's REQUEST with a DHCPNAK.
    #[error("DHCPNAK received, backing off {backoff}s before retry")]
    Nak {
        /// The NAK backoff just computed for the next restart.
        backoff: u32,
    },

    /// The current lease's expiry timer fired with no renewal in hand.
    #[error("lease on {iface} expired")]
    LeaseExpired {
        /// The interface whose lease expired.
        iface: String,
    },

    /// ARP probing detected another host already using the offered or
    /// leased address.
    #[error("address conflict detected for {addr}")]
    Conflict {
        /// The address that a probe or gratuitous ARP found already in use.
        addr: std::net::Ipv4Addr,
    },

    /// The interface cannot be managed as configured (e.g. no client
    /// identifier and no usable hardware address).
    #[error("configuration error: {0}")]
    Config(String),

    /// A collaborator trait (event loop, ARP prober, IPv4 shim, script
    /// runner, IPv4LL fallback) returned a failure.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, DhcpError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nak_error_displays_backoff() {
        let e = DhcpError::Nak { backoff: 4 };
        assert_eq!(
            format!("{e}"),
            "DHCPNAK received, backing off 4s before retry"
        );
    }
}
