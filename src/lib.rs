//! A DHCPv4 client engine for a single network interface.
//!
//! This crate implements the client side of RFC 2131/2132: building and
//! parsing DHCP messages, decoding the option trailer (including RFC 3396
//! long options, the RFC 1533 `file`/`sname` overload, and the typed
//! sub-options of RFC 3361/3397/3442/5969), and driving the per-interface
//! lease state machine (DISCOVER/REQUEST/RENEW/REBIND/REBOOT/RELEASE/DECLINE)
//! with retransmission and NAK backoff.
//!
//! The engine does not open sockets, run an event loop, probe for address
//! conflicts, or apply addresses to the kernel itself — those are external
//! collaborators described by the traits in [`collab`]. This crate decides
//! *when* to do those things and *what bytes* to send; a host application
//! supplies the *how*.
//!
//! ```no_run
//! use dhcp4::{MacAddr, config::InterfaceOptions};
//!
//! let opts = InterfaceOptions::new("eth0", MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]));
//! ```

#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod collab;
pub mod config;
pub mod dhcp;
pub mod engine;
pub mod error;
pub mod io;

pub use config::InterfaceOptions;
pub use dhcp::{DhcpMessage, DhcpMessageKind, Lease};
pub use engine::Engine;
pub use error::DhcpError;

/// Standard 6-byte hardware (MAC) address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Build a MAC address from its 6 octets.
    pub const fn new(v: [u8; 6]) -> Self {
        MacAddr(v)
    }

    /// The broadcast address, `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// The unspecified address, `00:00:00:00:00:00`.
    pub const ANY: MacAddr = MacAddr([0; 6]);

    /// The raw octets, most significant first.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Low 4 bytes, used by the `XID_HWADDR` transaction-id policy.
    pub fn low_u32(&self) -> u32 {
        u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }
}

impl core::fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl core::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

/// Derive `From`/`Into` conversions with an added `Unknown` catch-all variant,
/// so that converting an out-of-range wire value never panics.
///
/// Yoinked (with modification, and without the `uDebug` derive this crate no
/// longer needs) from the upstream `catnip` crate, which took the same
/// approach from `smoltcp`.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a known variant.
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}
