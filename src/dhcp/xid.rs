//! Transaction-id policy: either derived from the hardware address or
//! drawn from an OS-backed CSPRNG, matching the jitter source used for
//! retransmission backoff.

use rand::Rng;

use crate::config::InterfaceOptions;

/// Generate a fresh transaction id for a new exchange.
///
/// If `xid_hwaddr` is configured and the interface has at least a 4-byte
/// hardware address, the id is deterministic (the low 4 bytes of the
/// address); otherwise it is drawn from the OS-seeded thread RNG.
pub fn next_xid(config: &InterfaceOptions) -> u32 {
    if config.xid_hwaddr && config.hwaddr.octets().len() >= 4 {
        config.hwaddr.low_u32()
    } else {
        rand::rng().random::<u32>()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MacAddr;

    #[test]
    fn hwaddr_policy_is_deterministic() {
        let mut config = InterfaceOptions::new("eth0", MacAddr::new([2, 0, 0xaa, 0xbb, 0xcc, 0xdd]));
        config.xid_hwaddr = true;
        assert_eq!(next_xid(&config), 0xaabb_ccdd);
        assert_eq!(next_xid(&config), next_xid(&config));
    }

    #[test]
    fn default_policy_draws_from_rng() {
        let config = InterfaceOptions::new("eth0", MacAddr::new([2, 0, 0, 0, 0, 1]));
        let a = next_xid(&config);
        let b = next_xid(&config);
        assert_ne!(a, b);
    }
}
