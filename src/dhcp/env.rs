//! Flattens a bound lease into the `(name, value)` pairs a hook script
//! collaborator expects as environment variables.

use crate::dhcp::lease::Lease;
use crate::dhcp::message::DhcpMessage;
use crate::dhcp::options::{self, DhcpOptions, OptionTypeFlags};

/// Render one decoded option's value the way a hook script environment
/// expects to see it: space-joined for arrays, decimal for integers,
/// verbatim for strings.
fn format_option(code: u8, flags: OptionTypeFlags, opts: &DhcpOptions) -> Option<String> {
    if flags.contains(OptionTypeFlags::RFC3397) {
        let raw = opts.raw(code)?;
        let names = options::decode_domain_search(raw).ok()?;
        return Some(names.join(" "));
    }
    if flags.contains(OptionTypeFlags::RFC3442) {
        let raw = opts.raw(code)?;
        let routes = options::decode_classless_routes(raw).ok()?;
        return Some(
            routes
                .iter()
                .map(|r| format!("{}/{} {}", r.dest, r.prefix_len, r.gateway))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
    if flags.contains(OptionTypeFlags::RFC3361) {
        let raw = opts.raw(code)?;
        return match options::decode_sip_servers(raw).ok()? {
            options::SipServers::Names(names) => Some(names.join(" ")),
            options::SipServers::Addrs(addrs) => {
                Some(addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" "))
            }
        };
    }
    if flags.contains(OptionTypeFlags::RFC5969) {
        let raw = opts.raw(code)?;
        let sixrd = options::decode_6rd(raw).ok()?;
        return Some(format!(
            "{}/{} via {}",
            std::net::Ipv6Addr::from(sixrd.ipv6_prefix),
            sixrd.ipv6_prefix_len,
            sixrd
                .border_relays
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ));
    }
    if flags.contains(OptionTypeFlags::ADDRIPV4) {
        if flags.contains(OptionTypeFlags::ARRAY) {
            let addrs = opts.ipv4_array(code);
            if addrs.is_empty() {
                return None;
            }
            return Some(addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" "));
        }
        return opts.ipv4(code).map(|a| a.to_string());
    }
    if flags.contains(OptionTypeFlags::UINT32) {
        return opts.u32(code).map(|v| v.to_string());
    }
    if flags.contains(OptionTypeFlags::UINT16) {
        return opts.u16(code).map(|v| v.to_string());
    }
    if flags.contains(OptionTypeFlags::UINT8) {
        return opts.u8(code).map(|v| v.to_string());
    }
    if flags.contains(OptionTypeFlags::STRING) {
        if code == u8::from(options::OptionCode::ClientFqdn) {
            let raw = opts.raw(code)?;
            let name = raw.get(3..)?;
            return Some(String::from_utf8_lossy(name).into_owned());
        }
        return opts.string(code);
    }
    None
}

/// Build the ordered `(prefix + name, value)` pairs for a bound lease, as
/// passed to the hook-script collaborator.
pub fn export(prefix: &str, msg: &DhcpMessage, lease: &Lease, opts: &DhcpOptions) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut push = |name: &str, value: String| out.push((format!("{prefix}{name}"), value));

    push("ip_address", lease.addr.to_string());
    push("subnet_mask", lease.net.to_string());
    push("subnet_cidr", lease.subnet_cidr().to_string());
    push("broadcast_address", lease.brd.to_string());
    push("network_number", network_number(lease).to_string());
    push("filename", msg.file_str());
    push("server_name", msg.sname_str());

    for code in opts.codes() {
        let Some(entry) = options::table_entry(code) else {
            continue;
        };
        if let Some(value) = format_option(code, entry.flags, opts) {
            push(entry.name, value);
        }
    }

    out
}

fn network_number(lease: &Lease) -> std::net::Ipv4Addr {
    let addr = u32::from(lease.addr);
    let mask = u32::from(lease.net);
    std::net::Ipv4Addr::from(addr & mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::message::DhcpMessage;
    use std::net::Ipv4Addr;

    fn sample() -> (DhcpMessage, Lease, DhcpOptions) {
        let mut msg = DhcpMessage::new_request(1, [2, 0, 0, 0, 0, 1]);
        msg.options = vec![
            53, 1, 5, // ACK
            1, 4, 255, 255, 255, 0, // subnet mask
            6, 4, 8, 8, 8, 8, // dns
            51, 4, 0, 0, 0x0e, 0x10, // lease time 3600
            255,
        ];
        let opts = DhcpOptions::parse(&msg);
        let lease = Lease::from_message(&msg, &opts).bind(0, 0, false);
        (msg, lease, opts)
    }

    #[test]
    fn includes_fixed_fields_with_prefix() {
        let (msg, lease, opts) = sample();
        let pairs = export("new_", &msg, &lease, &opts);
        assert!(pairs.iter().any(|(k, v)| k == "new_ip_address" && v == &lease.addr.to_string()));
        assert!(pairs.iter().any(|(k, _)| k == "new_subnet_cidr"));
        assert!(pairs.iter().any(|(k, _)| k == "new_network_number"));
    }

    #[test]
    fn includes_decoded_known_options() {
        let (msg, lease, opts) = sample();
        let pairs = export("new_", &msg, &lease, &opts);
        assert!(pairs.iter().any(|(k, v)| k == "new_domain_name_servers" && v == "8.8.8.8"));
        assert!(pairs.iter().any(|(k, v)| k == "new_subnet_mask" && v == Ipv4Addr::new(255, 255, 255, 0).to_string()));
    }
}
