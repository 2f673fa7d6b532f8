//! DHCP option table, TLV codec (RFC 3396 concatenation, RFC 1533 overload),
//! and the typed sub-decoders for RFC 3361/3397/3442/5969.
//!
//! The decode-loop shape (walk the trailer, stop at `End`, throw PAD away)
//! follows `bluecatengineering-dhcproto`'s `Decodable for DhcpOptions`; the
//! per-option byte-layout reasoning (length-prefixed TLVs, truncation
//! handling) follows `frontporch-dhcp_parser`'s option walker; the option
//! code list and message-kind enum are carried over from the upstream
//! `catnip` crate's `enum_with_unknown!` tables.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use bitflags::bitflags;

use crate::dhcp::message::DhcpMessage;
use crate::enum_with_unknown;
use crate::error::{DhcpError, Result};

enum_with_unknown! {
    /// Contents of option 53, the DHCP message type.
    #[allow(missing_docs)]
    pub enum DhcpMessageKind(u8) {
        Discover = 1,
        Offer = 2,
        Request = 3,
        Decline = 4,
        Ack = 5,
        Nak = 6,
        Release = 7,
        Inform = 8,
        ForceRenew = 9,
        LeaseQuery = 10,
        LeaseUnassigned = 11,
        LeaseUnknown = 12,
        LeaseActive = 13,
        BulkLeaseQuery = 14,
        LeaseQueryDone = 15,
        ActiveLeaseQuery = 16,
        LeaseQueryStatus = 17,
        Tls = 18,
    }
}

enum_with_unknown! {
    /// Option type codes recognized by the codec.
    #[allow(missing_docs)]
    pub enum OptionCode(u8) {
        Pad = 0,
        SubnetMask = 1,
        TimeOffset = 2,
        Router = 3,
        TimeServer = 4,
        NameServer = 5,
        DomainNameServers = 6,
        LogServer = 7,
        CookieServer = 8,
        LprServer = 9,
        ImpressServer = 10,
        ResourceLocationServer = 11,
        HostName = 12,
        BootFileSize = 13,
        MeritDumpFileSize = 14,
        DomainName = 15,
        SwapServer = 16,
        RootPath = 17,
        ExtensionsPath = 18,
        IpForwardEnable = 19,
        SourceRoutingEnable = 20,
        PolicyFilter = 21,
        MaximumDatagramSize = 22,
        DefaultIpTtl = 23,
        PathMtuTimeout = 24,
        PathMtuPlateau = 25,
        InterfaceMtu = 26,
        AllSubnetsLocal = 27,
        BroadcastAddress = 28,
        PerformMaskDiscovery = 29,
        MaskSupplier = 30,
        PerformRouterDiscovery = 31,
        RouterSolicitationAddress = 32,
        StaticRoute = 33,
        TrailerEncapsulation = 34,
        ArpCacheTimeout = 35,
        EthernetEncapsulation = 36,
        TcpDefaultTtl = 37,
        TcpKeepAliveInterval = 38,
        TcpKeepAliveGarbage = 39,
        NetworkInfoServiceDomain = 40,
        NetworkInfoServers = 41,
        NtpServers = 42,
        VendorInfo = 43,
        NetBiosNameServer = 44,
        NetBiosDistributionServer = 45,
        NetBiosNodeType = 46,
        NetBiosScope = 47,
        XWindowFontServer = 48,
        XWindowDisplayMgr = 49,
        RequestedIpAddress = 50,
        IpAddressLeaseTime = 51,
        OptionOverload = 52,
        DhcpMessageType = 53,
        ServerIdentifier = 54,
        ParameterRequestList = 55,
        Message = 56,
        MaxDhcpMessageSize = 57,
        RenewalTime = 58,
        RebindingTime = 59,
        VendorClassId = 60,
        ClientId = 61,
        TftpServerName = 62,
        BootFileName = 63,
        NisPlusDomain = 64,
        NisPlusServers = 65,
        MobileIpHomeAgent = 68,
        SmtpServer = 69,
        Pop3Server = 70,
        NntpServer = 71,
        DefaultWwwServer = 72,
        DefaultFingerServer = 73,
        DefaultIrcServer = 74,
        StreetTalkServer = 75,
        StreetTalkDirectoryServer = 76,
        UserClass = 77,
        RelayAgentInfo = 82,
        SipServers = 120,
        ClasslessStaticRoute = 121,
        NdsServers = 85,
        NdsContext = 86,
        TimeZonePosix = 100,
        TimeZoneTz = 101,
        DomainSearch = 119,
        SixRd = 212,
        MsClasslessStaticRoute = 249,
        DhcpCaptivePortal = 114,
        ConfigFile = 209,
        PathPrefix = 210,
        RebootTime = 211,
        ClientFqdn = 81,
        End = 255,
    }
}

bitflags! {
    /// Bitset describing how an option's value should be interpreted and
    /// length-validated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionTypeFlags: u16 {
        /// Single unsigned byte.
        const UINT8 = 1 << 0;
        /// Big-endian unsigned 16-bit value.
        const UINT16 = 1 << 1;
        /// Big-endian unsigned 32-bit value.
        const UINT32 = 1 << 2;
        /// Big-endian signed 16-bit value.
        const SINT16 = 1 << 3;
        /// A single (or, combined with ARRAY, repeated) IPv4 address.
        const ADDRIPV4 = 1 << 4;
        /// An opaque/display string.
        const STRING = 1 << 5;
        /// Combine with a scalar flag to mean "zero or more of it".
        const ARRAY = 1 << 6;
        /// May be requested in a parameter-request list (option 55).
        const REQUEST = 1 << 7;
        /// RFC 3361 SIP servers sub-decoder applies.
        const RFC3361 = 1 << 8;
        /// RFC 3397 domain-search sub-decoder applies.
        const RFC3397 = 1 << 9;
        /// RFC 3442 classless-static-route sub-decoder applies.
        const RFC3442 = 1 << 10;
        /// RFC 5969 6rd sub-decoder applies.
        const RFC5969 = 1 << 11;
    }
}

/// One row of the option table: wire code, interpretation flags, and the
/// canonical name used by the environment-export component.
#[derive(Debug, Clone, Copy)]
pub struct OptionTableEntry {
    /// Wire option code.
    pub code: u8,
    /// How to interpret/validate the value.
    pub flags: OptionTypeFlags,
    /// Canonical variable name, as printed to the hook environment.
    pub name: &'static str,
}

macro_rules! entry {
    ($code:expr, $flags:expr, $name:expr) => {
        OptionTableEntry {
            code: $code,
            flags: $flags,
            name: $name,
        }
    };
}

/// The full option table, in ascending code order except where a later
/// extension shares a group with its legacy counterpart.
pub const OPTION_TABLE: &[OptionTableEntry] = &[
    entry!(1, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::REQUEST), "subnet_mask"),
    entry!(2, OptionTypeFlags::UINT32, "time_offset"),
    entry!(3, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY).union(OptionTypeFlags::REQUEST), "routers"),
    entry!(4, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "time_servers"),
    entry!(5, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "ien116_name_servers"),
    entry!(6, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY).union(OptionTypeFlags::REQUEST), "domain_name_servers"),
    entry!(7, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "log_servers"),
    entry!(9, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "lpr_servers"),
    entry!(12, OptionTypeFlags::STRING, "host_name"),
    entry!(13, OptionTypeFlags::UINT16, "boot_size"),
    entry!(15, OptionTypeFlags::STRING.union(OptionTypeFlags::REQUEST), "domain_name"),
    entry!(16, OptionTypeFlags::ADDRIPV4, "swap_server"),
    entry!(17, OptionTypeFlags::STRING.union(OptionTypeFlags::REQUEST), "root_path"),
    entry!(18, OptionTypeFlags::STRING, "extensions_path"),
    entry!(19, OptionTypeFlags::UINT8, "ip_forwarding"),
    entry!(22, OptionTypeFlags::UINT16, "max_datagram_reassembly"),
    entry!(23, OptionTypeFlags::UINT8, "default_ip_ttl"),
    entry!(26, OptionTypeFlags::UINT16.union(OptionTypeFlags::REQUEST), "interface_mtu"),
    entry!(27, OptionTypeFlags::UINT8, "all_subnets_local"),
    entry!(28, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::REQUEST), "broadcast_address"),
    entry!(31, OptionTypeFlags::UINT8, "perform_router_discovery"),
    entry!(33, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "static_routes"),
    entry!(35, OptionTypeFlags::UINT32, "arp_cache_timeout"),
    entry!(40, OptionTypeFlags::STRING, "nis_domain"),
    entry!(41, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "nis_servers"),
    entry!(42, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY).union(OptionTypeFlags::REQUEST), "ntp_servers"),
    entry!(43, OptionTypeFlags::STRING, "vendor_encapsulated_options"),
    entry!(44, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "netbios_name_servers"),
    entry!(46, OptionTypeFlags::UINT8, "netbios_node_type"),
    entry!(47, OptionTypeFlags::STRING, "netbios_scope"),
    entry!(50, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::REQUEST), "requested_address"),
    entry!(51, OptionTypeFlags::UINT32, "dhcp_lease_time"),
    entry!(52, OptionTypeFlags::UINT8, "dhcp_option_overload"),
    entry!(53, OptionTypeFlags::UINT8, "dhcp_message_type"),
    entry!(54, OptionTypeFlags::ADDRIPV4, "dhcp_server_identifier"),
    entry!(55, OptionTypeFlags::STRING.union(OptionTypeFlags::ARRAY), "dhcp_parameter_request_list"),
    entry!(56, OptionTypeFlags::STRING, "dhcp_message"),
    entry!(57, OptionTypeFlags::UINT16, "dhcp_max_message_size"),
    entry!(58, OptionTypeFlags::UINT32, "dhcp_renewal_time"),
    entry!(59, OptionTypeFlags::UINT32, "dhcp_rebinding_time"),
    entry!(60, OptionTypeFlags::STRING, "vendor_class_identifier"),
    entry!(61, OptionTypeFlags::STRING.union(OptionTypeFlags::ARRAY), "dhcp_client_identifier"),
    entry!(64, OptionTypeFlags::STRING, "nisplus_domain"),
    entry!(65, OptionTypeFlags::ADDRIPV4.union(OptionTypeFlags::ARRAY), "nisplus_servers"),
    entry!(66, OptionTypeFlags::STRING, "tftp_server_name"),
    entry!(67, OptionTypeFlags::STRING, "bootfile_name"),
    entry!(77, OptionTypeFlags::STRING.union(OptionTypeFlags::REQUEST), "user_class"),
    entry!(81, OptionTypeFlags::STRING, "fqdn_name"),
    entry!(119, OptionTypeFlags::RFC3397.union(OptionTypeFlags::REQUEST), "domain_search"),
    entry!(120, OptionTypeFlags::RFC3361.union(OptionTypeFlags::REQUEST), "sip_servers"),
    entry!(121, OptionTypeFlags::RFC3442.union(OptionTypeFlags::REQUEST), "classless_static_routes"),
    entry!(212, OptionTypeFlags::RFC5969, "sixrd"),
    entry!(249, OptionTypeFlags::RFC3442, "ms_classless_static_routes"),
];

/// Look up an option table entry by wire code.
pub fn table_entry(code: u8) -> Option<&'static OptionTableEntry> {
    OPTION_TABLE.iter().find(|e| e.code == code)
}

/// Outcome of validating a raw option value against its table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// The code did not appear in the message (or only as a zero-length
    /// occurrence, which is never valid).
    Absent,
    /// The code appeared but its concatenated value failed length
    /// validation for its declared type.
    Malformed,
    /// A validated value, already truncated to the nominal size when the
    /// type is fixed-width and the option ran long.
    Value(Vec<u8>),
}

/// The decoded (but not yet semantically interpreted) option trailer of one
/// message: wire code → concatenated value bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    raw: BTreeMap<u8, Vec<u8>>,
}

/// Overload bit for "boot file name field carries options".
const OVERLOAD_FILE: u8 = 0x1;
/// Overload bit for "server name field carries options".
const OVERLOAD_SNAME: u8 = 0x2;

impl DhcpOptions {
    /// Decode the options trailer of `msg`, following RFC 3396 long-option
    /// concatenation and the RFC 1533 `file`/`sname` overload.
    pub fn parse(msg: &DhcpMessage) -> Self {
        let mut raw: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut overload: Option<u8> = None;

        let hit_end = walk_options(&msg.options, &mut raw, Some(&mut overload));
        if hit_end {
            if let Some(ov) = overload {
                if ov & OVERLOAD_FILE != 0 {
                    walk_options(&msg.file, &mut raw, None);
                }
                if ov & OVERLOAD_SNAME != 0 {
                    walk_options(&msg.sname, &mut raw, None);
                }
            }
        }

        DhcpOptions { raw }
    }

    /// Raw concatenated bytes for `code`, if the message carried it at all.
    pub fn raw(&self, code: u8) -> Option<&[u8]> {
        self.raw.get(&code).map(|v| v.as_slice())
    }

    /// All codes present in the decoded trailer.
    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.raw.keys().copied()
    }

    /// Validate and, where needed, truncate the value for `code` against
    /// the option table (or treat as an opaque string if the code is
    /// unknown to the table).
    pub fn get(&self, code: u8) -> OptionValue {
        let Some(bytes) = self.raw.get(&code) else {
            return OptionValue::Absent;
        };
        if bytes.is_empty() {
            return OptionValue::Malformed;
        }
        let Some(entry) = table_entry(code) else {
            return OptionValue::Value(bytes.clone());
        };
        validate(entry.flags, bytes)
    }

    /// Convenience: a single IPv4 address option (ADDRIPV4, not ARRAY).
    pub fn ipv4(&self, code: u8) -> Option<Ipv4Addr> {
        match self.get(code) {
            OptionValue::Value(b) if b.len() >= 4 => {
                Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            _ => None,
        }
    }

    /// Convenience: an array of IPv4 addresses (ADDRIPV4 | ARRAY).
    pub fn ipv4_array(&self, code: u8) -> Vec<Ipv4Addr> {
        match self.get(code) {
            OptionValue::Value(b) => b
                .chunks_exact(4)
                .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Convenience: a big-endian u32 option.
    pub fn u32(&self, code: u8) -> Option<u32> {
        match self.get(code) {
            OptionValue::Value(b) if b.len() >= 4 => {
                Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            _ => None,
        }
    }

    /// Convenience: a big-endian u16 option.
    pub fn u16(&self, code: u8) -> Option<u16> {
        match self.get(code) {
            OptionValue::Value(b) if b.len() >= 2 => Some(u16::from_be_bytes([b[0], b[1]])),
            _ => None,
        }
    }

    /// Convenience: a u8 option.
    pub fn u8(&self, code: u8) -> Option<u8> {
        match self.get(code) {
            OptionValue::Value(b) if !b.is_empty() => Some(b[0]),
            _ => None,
        }
    }

    /// Convenience: a lossily-decoded string option.
    pub fn string(&self, code: u8) -> Option<String> {
        match self.get(code) {
            OptionValue::Value(b) => Some(String::from_utf8_lossy(&b).into_owned()),
            _ => None,
        }
    }

    /// The message kind (option 53), or `None` for a BOOTP reply that
    /// carries no message-type option at all.
    pub fn message_kind(&self) -> Option<DhcpMessageKind> {
        self.u8(53).map(DhcpMessageKind::from)
    }
}

/// Walk one buffer of TLVs, accumulating concatenated values into `raw`.
/// Returns `true` if an `End` (255) marker was reached. `overload`, when
/// `Some`, records the first occurrence of option 52 seen anywhere in this
/// walk (only meaningful for the primary options-trailer walk).
fn walk_options(data: &[u8], raw: &mut BTreeMap<u8, Vec<u8>>, mut overload: Option<&mut Option<u8>>) -> bool {
    let mut i = 0;
    while i < data.len() {
        let code = data[i];
        if code == 0 {
            i += 1;
            continue;
        }
        if code == 255 {
            return true;
        }
        if i + 1 >= data.len() {
            // Truncated length byte; nothing more can be parsed.
            break;
        }
        let len = data[i + 1] as usize;
        let start = i + 2;
        let end = (start + len).min(data.len());
        let value = &data[start..end];

        if code == 52 {
            if let Some(slot) = overload.as_deref_mut() {
                if slot.is_none() && !value.is_empty() {
                    *slot = Some(value[0]);
                }
            }
        } else {
            raw.entry(code).or_default().extend_from_slice(value);
        }

        i = start + len;
        if end < start + len {
            // The declared length ran past the buffer; stop here.
            break;
        }
    }
    false
}

fn validate(flags: OptionTypeFlags, bytes: &[u8]) -> OptionValue {
    if flags.contains(OptionTypeFlags::STRING)
        || flags.contains(OptionTypeFlags::RFC3442)
        || flags.contains(OptionTypeFlags::RFC5969)
    {
        return OptionValue::Value(bytes.to_vec());
    }
    if flags.contains(OptionTypeFlags::ADDRIPV4) {
        if flags.contains(OptionTypeFlags::ARRAY) {
            if bytes.len() < 4 {
                return OptionValue::Malformed;
            }
            let rounded = bytes.len() - (bytes.len() % 4);
            return OptionValue::Value(bytes[..rounded].to_vec());
        }
        return fixed_width(bytes, 4);
    }
    if flags.contains(OptionTypeFlags::UINT32) {
        return fixed_width(bytes, 4);
    }
    if flags.contains(OptionTypeFlags::UINT16) || flags.contains(OptionTypeFlags::SINT16) {
        return fixed_width(bytes, 2);
    }
    if flags.contains(OptionTypeFlags::UINT8) {
        return fixed_width(bytes, 1);
    }
    // Unknown/untyped: any non-zero length is accepted verbatim.
    OptionValue::Value(bytes.to_vec())
}

fn fixed_width(bytes: &[u8], width: usize) -> OptionValue {
    if bytes.len() < width {
        OptionValue::Malformed
    } else {
        OptionValue::Value(bytes[..width].to_vec())
    }
}

/// One entry of an RFC 3442 (or Microsoft 249) classless static route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClasslessRoute {
    /// Destination network address (host bits beyond `prefix_len` zeroed).
    pub dest: Ipv4Addr,
    /// CIDR prefix length, 0..=32.
    pub prefix_len: u8,
    /// Next-hop gateway.
    pub gateway: Ipv4Addr,
}

/// Decode RFC 3442 / Microsoft-249 classless static routes.
pub fn decode_classless_routes(bytes: &[u8]) -> Result<Vec<ClasslessRoute>> {
    let mut routes = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let prefix_len = bytes[i];
        if prefix_len > 32 {
            return Err(DhcpError::Codec(format!(
                "classless route prefix length {prefix_len} exceeds 32"
            )));
        }
        i += 1;
        let dest_bytes = prefix_len.div_ceil(8) as usize;
        if i + dest_bytes + 4 > bytes.len() {
            return Err(DhcpError::Codec(
                "classless static route option truncated".into(),
            ));
        }
        let mut dest_octets = [0u8; 4];
        dest_octets[..dest_bytes].copy_from_slice(&bytes[i..i + dest_bytes]);
        i += dest_bytes;
        let gateway = Ipv4Addr::new(bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]);
        i += 4;
        routes.push(ClasslessRoute {
            dest: Ipv4Addr::from(dest_octets),
            prefix_len,
            gateway,
        });
    }
    Ok(routes)
}

/// The two shapes an RFC 3361 SIP-server option can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipServers {
    /// Encoding byte 0: a list of DNS names (delegates to the 3397 decoder).
    Names(Vec<String>),
    /// Encoding byte 1: a flat array of IPv4 addresses.
    Addrs(Vec<Ipv4Addr>),
}

/// Decode an RFC 3361 SIP servers option.
pub fn decode_sip_servers(bytes: &[u8]) -> Result<SipServers> {
    let (&encoding, rest) = bytes
        .split_first()
        .ok_or_else(|| DhcpError::Codec("empty SIP servers option".into()))?;
    match encoding {
        0 => Ok(SipServers::Names(decode_domain_search(rest)?)),
        1 => {
            if rest.is_empty() || rest.len() % 4 != 0 {
                return Err(DhcpError::Codec(format!(
                    "SIP servers IPv4 array length {} is not a nonzero multiple of 4",
                    rest.len()
                )));
            }
            Ok(SipServers::Addrs(
                rest.chunks_exact(4)
                    .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                    .collect(),
            ))
        }
        other => Err(DhcpError::Codec(format!(
            "SIP servers option has unknown encoding byte {other}"
        ))),
    }
}

/// Decode an RFC 3397 domain-search list: a sequence of DNS names using
/// standard label compression, with pointer offsets restricted to the
/// option's own payload and loop detection on repeated jumps.
pub fn decode_domain_search(bytes: &[u8]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let (name, next) = decode_one_name(bytes, cursor)?;
        if name.is_empty() && next == cursor {
            break;
        }
        names.push(name);
        cursor = next;
    }
    Ok(names)
}

fn decode_one_name(bytes: &[u8], start: usize) -> Result<(String, usize)> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut jumped_from: Option<usize> = None;
    let mut visited = std::collections::HashSet::new();

    loop {
        if pos >= bytes.len() {
            return Err(DhcpError::Codec("domain search name runs past end of option".into()));
        }
        let len = bytes[pos];
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xc0 == 0xc0 {
            if pos + 1 >= bytes.len() {
                return Err(DhcpError::Codec("truncated domain search compression pointer".into()));
            }
            let offset = (((len & 0x3f) as usize) << 8) | bytes[pos + 1] as usize;
            if offset >= bytes.len() {
                return Err(DhcpError::Codec(format!(
                    "domain search compression pointer {offset} is outside the option"
                )));
            }
            if !visited.insert(offset) {
                return Err(DhcpError::Codec("domain search compression pointer loop".into()));
            }
            if jumped_from.is_none() {
                jumped_from = Some(pos + 2);
            }
            pos = offset;
            continue;
        }
        if len & 0xc0 != 0 {
            return Err(DhcpError::Codec("domain search label has reserved length bits set".into()));
        }
        let len = len as usize;
        let label_start = pos + 1;
        let label_end = label_start + len;
        if label_end > bytes.len() {
            return Err(DhcpError::Codec("domain search label runs past end of option".into()));
        }
        labels.push(String::from_utf8_lossy(&bytes[label_start..label_end]).into_owned());
        pos = label_end;
    }

    let end = jumped_from.unwrap_or(pos);
    Ok((labels.join("."), end))
}

/// An RFC 5969 6rd configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SixRd {
    /// IPv4 mask length shared by every CE within the 6rd domain.
    pub ipv4_mask_len: u8,
    /// 6rd prefix length.
    pub ipv6_prefix_len: u8,
    /// 6rd IPv6 prefix.
    pub ipv6_prefix: [u8; 16],
    /// Border-relay IPv4 addresses.
    pub border_relays: Vec<Ipv4Addr>,
}

/// Decode an RFC 5969 6rd option: a fixed 22-byte prefix section followed by
/// any number of 4-byte border-relay addresses.
pub fn decode_6rd(bytes: &[u8]) -> Result<SixRd> {
    const FIXED: usize = 1 + 1 + 16;
    if bytes.len() < FIXED {
        return Err(DhcpError::Codec(format!(
            "6rd option is {} bytes, shorter than the {FIXED}-byte fixed prefix",
            bytes.len()
        )));
    }
    let ipv4_mask_len = bytes[0];
    let ipv6_prefix_len = bytes[1];
    let mut ipv6_prefix = [0u8; 16];
    ipv6_prefix.copy_from_slice(&bytes[2..18]);

    let relay_bytes = &bytes[FIXED..];
    if relay_bytes.len() % 4 != 0 {
        return Err(DhcpError::Codec(format!(
            "6rd border-relay list length {} is not a multiple of 4",
            relay_bytes.len()
        )));
    }
    let border_relays = relay_bytes
        .chunks_exact(4)
        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
        .collect();

    Ok(SixRd {
        ipv4_mask_len,
        ipv6_prefix_len,
        ipv6_prefix,
        border_relays,
    })
}

/// Infer a classful netmask for `addr` from its leading bits (A/B/C rule),
/// matching the legacy option-33 route inference some servers still rely on.
pub fn infer_classful_netmask(addr: Ipv4Addr) -> Ipv4Addr {
    let octets = addr.octets();
    if octets[0] < 128 {
        Ipv4Addr::new(255, 0, 0, 0)
    } else if octets[0] < 192 {
        Ipv4Addr::new(255, 255, 0, 0)
    } else {
        Ipv4Addr::new(255, 255, 255, 0)
    }
}

/// Narrow a classful netmask so it never overlaps a set host bit of `dest`:
/// right-shift (i.e. grow the mask) one bit at a time while the mask's
/// complement still intersects `dest`'s host portion.
fn narrow_to_destination(mask: u32, dest: u32) -> u32 {
    let mut mask = mask;
    while (!mask) & dest != 0 && mask != u32::MAX {
        mask = (mask >> 1) | 0x8000_0000;
    }
    mask
}

/// Decode legacy option 33 (static routes, `{dest, gateway}` 8-byte pairs)
/// plus option 3 (routers, appended as default-route entries) into the same
/// [`ClasslessRoute`] shape produced by the RFC 3442 decoder, inferring each
/// destination's netmask by the classful rule narrowed to its host bits.
pub fn infer_legacy_routes(option33: &[u8], option3: &[Ipv4Addr]) -> Vec<ClasslessRoute> {
    let mut routes = Vec::new();
    for pair in option33.chunks_exact(8) {
        let dest = Ipv4Addr::new(pair[0], pair[1], pair[2], pair[3]);
        let gateway = Ipv4Addr::new(pair[4], pair[5], pair[6], pair[7]);
        let classful = u32::from(infer_classful_netmask(dest));
        let narrowed = narrow_to_destination(classful, u32::from(dest));
        routes.push(ClasslessRoute {
            dest,
            prefix_len: narrowed.count_ones() as u8,
            gateway,
        });
    }
    for &gateway in option3 {
        routes.push(ClasslessRoute {
            dest: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            gateway,
        });
    }
    routes
}
