//! Subnet derivation for Sybil deduplication.
//!
//! Every resolved address of a host is collapsed into its subnet: /24 for
//! IPv4, /54 for IPv6. Two online hosts whose subnet sets intersect count as
//! a collision; the portal uses the count to dedupe host clusters.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Prefix length used for IPv4 subnets.
pub const IPV4_PREFIX: u8 = 24;

/// Prefix length used for IPv6 subnets.
pub const IPV6_PREFIX: u8 = 54;

/// Collapse an address into its canonical subnet string.
#[must_use]
pub fn subnet_of(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let masked = Ipv4Addr::from(u32::from(v4) & prefix_mask_v4(IPV4_PREFIX));
            format!("{masked}/{IPV4_PREFIX}")
        }
        IpAddr::V6(v6) => {
            let masked = Ipv6Addr::from(u128::from(v6) & prefix_mask_v6(IPV6_PREFIX));
            format!("{masked}/{IPV6_PREFIX}")
        }
    }
}

/// Derive the deduplicated subnet set of a host's resolved addresses,
/// preserving resolution order.
#[must_use]
pub fn ip_nets(ips: &[IpAddr]) -> Vec<String> {
    let mut nets = Vec::with_capacity(ips.len());
    for ip in ips {
        let net = subnet_of(*ip);
        if !nets.contains(&net) {
            nets.push(net);
        }
    }
    nets
}

/// Whether an address falls inside `net/prefix`. Families never match each
/// other.
#[must_use]
pub fn contains(net: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = prefix_mask_v4(prefix.min(32));
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = prefix_mask_v6(prefix.min(128));
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

/// Split a `host:port` net address into its parts. Handles bracketed IPv6
/// literals (`[::1]:9982`).
#[must_use]
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.strip_prefix('[').map_or(host, |h| h.strip_suffix(']').unwrap_or(h));
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

/// Whether an address is unusable as a host announcement target: loopback,
/// unspecified, link-local, or RFC1918 private space.
#[must_use]
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_unspecified() || v4.is_private() || v4.is_link_local()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_collapses_to_slash_24() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(subnet_of(ip), "1.2.3.0/24");
    }

    #[test]
    fn ipv6_collapses_to_slash_54() {
        let ip: IpAddr = "2001:db8:aaaa:bbff::1".parse().unwrap();
        // /54 keeps the top 54 bits: the fourth hextet loses its low 10 bits.
        assert_eq!(subnet_of(ip), "2001:db8:aaaa:b800::/54");
    }

    #[test]
    fn ip_nets_dedupes_same_subnet() {
        let ips: Vec<IpAddr> = vec![
            "1.2.3.4".parse().unwrap(),
            "1.2.3.77".parse().unwrap(),
            "5.6.7.8".parse().unwrap(),
        ];
        assert_eq!(ip_nets(&ips), vec!["1.2.3.0/24", "5.6.7.0/24"]);
    }

    #[test]
    fn containment_respects_family() {
        let net: IpAddr = "10.0.0.0".parse().unwrap();
        assert!(contains(net, 8, "10.200.1.1".parse().unwrap()));
        assert!(!contains(net, 8, "11.0.0.1".parse().unwrap()));
        assert!(!contains(net, 8, "::1".parse().unwrap()));
    }

    #[test]
    fn split_host_port_handles_literals() {
        assert_eq!(split_host_port("example.com:9982"), Some(("example.com", 9982)));
        assert_eq!(split_host_port("1.2.3.4:9982"), Some(("1.2.3.4", 9982)));
        assert_eq!(split_host_port("[2001:db8::1]:9982"), Some(("2001:db8::1", 9982)));
        assert_eq!(split_host_port("no-port"), None);
        assert_eq!(split_host_port(":9982"), None);
    }

    #[test]
    fn local_addresses_are_detected() {
        for addr in ["127.0.0.1", "0.0.0.0", "10.1.2.3", "192.168.1.1", "::1", "fe80::1"] {
            let ip: IpAddr = addr.parse().unwrap();
            assert!(is_local(ip), "{addr} should be local");
        }
        for addr in ["1.2.3.4", "2001:db8::1"] {
            let ip: IpAddr = addr.parse().unwrap();
            assert!(!is_local(ip), "{addr} should be public");
        }
    }
}
