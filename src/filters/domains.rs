//! Blocked-domain rules.
//!
//! A rule string is interpreted, in order of specificity, as a CIDR range,
//! an IP literal, or a domain. Domains match exactly or as a dotted suffix:
//! `example.com` blocks `host.example.com`, but a bare TLD such as `com`
//! never matches by suffix.

use std::net::IpAddr;

use super::subnets::{contains, split_host_port};

/// A parsed blocked-domain rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    /// CIDR containment over the host's resolved addresses.
    Cidr { net: IpAddr, prefix: u8 },
    /// Exact IP match over the host's resolved addresses or literal address.
    Ip(IpAddr),
    /// Exact or dotted-suffix domain match.
    Domain(String),
}

impl Rule {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_lowercase();
        if raw.is_empty() {
            return None;
        }
        if let Some((net, prefix)) = raw.split_once('/') {
            let net: IpAddr = net.parse().ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            return Some(Self::Cidr { net, prefix });
        }
        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Some(Self::Ip(ip));
        }
        Some(Self::Domain(raw))
    }

    fn matches(&self, net_address: &str, host: &str, resolved: &[IpAddr]) -> bool {
        match self {
            Self::Cidr { net, prefix } => {
                let literal = host.parse::<IpAddr>().ok();
                resolved
                    .iter()
                    .copied()
                    .chain(literal)
                    .any(|ip| contains(*net, *prefix, ip))
            }
            Self::Ip(blocked) => {
                host.parse::<IpAddr>().ok() == Some(*blocked) || resolved.contains(blocked)
            }
            Self::Domain(domain) => {
                if host == domain || net_address == domain {
                    return true;
                }
                // Suffix match, never on a bare TLD.
                domain.contains('.') && host.ends_with(&format!(".{domain}"))
            }
        }
    }
}

/// The set of blocked-domain rules, loaded from `hdb_domains` and applied
/// to every announced net address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockedDomains {
    rules: Vec<Rule>,
}

impl BlockedDomains {
    /// Parse a rule set; unparseable entries are dropped.
    #[must_use]
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rules: parse_rules(rules),
        }
    }

    /// Replace the rule set in place.
    pub fn replace<I, S>(&mut self, rules: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules = parse_rules(rules);
    }

    /// Whether any rule matches the net address (and the addresses it
    /// resolved into).
    #[must_use]
    pub fn is_blocked(&self, net_address: &str, resolved: &[IpAddr]) -> bool {
        let net_address = net_address.to_lowercase();
        let host = split_host_port(&net_address)
            .map_or(net_address.as_str(), |(host, _)| host)
            .to_owned();
        self.rules
            .iter()
            .any(|rule| rule.matches(&net_address, &host, resolved))
    }

    /// Whether the set has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_rules<I, S>(rules: I) -> Vec<Rule>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rules
        .into_iter()
        .filter_map(|raw| Rule::parse(raw.as_ref()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_domain_blocks() {
        let set = BlockedDomains::new(["evil.example"]);
        assert!(set.is_blocked("evil.example:9982", &[]));
        assert!(!set.is_blocked("good.example:9982", &[]));
    }

    #[test]
    fn dotted_suffix_blocks_subdomains() {
        let set = BlockedDomains::new(["example.com"]);
        assert!(set.is_blocked("host.example.com:9982", &[]));
        assert!(set.is_blocked("a.b.example.com:9982", &[]));
        assert!(!set.is_blocked("notexample.com:9982", &[]));
    }

    #[test]
    fn bare_tld_never_matches_by_suffix() {
        let set = BlockedDomains::new(["com"]);
        assert!(!set.is_blocked("evil.com:9982", &[]));
        // Exact match of the (nonsensical) bare host still applies.
        assert!(set.is_blocked("com:9982", &[]));
    }

    #[test]
    fn ip_rule_matches_literal_and_resolved() {
        let set = BlockedDomains::new(["1.2.3.4"]);
        assert!(set.is_blocked("1.2.3.4:9982", &[]));
        assert!(set.is_blocked("sneaky.example:9982", &["1.2.3.4".parse().unwrap()]));
        assert!(!set.is_blocked("1.2.3.5:9982", &[]));
    }

    #[test]
    fn cidr_rule_contains_resolved_addresses() {
        let set = BlockedDomains::new(["10.20.0.0/16"]);
        assert!(set.is_blocked("host.example:9982", &["10.20.99.1".parse().unwrap()]));
        assert!(!set.is_blocked("host.example:9982", &["10.21.0.1".parse().unwrap()]));
        assert!(set.is_blocked("10.20.1.2:9982", &[]));
    }

    #[test]
    fn replace_swaps_the_rule_set() {
        let mut set = BlockedDomains::new(["evil.example"]);
        set.replace(["other.example"]);
        assert!(!set.is_blocked("evil.example:9982", &[]));
        assert!(set.is_blocked("other.example:9982", &[]));
    }

    #[test]
    fn unparseable_rules_are_dropped() {
        let set = BlockedDomains::new(["", "  ", "1.2.3.0/notaprefix"]);
        assert!(set.is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let set = BlockedDomains::new(["Evil.Example"]);
        assert!(set.is_blocked("EVIL.EXAMPLE:9982", &[]));
    }
}
