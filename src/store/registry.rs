//! The authoritative in-memory host map of one network.
//!
//! The registry mirrors the database: hosts are mutated only through
//! [`crate::store::HostStore`], which persists first and mirrors here on
//! success, so the map never runs ahead of the database. Alongside the map
//! it maintains the active-subnet cache used for collision counting.

use std::collections::{HashMap, HashSet};

use crate::types::primitives::HostKey;
use crate::types::Host;

/// In-memory hosts and the active-subnet cache.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: HashMap<HostKey, Host>,
    /// subnet string -> online hosts inside it.
    active: HashMap<String, HashSet<HostKey>>,
}

impl HostRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether no hosts are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Number of online hosts.
    #[must_use]
    pub fn online(&self) -> usize {
        self.active
            .values()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }

    /// Borrow a host.
    #[must_use]
    pub fn get(&self, key: &HostKey) -> Option<&Host> {
        self.hosts.get(key)
    }

    /// Clone a host out of the map.
    #[must_use]
    pub fn snapshot(&self, key: &HostKey) -> Option<Host> {
        self.hosts.get(key).cloned()
    }

    /// Iterate over all hosts.
    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// All host keys, for sweep passes.
    #[must_use]
    pub fn keys(&self) -> Vec<HostKey> {
        self.hosts.keys().copied().collect()
    }

    /// Insert or replace a host, keeping the active-subnet cache in step
    /// with its online state and current `ip_nets`.
    pub fn upsert(&mut self, host: Host) {
        if let Some(old) = self.hosts.get(&host.public_key) {
            let key = old.public_key;
            for net in &old.ip_nets {
                if let Some(members) = self.active.get_mut(net) {
                    members.remove(&key);
                    if members.is_empty() {
                        self.active.remove(net);
                    }
                }
            }
        }
        if host.is_online() && !host.blocked {
            for net in &host.ip_nets {
                self.active
                    .entry(net.clone())
                    .or_default()
                    .insert(host.public_key);
            }
        }
        self.hosts.insert(host.public_key, host);
    }

    /// Count the distinct online hosts sharing any of the given subnets,
    /// excluding `exclude` (the host asking).
    #[must_use]
    pub fn active_in_subnets(&self, ip_nets: &[String], exclude: Option<HostKey>) -> usize {
        let mut seen: HashSet<HostKey> = HashSet::new();
        for net in ip_nets {
            if let Some(members) = self.active.get(net) {
                seen.extend(members);
            }
        }
        if let Some(key) = exclude {
            seen.remove(&key);
        }
        seen.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
