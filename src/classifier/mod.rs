//! Address classification
//!
//! Maps a raw address string taken from a packet header onto one of the four
//! entity categories of the communication graph. Classification is a pure
//! function of the string: no lookups, no state, safe to share across tasks.

use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dotted quad with 1-3 digits per octet, no range check
const IPV4_PATTERN: &str = r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}$";

/// Six hex pairs separated by ':' or '-', anchored at the start only
const MAC_PATTERN: &str = r"^(?:[0-9a-fA-F]{2}[:\-]){5}[0-9a-fA-F]{2}";

/// Prefixes treated as private address space, tested in this order.
///
/// Plain string prefixes, not CIDR blocks: 172.17-31.x.x and 10.1-255.x.x are
/// classified as public machines.
pub const PRIVATE_PREFIXES: [&str; 3] = ["192.168", "172.16", "10.0"];

/// Entity category, one per graph label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// IPv4 inside a private prefix
    LocalMachine,
    /// Any other IPv4, enriched with hostname and geolocation
    Machine,
    /// Link-layer device identified by its MAC address
    Network,
    /// Anything else, in practice IPv6 literals
    MachineIpv6,
}

impl Category {
    /// Graph label under which entities of this category are stored
    pub fn label(&self) -> &'static str {
        match self {
            Category::LocalMachine => "local_machine",
            Category::Machine => "machine",
            Category::Network => "network",
            Category::MachineIpv6 => "machine_ipv6",
        }
    }

    /// Name of the property holding the natural key
    pub fn key_property(&self) -> &'static str {
        match self {
            Category::LocalMachine | Category::Machine => "ipv4",
            Category::Network => "mac_address",
            Category::MachineIpv6 => "ipv6",
        }
    }

    /// Inverse of [`Category::label`]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "local_machine" => Some(Category::LocalMachine),
            "machine" => Some(Category::Machine),
            "network" => Some(Category::Network),
            "machine_ipv6" => Some(Category::MachineIpv6),
            _ => None,
        }
    }

    /// All categories, in classification order
    pub fn all() -> [Category; 4] {
        [
            Category::LocalMachine,
            Category::Machine,
            Category::Network,
            Category::MachineIpv6,
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified address: category plus the key it is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub category: Category,
    pub key: String,
}

impl Address {
    pub fn new(category: Category, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.category, self.key)
    }
}

/// Classifier with pre-compiled address patterns
#[derive(Debug, Clone)]
pub struct AddressClassifier {
    ipv4: Regex,
    mac: Regex,
}

impl AddressClassifier {
    /// Compile the address patterns
    pub fn new() -> Result<Self> {
        Ok(Self {
            ipv4: Regex::new(IPV4_PATTERN)?,
            mac: Regex::new(MAC_PATTERN)?,
        })
    }

    /// Classify a raw address string
    ///
    /// IPv4 is tested first, then MAC; everything else falls through to
    /// `MachineIpv6` without further validation. The key is always the input
    /// string unchanged.
    pub fn classify(&self, address: &str) -> Address {
        let category = if self.ipv4.is_match(address) {
            if is_private(address) {
                Category::LocalMachine
            } else {
                Category::Machine
            }
        } else if self.mac.is_match(address) {
            Category::Network
        } else {
            Category::MachineIpv6
        };

        Address::new(category, address)
    }
}

fn is_private(ipv4: &str) -> bool {
    PRIVATE_PREFIXES
        .iter()
        .any(|prefix| ipv4.starts_with(prefix))
}
