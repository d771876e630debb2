pub mod chain;
pub mod error;
pub mod manager;
pub mod meta;
pub mod rules;


pub use error::{HostportError, Result};

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Dispatch chain every per-port DNAT jump rule is funneled through. Reached
/// from the built-in OUTPUT and PREROUTING chains.
pub const KUBE_HOSTPORTS_CHAIN: &str = "KUBE-HOSTPORTS";

/// Dispatch chain every per-port masquerade jump rule is funneled through.
/// Reached from the built-in POSTROUTING chain.
pub const CRIO_MASQ_CHAIN: &str = "CRIO-HOSTPORTS-MASQ";

/// Role literal prepended to derived DNAT chain names.
pub const KUBE_HP_CHAIN_PREFIX: &str = "KUBE-HP-";

/// Role literal prepended to derived masquerade chain names.
pub const CRIO_MASQ_CHAIN_PREFIX: &str = "CRIO-MASQ-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Canonical uppercase form, used in chain-name derivation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }

    /// Lowercase form used in rule text (`-m tcp -p tcp`).
    pub fn rule_match(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published port: traffic to `host_port` on the node is redirected to
/// `container_port` inside the pod.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
    /// Restricts the mapping to one host address; absent means any local
    /// address. Lets several host IPs share the same numeric port.
    #[serde(default)]
    pub host_ip: Option<IpAddr>,
}

/// Everything the managers need to know about one pod's published ports.
/// Ephemeral: built by the sandbox lifecycle for each Add/Remove call and an
/// equivalent value is reconstructed at teardown.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct PodPortMapping {
    pub name: String,
    pub namespace: String,
    /// The pod's single-family address. Host-network pods have none.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[builder(default)]
    #[serde(default)]
    pub host_network: bool,
    #[builder(default)]
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

impl PodPortMapping {
    /// Human-readable pod identity used in rule comments.
    pub fn identity(&self) -> String {
        format!("{}_{}", self.name, self.namespace)
    }
}
