use crate::hostport::{PortMapping, CRIO_MASQ_CHAIN_PREFIX, KUBE_HP_CHAIN_PREFIX};
use data_encoding::BASE32;
use sha2::{Digest, Sha256};

/// The two derived chain names owned by one port mapping. Never persisted;
/// recomputed identically by Add and Remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPair {
    pub dnat_chain: String,
    pub masq_chain: String,
}

/// Derives the chain name for one port mapping: SHA-256 over the id, host
/// port, protocol, and host IP, base-32 encoded and truncated to 16
/// characters, with the role literal prepended. The role literal is not part
/// of the hashed input, so a mapping's DNAT and masquerade chains share their
/// suffix. Chain names must stay under the kernel's 29-character cap.
pub fn hostport_chain(prefix: &str, id: &str, pm: &PortMapping) -> String {
    let host_ip = pm.host_ip.map(|ip| ip.to_string()).unwrap_or_default();
    let input = format!("{id}{}{}{host_ip}", pm.host_port, pm.protocol.as_str());
    let encoded = BASE32.encode(&Sha256::digest(input.as_bytes()));
    format!("{prefix}{}", &encoded[..16])
}

/// Derives both chains of a mapping in one go.
pub fn chain_pair(id: &str, pm: &PortMapping) -> ChainPair {
    ChainPair {
        dnat_chain: hostport_chain(KUBE_HP_CHAIN_PREFIX, id, pm),
        masq_chain: hostport_chain(CRIO_MASQ_CHAIN_PREFIX, id, pm),
    }
}
