use crate::hostport::error::{HostportError, Result};
use crate::hostport::manager::HostportManager;
use crate::hostport::PodPortMapping;
use crate::iptables::{ExecIptables, IpFamily};
use bon::bon;
use std::net::IpAddr;
use tracing::debug;

/// Dual-stack front door: owns one manager per IP family and routes each
/// call by the family of the pod's address. IPv4 and IPv6 operations are
/// fully independent; no rule ever crosses between the two tables.
pub struct MetaHostportManager {
    ipv4: HostportManager,
    ipv6: HostportManager,
}

#[bon]
impl MetaHostportManager {
    #[builder]
    pub fn new(ipv4: HostportManager, ipv6: HostportManager) -> Self {
        MetaHostportManager { ipv4, ipv6 }
    }

    /// Coordinator backed by the system iptables/ip6tables tools.
    pub fn system() -> Self {
        MetaHostportManager {
            ipv4: HostportManager::builder()
                .iptables(Box::new(
                    ExecIptables::builder().family(IpFamily::V4).build(),
                ))
                .build(),
            ipv6: HostportManager::builder()
                .iptables(Box::new(
                    ExecIptables::builder().family(IpFamily::V6).build(),
                ))
                .build(),
        }
    }

    /// Programs the pod's hostports on the table matching its address
    /// family. When `nat_interface` names the pod network bridge, the static
    /// loopback-masquerade rule is ensured on that family first.
    pub fn add(&self, id: &str, pod: &PodPortMapping, nat_interface: Option<&str>) -> Result<()> {
        if pod.host_network {
            return Ok(());
        }
        let manager = self.manager_for(pod)?;
        debug!(pod = %pod.identity(), family = %manager.family(), "dispatching hostport add");
        if let Some(interface) = nat_interface {
            manager.ensure_localhost_masquerade(interface)?;
        }
        manager.add(id, pod)
    }

    /// Tears down the pod's hostports on the matching family. The loopback
    /// masquerade rule and the dispatch chains stay; they are anchor
    /// infrastructure shared by every pod.
    pub fn remove(&self, id: &str, pod: &PodPortMapping) -> Result<()> {
        if pod.host_network {
            return Ok(());
        }
        let manager = self.manager_for(pod)?;
        debug!(pod = %pod.identity(), family = %manager.family(), "dispatching hostport remove");
        manager.remove(id, pod)
    }

    pub fn ipv4(&self) -> &HostportManager {
        &self.ipv4
    }

    pub fn ipv6(&self) -> &HostportManager {
        &self.ipv6
    }

    fn manager_for(&self, pod: &PodPortMapping) -> Result<&HostportManager> {
        match pod.ip {
            Some(IpAddr::V4(_)) => Ok(&self.ipv4),
            Some(IpAddr::V6(_)) => Ok(&self.ipv6),
            None => Err(HostportError::unsupported_family(pod.identity())),
        }
    }
}
