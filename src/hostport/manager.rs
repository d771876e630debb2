use crate::hostport::chain::chain_pair;
use crate::hostport::error::{HostportError, Result};
use crate::hostport::{rules, PodPortMapping, CRIO_MASQ_CHAIN, KUBE_HOSTPORTS_CHAIN};
use crate::iptables::error::Result as IptablesResult;
use crate::iptables::{
    render_chain_decl, render_rule, IpFamily, IpTables, RulePosition, CHAIN_OUTPUT,
    CHAIN_POSTROUTING, CHAIN_PREROUTING, TABLE_NAT,
};
use bon::bon;
use std::sync::Mutex;
use tracing::{debug, info};

const PORTALS_COMMENT: &str = "kube hostport portals";
const MASQUERADE_COMMENT: &str = "kube hostport masquerading";
const LOCALHOST_MASQ_COMMENT: &str = "SNAT for localhost access to hostports";

#[derive(Default)]
struct ManagerState {
    localhost_masq_ensured: bool,
}

/// Programs hostport NAT rules for exactly one IP family.
///
/// The live nat table is the only state: `remove` recomputes the chain names
/// it must delete instead of looking them up, so it stays correct across
/// process restarts and after partially failed adds. The mutex serializes all
/// mutations of the table; two concurrent restores over the same table are
/// not safe to interleave.
pub struct HostportManager {
    iptables: Box<dyn IpTables>,
    state: Mutex<ManagerState>,
}

#[bon]
impl HostportManager {
    #[builder]
    pub fn new(iptables: Box<dyn IpTables>) -> Self {
        HostportManager {
            iptables,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn family(&self) -> IpFamily {
        self.iptables.family()
    }

    /// Programs every port mapping of `pod` in one atomic restore. A no-op
    /// for host-network pods and pods without mappings. Nothing is left
    /// half-applied on failure; cleanup after an error is the caller's
    /// `remove` call.
    pub fn add(&self, id: &str, pod: &PodPortMapping) -> Result<()> {
        if pod.host_network {
            return Ok(());
        }
        let mappings = active_mappings(pod);
        if mappings.is_empty() {
            return Ok(());
        }
        let pod_ip = pod
            .ip
            .ok_or_else(|| HostportError::unsupported_family(pod.identity()))?;
        let family = self.family();
        let actual = IpFamily::of(pod_ip);
        if actual != family {
            return Err(HostportError::family_mismatch(pod.identity(), family, actual));
        }

        let _state = self.lock_state();
        self.ensure_base_chains()
            .map_err(|e| HostportError::base_chains(family, e))?;

        // Chain declarations first, then rules, one payload for the whole
        // call. Declaring an existing chain flushes it, which clears any
        // leftovers from a crashed prior attempt.
        let mut chains = String::from("*nat\n");
        let mut lines = String::new();
        for pm in &mappings {
            let pair = chain_pair(id, pm);
            let comment = rules::comment(pod, pm);

            chains.push_str(&render_chain_decl(&pair.dnat_chain));
            chains.push('\n');
            chains.push_str(&render_chain_decl(&pair.masq_chain));
            chains.push('\n');

            lines.push_str(&render_rule(
                KUBE_HOSTPORTS_CHAIN,
                &rules::dnat_jump_args(&comment, pm, &pair),
            ));
            lines.push('\n');
            lines.push_str(&render_rule(
                CRIO_MASQ_CHAIN,
                &rules::masq_jump_args(&comment, &pair),
            ));
            lines.push('\n');
            lines.push_str(&render_rule(
                &pair.masq_chain,
                &rules::hairpin_masq_args(&comment, pm, pod_ip),
            ));
            lines.push('\n');
            lines.push_str(&render_rule(
                &pair.dnat_chain,
                &rules::dnat_args(&comment, pm, pod_ip),
            ));
            lines.push('\n');
        }
        lines.push_str("COMMIT\n");

        debug!(
            pod = %pod.identity(),
            mappings = mappings.len(),
            %family,
            "programming hostports"
        );
        self.iptables
            .restore(TABLE_NAT, &format!("{chains}{lines}"))
            .map_err(|e| HostportError::apply(pod.identity(), family, e))?;
        info!(pod = %pod.identity(), %family, "hostports programmed");
        Ok(())
    }

    /// Tears down every port mapping of `pod`. Safe to call for mappings
    /// that were never added or were already removed; the dispatch chains
    /// and their anchor rules are left in place.
    pub fn remove(&self, id: &str, pod: &PodPortMapping) -> Result<()> {
        if pod.host_network {
            return Ok(());
        }
        let mappings = active_mappings(pod);
        if mappings.is_empty() {
            return Ok(());
        }
        let family = self.family();
        let _state = self.lock_state();

        for pm in &mappings {
            let pair = chain_pair(id, pm);
            let comment = rules::comment(pod, pm);

            self.iptables
                .delete_rule(
                    TABLE_NAT,
                    KUBE_HOSTPORTS_CHAIN,
                    &rules::dnat_jump_args(&comment, pm, &pair),
                )
                .map_err(|e| {
                    HostportError::teardown(pod.identity(), family, &pair.dnat_chain, e)
                })?;
            self.iptables
                .delete_rule(
                    TABLE_NAT,
                    CRIO_MASQ_CHAIN,
                    &rules::masq_jump_args(&comment, &pair),
                )
                .map_err(|e| {
                    HostportError::teardown(pod.identity(), family, &pair.masq_chain, e)
                })?;

            for chain in [&pair.dnat_chain, &pair.masq_chain] {
                self.iptables
                    .delete_chain(TABLE_NAT, chain)
                    .map_err(|e| HostportError::teardown(pod.identity(), family, chain, e))?;
            }
        }
        debug!(pod = %pod.identity(), %family, "hostports removed");
        Ok(())
    }

    /// Inserts the static rule that masquerades loopback-sourced traffic
    /// egressing the pod network bridge, so the node can reach a hostport
    /// via loopback. Installed once per manager lifetime, ahead of the
    /// per-port rules, and never removed.
    pub fn ensure_localhost_masquerade(&self, nat_interface: &str) -> Result<()> {
        if nat_interface.is_empty() {
            return Ok(());
        }
        let family = self.family();
        let mut state = self.lock_state();
        if state.localhost_masq_ensured {
            return Ok(());
        }
        self.ensure_base_chains()
            .map_err(|e| HostportError::base_chains(family, e))?;

        let loopback = match family {
            IpFamily::V4 => "127.0.0.0/8",
            IpFamily::V6 => "::1/128",
        };
        let args = vec![
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            LOCALHOST_MASQ_COMMENT.to_string(),
            "-o".to_string(),
            nat_interface.to_string(),
            "-s".to_string(),
            loopback.to_string(),
            "-j".to_string(),
            "MASQUERADE".to_string(),
        ];
        self.iptables
            .ensure_rule(RulePosition::Prepend, TABLE_NAT, CRIO_MASQ_CHAIN, &args)
            .map_err(|e| HostportError::localhost_masquerade(family, nat_interface, e))?;
        state.localhost_masq_ensured = true;
        debug!(interface = nat_interface, %family, "localhost masquerade ensured");
        Ok(())
    }

    /// Point-in-time dump of the nat table, taken under the same lock as the
    /// mutating operations.
    pub fn dump(&self) -> Result<String> {
        let _state = self.lock_state();
        self.iptables
            .save(TABLE_NAT)
            .map_err(|e| HostportError::dump(self.family(), e))
    }

    /// Idempotently creates the two dispatch chains and the three anchor
    /// jump rules that route built-in chain traffic through them. Called
    /// defensively at the top of every add; never undone by remove.
    fn ensure_base_chains(&self) -> IptablesResult<()> {
        self.iptables.ensure_chain(TABLE_NAT, KUBE_HOSTPORTS_CHAIN)?;
        self.iptables.ensure_chain(TABLE_NAT, CRIO_MASQ_CHAIN)?;

        let portal_args = vec![
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            PORTALS_COMMENT.to_string(),
            "-m".to_string(),
            "addrtype".to_string(),
            "--dst-type".to_string(),
            "LOCAL".to_string(),
            "-j".to_string(),
            KUBE_HOSTPORTS_CHAIN.to_string(),
        ];
        for builtin in [CHAIN_OUTPUT, CHAIN_PREROUTING] {
            self.iptables
                .ensure_rule(RulePosition::Prepend, TABLE_NAT, builtin, &portal_args)?;
        }

        let masq_args = vec![
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            MASQUERADE_COMMENT.to_string(),
            "-m".to_string(),
            "conntrack".to_string(),
            "--ctstate".to_string(),
            "DNAT".to_string(),
            "-j".to_string(),
            CRIO_MASQ_CHAIN.to_string(),
        ];
        self.iptables
            .ensure_rule(RulePosition::Prepend, TABLE_NAT, CHAIN_POSTROUTING, &masq_args)?;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The mappings that actually get rules. Host port zero means "no hostport
/// requested" and is skipped.
fn active_mappings(pod: &PodPortMapping) -> Vec<&crate::hostport::PortMapping> {
    pod.port_mappings
        .iter()
        .filter(|pm| pm.host_port != 0)
        .collect()
}
