use crate::hostport::chain::ChainPair;
use crate::hostport::{PodPortMapping, PortMapping};
use std::net::IpAddr;

/// Comment carried by every rule of a mapping, e.g. `pod1_ns1 hostport 8080`.
pub fn comment(pod: &PodPortMapping, pm: &PortMapping) -> String {
    format!("{} hostport {}", pod.identity(), pm.host_port)
}

fn comment_args(comment: &str) -> Vec<String> {
    vec![
        "-m".to_string(),
        "comment".to_string(),
        "--comment".to_string(),
        comment.to_string(),
    ]
}

/// Host-mask CIDR form of an address: `/32` for IPv4, `/128` for IPv6.
fn host_cidr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// DNAT destination, bracketing IPv6 literals.
fn to_destination(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Jump from the ingress dispatch chain into the mapping's DNAT chain,
/// matched on protocol and host port.
pub fn dnat_jump_args(comment: &str, pm: &PortMapping, chains: &ChainPair) -> Vec<String> {
    let proto = pm.protocol.rule_match();
    let mut args = comment_args(comment);
    args.extend([
        "-m".to_string(),
        proto.to_string(),
        "-p".to_string(),
        proto.to_string(),
        "--dport".to_string(),
        pm.host_port.to_string(),
        "-j".to_string(),
        chains.dnat_chain.clone(),
    ]);
    args
}

/// Jump from the masquerade dispatch chain into the mapping's masquerade chain.
pub fn masq_jump_args(comment: &str, chains: &ChainPair) -> Vec<String> {
    let mut args = comment_args(comment);
    args.extend(["-j".to_string(), chains.masq_chain.clone()]);
    args
}

/// Hairpin rule: masquerade only when the pod talks to its own published host
/// port (conntrack original destination port), so return traffic routes back
/// instead of failing reverse-path checks.
pub fn hairpin_masq_args(comment: &str, pm: &PortMapping, pod_ip: IpAddr) -> Vec<String> {
    let proto = pm.protocol.rule_match();
    let pod_cidr = host_cidr(pod_ip);
    let mut args = comment_args(comment);
    args.extend([
        "-m".to_string(),
        "conntrack".to_string(),
        "--ctorigdstport".to_string(),
        pm.host_port.to_string(),
        "-m".to_string(),
        proto.to_string(),
        "-p".to_string(),
        proto.to_string(),
        "--dport".to_string(),
        pm.container_port.to_string(),
        "-s".to_string(),
        pod_cidr.clone(),
        "-d".to_string(),
        pod_cidr,
        "-j".to_string(),
        "MASQUERADE".to_string(),
    ]);
    args
}

/// DNAT rule rewriting the destination to the pod address and container port,
/// scoped by `-d` when the mapping is bound to one host address.
pub fn dnat_args(comment: &str, pm: &PortMapping, pod_ip: IpAddr) -> Vec<String> {
    let proto = pm.protocol.rule_match();
    let mut args = comment_args(comment);
    args.extend([
        "-m".to_string(),
        proto.to_string(),
        "-p".to_string(),
        proto.to_string(),
    ]);
    if let Some(host_ip) = pm.host_ip {
        args.extend(["-d".to_string(), host_cidr(host_ip)]);
    }
    args.extend([
        "-j".to_string(),
        "DNAT".to_string(),
        "--to-destination".to_string(),
        to_destination(pod_ip, pm.container_port),
    ]);
    args
}
