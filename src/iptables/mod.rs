pub mod error;
pub mod exec;
#[cfg(test)]
pub(crate) mod fake;

pub use error::{IptablesError, Result};
pub use exec::ExecIptables;

use std::fmt;

/// The only table this crate touches.
pub const TABLE_NAT: &str = "nat";

// Built-in chains of the nat table.
pub const CHAIN_PREROUTING: &str = "PREROUTING";
pub const CHAIN_OUTPUT: &str = "OUTPUT";
pub const CHAIN_POSTROUTING: &str = "POSTROUTING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(ip: std::net::IpAddr) -> IpFamily {
        match ip {
            std::net::IpAddr::V4(_) => IpFamily::V4,
            std::net::IpAddr::V6(_) => IpFamily::V6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "IPv4"),
            IpFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Where `ensure_rule` puts a rule that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePosition {
    Append,
    Prepend,
}

/// Packet-filter backend for one IP family.
///
/// Deletion-style operations treat a missing chain or rule as already done:
/// teardown paths call them unconditionally and must not fail on leftovers
/// that were never created or were already cleaned up.
pub trait IpTables: Send + Sync {
    fn family(&self) -> IpFamily;

    /// Create the chain if absent. Returns true if it already existed.
    fn ensure_chain(&self, table: &str, chain: &str) -> Result<bool>;

    fn flush_chain(&self, table: &str, chain: &str) -> Result<()>;

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;

    /// Append or prepend the rule unless an identical one is already present.
    /// Returns true if it already existed.
    fn ensure_rule(
        &self,
        position: RulePosition,
        table: &str,
        chain: &str,
        args: &[String],
    ) -> Result<bool>;

    fn delete_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()>;

    /// Atomically apply a save-format payload on top of the current table
    /// contents (no-flush restore). Either every line takes effect or none.
    fn restore(&self, table: &str, payload: &str) -> Result<()>;

    /// Dump the table in iptables-save format.
    fn save(&self, table: &str) -> Result<String>;
}

/// Renders a rule in iptables-save form: `-A <chain> <args...>` with
/// whitespace-bearing arguments (comments) double-quoted, matching what
/// iptables-save itself prints.
pub fn render_rule(chain: &str, args: &[String]) -> String {
    let mut line = format!("-A {chain}");
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Renders a chain declaration line as it appears in a save dump.
pub fn render_chain_decl(chain: &str) -> String {
    format!(":{chain} - [0:0]")
}
