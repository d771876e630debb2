use crate::iptables::error::{IptablesError, Result};
use crate::iptables::{
    render_chain_decl, render_rule, IpFamily, IpTables, RulePosition, CHAIN_OUTPUT,
    CHAIN_POSTROUTING, CHAIN_PREROUTING,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

type Table = BTreeMap<String, Vec<String>>;

/// In-memory stand-in for the iptables tools, good enough to verify the
/// exact save-format output the managers produce.
pub(crate) struct FakeIptables {
    family: IpFamily,
    tables: Mutex<BTreeMap<String, Table>>,
}

impl FakeIptables {
    pub(crate) fn new(family: IpFamily) -> Self {
        let mut nat = Table::new();
        for builtin in [CHAIN_PREROUTING, CHAIN_OUTPUT, CHAIN_POSTROUTING] {
            nat.insert(builtin.to_string(), Vec::new());
        }
        let mut tables = BTreeMap::new();
        tables.insert("nat".to_string(), nat);
        FakeIptables {
            family,
            tables: Mutex::new(tables),
        }
    }

    fn missing_chain(chain: &str) -> IptablesError {
        IptablesError::command_failed(
            "fake-iptables",
            &[chain.to_string()],
            Some(1),
            "No chain/target/match by that name",
        )
    }

    fn apply_restore(table: &mut Table, table_name: &str, payload: &str) -> Result<()> {
        let mut committed = false;
        for line in payload.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('*') {
                if name != table_name {
                    return Err(IptablesError::restore_failed(
                        table_name,
                        format!("payload targets table '{name}'"),
                    ));
                }
            } else if let Some(decl) = line.strip_prefix(':') {
                let chain = decl.split_whitespace().next().unwrap_or_default();
                if chain.is_empty() {
                    return Err(IptablesError::restore_failed(table_name, "empty chain declaration"));
                }
                // Declaring an existing chain flushes it.
                table.insert(chain.to_string(), Vec::new());
            } else if line.starts_with("-A ") {
                let chain = line
                    .split_whitespace()
                    .nth(1)
                    .ok_or_else(|| IptablesError::restore_failed(table_name, "malformed append"))?;
                let rules = table
                    .get_mut(chain)
                    .ok_or_else(|| Self::missing_chain(chain))?;
                rules.push(line.to_string());
            } else if line == "COMMIT" {
                committed = true;
            } else {
                return Err(IptablesError::restore_failed(
                    table_name,
                    format!("unsupported line '{line}'"),
                ));
            }
        }
        if !committed {
            return Err(IptablesError::restore_failed(table_name, "missing COMMIT"));
        }
        Ok(())
    }
}

impl IpTables for FakeIptables {
    fn family(&self) -> IpFamily {
        self.family
    }

    fn ensure_chain(&self, table: &str, chain: &str) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(table.to_string()).or_default();
        if table.contains_key(chain) {
            return Ok(true);
        }
        table.insert(chain.to_string(), Vec::new());
        Ok(false)
    }

    fn flush_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(rules) = tables.entry(table.to_string()).or_default().get_mut(chain) {
            rules.clear();
        }
        Ok(())
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(table.to_string()).or_default().remove(chain);
        Ok(())
    }

    fn ensure_rule(
        &self,
        position: RulePosition,
        table: &str,
        chain: &str,
        args: &[String],
    ) -> Result<bool> {
        let line = render_rule(chain, args);
        let mut tables = self.tables.lock().unwrap();
        let rules = tables
            .entry(table.to_string())
            .or_default()
            .get_mut(chain)
            .ok_or_else(|| Self::missing_chain(chain))?;
        if rules.contains(&line) {
            return Ok(true);
        }
        match position {
            RulePosition::Append => rules.push(line),
            RulePosition::Prepend => rules.insert(0, line),
        }
        Ok(false)
    }

    fn delete_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()> {
        let line = render_rule(chain, args);
        let mut tables = self.tables.lock().unwrap();
        if let Some(rules) = tables.entry(table.to_string()).or_default().get_mut(chain) {
            rules.retain(|r| r != &line);
        }
        Ok(())
    }

    fn restore(&self, table: &str, payload: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let current = tables.entry(table.to_string()).or_default();
        // Stage on a copy so a rejected payload leaves nothing half-applied.
        let mut staged = current.clone();
        Self::apply_restore(&mut staged, table, payload)?;
        *current = staged;
        Ok(())
    }

    fn save(&self, table: &str) -> Result<String> {
        let tables = self.tables.lock().unwrap();
        let mut out = format!("*{table}\n");
        if let Some(table) = tables.get(table) {
            for chain in table.keys() {
                out.push_str(&render_chain_decl(chain));
                out.push('\n');
            }
            for rules in table.values() {
                for rule in rules {
                    out.push_str(rule);
                    out.push('\n');
                }
            }
        }
        out.push_str("COMMIT\n");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iptables::TABLE_NAT;

    fn rule(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ensure_chain_is_idempotent() {
        let fake = FakeIptables::new(IpFamily::V4);
        assert!(!fake.ensure_chain(TABLE_NAT, "KUBE-HOSTPORTS").unwrap());
        assert!(fake.ensure_chain(TABLE_NAT, "KUBE-HOSTPORTS").unwrap());
    }

    #[test]
    fn test_delete_missing_targets_is_ok() {
        let fake = FakeIptables::new(IpFamily::V4);
        fake.delete_chain(TABLE_NAT, "KUBE-HP-NOPE").unwrap();
        fake.flush_chain(TABLE_NAT, "KUBE-HP-NOPE").unwrap();
        fake.delete_rule(TABLE_NAT, "OUTPUT", &rule(&["-j", "KUBE-HP-NOPE"]))
            .unwrap();
    }

    #[test]
    fn test_restore_creates_and_flushes_declared_chains() {
        let fake = FakeIptables::new(IpFamily::V4);
        fake.restore(
            TABLE_NAT,
            "*nat\n:KUBE-HP-TEST - [0:0]\n-A KUBE-HP-TEST -j MASQUERADE\nCOMMIT\n",
        )
        .unwrap();
        assert!(fake.save(TABLE_NAT).unwrap().contains("-A KUBE-HP-TEST -j MASQUERADE"));

        // Redeclaring the chain drops its old rules.
        fake.restore(TABLE_NAT, "*nat\n:KUBE-HP-TEST - [0:0]\nCOMMIT\n")
            .unwrap();
        let dump = fake.save(TABLE_NAT).unwrap();
        assert!(dump.contains(":KUBE-HP-TEST - [0:0]"));
        assert!(!dump.contains("-A KUBE-HP-TEST"));
    }

    #[test]
    fn test_restore_is_atomic() {
        let fake = FakeIptables::new(IpFamily::V4);
        let before = fake.save(TABLE_NAT).unwrap();
        // Appending to an undeclared chain fails the whole payload.
        let err = fake.restore(
            TABLE_NAT,
            "*nat\n:KUBE-HP-GOOD - [0:0]\n-A KUBE-HP-MISSING -j MASQUERADE\nCOMMIT\n",
        );
        assert!(err.is_err());
        assert_eq!(fake.save(TABLE_NAT).unwrap(), before);
    }

    #[test]
    fn test_ensure_rule_prepend_goes_first() {
        let fake = FakeIptables::new(IpFamily::V6);
        fake.ensure_rule(RulePosition::Append, TABLE_NAT, "POSTROUTING", &rule(&["-j", "A"]))
            .unwrap();
        fake.ensure_rule(RulePosition::Prepend, TABLE_NAT, "POSTROUTING", &rule(&["-j", "B"]))
            .unwrap();
        let dump = fake.save(TABLE_NAT).unwrap();
        let a = dump.find("-A POSTROUTING -j A").unwrap();
        let b = dump.find("-A POSTROUTING -j B").unwrap();
        assert!(b < a);
    }
}
