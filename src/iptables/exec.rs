use crate::iptables::error::{IptablesError, Result};
use crate::iptables::{IpFamily, IpTables, RulePosition};
use bon::bon;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Backend that shells out to the iptables userspace tools for one family.
///
/// All mutating commands run with `-w` so concurrent holders of the xtables
/// lock are waited for instead of failed on. When `record_path` is set, every
/// invocation is appended to that file instead of being executed, so rule
/// construction can be exercised without privileges.
pub struct ExecIptables {
    family: IpFamily,
    binary: String,
    restore_binary: String,
    save_binary: String,
    record_path: Option<PathBuf>,
}

#[bon]
impl ExecIptables {
    #[builder]
    pub fn new(family: IpFamily, record_path: Option<PathBuf>) -> Self {
        let (binary, restore_binary, save_binary) = match family {
            IpFamily::V4 => ("iptables", "iptables-restore", "iptables-save"),
            IpFamily::V6 => ("ip6tables", "ip6tables-restore", "ip6tables-save"),
        };
        ExecIptables {
            family,
            binary: binary.to_string(),
            restore_binary: restore_binary.to_string(),
            save_binary: save_binary.to_string(),
            record_path,
        }
    }

    fn record(&self, path: &PathBuf, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| IptablesError::record("open record log", e))?;
        writeln!(file, "{line}").map_err(|e| IptablesError::record("write record log", e))?;
        Ok(())
    }

    /// Runs one iptables command. Returns true on success; false for the
    /// benign failures that mean "nothing to do" (rule check miss, chain
    /// already present, target already gone).
    fn run(&self, args: &[String]) -> Result<bool> {
        if let Some(path) = self.record_path.as_ref() {
            self.record(path, &format!("{} {}", self.binary, args.join(" ")))?;
            let nothing_found = args.iter().any(|a| a == "-C" || a == "-D");
            return Ok(!nothing_found);
        }

        debug!(program = %self.binary, args = %args.join(" "), "running iptables");
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| IptablesError::execution(&self.binary, e))?;
        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code();
        let has = |flag: &str| args.iter().any(|a| a == flag);

        if has("-C") && exit_code == Some(1) {
            return Ok(false);
        }
        if has("-N") && stderr.contains("Chain already exists") {
            return Ok(false);
        }
        if (has("-F") || has("-X") || has("-D"))
            && stderr.contains("No chain/target/match by that name")
        {
            return Ok(false);
        }
        if has("-D") && stderr.contains("Bad rule") {
            return Ok(false);
        }

        Err(IptablesError::command_failed(
            &self.binary,
            args,
            exit_code,
            stderr.trim(),
        ))
    }

    fn base_args(&self, table: &str) -> Vec<String> {
        vec!["-w".to_string(), "-t".to_string(), table.to_string()]
    }
}

impl IpTables for ExecIptables {
    fn family(&self) -> IpFamily {
        self.family
    }

    fn ensure_chain(&self, table: &str, chain: &str) -> Result<bool> {
        let mut args = self.base_args(table);
        args.extend(["-N".to_string(), chain.to_string()]);
        let created = self.run(&args)?;
        Ok(!created)
    }

    fn flush_chain(&self, table: &str, chain: &str) -> Result<()> {
        let mut args = self.base_args(table);
        args.extend(["-F".to_string(), chain.to_string()]);
        self.run(&args)?;
        Ok(())
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.flush_chain(table, chain)?;
        let mut args = self.base_args(table);
        args.extend(["-X".to_string(), chain.to_string()]);
        self.run(&args)?;
        Ok(())
    }

    fn ensure_rule(
        &self,
        position: RulePosition,
        table: &str,
        chain: &str,
        args: &[String],
    ) -> Result<bool> {
        let mut check = self.base_args(table);
        check.extend(["-C".to_string(), chain.to_string()]);
        check.extend(args.iter().cloned());
        if self.run(&check)? {
            return Ok(true);
        }

        let mut install = self.base_args(table);
        match position {
            RulePosition::Append => install.extend(["-A".to_string(), chain.to_string()]),
            RulePosition::Prepend => {
                install.extend(["-I".to_string(), chain.to_string(), "1".to_string()])
            }
        }
        install.extend(args.iter().cloned());
        self.run(&install)?;
        Ok(false)
    }

    fn delete_rule(&self, table: &str, chain: &str, args: &[String]) -> Result<()> {
        let mut delete = self.base_args(table);
        delete.extend(["-D".to_string(), chain.to_string()]);
        delete.extend(args.iter().cloned());
        // Repeated identical adds can leave duplicates; delete them all.
        while self.run(&delete)? {}
        Ok(())
    }

    fn restore(&self, table: &str, payload: &str) -> Result<()> {
        let args = [
            "-w".to_string(),
            "--noflush".to_string(),
            "-T".to_string(),
            table.to_string(),
        ];

        if let Some(path) = self.record_path.as_ref() {
            self.record(
                path,
                &format!("{} {}\n{}", self.restore_binary, args.join(" "), payload),
            )?;
            return Ok(());
        }

        debug!(program = %self.restore_binary, table, "restoring nat payload");
        let mut child = Command::new(&self.restore_binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IptablesError::execution(&self.restore_binary, e))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                IptablesError::execution(
                    &self.restore_binary,
                    std::io::Error::other("failed to open stdin"),
                )
            })?;
            stdin
                .write_all(payload.as_bytes())
                .map_err(|e| IptablesError::execution(&self.restore_binary, e))?;
        } // stdin is dropped here, closing the pipe

        let output = child
            .wait_with_output()
            .map_err(|e| IptablesError::execution(&self.restore_binary, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(table, stderr = %stderr.trim(), "restore rejected");
            return Err(IptablesError::restore_failed(table, stderr.trim()));
        }
        Ok(())
    }

    fn save(&self, table: &str) -> Result<String> {
        let args = ["-t".to_string(), table.to_string()];

        if let Some(path) = self.record_path.as_ref() {
            self.record(path, &format!("{} {}", self.save_binary, args.join(" ")))?;
            return Ok(String::new());
        }

        let output = Command::new(&self.save_binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| IptablesError::execution(&self.save_binary, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IptablesError::command_failed(
                &self.save_binary,
                &args,
                output.status.code(),
                stderr.trim(),
            ));
        }
        String::from_utf8(output.stdout).map_err(|e| IptablesError::encoding(&self.save_binary, e))
    }
}
