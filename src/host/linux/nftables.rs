//! nftables control through the `nft` command.

use std::io::Write;
use std::process::{Command, Stdio};

use log::debug;

use super::check_output;
use crate::error::InstallerError;
use crate::host::PacketFilter;

#[derive(Debug, Default, Clone)]
pub struct Nftables;

fn nft(args: &[&str]) -> Result<String, InstallerError> {
    debug!("nft {}", args.join(" "));
    let output = check_output("nft", Command::new("nft").args(args).output())?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn is_missing_table(detail: &str) -> bool {
    detail.contains("No such file or directory")
}

impl PacketFilter for Nftables {
    fn apply(&mut self, ruleset: &str) -> Result<(), InstallerError> {
        debug!("nft -f - <<\n{}", ruleset);
        let mut child = Command::new("nft")
            .args(["-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InstallerError::System(format!("Failed to execute nft: {}", e)))?;

        // Dropping stdin closes the pipe so nft sees end of input.
        let sent = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(ruleset.as_bytes()),
            None => Ok(()),
        };

        // Reap the child before reporting a failed write.
        let output = check_output("nft", child.wait_with_output());
        sent.map_err(|e| {
            InstallerError::System(format!("Failed to send ruleset to nft: {}", e))
        })?;
        output.map(drop)
    }

    fn list_table(&self, family: &str, table: &str) -> Result<String, InstallerError> {
        match nft(&["list", "table", family, table]) {
            Err(InstallerError::ExternalToolFailure { detail, .. }) if is_missing_table(&detail) => {
                Err(InstallerError::NotFound(format!("table {} {}", family, table)))
            }
            other => other,
        }
    }

    fn delete_table(&mut self, family: &str, table: &str) -> Result<(), InstallerError> {
        match nft(&["delete", "table", family, table]) {
            Ok(_) => Ok(()),
            Err(InstallerError::ExternalToolFailure { detail, .. }) if is_missing_table(&detail) => {
                Err(InstallerError::NotFound(format!("table {} {}", family, table)))
            }
            Err(e) => Err(e),
        }
    }
}
