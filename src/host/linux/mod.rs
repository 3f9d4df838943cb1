//! Linux host implementation using systemd, nftables and shadow-utils.
//!
//! # Module Structure
//!
//! - `file_ops` - Atomic file writes for unit definitions
//! - `service_control` - systemctl wrapper and the [`Systemd`] supervisor
//! - `nftables` - `nft` wrapper
//! - `packages` - Package manager detection and installation
//! - `accounts` - System account lookup, creation and removal
//! - `ports` - Bind-based listener probe

use std::process::Output;

use crate::error::InstallerError;

mod accounts;
mod file_ops;
mod nftables;
mod packages;
mod ports;
mod service_control;

pub use accounts::SystemAccounts;
pub use nftables::Nftables;
pub use packages::SystemPackages;
pub use ports::BindProbe;
pub use service_control::Systemd;

use super::Collaborators;

/// Owns one of each real collaborator for a single run.
#[derive(Default)]
pub struct SystemHost {
    pub packages: SystemPackages,
    pub supervisor: Systemd,
    pub filter: Nftables,
    pub accounts: SystemAccounts,
    pub ports: BindProbe,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&mut self) -> Collaborators<'_> {
        Collaborators {
            packages: &mut self.packages,
            supervisor: &mut self.supervisor,
            filter: &mut self.filter,
            accounts: &mut self.accounts,
            ports: &self.ports,
        }
    }
}

/// Spawn failure becomes `System`, non-zero exit becomes `ExternalToolFailure`
/// carrying the tool's stderr verbatim.
fn check_output(
    tool: &str,
    output: std::io::Result<Output>,
) -> Result<Output, InstallerError> {
    let output = output
        .map_err(|e| InstallerError::System(format!("Failed to execute {}: {}", tool, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(InstallerError::tool(tool, detail));
    }

    Ok(output)
}
