//! Host collaborators.
//!
//! Everything that touches the machine goes through one of these traits so
//! the lifecycle logic can run against in-memory fakes. The real
//! implementations live in [`linux`] and shell out to systemctl, nft,
//! useradd and the distribution's package manager.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::Protocol;
use crate::error::InstallerError;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod linux;
    }
}

/// Distribution package manager.
pub trait PackageManager {
    /// Absolute path of `tool` if it is already on `PATH`.
    fn locate(&self, tool: &str) -> Option<PathBuf>;

    fn install(&mut self, packages: &[&str]) -> Result<(), InstallerError>;
}

/// Service supervisor (systemd). Unit names include the `.service` suffix.
pub trait Supervisor {
    fn write_unit(&mut self, name: &str, contents: &str) -> Result<(), InstallerError>;

    fn unit_exists(&self, name: &str) -> bool;

    /// Deletes the unit definition. `NotFound` when there is nothing to delete.
    fn remove_unit(&mut self, name: &str) -> Result<(), InstallerError>;

    /// Re-read unit definitions from disk.
    fn reload(&mut self) -> Result<(), InstallerError>;

    /// Enable at boot and (re)start now, so an overwritten unit takes effect.
    fn enable_and_start(&mut self, name: &str) -> Result<(), InstallerError>;

    /// `NotFound` when the supervisor does not know the unit.
    fn disable_and_stop(&mut self, name: &str) -> Result<(), InstallerError>;

    fn status(&self, name: &str) -> Result<String, InstallerError>;

    /// Installed units whose name starts with `prefix` and that declare
    /// `User=<user>`.
    fn units_running_as(&self, prefix: &str, user: &str) -> Result<Vec<String>, InstallerError>;
}

/// Packet-filter engine (nftables).
pub trait PacketFilter {
    /// Apply a complete ruleset script atomically.
    fn apply(&mut self, ruleset: &str) -> Result<(), InstallerError>;

    fn list_table(&self, family: &str, table: &str) -> Result<String, InstallerError>;

    /// `NotFound` when the table is not loaded.
    fn delete_table(&mut self, family: &str, table: &str) -> Result<(), InstallerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Created,
    Existed,
}

/// Identity management.
pub trait AccountManager {
    /// Whether the calling process may change system services.
    fn caller_is_privileged(&self) -> bool;

    /// Create a locked system account with no home and no login shell.
    fn ensure_system_account(&mut self, name: &str) -> Result<AccountState, InstallerError>;

    /// `NotFound` when the account does not exist.
    fn delete_account(&mut self, name: &str) -> Result<(), InstallerError>;
}

/// Advisory "is somebody already listening here" check.
pub trait PortProbe {
    fn is_bound(&self, protocol: Protocol, address: IpAddr, port: u16) -> bool;
}

/// The full set of collaborators one lifecycle run needs.
pub struct Collaborators<'a> {
    pub packages: &'a mut dyn PackageManager,
    pub supervisor: &'a mut dyn Supervisor,
    pub filter: &'a mut dyn PacketFilter,
    pub accounts: &'a mut dyn AccountManager,
    pub ports: &'a dyn PortProbe,
}
