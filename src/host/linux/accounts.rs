//! System account management for the relay identity.

use std::path::Path;
use std::process::Command;

use log::info;

use super::check_output;
use crate::error::InstallerError;
use crate::host::{AccountManager, AccountState};

const NOLOGIN_SHELLS: [&str; 3] = ["/usr/sbin/nologin", "/sbin/nologin", "/bin/false"];

#[derive(Debug, Default, Clone)]
pub struct SystemAccounts;

fn nologin_shell() -> &'static str {
    NOLOGIN_SHELLS
        .into_iter()
        .find(|shell| Path::new(shell).exists())
        .unwrap_or("/bin/false")
}

impl AccountManager for SystemAccounts {
    fn caller_is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn ensure_system_account(&mut self, name: &str) -> Result<AccountState, InstallerError> {
        if users::get_user_by_name(name).is_some() {
            return Ok(AccountState::Existed);
        }

        info!("Creating system account {}", name);
        let output = Command::new("useradd")
            .args([
                "--system",
                "--no-create-home",
                "--home-dir",
                "/nonexistent",
                "--shell",
                nologin_shell(),
                "--user-group",
                name,
            ])
            .output();
        check_output("useradd", output)?;
        Ok(AccountState::Created)
    }

    fn delete_account(&mut self, name: &str) -> Result<(), InstallerError> {
        if users::get_user_by_name(name).is_none() {
            return Err(InstallerError::NotFound(format!("account {}", name)));
        }
        check_output("userdel", Command::new("userdel").arg(name).output()).map(drop)
    }
}
