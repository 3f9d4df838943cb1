//! Systemd service control.
//!
//! Unit files are written straight into the unit directory; lifecycle changes
//! go through `systemctl`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use super::check_output;
use super::file_ops::write_file_atomic;
use crate::error::InstallerError;
use crate::host::Supervisor;

const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// systemd supervisor for system-level units.
#[derive(Debug, Clone)]
pub struct Systemd {
    unit_dir: PathBuf,
}

impl Default for Systemd {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from(SYSTEM_UNIT_DIR),
        }
    }
}

impl Systemd {
    /// Supervisor writing units somewhere other than `/etc/systemd/system`.
    pub fn with_unit_dir(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(name)
    }
}

fn systemctl(args: &[&str]) -> Result<String, InstallerError> {
    debug!("systemctl {}", args.join(" "));
    let output = check_output("systemctl", Command::new("systemctl").args(args).output())?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn declares_user(contents: &str, user: &str) -> bool {
    contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("User="))
        .any(|value| value.trim() == user)
}

/// systemctl phrases its "no such unit" errors a few different ways across versions.
fn is_missing_unit(detail: &str) -> bool {
    detail.contains("not loaded") || detail.contains("does not exist") || detail.contains("not found")
}

impl Supervisor for Systemd {
    fn write_unit(&mut self, name: &str, contents: &str) -> Result<(), InstallerError> {
        fs::create_dir_all(&self.unit_dir).map_err(|e| {
            InstallerError::System(format!("Failed to create systemd directory: {}", e))
        })?;
        write_file_atomic(&self.unit_path(name), contents, 0o644)
    }

    fn unit_exists(&self, name: &str) -> bool {
        self.unit_path(name).exists()
    }

    fn remove_unit(&mut self, name: &str) -> Result<(), InstallerError> {
        let path = self.unit_path(name);
        if !path.exists() {
            return Err(InstallerError::NotFound(format!("unit {}", name)));
        }
        fs::remove_file(&path)
            .map_err(|e| InstallerError::System(format!("Failed to remove unit file: {}", e)))
    }

    fn reload(&mut self) -> Result<(), InstallerError> {
        systemctl(&["daemon-reload"]).map(drop)
    }

    fn enable_and_start(&mut self, name: &str) -> Result<(), InstallerError> {
        systemctl(&["enable", name])?;
        systemctl(&["restart", name]).map(drop)
    }

    fn disable_and_stop(&mut self, name: &str) -> Result<(), InstallerError> {
        match systemctl(&["disable", "--now", name]) {
            Ok(_) => Ok(()),
            Err(InstallerError::ExternalToolFailure { detail, .. }) if is_missing_unit(&detail) => {
                Err(InstallerError::NotFound(format!("unit {}", name)))
            }
            Err(e) => Err(e),
        }
    }

    fn status(&self, name: &str) -> Result<String, InstallerError> {
        // `status` exits 3 for inactive units; the text is what we want either way.
        let output = Command::new("systemctl")
            .args(["status", "--no-pager", "--lines=5", name])
            .output()
            .map_err(|e| {
                InstallerError::System(format!("Failed to execute systemctl status: {}", e))
            })?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn units_running_as(&self, prefix: &str, user: &str) -> Result<Vec<String>, InstallerError> {
        let entries = match fs::read_dir(&self.unit_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(InstallerError::System(format!(
                    "Failed to read {}: {}",
                    self.unit_dir.display(),
                    e
                )));
            }
        };

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(prefix) || !name.ends_with(".service") {
                continue;
            }
            match fs::read_to_string(entry.path()) {
                Ok(contents) if declares_user(&contents, user) => names.push(name),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable unit {}: {}", name, e),
            }
        }
        names.sort();
        Ok(names)
    }
}
