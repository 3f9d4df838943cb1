//! Distribution package manager detection and installation.

use std::path::PathBuf;
use std::process::Command;

use log::{info, warn};

use super::check_output;
use crate::error::InstallerError;
use crate::host::PackageManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Apt,
    Dnf,
    Yum,
    Zypper,
    Pacman,
    Apk,
}

impl Backend {
    /// Probe order: the first manager found on `PATH` wins.
    const ALL: [Backend; 6] = [
        Backend::Apt,
        Backend::Dnf,
        Backend::Yum,
        Backend::Zypper,
        Backend::Pacman,
        Backend::Apk,
    ];

    fn program(self) -> &'static str {
        match self {
            Backend::Apt => "apt-get",
            Backend::Dnf => "dnf",
            Backend::Yum => "yum",
            Backend::Zypper => "zypper",
            Backend::Pacman => "pacman",
            Backend::Apk => "apk",
        }
    }

    fn install_args(self) -> &'static [&'static str] {
        match self {
            Backend::Apt | Backend::Dnf | Backend::Yum => &["install", "-y", "-q"],
            Backend::Zypper => &["--non-interactive", "install"],
            Backend::Pacman => &["-S", "--noconfirm", "--needed"],
            Backend::Apk => &["add", "--no-progress"],
        }
    }

    fn detect() -> Option<Backend> {
        Self::ALL
            .into_iter()
            .find(|b| which::which(b.program()).is_ok())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SystemPackages;

impl PackageManager for SystemPackages {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        which::which(tool).ok()
    }

    fn install(&mut self, packages: &[&str]) -> Result<(), InstallerError> {
        let backend = Backend::detect().ok_or_else(|| {
            InstallerError::tool(
                "package manager",
                format!(
                    "no supported package manager found; install {} manually",
                    packages.join(" ")
                ),
            )
        })?;
        let program = backend.program();
        info!("Installing {} with {}", packages.join(" "), program);

        if backend == Backend::Apt {
            let refreshed = Command::new(program)
                .args(["update", "-q"])
                .env("DEBIAN_FRONTEND", "noninteractive")
                .output();
            if let Err(e) = check_output(program, refreshed) {
                warn!("Package index refresh failed, trying install anyway: {}", e);
            }
        }

        let output = Command::new(program)
            .args(backend.install_args())
            .args(packages)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output();
        check_output(program, output).map(drop)
    }
}
