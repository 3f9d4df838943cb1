//! Artifact generation and the install/uninstall lifecycle.
//!
//! A validated [`Config`] becomes a [`Plan`]: either a [`RelayDeployment`]
//! (systemd units running socat) or a [`RedirectDeployment`] (one nftables
//! table). Both implement [`Deployment`], and [`install`] / [`uninstall`]
//! drive whichever one the plan holds against a set of host
//! [`Collaborators`].

pub mod redirect;
pub mod relay;
mod unit;

use std::fmt;

use log::{info, warn};

pub use redirect::RedirectDeployment;
pub use relay::RelayDeployment;

use crate::config::{Config, Mode};
use crate::error::InstallerError;
use crate::host::{Collaborators, PackageManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ServiceUnit,
    RuleSet,
}

/// A generated, not yet applied, piece of host configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub contents: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Removed,
    NotFound,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Removed => "removed",
            Outcome::NotFound => "not found",
        })
    }
}

/// What an install applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub applied: Vec<String>,
    pub warnings: Vec<String>,
}

/// What an uninstall found, per artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub entries: Vec<(String, Outcome)>,
    pub warnings: Vec<String>,
}

impl RemovalReport {
    pub(crate) fn record(&mut self, name: &str, outcome: Outcome) {
        info!("{}: {}", name, outcome);
        self.entries.push((name.to_string(), outcome));
    }

    pub(crate) fn warn(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.with_outcome(Outcome::Removed)
    }

    pub fn not_found(&self) -> impl Iterator<Item = &str> {
        self.with_outcome(Outcome::NotFound)
    }

    fn with_outcome(&self, outcome: Outcome) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, o)| *o == outcome)
            .map(|(name, _)| name.as_str())
    }
}

/// Shared lifecycle of the two artifact kinds.
pub trait Deployment {
    /// Distribution package providing [`Deployment::tool`].
    fn package(&self) -> &'static str;

    /// Executable that must be present for the artifacts to work.
    fn tool(&self) -> &'static str;

    /// Render artifacts without touching the host.
    fn render(&self, packages: &dyn PackageManager) -> Result<Vec<Artifact>, InstallerError>;

    /// Write and activate the artifacts, overwriting earlier copies.
    fn materialize(&self, host: &mut Collaborators<'_>) -> Result<Vec<String>, InstallerError>;

    /// Deactivate and delete the artifacts this configuration names.
    fn remove(&self, host: &mut Collaborators<'_>) -> Result<RemovalReport, InstallerError>;
}

/// The single mode chosen for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Relay(RelayDeployment),
    Redirect(RedirectDeployment),
}

impl Plan {
    pub fn new(config: &Config) -> Self {
        match config.mode {
            Mode::Relay => Plan::Relay(RelayDeployment::new(config)),
            Mode::Redirect => Plan::Redirect(RedirectDeployment::new(config)),
        }
    }

    pub fn deployment(&self) -> &dyn Deployment {
        match self {
            Plan::Relay(d) => d,
            Plan::Redirect(d) => d,
        }
    }
}

fn ensure_privileged(host: &Collaborators<'_>) -> Result<(), InstallerError> {
    if host.accounts.caller_is_privileged() {
        Ok(())
    } else {
        Err(InstallerError::PrivilegeError(
            "managing system services requires root; re-run with sudo".to_string(),
        ))
    }
}

fn ensure_tool(
    deployment: &dyn Deployment,
    host: &mut Collaborators<'_>,
) -> Result<(), InstallerError> {
    if let Some(path) = host.packages.locate(deployment.tool()) {
        info!("Found {} at {}", deployment.tool(), path.display());
        return Ok(());
    }
    info!("{} not found, installing package {}", deployment.tool(), deployment.package());
    host.packages.install(&[deployment.package()])
}

/// Advisory only: the bind inside the relay (or the receiver behind the
/// redirect) is the authoritative check.
fn precheck(config: &Config, host: &Collaborators<'_>) -> Vec<String> {
    let mut warnings = Vec::new();

    for &protocol in &config.protocols {
        if host
            .ports
            .is_bound(protocol, config.source_address, config.source_port)
        {
            let msg = format!(
                "{}/{} already has a listener on {}; the new configuration may conflict with it",
                protocol, config.source_port, config.source_address
            );
            warn!("{}", msg);
            warnings.push(msg);
        }
    }

    if config.mode == Mode::Redirect && !is_local_destination(&config.destination_host) {
        let msg = format!(
            "redirect mode always delivers to this host; destination host {} is ignored",
            config.destination_host
        );
        warn!("{}", msg);
        warnings.push(msg);
    }

    warnings
}

fn is_local_destination(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified())
}

/// Materialize the configuration on the host. Re-running with the same
/// configuration overwrites and reapplies the same artifacts.
pub fn install(
    config: &Config,
    host: &mut Collaborators<'_>,
) -> Result<InstallReport, InstallerError> {
    ensure_privileged(host)?;

    let plan = Plan::new(config);
    let deployment = plan.deployment();
    info!("Installing {} mode for instance {}", config.mode, config.instance);

    ensure_tool(deployment, host)?;
    let warnings = precheck(config, host);
    let applied = deployment.materialize(host)?;

    Ok(InstallReport { applied, warnings })
}

/// Remove whatever `config` would have installed. Absent artifacts are
/// reported as [`Outcome::NotFound`], not treated as errors.
pub fn uninstall(
    config: &Config,
    host: &mut Collaborators<'_>,
) -> Result<RemovalReport, InstallerError> {
    ensure_privileged(host)?;

    info!("Uninstalling {} mode for instance {}", config.mode, config.instance);
    Plan::new(config).deployment().remove(host)
}
