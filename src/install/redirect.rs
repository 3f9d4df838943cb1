//! Redirect mode: nftables NAT rules that rewrite the destination port.
//!
//! Only the destination port changes, so the receiving service still sees the
//! real sender. Two hooks are needed: `prerouting` for traffic arriving from
//! the network and `output` for traffic generated on this host, which never
//! passes prerouting.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::net::IpAddr;

use log::info;

use super::{Artifact, ArtifactKind, Deployment, Outcome, RemovalReport};
use crate::config::{Config, Protocol};
use crate::error::InstallerError;
use crate::host::{Collaborators, PackageManager};

pub const TABLE: &str = "portproxy";
pub const FAMILY: &str = "inet";
pub const PACKAGE: &str = "nftables";
const TOOL: &str = "nft";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectDeployment {
    protocols: BTreeSet<Protocol>,
    source_address: IpAddr,
    source_port: u16,
    destination_port: u16,
}

impl RedirectDeployment {
    pub fn new(config: &Config) -> Self {
        Self {
            protocols: config.protocols.clone(),
            source_address: config.source_address,
            source_port: config.source_port,
            destination_port: config.destination_port,
        }
    }

    /// Human-readable name of the table artifact.
    pub fn table_name() -> String {
        format!("nftables table {} {}", FAMILY, TABLE)
    }

    /// Render the script that atomically replaces the `portproxy` table.
    ///
    /// The leading `table` + `delete table` pair makes the script apply
    /// cleanly whether or not the table already exists.
    pub fn render_ruleset(&self) -> Result<String, InstallerError> {
        let missing = |field| InstallerError::TemplateError {
            artifact: "redirect ruleset",
            field,
        };
        if self.protocols.is_empty() {
            return Err(missing("protocols"));
        }
        if self.source_port == 0 {
            return Err(missing("source port"));
        }
        if self.destination_port == 0 {
            return Err(missing("destination port"));
        }

        let address_match = match self.source_address {
            ip if ip.is_unspecified() => String::new(),
            IpAddr::V4(ip) => format!("ip daddr {} ", ip),
            IpAddr::V6(ip) => format!("ip6 daddr {} ", ip),
        };

        let rules: Vec<String> = self
            .protocols
            .iter()
            .map(|p| {
                format!(
                    "{}{} dport {} redirect to :{}",
                    address_match, p, self.source_port, self.destination_port
                )
            })
            .collect();

        let mut text = String::with_capacity(512);
        // Writing to a String cannot fail.
        let _ = writeln!(text, "table {FAMILY} {TABLE}");
        let _ = writeln!(text, "delete table {FAMILY} {TABLE}");
        let _ = writeln!(text, "table {FAMILY} {TABLE} {{");
        let _ = writeln!(text, "    chain prerouting {{");
        let _ = writeln!(text, "        type nat hook prerouting priority dstnat; policy accept;");
        for rule in &rules {
            let _ = writeln!(text, "        {rule}");
        }
        let _ = writeln!(text, "    }}");
        let _ = writeln!(text, "    chain output {{");
        let _ = writeln!(text, "        type nat hook output priority -100; policy accept;");
        for rule in &rules {
            let _ = writeln!(text, "        fib daddr type local {rule}");
        }
        let _ = writeln!(text, "    }}");
        let _ = writeln!(text, "}}");

        Ok(text)
    }
}

impl Deployment for RedirectDeployment {
    fn package(&self) -> &'static str {
        PACKAGE
    }

    fn tool(&self) -> &'static str {
        TOOL
    }

    fn render(&self, _packages: &dyn PackageManager) -> Result<Vec<Artifact>, InstallerError> {
        Ok(vec![Artifact {
            kind: ArtifactKind::RuleSet,
            name: Self::table_name(),
            contents: self.render_ruleset()?,
        }])
    }

    fn materialize(&self, host: &mut Collaborators<'_>) -> Result<Vec<String>, InstallerError> {
        let ruleset = self.render_ruleset()?;
        info!("Applying {}", Self::table_name());
        host.filter.apply(&ruleset)?;
        Ok(vec![Self::table_name()])
    }

    fn remove(&self, host: &mut Collaborators<'_>) -> Result<RemovalReport, InstallerError> {
        let mut report = RemovalReport::default();
        let outcome = match host.filter.delete_table(FAMILY, TABLE) {
            Ok(()) => Outcome::Removed,
            Err(e) if e.is_not_found() => Outcome::NotFound,
            Err(e) => return Err(e),
        };
        report.record(&Self::table_name(), outcome);
        Ok(report)
    }
}
