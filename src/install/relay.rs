//! Relay mode: one supervised socat process per protocol.
//!
//! The relay terminates traffic on `source_address:source_port` and opens its
//! own connection to the destination, so the receiver sees the relay host as
//! the sender.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::unit::{RelayUnit, generate_unit_content};
use super::{Artifact, ArtifactKind, Deployment, Outcome, RemovalReport};
use crate::config::{Config, Protocol};
use crate::error::InstallerError;
use crate::host::{AccountState, Collaborators, PackageManager};

/// Prefix of every generated unit name.
pub const TOOL_PREFIX: &str = "socat";
pub const PACKAGE: &str = "socat";
const FALLBACK_SOCAT: &str = "/usr/bin/socat";

/// Seconds a forked UDP child waits for more traffic before exiting.
const UDP_IDLE_TIMEOUT_SECS: u32 = 5;

/// `socat-<instance>-<protocol>.service`
pub fn unit_name(instance: &str, protocol: Protocol) -> String {
    format!("{}-{}-{}.service", TOOL_PREFIX, instance, protocol)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDeployment {
    config: Config,
}

impl RelayDeployment {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.config
            .protocols
            .iter()
            .map(|&p| unit_name(&self.config.instance, p))
            .collect()
    }

    /// Render every unit with `socat` as the relay binary.
    pub fn render_units(&self, socat: &Path) -> Result<Vec<Artifact>, InstallerError> {
        let cfg = &self.config;
        let listen = SocketAddr::new(cfg.source_address, cfg.source_port);
        let socat = socat.to_str().ok_or_else(|| {
            InstallerError::System("Invalid socat path encoding".to_string())
        })?;

        cfg.protocols
            .iter()
            .map(|&protocol| {
                let name = unit_name(&cfg.instance, protocol);
                let exec_start = exec_start(
                    socat,
                    protocol,
                    listen,
                    &cfg.destination_host,
                    cfg.destination_port,
                );
                let description = format!(
                    "syslog {} relay {} -> {} ({})",
                    protocol,
                    listen,
                    host_port(&cfg.destination_host, cfg.destination_port),
                    cfg.instance
                );
                let contents = generate_unit_content(&RelayUnit {
                    unit_name: &name,
                    description: &description,
                    exec_start: &exec_start,
                    user: &cfg.service_user,
                })?;
                Ok(Artifact {
                    kind: ArtifactKind::ServiceUnit,
                    name,
                    contents,
                })
            })
            .collect()
    }

    fn socat_path(packages: &dyn PackageManager) -> PathBuf {
        packages
            .locate(TOOL_PREFIX)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_SOCAT))
    }
}

/// `host:port`, bracketing IPv6 literals.
fn host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", host, port),
    }
}

fn exec_start(
    socat: &str,
    protocol: Protocol,
    listen: SocketAddr,
    destination_host: &str,
    destination_port: u16,
) -> String {
    let family = if listen.is_ipv6() { "6" } else { "4" };
    let bind = match listen.ip() {
        IpAddr::V6(ip) => format!("[{}]", ip),
        IpAddr::V4(ip) => ip.to_string(),
    };

    // Hostnames use the family-agnostic address types and let socat resolve.
    let dest_family = match destination_host.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => "4",
        Ok(IpAddr::V6(_)) => "6",
        Err(_) => "",
    };
    let dest = host_port(destination_host, destination_port);

    match protocol {
        Protocol::Udp => format!(
            "{socat} -T {UDP_IDLE_TIMEOUT_SECS} UDP{family}-RECVFROM:{port},bind={bind},reuseaddr,fork UDP{dest_family}-SENDTO:{dest}",
            port = listen.port(),
        ),
        Protocol::Tcp => format!(
            "{socat} TCP{family}-LISTEN:{port},bind={bind},reuseaddr,fork TCP{dest_family}:{dest}",
            port = listen.port(),
        ),
    }
}

impl Deployment for RelayDeployment {
    fn package(&self) -> &'static str {
        PACKAGE
    }

    fn tool(&self) -> &'static str {
        TOOL_PREFIX
    }

    fn render(&self, packages: &dyn PackageManager) -> Result<Vec<Artifact>, InstallerError> {
        self.render_units(&Self::socat_path(packages))
    }

    fn materialize(&self, host: &mut Collaborators<'_>) -> Result<Vec<String>, InstallerError> {
        let units = self.render(&*host.packages)?;

        match host.accounts.ensure_system_account(&self.config.service_user)? {
            AccountState::Created => info!("Created system account {}", self.config.service_user),
            AccountState::Existed => info!("Using existing account {}", self.config.service_user),
        }

        for unit in &units {
            info!("Writing {}", unit.name);
            host.supervisor.write_unit(&unit.name, &unit.contents)?;
        }

        host.supervisor.reload()?;

        for unit in &units {
            info!("Enabling and starting {}", unit.name);
            host.supervisor.enable_and_start(&unit.name)?;
        }

        Ok(units.into_iter().map(|u| u.name).collect())
    }

    fn remove(&self, host: &mut Collaborators<'_>) -> Result<RemovalReport, InstallerError> {
        let mut report = RemovalReport::default();

        for name in self.unit_names() {
            if !host.supervisor.unit_exists(&name) {
                report.record(&name, Outcome::NotFound);
                continue;
            }
            match host.supervisor.disable_and_stop(&name) {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
            let outcome = match host.supervisor.remove_unit(&name) {
                Ok(()) => Outcome::Removed,
                Err(e) if e.is_not_found() => Outcome::NotFound,
                Err(e) => return Err(e),
            };
            report.record(&name, outcome);
        }

        if report.removed().next().is_some() {
            host.supervisor.reload()?;
        }

        let account = format!("account {}", self.config.service_user);
        let prefix = format!("{}-", TOOL_PREFIX);
        match host
            .supervisor
            .units_running_as(&prefix, &self.config.service_user)
        {
            Ok(users) if users.is_empty() => {}
            Ok(users) => {
                let msg = format!("kept {}, still used by {}", account, users.join(", "));
                warn!("{}", msg);
                report.warn(msg);
                return Ok(report);
            }
            Err(e) => {
                let msg = format!("kept {}, could not check remaining units: {}", account, e);
                warn!("{}", msg);
                report.warn(msg);
                return Ok(report);
            }
        }

        match host.accounts.delete_account(&self.config.service_user) {
            Ok(()) => report.record(&account, Outcome::Removed),
            Err(e) if e.is_not_found() => report.record(&account, Outcome::NotFound),
            Err(e) => {
                warn!("Could not remove {}: {}", account, e);
                report.warn(format!("could not remove {}: {}", account, e));
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use std::collections::BTreeSet;
    use std::net::Ipv6Addr;

    fn config(protocols: &[Protocol]) -> Config {
        Config {
            mode: Mode::Relay,
            protocols: protocols.iter().copied().collect::<BTreeSet<_>>(),
            ..Config::default()
        }
    }

    #[test]
    fn default_udp_relay_listens_on_all_addresses() {
        let units = RelayDeployment::new(&config(&[Protocol::Udp]))
            .render_units(Path::new("/usr/bin/socat"))
            .unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "socat-syslog514to1514-udp.service");
        assert!(units[0].contents.contains(
            "ExecStart=/usr/bin/socat -T 5 UDP4-RECVFROM:514,bind=0.0.0.0,reuseaddr,fork UDP4-SENDTO:127.0.0.1:1514\n"
        ));
    }

    #[test]
    fn one_unit_per_protocol_with_shared_addressing() {
        let units = RelayDeployment::new(&config(&[Protocol::Tcp, Protocol::Udp]))
            .render_units(Path::new("/usr/bin/socat"))
            .unwrap();

        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "socat-syslog514to1514-udp.service",
                "socat-syslog514to1514-tcp.service"
            ]
        );
        assert!(units[1].contents.contains(
            "TCP4-LISTEN:514,bind=0.0.0.0,reuseaddr,fork TCP4:127.0.0.1:1514\n"
        ));
    }

    #[test]
    fn ipv6_and_hostname_addressing() {
        let cfg = Config {
            source_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            destination_host: "collector.example.org".to_string(),
            destination_port: 6514,
            protocols: BTreeSet::from([Protocol::Tcp]),
            ..Config::default()
        };
        let units = RelayDeployment::new(&cfg)
            .render_units(Path::new("/usr/local/bin/socat"))
            .unwrap();
        assert!(units[0].contents.contains(
            "ExecStart=/usr/local/bin/socat TCP6-LISTEN:514,bind=[::],reuseaddr,fork TCP:collector.example.org:6514\n"
        ));

        assert_eq!(host_port("::1", 1514), "[::1]:1514");
        assert_eq!(host_port("127.0.0.1", 1514), "127.0.0.1:1514");
    }

    #[test]
    fn units_run_under_the_service_user() {
        let cfg = Config {
            service_user: "syslogrelay".to_string(),
            ..config(&[Protocol::Udp])
        };
        let units = RelayDeployment::new(&cfg)
            .render_units(Path::new("/usr/bin/socat"))
            .unwrap();
        assert!(units[0].contents.contains("User=syslogrelay\n"));
    }
}
