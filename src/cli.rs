//! Command-line surface for syslog-portproxy

use std::path::PathBuf;

use clap::Parser;
use syslog_portproxy::RawSettings;

/// Command-line arguments. Unset flags fall back to `PORTPROXY_*` environment
/// variables, then the config file, then built-in defaults.
#[derive(Parser, Debug, Clone)]
#[command(name = "syslog-portproxy")]
#[command(version, about = "Relay syslog from a privileged port to an unprivileged one")]
pub struct Cli {
    /// relay (socat services) or redirect (nftables rules)
    #[arg(long, short = 'm')]
    pub mode: Option<String>,

    /// Comma-separated protocol list: udp, tcp or udp,tcp
    #[arg(long, short = 'p')]
    pub protocols: Option<String>,

    /// Address to accept traffic on ("any" for all addresses)
    #[arg(long)]
    pub source_address: Option<String>,

    /// Privileged port to accept traffic on [default: 514]
    #[arg(long)]
    pub source_port: Option<String>,

    /// Host to forward to (relay mode) [default: 127.0.0.1]
    #[arg(long)]
    pub destination_host: Option<String>,

    /// Port to forward to [default: 1514]
    #[arg(long)]
    pub destination_port: Option<String>,

    /// Name used to namespace generated units [default: syslog514to1514]
    #[arg(long, short = 'n')]
    pub instance: Option<String>,

    /// System account the relay runs as [default: portproxy]
    #[arg(long)]
    pub service_user: Option<String>,

    /// TOML file with default settings
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Print the generated artifacts without changing the system
    #[arg(long, conflicts_with = "uninstall")]
    pub dry_run: bool,

    /// Uninstall instead of install
    #[arg(long)]
    pub uninstall: bool,
}

impl Cli {
    /// The flags as the top settings layer.
    pub fn overrides(&self) -> RawSettings {
        RawSettings {
            mode: self.mode.clone(),
            protocols: self.protocols.clone(),
            source_address: self.source_address.clone(),
            source_port: self.source_port.clone(),
            destination_host: self.destination_host.clone(),
            destination_port: self.destination_port.clone(),
            instance: self.instance.clone(),
            service_user: self.service_user.clone(),
        }
    }
}
