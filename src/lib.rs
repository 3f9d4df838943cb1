//! Installs and removes the host configuration that moves syslog traffic from
//! a privileged port to an unprivileged one.
//!
//! Two mutually exclusive modes are supported:
//!
//! - **relay**: a systemd-supervised `socat` per protocol, running as a
//!   dedicated account that holds only `CAP_NET_BIND_SERVICE`;
//! - **redirect**: an nftables `portproxy` table rewriting the destination
//!   port while keeping the sender address.
//!
//! [`config::resolve`] turns settings layers into a [`Config`],
//! [`install::install`] and [`install::uninstall`] apply it through the
//! [`host`] collaborator traits.

pub mod config;
pub mod error;
pub mod host;
pub mod install;

pub use config::{Config, Mode, Protocol, RawSettings, resolve};
pub use error::InstallerError;
pub use install::{InstallReport, Plan, RemovalReport};
