//! Configuration resolution.
//!
//! Settings arrive as loosely-typed [`RawSettings`] layers (config file,
//! environment, command line). [`resolve`] merges an explicit defaults table
//! with an explicit overrides table and validates the result into an
//! immutable [`Config`]. Nothing here reads process-wide state; callers hand
//! in the environment as a plain iterator.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::InstallerError;

pub const DEFAULT_SOURCE_PORT: u16 = 514;
pub const DEFAULT_DESTINATION_PORT: u16 = 1514;
pub const DEFAULT_DESTINATION_HOST: &str = "127.0.0.1";
pub const DEFAULT_INSTANCE: &str = "syslog514to1514";
pub const DEFAULT_SERVICE_USER: &str = "portproxy";

const ENV_PREFIX: &str = "PORTPROXY_";
const INSTANCE_MAX: usize = 64;
const USER_MAX: usize = 32;

/// How traffic gets from the privileged port to the unprivileged one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// A supervised socat process per protocol. The receiver sees the relay as sender.
    #[default]
    Relay,
    /// nftables destination-port rewrite. The receiver sees the original sender.
    Redirect,
}

impl FromStr for Mode {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" | "socat" => Ok(Mode::Relay),
            "redirect" | "nft" | "nftables" => Ok(Mode::Redirect),
            other => Err(InstallerError::InvalidConfiguration(format!(
                "unknown mode '{other}' (expected 'relay' or 'redirect')"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Relay => "relay",
            Mode::Redirect => "redirect",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl FromStr for Protocol {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(InstallerError::InvalidConfiguration(format!(
                "unknown protocol '{other}' (expected 'udp' or 'tcp')"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unvalidated settings layer. Every field is optional and kept as the
/// operator typed it, so all parsing errors surface from [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSettings {
    pub mode: Option<String>,
    pub protocols: Option<String>,
    pub source_address: Option<String>,
    pub source_port: Option<String>,
    pub destination_host: Option<String>,
    pub destination_port: Option<String>,
    pub instance: Option<String>,
    pub service_user: Option<String>,
}

impl RawSettings {
    /// Returns `self` with every field that `top` sets replaced by `top`'s value.
    pub fn overlay(self, top: RawSettings) -> RawSettings {
        RawSettings {
            mode: top.mode.or(self.mode),
            protocols: top.protocols.or(self.protocols),
            source_address: top.source_address.or(self.source_address),
            source_port: top.source_port.or(self.source_port),
            destination_host: top.destination_host.or(self.destination_host),
            destination_port: top.destination_port.or(self.destination_port),
            instance: top.instance.or(self.instance),
            service_user: top.service_user.or(self.service_user),
        }
    }

    /// Picks the `PORTPROXY_*` variables out of an environment listing.
    /// Unrelated keys, keys that are not valid UTF-8 and empty values are
    /// ignored. A `PORTPROXY_*` value that is not valid UTF-8 is rejected.
    pub fn from_env<I, K, V>(vars: I) -> Result<RawSettings, InstallerError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut raw = RawSettings::default();
        for (key, value) in vars {
            let Some(key) = key.as_ref().to_str() else {
                continue;
            };
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let slot = match name {
                "MODE" => &mut raw.mode,
                "PROTOCOLS" => &mut raw.protocols,
                "SOURCE_ADDRESS" => &mut raw.source_address,
                "SOURCE_PORT" => &mut raw.source_port,
                "DESTINATION_HOST" => &mut raw.destination_host,
                "DESTINATION_PORT" => &mut raw.destination_port,
                "INSTANCE" => &mut raw.instance,
                "SERVICE_USER" => &mut raw.service_user,
                _ => {
                    log::debug!("Ignoring unknown environment setting {}", key);
                    continue;
                }
            };
            let value = value.as_ref().to_str().ok_or_else(|| {
                InstallerError::InvalidConfiguration(format!("{} is not valid UTF-8", key))
            })?;
            if value.trim().is_empty() {
                continue;
            }
            *slot = Some(value.to_string());
        }
        Ok(raw)
    }

    /// Loads a TOML settings file.
    pub fn from_file(path: &Path) -> anyhow::Result<RawSettings> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: FileSettings = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(file.into())
    }
}

/// On-disk TOML layout. Ports are integers and protocols a list here, unlike
/// the string-typed environment and command line.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
struct FileSettings {
    mode: Option<String>,
    protocols: Option<Vec<String>>,
    source_address: Option<String>,
    source_port: Option<u32>,
    destination_host: Option<String>,
    destination_port: Option<u32>,
    instance: Option<String>,
    service_user: Option<String>,
}

impl From<FileSettings> for RawSettings {
    fn from(f: FileSettings) -> Self {
        RawSettings {
            mode: f.mode,
            protocols: f.protocols.map(|p| p.join(",")),
            source_address: f.source_address,
            source_port: f.source_port.map(|p| p.to_string()),
            destination_host: f.destination_host,
            destination_port: f.destination_port.map(|p| p.to_string()),
            instance: f.instance,
            service_user: f.service_user,
        }
    }
}

/// Validated, immutable configuration vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: Mode,
    pub protocols: BTreeSet<Protocol>,
    pub source_address: IpAddr,
    pub source_port: u16,
    pub destination_host: String,
    pub destination_port: u16,
    pub instance: String,
    pub service_user: String,
}

impl Config {
    pub fn source_is_wildcard(&self) -> bool {
        self.source_address.is_unspecified()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::Relay,
            protocols: BTreeSet::from([Protocol::Udp]),
            source_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            source_port: DEFAULT_SOURCE_PORT,
            destination_host: DEFAULT_DESTINATION_HOST.to_string(),
            destination_port: DEFAULT_DESTINATION_PORT,
            instance: DEFAULT_INSTANCE.to_string(),
            service_user: DEFAULT_SERVICE_USER.to_string(),
        }
    }
}

/// Merges `overrides` over `defaults` and validates the result.
///
/// Fields set in neither table take the built-in defaults of [`Config::default`].
pub fn resolve(defaults: &RawSettings, overrides: &RawSettings) -> Result<Config, InstallerError> {
    let merged = defaults.clone().overlay(overrides.clone());
    let base = Config::default();

    let mode = match merged.mode.as_deref() {
        Some(m) => m.parse()?,
        None => base.mode,
    };

    let protocols = match merged.protocols.as_deref() {
        Some(list) => parse_protocols(list)?,
        None => base.protocols,
    };

    let source_address = match merged.source_address.as_deref() {
        Some(a) => parse_source_address(a)?,
        None => base.source_address,
    };

    let source_port = match merged.source_port.as_deref() {
        Some(p) => parse_port("source port", p)?,
        None => base.source_port,
    };

    let destination_host = match merged.destination_host.as_deref() {
        Some(h) => parse_destination_host(h)?,
        None => base.destination_host,
    };

    let destination_port = match merged.destination_port.as_deref() {
        Some(p) => parse_port("destination port", p)?,
        None => base.destination_port,
    };

    let instance = match merged.instance.as_deref() {
        Some(i) => validate_instance(i.trim())?,
        None => base.instance,
    };

    let service_user = match merged.service_user.as_deref() {
        Some(u) => validate_service_user(u.trim())?,
        None => base.service_user,
    };

    Ok(Config {
        mode,
        protocols,
        source_address,
        source_port,
        destination_host,
        destination_port,
        instance,
        service_user,
    })
}

fn invalid(msg: String) -> InstallerError {
    InstallerError::InvalidConfiguration(msg)
}

fn parse_protocols(list: &str) -> Result<BTreeSet<Protocol>, InstallerError> {
    let protocols = list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(Protocol::from_str)
        .collect::<Result<BTreeSet<_>, _>>()?;

    if protocols.is_empty() {
        return Err(invalid("protocol list is empty".to_string()));
    }
    Ok(protocols)
}

fn parse_source_address(s: &str) -> Result<IpAddr, InstallerError> {
    let s = s.trim();
    match s {
        "" | "any" | "*" => return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        _ => {}
    }
    let unbracketed = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s);
    unbracketed
        .parse()
        .map_err(|_| invalid(format!("source address '{s}' is not an IP address")))
}

fn parse_port(field: &str, s: &str) -> Result<u16, InstallerError> {
    let port: u32 = s
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{field} '{s}' is not a number")))?;
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(invalid(format!("{field} {port} is outside 1-65535"))),
    }
}

fn parse_destination_host(s: &str) -> Result<String, InstallerError> {
    let s = s.trim();
    let unbracketed = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    let host = s.strip_suffix('.').unwrap_or(s);
    if host.is_empty() || host.len() > 253 || !host.split('.').all(valid_label) {
        return Err(invalid(format!(
            "destination host '{s}' is neither an IP address nor a hostname"
        )));
    }
    Ok(host.to_ascii_lowercase())
}

fn validate_instance(s: &str) -> Result<String, InstallerError> {
    let ok_chars = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    let ok_start = s
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');

    if s.is_empty() || s.len() > INSTANCE_MAX || !ok_chars || !ok_start {
        return Err(invalid(format!(
            "instance name '{s}' must be 1-{INSTANCE_MAX} characters of [A-Za-z0-9_.-] \
             starting with a letter, digit or '_'"
        )));
    }
    Ok(s.to_string())
}

fn validate_service_user(s: &str) -> Result<String, InstallerError> {
    let mut chars = s.chars();
    let ok_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let ok_rest =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'));

    if !ok_start || !ok_rest || s.len() > USER_MAX {
        return Err(invalid(format!(
            "service user '{s}' is not a valid system account name"
        )));
    }
    Ok(s.to_string())
}
