//! Install/uninstall lifecycle against in-memory collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::PathBuf;

use syslog_portproxy::host::{
    AccountManager, AccountState, Collaborators, PackageManager, PacketFilter, PortProbe,
    Supervisor,
};
use syslog_portproxy::install::{self, Outcome};
use syslog_portproxy::{Config, InstallerError, Protocol, RawSettings, resolve};

#[derive(Default)]
struct FakePackages {
    tools: BTreeSet<String>,
    installs: Vec<Vec<String>>,
    fail: bool,
}

impl PackageManager for FakePackages {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        self.tools
            .contains(tool)
            .then(|| PathBuf::from("/usr/bin").join(tool))
    }

    fn install(&mut self, packages: &[&str]) -> Result<(), InstallerError> {
        if self.fail {
            return Err(InstallerError::ExternalToolFailure {
                tool: "apt-get".into(),
                detail: "E: Unable to locate package".into(),
            });
        }
        self.installs
            .push(packages.iter().map(|p| p.to_string()).collect());
        for p in packages {
            let tool = if *p == "nftables" { "nft" } else { *p };
            self.tools.insert(tool.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeSupervisor {
    units: BTreeMap<String, String>,
    active: BTreeSet<String>,
    reloads: usize,
}

impl Supervisor for FakeSupervisor {
    fn write_unit(&mut self, name: &str, contents: &str) -> Result<(), InstallerError> {
        self.units.insert(name.to_string(), contents.to_string());
        Ok(())
    }

    fn unit_exists(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    fn remove_unit(&mut self, name: &str) -> Result<(), InstallerError> {
        self.units
            .remove(name)
            .map(drop)
            .ok_or_else(|| InstallerError::NotFound(name.to_string()))
    }

    fn reload(&mut self) -> Result<(), InstallerError> {
        self.reloads += 1;
        Ok(())
    }

    fn enable_and_start(&mut self, name: &str) -> Result<(), InstallerError> {
        if !self.units.contains_key(name) {
            return Err(InstallerError::NotFound(name.to_string()));
        }
        self.active.insert(name.to_string());
        Ok(())
    }

    fn disable_and_stop(&mut self, name: &str) -> Result<(), InstallerError> {
        if self.active.remove(name) {
            Ok(())
        } else {
            Err(InstallerError::NotFound(name.to_string()))
        }
    }

    fn status(&self, name: &str) -> Result<String, InstallerError> {
        Ok(format!("{name}: active"))
    }

    fn units_running_as(&self, prefix: &str, user: &str) -> Result<Vec<String>, InstallerError> {
        let line = format!("User={user}\n");
        Ok(self
            .units
            .iter()
            .filter(|(name, contents)| name.starts_with(prefix) && contents.contains(&line))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[derive(Default)]
struct FakeFilter {
    tables: BTreeMap<String, String>,
}

impl PacketFilter for FakeFilter {
    fn apply(&mut self, ruleset: &str) -> Result<(), InstallerError> {
        // The generated scripts replace exactly one table.
        self.tables
            .insert("inet portproxy".to_string(), ruleset.to_string());
        Ok(())
    }

    fn list_table(&self, family: &str, table: &str) -> Result<String, InstallerError> {
        self.tables
            .get(&format!("{family} {table}"))
            .cloned()
            .ok_or_else(|| InstallerError::NotFound(table.to_string()))
    }

    fn delete_table(&mut self, family: &str, table: &str) -> Result<(), InstallerError> {
        self.tables
            .remove(&format!("{family} {table}"))
            .map(drop)
            .ok_or_else(|| InstallerError::NotFound(table.to_string()))
    }
}

struct FakeAccounts {
    root: bool,
    accounts: BTreeSet<String>,
    delete_fails: bool,
}

impl Default for FakeAccounts {
    fn default() -> Self {
        Self {
            root: true,
            accounts: BTreeSet::new(),
            delete_fails: false,
        }
    }
}

impl AccountManager for FakeAccounts {
    fn caller_is_privileged(&self) -> bool {
        self.root
    }

    fn ensure_system_account(&mut self, name: &str) -> Result<AccountState, InstallerError> {
        if self.accounts.insert(name.to_string()) {
            Ok(AccountState::Created)
        } else {
            Ok(AccountState::Existed)
        }
    }

    fn delete_account(&mut self, name: &str) -> Result<(), InstallerError> {
        if !self.accounts.contains(name) {
            return Err(InstallerError::NotFound(name.to_string()));
        }
        if self.delete_fails {
            return Err(InstallerError::ExternalToolFailure {
                tool: "userdel".into(),
                detail: format!("user {name} is currently used by process 1234"),
            });
        }
        self.accounts.remove(name);
        Ok(())
    }
}

#[derive(Default)]
struct FakePorts {
    bound: BTreeSet<(Protocol, u16)>,
}

impl PortProbe for FakePorts {
    fn is_bound(&self, protocol: Protocol, _address: IpAddr, port: u16) -> bool {
        self.bound.contains(&(protocol, port))
    }
}

#[derive(Default)]
struct FakeHost {
    packages: FakePackages,
    supervisor: FakeSupervisor,
    filter: FakeFilter,
    accounts: FakeAccounts,
    ports: FakePorts,
}

impl FakeHost {
    fn with_tools() -> Self {
        let mut host = FakeHost::default();
        host.packages.tools = BTreeSet::from(["socat".to_string(), "nft".to_string()]);
        host
    }

    fn collaborators(&mut self) -> Collaborators<'_> {
        Collaborators {
            packages: &mut self.packages,
            supervisor: &mut self.supervisor,
            filter: &mut self.filter,
            accounts: &mut self.accounts,
            ports: &self.ports,
        }
    }

    fn install(&mut self, config: &Config) -> Result<install::InstallReport, InstallerError> {
        install::install(config, &mut self.collaborators())
    }

    fn uninstall(&mut self, config: &Config) -> Result<install::RemovalReport, InstallerError> {
        install::uninstall(config, &mut self.collaborators())
    }

    fn snapshot(&self) -> (BTreeMap<String, String>, BTreeSet<String>, BTreeMap<String, String>, BTreeSet<String>) {
        (
            self.supervisor.units.clone(),
            self.supervisor.active.clone(),
            self.filter.tables.clone(),
            self.accounts.accounts.clone(),
        )
    }
}

fn config(mode: &str, protocols: &str) -> Config {
    let overrides = RawSettings {
        mode: Some(mode.to_string()),
        protocols: Some(protocols.to_string()),
        ..RawSettings::default()
    };
    resolve(&RawSettings::default(), &overrides).unwrap()
}

#[test]
fn relay_udp_installs_one_unit_on_all_addresses() {
    let mut host = FakeHost::with_tools();
    let report = host.install(&config("relay", "udp")).unwrap();

    assert_eq!(report.applied, ["socat-syslog514to1514-udp.service"]);
    assert!(report.warnings.is_empty());
    assert_eq!(host.supervisor.units.len(), 1);

    let unit = &host.supervisor.units["socat-syslog514to1514-udp.service"];
    assert!(unit.contains("UDP4-RECVFROM:514,bind=0.0.0.0,reuseaddr,fork"));
    assert!(unit.contains("UDP4-SENDTO:127.0.0.1:1514"));
    assert!(unit.contains("User=portproxy\n"));
    assert!(host.supervisor.active.contains("socat-syslog514to1514-udp.service"));
    assert!(host.accounts.accounts.contains("portproxy"));
    assert!(host.filter.tables.is_empty());
    assert_eq!(host.supervisor.reloads, 1);
}

#[test]
fn relay_udp_tcp_installs_independent_units() {
    let mut host = FakeHost::with_tools();
    host.install(&config("relay", "udp,tcp")).unwrap();

    let udp = &host.supervisor.units["socat-syslog514to1514-udp.service"];
    let tcp = &host.supervisor.units["socat-syslog514to1514-tcp.service"];
    assert!(udp.contains("UDP4-RECVFROM:514") && !udp.contains("TCP4-LISTEN"));
    assert!(tcp.contains("TCP4-LISTEN:514") && !tcp.contains("UDP4-RECVFROM"));
    assert!(tcp.contains("TCP4:127.0.0.1:1514"));
    assert_eq!(host.supervisor.active.len(), 2);
}

#[test]
fn redirect_udp_installs_two_rewrite_rules() {
    let mut host = FakeHost::with_tools();
    let report = host.install(&config("redirect", "udp")).unwrap();

    assert_eq!(report.applied, ["nftables table inet portproxy"]);
    let ruleset = &host.filter.tables["inet portproxy"];
    let rules: Vec<&str> = ruleset
        .lines()
        .filter(|l| l.contains("redirect to"))
        .collect();
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|r| r.contains("udp dport 514 redirect to :1514")));
    assert!(host.supervisor.units.is_empty());
    assert!(host.accounts.accounts.is_empty());
}

#[test]
fn artifact_count_matches_protocol_count() {
    for (protocols, expected) in [("udp", 1), ("tcp", 1), ("udp,tcp", 2)] {
        let mut relay = FakeHost::with_tools();
        let report = relay.install(&config("relay", protocols)).unwrap();
        assert_eq!(report.applied.len(), expected);
        assert_eq!(relay.supervisor.units.len(), expected);

        let mut redirect = FakeHost::with_tools();
        redirect.install(&config("redirect", protocols)).unwrap();
        let rules = redirect.filter.tables["inet portproxy"]
            .lines()
            .filter(|l| l.contains("redirect to"))
            .count();
        assert_eq!(rules, 2 * expected);
    }
}

#[test]
fn installing_twice_equals_installing_once() {
    for mode in ["relay", "redirect"] {
        let cfg = config(mode, "udp,tcp");

        let mut once = FakeHost::with_tools();
        once.install(&cfg).unwrap();

        let mut twice = FakeHost::with_tools();
        twice.install(&cfg).unwrap();
        twice.install(&cfg).unwrap();

        assert_eq!(once.snapshot(), twice.snapshot(), "{mode}");
    }
}

#[test]
fn uninstall_reverses_install() {
    for mode in ["relay", "redirect"] {
        let cfg = config(mode, "udp,tcp");
        let mut host = FakeHost::with_tools();
        host.install(&cfg).unwrap();

        let report = host.uninstall(&cfg).unwrap();
        assert_eq!(report.not_found().count(), 0, "{mode}");
        assert!(host.supervisor.units.is_empty());
        assert!(host.supervisor.active.is_empty());
        assert!(host.filter.tables.is_empty());
        assert!(host.accounts.accounts.is_empty());
    }
}

#[test]
fn uninstall_without_install_reports_not_found() {
    let mut host = FakeHost::with_tools();
    let report = host.uninstall(&config("relay", "udp,tcp")).unwrap();
    assert_eq!(report.removed().count(), 0);
    assert_eq!(
        report.not_found().collect::<Vec<_>>(),
        [
            "socat-syslog514to1514-udp.service",
            "socat-syslog514to1514-tcp.service",
            "account portproxy"
        ]
    );
    assert_eq!(host.supervisor.reloads, 0);

    let report = host.uninstall(&config("redirect", "udp")).unwrap();
    assert_eq!(
        report.entries,
        [("nftables table inet portproxy".to_string(), Outcome::NotFound)]
    );
}

#[test]
fn bogus_mode_fails_before_anything_is_generated() {
    let overrides = RawSettings {
        mode: Some("bogus".into()),
        ..RawSettings::default()
    };
    let err = resolve(&RawSettings::default(), &overrides).unwrap_err();
    assert!(matches!(err, InstallerError::InvalidConfiguration(_)));
}

#[test]
fn unprivileged_caller_is_refused_before_any_change() {
    let mut host = FakeHost::default();
    host.accounts.root = false;

    let err = host.install(&config("relay", "udp")).unwrap_err();
    assert!(matches!(err, InstallerError::PrivilegeError(_)));
    assert!(host.packages.installs.is_empty());
    assert!(host.supervisor.units.is_empty());
    assert!(host.accounts.accounts.is_empty());

    let err = host.uninstall(&config("redirect", "udp")).unwrap_err();
    assert!(matches!(err, InstallerError::PrivilegeError(_)));
}

#[test]
fn missing_tool_triggers_package_install() {
    let mut host = FakeHost::default();
    host.install(&config("relay", "udp")).unwrap();
    assert_eq!(host.packages.installs, [vec!["socat".to_string()]]);

    let mut host = FakeHost::default();
    host.install(&config("redirect", "udp")).unwrap();
    assert_eq!(host.packages.installs, [vec!["nftables".to_string()]]);

    let mut host = FakeHost::with_tools();
    host.install(&config("relay", "udp")).unwrap();
    assert!(host.packages.installs.is_empty());
}

#[test]
fn package_failure_aborts_before_artifacts() {
    let mut host = FakeHost::default();
    host.packages.fail = true;

    let err = host.install(&config("relay", "udp")).unwrap_err();
    match err {
        InstallerError::ExternalToolFailure { tool, detail } => {
            assert_eq!(tool, "apt-get");
            assert!(detail.contains("Unable to locate package"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(host.supervisor.units.is_empty());
    assert!(host.accounts.accounts.is_empty());
}

#[test]
fn busy_source_port_only_warns() {
    let mut host = FakeHost::with_tools();
    host.ports.bound.insert((Protocol::Udp, 514));

    let report = host.install(&config("relay", "udp,tcp")).unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("udp/514"));
    assert_eq!(host.supervisor.units.len(), 2);
}

#[test]
fn redirect_with_remote_destination_warns() {
    let overrides = RawSettings {
        mode: Some("redirect".into()),
        destination_host: Some("192.0.2.7".into()),
        ..RawSettings::default()
    };
    let cfg = resolve(&RawSettings::default(), &overrides).unwrap();
    let mut host = FakeHost::with_tools();
    let report = host.install(&cfg).unwrap();
    assert!(report.warnings.iter().any(|w| w.contains("192.0.2.7")));
}

#[test]
fn account_removal_failure_is_not_fatal() {
    let cfg = config("relay", "udp");
    let mut host = FakeHost::with_tools();
    host.install(&cfg).unwrap();
    host.accounts.delete_fails = true;

    let report = host.uninstall(&cfg).unwrap();
    assert_eq!(
        report.removed().collect::<Vec<_>>(),
        ["socat-syslog514to1514-udp.service"]
    );
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("account portproxy"));
    assert!(host.supervisor.units.is_empty());
    assert!(host.accounts.accounts.contains("portproxy"));
}

#[test]
fn uninstall_is_scoped_to_the_instance() {
    let mut host = FakeHost::with_tools();
    let mut a = config("relay", "udp");
    a.instance = "a".into();
    let mut b = config("relay", "udp");
    b.instance = "b".into();

    host.install(&a).unwrap();
    host.install(&b).unwrap();
    let report = host.uninstall(&a).unwrap();

    assert_eq!(
        host.supervisor.units.keys().collect::<Vec<_>>(),
        ["socat-b-udp.service"]
    );
    assert!(host.supervisor.active.contains("socat-b-udp.service"));

    // Instance b still runs as the shared account.
    assert!(host.accounts.accounts.contains("portproxy"));
    assert_eq!(report.removed().collect::<Vec<_>>(), ["socat-a-udp.service"]);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("socat-b-udp.service"));

    let report = host.uninstall(&b).unwrap();
    assert!(report.removed().any(|name| name == "account portproxy"));
    assert!(host.accounts.accounts.is_empty());
}
