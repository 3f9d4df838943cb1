//! Systemd unit file generation for relay services.

use crate::error::InstallerError;

/// Fixed backoff between restarts.
pub(crate) const RESTART_DELAY: &str = "2s";

/// The one capability a relay process keeps.
pub(crate) const BIND_CAPABILITY: &str = "CAP_NET_BIND_SERVICE";

/// Everything a relay unit needs.
#[derive(Clone, Debug)]
pub(crate) struct RelayUnit<'a> {
    pub unit_name: &'a str,
    pub description: &'a str,
    pub exec_start: &'a str,
    pub user: &'a str,
}

/// Render the unit text. Empty required fields are a `TemplateError`.
pub(crate) fn generate_unit_content(unit: &RelayUnit<'_>) -> Result<String, InstallerError> {
    let required = [
        ("unit name", unit.unit_name),
        ("command", unit.exec_start),
        ("service user", unit.user),
    ];
    if let Some(&(field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(InstallerError::TemplateError {
            artifact: "service unit",
            field,
        });
    }

    let mut content = String::with_capacity(1024);

    // [Unit] section
    content.push_str("[Unit]\n");
    content.push_str(&format!("Description={}\n", unit.description));
    content.push_str("Documentation=man:socat(1)\n");
    content.push_str("Wants=network-online.target\n");
    content.push_str("After=network-online.target\n");
    // Restart=always must never give up.
    content.push_str("StartLimitIntervalSec=0\n");
    content.push('\n');

    // [Service] section
    content.push_str("[Service]\n");
    content.push_str("Type=simple\n");
    content.push_str(&format!("User={}\n", unit.user));
    content.push_str(&format!("Group={}\n", unit.user));
    content.push_str(&format!("ExecStart={}\n", unit.exec_start));
    content.push_str("Restart=always\n");
    content.push_str(&format!("RestartSec={}\n", RESTART_DELAY));

    // Privileges
    content.push_str(&format!("AmbientCapabilities={}\n", BIND_CAPABILITY));
    content.push_str(&format!("CapabilityBoundingSet={}\n", BIND_CAPABILITY));
    content.push_str("NoNewPrivileges=true\n");

    // Sandboxing
    content.push_str("ProtectSystem=strict\n");
    content.push_str("ProtectHome=true\n");
    content.push_str("PrivateTmp=true\n");
    content.push_str("ProtectKernelTunables=true\n");
    content.push_str("ProtectControlGroups=true\n");
    content.push_str("RestrictSUIDSGID=true\n");
    content.push_str("LockPersonality=true\n");

    // Logging
    content.push_str("StandardOutput=journal\n");
    content.push_str("StandardError=journal\n");
    content.push_str(&format!(
        "SyslogIdentifier={}\n",
        unit.unit_name.trim_end_matches(".service")
    ));
    content.push('\n');

    // [Install] section
    content.push_str("[Install]\n");
    content.push_str("WantedBy=multi-user.target\n");

    Ok(content)
}
