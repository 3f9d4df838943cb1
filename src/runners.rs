//! Operator-facing runners for install, uninstall and dry-run.
//!
//! These wrap the library lifecycle with progress output on the terminal.

use std::io::Write;

use anyhow::{Context, Result};
use log::warn;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use syslog_portproxy::host::{Collaborators, PackageManager};
use syslog_portproxy::install::{self, Plan, redirect};
use syslog_portproxy::{Config, Mode};

fn heading(stdout: &mut StandardStream, color: Color, text: &str) {
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    let _ = writeln!(stdout, "{}", text);
    let _ = stdout.reset();
}

fn line(stdout: &mut StandardStream, color: Color, text: &str) {
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)));
    let _ = writeln!(stdout, "{}", text);
    let _ = stdout.reset();
}

fn describe(stdout: &mut StandardStream, config: &Config) {
    let protocols: Vec<&str> = config.protocols.iter().map(|p| p.as_str()).collect();
    let _ = writeln!(stdout, "   Mode:        {}", config.mode);
    let _ = writeln!(stdout, "   Protocols:   {}", protocols.join(","));
    let _ = writeln!(
        stdout,
        "   Source:      {}:{}",
        config.source_address, config.source_port
    );
    let _ = writeln!(
        stdout,
        "   Destination: {}:{}",
        config.destination_host, config.destination_port
    );
    let _ = writeln!(stdout, "   Instance:    {}\n", config.instance);
}

/// Print every artifact the configuration would produce.
pub fn run_dry_run(config: &Config, packages: &dyn PackageManager) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    heading(&mut stdout, Color::Cyan, "🔍 Dry run, nothing will be changed");
    describe(&mut stdout, config);

    let artifacts = Plan::new(config)
        .deployment()
        .render(packages)
        .context("Failed to render artifacts")?;

    for artifact in artifacts {
        heading(&mut stdout, Color::Green, &format!("# {}", artifact.name));
        let _ = writeln!(stdout, "{}", artifact.contents);
    }
    Ok(())
}

/// Install and print the resulting service or ruleset status.
pub fn run_install(config: &Config, host: &mut Collaborators<'_>) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    heading(&mut stdout, Color::Cyan, "🔧 syslog port proxy installation");
    describe(&mut stdout, config);

    let report = install::install(config, host).context("Installation failed")?;

    for warning in &report.warnings {
        line(&mut stdout, Color::Yellow, &format!("   ⚠ {}", warning));
    }
    for name in &report.applied {
        line(&mut stdout, Color::Green, &format!("✓ {}", name));
    }

    heading(&mut stdout, Color::Cyan, "\n📋 Status");
    match config.mode {
        Mode::Relay => {
            for name in &report.applied {
                match host.supervisor.status(name) {
                    Ok(status) => {
                        let _ = writeln!(stdout, "{}", status);
                    }
                    Err(e) => warn!("Could not query status of {}: {}", name, e),
                }
            }
        }
        Mode::Redirect => match host.filter.list_table(redirect::FAMILY, redirect::TABLE) {
            Ok(listing) => {
                let _ = writeln!(stdout, "{}", listing);
            }
            Err(e) => warn!("Could not list {}: {}", redirect::TABLE, e),
        },
    }

    heading(&mut stdout, Color::Green, "✅ Installation complete");
    Ok(())
}

/// Uninstall and list what was removed and what was already gone.
pub fn run_uninstall(config: &Config, host: &mut Collaborators<'_>) -> Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    heading(&mut stdout, Color::Cyan, "🗑️  syslog port proxy uninstallation");
    describe(&mut stdout, config);

    let report = install::uninstall(config, host).context("Uninstallation failed")?;

    for name in report.removed() {
        line(&mut stdout, Color::Green, &format!("✓ removed {}", name));
    }
    for name in report.not_found() {
        let _ = writeln!(stdout, "- {} not found (already removed)", name);
    }
    for warning in &report.warnings {
        line(&mut stdout, Color::Yellow, &format!("   ⚠ {}", warning));
    }

    heading(&mut stdout, Color::Green, "✅ Uninstallation complete");
    Ok(())
}
