mod cli;
mod runners;

use anyhow::Result;
use clap::Parser;
use log::error;

use syslog_portproxy::{Config, RawSettings, resolve};

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(e) = real_main() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = cli::Cli::parse();

    let file = match &cli.config {
        Some(path) => RawSettings::from_file(path)?,
        None => RawSettings::default(),
    };
    let defaults = file.overlay(RawSettings::from_env(std::env::vars_os())?);
    let config = resolve(&defaults, &cli.overrides())?;

    dispatch(&cli, &config)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn dispatch(cli: &cli::Cli, config: &Config) -> Result<()> {
            use syslog_portproxy::host::linux::SystemHost;

            let mut host = SystemHost::new();
            if cli.dry_run {
                runners::run_dry_run(config, &host.packages)
            } else if cli.uninstall {
                runners::run_uninstall(config, &mut host.collaborators())
            } else {
                runners::run_install(config, &mut host.collaborators())
            }
        }
    } else {
        fn dispatch(_cli: &cli::Cli, _config: &Config) -> Result<()> {
            anyhow::bail!("Unsupported platform: {}", std::env::consts::OS)
        }
    }
}
