//! Connection target selection.
//!
//! Picks the cartridge to talk to from, in order:
//! - `--remote` / `N64ROMFS_REMOTE`
//! - `--port` / `N64ROMFS_PORT`
//! - `[connection]` in the config file
//! - USB auto-detection by VID/PID, with an interactive pick when several
//!   cartridges are plugged in

use {
    crate::{Cli, CliError, config::Config, is_interactive},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::debug,
    n64romfs::{
        DetectedPort, Error as RomfsError, Session, SessionConfig, Target,
        device::detect_cartridge_ports,
    },
    rust_i18n::t,
    std::time::Duration,
};

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Map a dialoguer failure onto the CLI error classes.
pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled(t!("prompt.cancelled").to_string()).into()
            } else {
                usage_err(t!("prompt.failed").as_ref())
            }
        },
    }
}

/// Resolve the target from flags, environment and config.
pub(crate) fn resolve_target(cli: &Cli, config: &Config) -> Result<Target> {
    let remote = cli
        .remote
        .as_deref()
        .or(config.connection.remote.as_deref());
    if let Some(remote) = remote {
        return Target::network(remote).map_err(|e| match e {
            RomfsError::AddressFormat { .. } => usage_err(
                t!("error.bad_remote", remote = remote, reason = e.to_string()).as_ref(),
            ),
            other => other.into(),
        });
    }

    let port = cli
        .port
        .clone()
        .or_else(|| config.connection.usb_port.clone());
    if let Some(port) = port {
        return Ok(Target::Usb { port: Some(port) });
    }

    let port = select_cartridge(detect_cartridge_ports(), is_interactive(cli))?;
    Ok(Target::Usb {
        port: Some(port.name),
    })
}

/// Choose one of the detected cartridge ports.
fn select_cartridge(mut ports: Vec<DetectedPort>, interactive: bool) -> Result<DetectedPort> {
    match ports.len() {
        0 => Err(usage_err(t!("connect.no_cartridge").as_ref())),
        1 => {
            let port = ports.remove(0);
            debug!("Auto-selected {}", port.name);
            Ok(port)
        },
        _ if !interactive => Err(usage_err(
            t!(
                "connect.several_cartridges",
                ports = ports
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
            .as_ref(),
        )),
        _ => {
            let items = n64romfs::device::format_port_list(&ports);
            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(t!("connect.select_port").to_string())
                .items(&items)
                .default(0)
                .interact_opt()
                .map_err(map_prompt_error)?;
            match choice {
                Some(i) => Ok(ports.swap_remove(i)),
                None => Err(CliError::Cancelled(t!("prompt.cancelled").to_string()).into()),
            }
        },
    }
}

/// Session settings from flags and config.
pub(crate) fn session_config(cli: &Cli, config: &Config) -> SessionConfig {
    let mut session_config = SessionConfig::default();
    if let Some(ms) = cli.timeout.or(config.connection.timeout_ms) {
        session_config = session_config.with_timeout(Duration::from_millis(ms));
    }
    session_config
}

/// Resolve the target and open a connected session.
pub(crate) fn connect(cli: &Cli, config: &Config) -> Result<Session> {
    let target = resolve_target(cli, config)?;
    let mut session = Session::new(session_config(cli, config));
    let label = target.to_string();
    let info = session
        .connect(target)
        .with_context(|| t!("error.connect", target = label.clone()).to_string())?;

    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("✓").green(),
            t!(
                "connect.connected",
                target = style(&label).cyan().to_string(),
                info = info
            )
        );
    }
    Ok(session)
}
