//! Device commands: info, reboot, bootloader and list-ports.

use {
    crate::{Cli, config::Config, target::connect},
    anyhow::{Context, Result},
    console::style,
    indicatif::HumanBytes,
    n64romfs::{DeviceInfo, device},
    rust_i18n::t,
};

fn info_json(transport: &str, info: &DeviceInfo) -> serde_json::Value {
    serde_json::json!({
        "transport": transport,
        "firmware": info.firmware().map(|v| v.to_string()),
        "flash_start": info.cart.map(|c| c.flash_start),
        "flash_size": info.cart.map(|c| c.flash_size),
        "free_bytes": info.free_bytes,
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut session = connect(cli, config)?;
    let info = session.refresh_device_info();
    let transport = session
        .transport_kind()
        .map(|k| k.to_string())
        .unwrap_or_default();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(&transport, &info))?
        );
        return Ok(());
    }

    let unknown = t!("info.unknown").to_string();
    println!("{:<14} {transport}", t!("info.transport"));
    println!(
        "{:<14} {}",
        t!("info.firmware"),
        info.firmware().map_or_else(|| unknown.clone(), |v| v.to_string())
    );
    if let Some(cart) = info.cart {
        println!(
            "{:<14} 0x{:08X} ({})",
            t!("info.volume"),
            cart.flash_start,
            HumanBytes(u64::from(cart.flash_size))
        );
    }
    println!(
        "{:<14} {}",
        t!("info.free"),
        info.free_bytes
            .map_or_else(|| unknown.clone(), |n| HumanBytes(n).to_string())
    );
    Ok(())
}

/// Reboot command implementation.
pub(crate) fn cmd_reboot(cli: &Cli, config: &Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    session.reboot().context(t!("error.reboot").to_string())?;
    if !cli.quiet {
        eprintln!("{} {}", style("✓").green(), t!("device.rebooting"));
    }
    Ok(())
}

/// Bootloader command implementation.
pub(crate) fn cmd_bootloader(cli: &Cli, config: &Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    session
        .switch_to_bootloader()
        .context(t!("error.bootloader").to_string())?;
    if !cli.quiet {
        eprintln!("{} {}", style("✓").green(), t!("device.bootloader"));
    }
    Ok(())
}

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = device::detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "cartridge": p.is_cartridge(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style(t!("list_ports.header")).bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return;
    }

    for line in device::format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    let cartridges = device::detect_cartridge_ports();
    if let [only] = cartridges.as_slice() {
        eprintln!(
            "\n{} {}",
            style("→").green().bold(),
            t!(
                "list_ports.auto_detected",
                port = style(&only.name).cyan().bold().to_string()
            )
        );
    }
}
