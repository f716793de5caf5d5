//! Directory and volume commands: ls, mkdir, mv, rm and format.

use {
    crate::{Cli, CliError, commands::confirm, config::Config, target::connect},
    anyhow::{Context, Result},
    console::style,
    indicatif::HumanBytes,
    n64romfs::{Entry, session::path},
    rust_i18n::t,
};

/// Directories first, then by name.
fn sort_for_display(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// One line of `ls` output.
fn format_entry(entry: &Entry) -> String {
    if entry.is_directory {
        format!("{:>10}  {}/", "-", entry.name)
    } else {
        format!("{:>10}  {}", entry.size, entry.name)
    }
}

/// List command implementation.
pub(crate) fn cmd_ls(cli: &Cli, config: &Config, dir: &str, json: bool) -> Result<()> {
    let mut session = connect(cli, config)?;
    let mut entries = session
        .list(dir)
        .with_context(|| t!("error.list", path = dir).to_string())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    sort_for_display(&mut entries);
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    if !cli.quiet {
        let bytes: u64 = entries.iter().map(|e| e.size).sum();
        eprintln!(
            "{}",
            style(t!(
                "ls.summary",
                count = entries.len(),
                size = HumanBytes(bytes)
            ))
            .dim()
        );
    }
    Ok(())
}

/// Mkdir command implementation.
pub(crate) fn cmd_mkdir(cli: &Cli, config: &Config, target: &str) -> Result<()> {
    let mut session = connect(cli, config)?;
    let resolved = session.resolve(target)?;
    if resolved == "/" {
        return Err(CliError::Usage(t!("mkdir.root").to_string()).into());
    }
    let created = session
        .mkdir(path::parent(&resolved), path::file_name(&resolved))
        .with_context(|| t!("error.mkdir", path = resolved.clone()).to_string())?;
    if !cli.quiet {
        eprintln!("{} {}", style("✓").green(), t!("mkdir.created", path = created));
    }
    Ok(())
}

/// Rename command implementation.
pub(crate) fn cmd_mv(cli: &Cli, config: &Config, from: &str, new_name: &str) -> Result<()> {
    let mut session = connect(cli, config)?;
    let renamed = session
        .rename(from, new_name)
        .with_context(|| t!("error.rename", path = from).to_string())?;
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("✓").green(),
            t!("mv.renamed", from = from, to = renamed)
        );
    }
    Ok(())
}

/// Delete command implementation.
///
/// Every path is attempted; failures are reported together at the end.
pub(crate) fn cmd_rm(cli: &Cli, config: &Config, paths: &[String], yes: bool) -> Result<()> {
    let prompt = t!("rm.confirm", count = paths.len(), paths = paths.join(", ")).to_string();
    if !confirm(cli, &prompt, yes, t!("rm.need_yes").as_ref())? {
        return Err(CliError::Cancelled(t!("common.aborted").to_string()).into());
    }

    let mut session = connect(cli, config)?;
    let report = session.delete(paths)?;

    if !cli.quiet {
        for removed in &report.succeeded {
            eprintln!("{} {}", style("✓").green(), t!("rm.removed", path = removed));
        }
    }
    for (failed, err) in &report.failed {
        eprintln!(
            "{} {}",
            style("✗").red(),
            t!("rm.failed", path = failed, reason = err.to_string())
        );
    }
    report.into_result()?;
    Ok(())
}

/// Format command implementation.
pub(crate) fn cmd_format(cli: &Cli, config: &Config, yes: bool) -> Result<()> {
    let mut session = connect(cli, config)?;

    let prompt = style(t!("format.confirm")).red().bold().to_string();
    if !confirm(cli, &prompt, yes, t!("format.need_yes").as_ref())? {
        return Err(CliError::Cancelled(t!("common.aborted").to_string()).into());
    }

    session.format().context(t!("error.format").to_string())?;
    if !cli.quiet {
        let free = session
            .free_space()
            .map_or_else(|_| "?".to_string(), |n| HumanBytes(n).to_string());
        eprintln!("{} {}", style("✓").green(), t!("format.done", free = free));
    }
    Ok(())
}
