//! Upload and download commands.
//!
//! Transfers run on the library's background thread; this module renders
//! their progress and turns Ctrl-C into a cooperative cancel.

use {
    crate::{
        Cli, CliError, clear_interrupted_flag,
        commands::confirm,
        config::Config,
        is_interactive,
        target::{connect, map_prompt_error},
        use_fancy_output, was_interrupted,
    },
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Confirm, Select, theme::ColorfulTheme},
    indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{debug, warn},
    n64romfs::{
        Entry, Error as RomfsError, RomFormat, Session, TransferEvent, TransferHandle,
        TransferProgress, TransferState, UploadOptions, rom, session::path,
    },
    rust_i18n::t,
    std::{
        fs,
        path::{Path, PathBuf},
        sync::mpsc::RecvTimeoutError,
        time::Duration,
    },
};

/// How often the Ctrl-C flag is checked while waiting for events.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upload settings resolved from flags and config.
#[derive(Debug, Clone, Default)]
pub(crate) struct PutOptions {
    /// Explicit `--fix-rom` / `--no-fix-rom` choice.
    pub(crate) fix_rom: Option<bool>,
    /// PI bus speed byte for ROM uploads.
    pub(crate) pi_speed: Option<u8>,
    /// Overwrite and clean up without asking.
    pub(crate) force: bool,
}

fn progress_bar(cli: &Cli, total: u64, label: &str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_prefix(label.to_string());
    pb
}

/// Rate and ETA text; the ETA stays open until the estimate settles.
fn rate_message(progress: &TransferProgress) -> String {
    let rate = progress
        .rate
        .map_or_else(|| "--".to_string(), |r| format!("{}/s", HumanBytes(r)));
    let eta = progress
        .eta
        .map_or_else(|| "--".to_string(), |d| HumanDuration(d).to_string());
    t!("transfer.rate", rate = rate, eta = eta).to_string()
}

/// Render events until the transfer ends. Ctrl-C requests a cancel; the
/// chunk in flight still completes.
fn drive(handle: &TransferHandle, pb: &ProgressBar) -> Result<TransferState> {
    let mut cancel_sent = false;
    if let Some(events) = handle.take_events() {
        loop {
            if was_interrupted() && !cancel_sent {
                handle.cancel();
                cancel_sent = true;
                pb.set_message(t!("transfer.cancelling").to_string());
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(TransferEvent::Progress(progress)) => {
                    pb.set_length(progress.total_bytes);
                    pb.set_position(progress.transferred_bytes);
                    if !cancel_sent {
                        pb.set_message(rate_message(&progress));
                    }
                },
                Ok(TransferEvent::Finished(state)) => {
                    debug!("Transfer finished: {state:?}");
                    break;
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    let state = handle.join();
    pb.finish_and_clear();
    Ok(state?)
}

/// Whether to remove a partial destination after a cancel.
///
/// Non-interactive runs only clean up with `--force`.
fn ask_cleanup(cli: &Cli, prompt: &str, force: bool) -> Result<bool> {
    if force {
        return Ok(true);
    }
    if !is_interactive(cli) {
        return Ok(false);
    }
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false))
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled(t!("transfer.cancelled").to_string()).into()
}

/// File name of a local path, resolving `.` and `..`.
fn local_name(local: &Path) -> Result<String> {
    let name = match local.file_name() {
        Some(name) => name.to_os_string(),
        None => fs::canonicalize(local)?
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .ok_or_else(|| {
                CliError::Usage(t!("put.no_name", path = local.display()).to_string())
            })?,
    };
    Ok(name.to_string_lossy().into_owned())
}

/// Upload command implementation.
pub(crate) fn cmd_put(
    cli: &Cli,
    config: &mut Config,
    locals: &[PathBuf],
    to: &str,
    options: &PutOptions,
) -> Result<()> {
    if let Some(missing) = locals.iter().find(|p| !p.exists()) {
        return Err(
            CliError::Usage(t!("put.missing_local", path = missing.display()).to_string()).into(),
        );
    }

    let mut session = connect(cli, config)?;
    let dest = session.resolve(to)?;
    for local in locals {
        if local.is_dir() {
            put_dir(cli, config, &mut session, local, &dest, options)?;
        } else {
            put_file(cli, config, &mut session, local, &dest, options)?;
        }
    }
    Ok(())
}

/// Create `dest/<name>` and upload the directory's children into it.
fn put_dir(
    cli: &Cli,
    config: &mut Config,
    session: &mut Session,
    local: &Path,
    dest: &str,
    options: &PutOptions,
) -> Result<()> {
    let name = local_name(local)?;
    let remote_dir = match session.mkdir(dest, &name) {
        Ok(created) => created,
        Err(RomfsError::AlreadyExists(_)) => path::join_remote(dest, &name),
        Err(e) => {
            return Err(e).with_context(|| {
                t!("error.mkdir", path = path::join_remote(dest, &name)).to_string()
            });
        },
    };

    let mut children = fs::read_dir(local)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    children.sort();

    for child in &children {
        if child.is_dir() {
            put_dir(cli, config, session, child, &remote_dir, options)?;
        } else {
            put_file(cli, config, session, child, &remote_dir, options)?;
        }
    }
    Ok(())
}

/// Decide whether a byte-swapped ROM gets converted, asking when allowed.
fn decide_byte_order(
    cli: &Cli,
    config: &mut Config,
    local: &Path,
    format: RomFormat,
    flag: Option<bool>,
) -> Result<bool> {
    if !format.needs_conversion() {
        return Ok(false);
    }
    if let Some(fix) = flag {
        return Ok(fix);
    }
    if !config.should_ask_fix_rom() || !is_interactive(cli) {
        let fix = config.fix_rom_default();
        if !fix && !cli.quiet {
            eprintln!(
                "{} {}",
                style("!").yellow(),
                t!("rom.left_as_is", file = local.display(), format = format)
            );
        }
        return Ok(fix);
    }

    let items = [
        t!("rom.choice_fix").to_string(),
        t!("rom.choice_keep").to_string(),
        t!("rom.choice_always").to_string(),
        t!("rom.choice_never").to_string(),
    ];
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("rom.prompt", file = local.display(), format = format).to_string())
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    let (fix, remember) = match choice {
        Some(0) => (true, false),
        Some(1) => (false, false),
        Some(2) => (true, true),
        Some(_) => (false, true),
        None => return Err(cancelled()),
    };
    if remember {
        match config.remember_fix_rom(fix) {
            Ok(saved) => debug!("Remembered byte-order choice in {}", saved.display()),
            Err(e) => warn!("Could not save byte-order choice: {e:#}"),
        }
    }
    Ok(fix)
}

fn put_file(
    cli: &Cli,
    config: &mut Config,
    session: &mut Session,
    local: &Path,
    dest: &str,
    options: &PutOptions,
) -> Result<()> {
    if was_interrupted() {
        return Err(cancelled());
    }

    let name = local_name(local)?;
    let remote = path::join_remote(dest, &name);
    if session.exists(&remote)? {
        let prompt = t!("put.overwrite", path = remote.as_str()).to_string();
        let refusal = t!("put.exists_need_force", path = remote.as_str()).to_string();
        if !confirm(cli, &prompt, options.force, &refusal)? {
            if !cli.quiet {
                eprintln!("{} {}", style("-").dim(), t!("put.skipped", path = remote.as_str()));
            }
            return Ok(());
        }
    }

    let format = if rom::has_rom_extension(local) {
        rom::classify_file(local)?
    } else {
        RomFormat::NotARom
    };
    let fix = decide_byte_order(cli, config, local, format, options.fix_rom)?;
    let pi_speed = options.pi_speed.filter(|_| format != RomFormat::NotARom);
    let upload = UploadOptions::default()
        .with_byte_order_fix(fix)
        .with_pi_bus_speed(pi_speed);

    let handle = session
        .start_upload(local, &remote, upload)
        .with_context(|| t!("error.upload", path = local.display()).to_string())?;
    let pb = progress_bar(cli, handle.total_bytes(), &name);
    let state =
        drive(&handle, &pb).with_context(|| t!("error.upload", path = local.display()).to_string())?;

    if state == TransferState::Completed {
        if !cli.quiet {
            eprintln!(
                "{} {}",
                style("✓").green(),
                t!(
                    "put.done",
                    local = local.display(),
                    remote = remote.as_str(),
                    size = HumanBytes(handle.total_bytes())
                )
            );
        }
        return Ok(());
    }

    clear_interrupted_flag();
    eprintln!("{} {}", style("!").yellow(), t!("transfer.cancelled"));
    let prompt = t!("put.remove_partial", path = remote.as_str()).to_string();
    if ask_cleanup(cli, &prompt, options.force)? {
        session.delete(&[remote.as_str()])?.into_result()?;
        eprintln!("{} {}", style("-").dim(), t!("transfer.partial_removed", path = remote.as_str()));
    }
    Err(cancelled())
}

/// Local destination for `remote`: a directory receives the remote name.
fn download_destination(remote: &str, local: Option<&Path>) -> PathBuf {
    let name = path::file_name(remote);
    match local {
        Some(dir) if dir.is_dir() => dir.join(name),
        Some(file) => file.to_path_buf(),
        None => PathBuf::from(name),
    }
}

/// One step of a download, planned before anything is written locally.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GetStep {
    Dir(PathBuf),
    File { remote: String, local: PathBuf },
}

/// Queue `entry` (found at `remote`) for download to `local`, walking
/// directories depth-first in device order.
fn plan_entry(
    session: &mut Session,
    remote: &str,
    entry: &Entry,
    local: PathBuf,
    steps: &mut Vec<GetStep>,
) -> Result<()> {
    if !entry.is_directory {
        steps.push(GetStep::File {
            remote: remote.to_string(),
            local,
        });
        return Ok(());
    }

    let children = session
        .list(remote)
        .with_context(|| t!("error.list", path = remote).to_string())?;
    steps.push(GetStep::Dir(local.clone()));
    for child in &children {
        // Names come from the device and become local path components.
        path::validate_name(&child.name)?;
        let child_local = local.join(&child.name);
        plan_entry(
            session,
            &path::join_remote(remote, &child.name),
            child,
            child_local,
            steps,
        )?;
    }
    Ok(())
}

/// Local target of a top-level remote entry.
///
/// A lone remote file keeps `get FILE -o DEST` semantics; everything else
/// lands inside the output directory under its remote name.
fn top_level_destination(
    remote: &str,
    entry: &Entry,
    output: Option<&Path>,
    single: bool,
) -> PathBuf {
    if single && !entry.is_directory {
        return download_destination(remote, output);
    }
    let base = output.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    match path::file_name(remote) {
        "" => base,
        name => base.join(name),
    }
}

/// Download command implementation.
pub(crate) fn cmd_get(
    cli: &Cli,
    config: &Config,
    remotes: &[String],
    output: Option<&Path>,
    force: bool,
) -> Result<()> {
    let mut session = connect(cli, config)?;

    let single = remotes.len() == 1;
    let mut steps = Vec::new();
    for raw in remotes {
        let remote = session.resolve(raw)?;
        let entry = session
            .stat(&remote)
            .with_context(|| t!("error.download", path = remote.as_str()).to_string())?;
        if let Some(out) = output.filter(|o| o.exists() && !o.is_dir()) {
            if entry.is_directory || !single {
                return Err(CliError::Usage(
                    t!("get.output_not_dir", path = out.display()).to_string(),
                )
                .into());
            }
        }
        let local = top_level_destination(&remote, &entry, output, single);
        plan_entry(&mut session, &remote, &entry, local, &mut steps)?;
    }

    let files = steps
        .iter()
        .filter(|s| matches!(s, GetStep::File { .. }))
        .count();
    let mut index = 0;
    for step in &steps {
        match step {
            GetStep::Dir(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| t!("get.create_dir", path = dir.display()).to_string())?;
            },
            GetStep::File { remote, local } => {
                index += 1;
                let name = path::file_name(remote);
                let label = if files > 1 {
                    format!("[{index}/{files}] {name}")
                } else {
                    name.to_string()
                };
                get_file(cli, &mut session, remote, local, &label, force)?;
            },
        }
    }

    if files != 1 && !cli.quiet {
        eprintln!("{} {}", style("✓").green(), t!("get.summary", count = files));
    }
    Ok(())
}

fn get_file(
    cli: &Cli,
    session: &mut Session,
    remote: &str,
    local: &Path,
    label: &str,
    force: bool,
) -> Result<()> {
    if was_interrupted() {
        return Err(cancelled());
    }
    if local.exists() {
        let prompt = t!("get.overwrite", path = local.display()).to_string();
        let refusal = t!("get.exists_need_force", path = local.display()).to_string();
        if !confirm(cli, &prompt, force, &refusal)? {
            return Err(CliError::Cancelled(t!("common.aborted").to_string()).into());
        }
    }

    let handle = session
        .start_download(remote, local)
        .with_context(|| t!("error.download", path = remote).to_string())?;
    let pb = progress_bar(cli, handle.total_bytes(), label);
    let state =
        drive(&handle, &pb).with_context(|| t!("error.download", path = remote).to_string())?;

    if state == TransferState::Completed {
        if !cli.quiet {
            eprintln!(
                "{} {}",
                style("✓").green(),
                t!(
                    "get.done",
                    remote = remote,
                    local = local.display(),
                    size = HumanBytes(handle.total_bytes())
                )
            );
        }
        return Ok(());
    }

    clear_interrupted_flag();
    eprintln!("{} {}", style("!").yellow(), t!("transfer.cancelled"));
    let prompt = t!("get.remove_partial", path = local.display()).to_string();
    if ask_cleanup(cli, &prompt, force)? {
        fs::remove_file(local)?;
        eprintln!(
            "{} {}",
            style("-").dim(),
            t!("transfer.partial_removed", path = local.display())
        );
    }
    Err(cancelled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_rate_message_before_estimate() {
        let msg = rate_message(&TransferProgress::default());
        assert!(msg.contains("--"), "{msg}");
    }

    #[test]
    fn test_rate_message_with_estimate() {
        let progress = TransferProgress {
            transferred_bytes: 4096,
            total_bytes: 8192,
            elapsed: Duration::from_secs(1),
            rate: Some(4096),
            eta: Some(Duration::from_secs(1)),
        };
        let msg = rate_message(&progress);
        assert!(msg.contains("KiB/s"), "{msg}");
    }

    #[test]
    fn test_download_destination() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            download_destination("/saves/a.eep", Some(dir.path())),
            dir.path().join("a.eep")
        );
        assert_eq!(
            download_destination("/saves/a.eep", Some(Path::new("b.eep"))),
            PathBuf::from("b.eep")
        );
        assert_eq!(download_destination("/saves/a.eep", None), PathBuf::from("a.eep"));
    }

    #[test]
    fn test_top_level_destination() {
        let file = Entry::file("a.eep", 1);
        let dir = Entry::directory("saves");
        let out = Path::new("backup");

        assert_eq!(
            top_level_destination("/saves/a.eep", &file, Some(Path::new("b.eep")), true),
            PathBuf::from("b.eep")
        );
        assert_eq!(
            top_level_destination("/saves/a.eep", &file, Some(out), false),
            out.join("a.eep")
        );
        assert_eq!(top_level_destination("/saves", &dir, Some(out), true), out.join("saves"));
        assert_eq!(top_level_destination("/saves", &dir, None, true), Path::new(".").join("saves"));
        assert_eq!(top_level_destination("/", &dir, Some(out), true), out.to_path_buf());
    }

    #[test]
    fn test_plan_walks_directories_in_device_order() {
        use n64romfs::{SessionConfig, TransportKind, emulator::Emulator};

        let emu = Emulator::new();
        emu.insert_dir("/d");
        emu.insert_file("/d/b.eep", b"1");
        emu.insert_dir("/d/sub");
        emu.insert_file("/d/sub/c.eep", b"22");
        emu.insert_file("/d/a.eep", b"3");
        let mut session = Session::new(SessionConfig::default());
        session
            .connect_port(TransportKind::Usb, Box::new(emu.port()))
            .unwrap();

        let entry = session.stat("/d").unwrap();
        let out = PathBuf::from("out").join("d");
        let mut steps = Vec::new();
        plan_entry(&mut session, "/d", &entry, out.clone(), &mut steps).unwrap();

        let file = |remote: &str, local: PathBuf| GetStep::File {
            remote: remote.to_string(),
            local,
        };
        assert_eq!(
            steps,
            vec![
                GetStep::Dir(out.clone()),
                file("/d/b.eep", out.join("b.eep")),
                GetStep::Dir(out.join("sub")),
                file("/d/sub/c.eep", out.join("sub").join("c.eep")),
                file("/d/a.eep", out.join("a.eep")),
            ]
        );
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(Path::new("roms/mario.z64")).unwrap(), "mario.z64");
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("games");
        fs::create_dir(&nested).unwrap();
        assert_eq!(local_name(&nested.join("..").join("games").join(".")).unwrap(), "games");
    }

    #[test]
    fn test_byte_order_flag_and_non_interactive_default() {
        let cli = Cli::try_parse_from(["n64romfs", "--non-interactive", "put", "a.v64"]).unwrap();
        let mut config = Config::default();
        let local = Path::new("a.v64");

        assert!(!decide_byte_order(&cli, &mut config, local, RomFormat::Z64, Some(true)).unwrap());
        assert!(decide_byte_order(&cli, &mut config, local, RomFormat::V64, Some(true)).unwrap());
        assert!(!decide_byte_order(&cli, &mut config, local, RomFormat::V64, None).unwrap());

        config.upload.fix_rom = Some(true);
        assert!(decide_byte_order(&cli, &mut config, local, RomFormat::N64, None).unwrap());
    }
}
