//! n64romfs CLI - Command-line tool for the ROMFS volume of an N64 flash cartridge.
//!
//! ## Features
//!
//! - List, upload, download, rename and delete files on the cartridge
//! - USB auto-detection or a network proxy target (`host:port`)
//! - Byte-order detection and conversion of N64 ROM images
//! - Progress bars with ETA and Ctrl-C cancellation
//! - Shell completion generation
//! - Environment variable support
//! - Internationalization (i18n) support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    rust_i18n::t,
    std::{
        env,
        io::IsTerminal,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod help;
mod target;

use config::Config;

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed since startup or the last clear.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub(crate) fn clear_interrupted_flag() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Whether prompts may be shown.
pub(crate) fn is_interactive(cli: &Cli) -> bool {
    !cli.non_interactive && std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

/// Failures that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or a setup the user has to fix (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user cancelled (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for a failed command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => match err.downcast_ref::<n64romfs::Error>() {
            Some(n64romfs::Error::AddressFormat { .. } | n64romfs::Error::InvalidPath(_)) => 2,
            _ => 1,
        },
    }
}

/// n64romfs - Manage the ROMFS volume of an N64 flash cartridge.
///
/// Environment variables:
///   N64ROMFS_PORT              - USB serial port of the cartridge
///   N64ROMFS_REMOTE            - Network proxy as host:port
///   N64ROMFS_TIMEOUT           - Per-call I/O timeout in milliseconds
///   N64ROMFS_LANG              - Language/locale (en, ru)
///   N64ROMFS_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "n64romfs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// USB serial port of the cartridge (auto-detected if not specified).
    #[arg(short, long, global = true, env = "N64ROMFS_PORT")]
    pub(crate) port: Option<String>,

    /// Connect through a network proxy instead of USB.
    #[arg(long, global = true, env = "N64ROMFS_REMOTE", value_name = "HOST:PORT")]
    pub(crate) remote: Option<String>,

    /// Per-call I/O timeout in milliseconds.
    #[arg(long, global = true, env = "N64ROMFS_TIMEOUT", value_name = "MS")]
    pub(crate) timeout: Option<u64>,

    /// Language/locale for messages (e.g., en, ru).
    #[arg(long, global = true, env = "N64ROMFS_LANG")]
    lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "N64ROMFS_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List a directory on the cartridge.
    Ls {
        /// Remote directory.
        #[arg(default_value = "/")]
        path: String,

        /// Output entries as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Upload files or directories.
    Put {
        /// Local files or directories.
        #[arg(required = true)]
        local: Vec<PathBuf>,

        /// Remote destination directory.
        #[arg(long, default_value = "/", value_name = "DIR")]
        to: String,

        /// Convert byte-swapped ROMs to Z64 order without asking.
        #[arg(long, conflicts_with = "no_fix_rom")]
        fix_rom: bool,

        /// Upload ROMs exactly as they are.
        #[arg(long)]
        no_fix_rom: bool,

        /// Patch the PI bus speed byte of uploaded ROMs (e.g. 0x12).
        #[arg(long, value_parser = parse_byte, value_name = "BYTE")]
        pi_speed: Option<u8>,

        /// Overwrite existing files and remove partial uploads without asking.
        #[arg(short, long)]
        force: bool,
    },

    /// Download files or directories.
    Get {
        /// Remote files or directories.
        #[arg(required = true, value_name = "REMOTE")]
        remote_paths: Vec<String>,

        /// Local destination. A single file may be given a file name; anything
        /// else is placed inside this directory (default: current directory).
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing files and remove partial downloads without asking.
        #[arg(short, long)]
        force: bool,
    },

    /// Delete files or empty directories.
    Rm {
        /// Remote paths.
        #[arg(required = true)]
        paths: Vec<String>,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Create a directory.
    Mkdir {
        /// Remote path of the new directory.
        path: String,
    },

    /// Rename a file or directory in place.
    Mv {
        /// Remote path.
        path: String,

        /// New name (without a directory part).
        new_name: String,
    },

    /// Erase the whole volume.
    Format {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show firmware version and free space.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reboot the cartridge.
    Reboot,

    /// Switch the cartridge to its bootloader.
    Bootloader,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Inspect the byte order of a local ROM image.
    Rom {
        /// Local file.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a byte value (supports 0x prefix).
fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid byte value '{s}': {e}"))
}

fn main() -> ExitCode {
    // Extract --lang early so help text is localized
    let raw_args: Vec<String> = env::args().collect();
    let mut early_lang: Option<String> = env::var("N64ROMFS_LANG").ok();
    for (i, arg) in raw_args.iter().enumerate() {
        if let Some(val) = arg.strip_prefix("--lang=") {
            early_lang = Some(val.to_string());
        } else if arg == "--lang" && i + 1 < raw_args.len() {
            early_lang = Some(raw_args[i + 1].clone());
        }
    }
    let locale = early_lang.map_or_else(help::detect_locale, |l| help::match_locale(&l));
    rust_i18n::set_locale(&locale);

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let wants_help = raw_args.iter().skip(1).any(|a| a == "-h" || a == "--help");
    if wants_help || raw_args.len() <= 1 {
        print_localized_help(&raw_args);
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();
    if let Some(lang) = &cli.lang {
        rust_i18n::set_locale(&help::match_locale(lang));
    }

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "n64romfs v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style(t!("common.error_prefix")).red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn print_localized_help(raw_args: &[String]) {
    let mut app = help::build_localized_command();
    let found = raw_args.iter().skip(1).find_map(|token| {
        app.get_subcommands()
            .find(|s| s.get_name() == token.as_str())
            .cloned()
    });
    let _ = match found {
        Some(mut sub) => sub.print_help(),
        None => app.print_help(),
    };
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Ls { path, json } => commands::fs::cmd_ls(cli, &config, path, *json),
        Commands::Put {
            local,
            to,
            fix_rom,
            no_fix_rom,
            pi_speed,
            force,
        } => {
            let fix = match (*fix_rom, *no_fix_rom) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let options = commands::transfer::PutOptions {
                fix_rom: fix,
                pi_speed: pi_speed.or(config.upload.pi_bus_speed),
                force: *force,
            };
            commands::transfer::cmd_put(cli, &mut config, local, to, &options)
        },
        Commands::Get {
            remote_paths,
            output,
            force,
        } => commands::transfer::cmd_get(cli, &config, remote_paths, output.as_deref(), *force),
        Commands::Rm { paths, yes } => commands::fs::cmd_rm(cli, &config, paths, *yes),
        Commands::Mkdir { path } => commands::fs::cmd_mkdir(cli, &config, path),
        Commands::Mv { path, new_name } => commands::fs::cmd_mv(cli, &config, path, new_name),
        Commands::Format { yes } => commands::fs::cmd_format(cli, &config, *yes),
        Commands::Info { json } => commands::device::cmd_info(cli, &config, *json),
        Commands::Reboot => commands::device::cmd_reboot(cli, &config),
        Commands::Bootloader => commands::device::cmd_bootloader(cli, &config),
        Commands::ListPorts { json } => {
            commands::device::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Rom { file, json } => commands::rom::cmd_rom(file, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_ls_default_path() {
        let cli = Cli::try_parse_from(["n64romfs", "ls"]).unwrap();
        match cli.command {
            Commands::Ls { path, json } => {
                assert_eq!(path, "/");
                assert!(!json);
            },
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn test_cli_parse_put() {
        let cli = Cli::try_parse_from([
            "n64romfs",
            "put",
            "a.z64",
            "b.v64",
            "--to",
            "/roms",
            "--no-fix-rom",
            "--pi-speed",
            "0x12",
            "-f",
        ])
        .unwrap();
        match cli.command {
            Commands::Put {
                local,
                to,
                fix_rom,
                no_fix_rom,
                pi_speed,
                force,
            } => {
                assert_eq!(local, vec![PathBuf::from("a.z64"), PathBuf::from("b.v64")]);
                assert_eq!(to, "/roms");
                assert!(!fix_rom);
                assert!(no_fix_rom);
                assert_eq!(pi_speed, Some(0x12));
                assert!(force);
            },
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn test_cli_put_fix_flags_conflict() {
        assert!(Cli::try_parse_from(["n64romfs", "put", "a.z64", "--fix-rom", "--no-fix-rom"]).is_err());
    }

    #[test]
    fn test_cli_put_requires_files() {
        assert!(Cli::try_parse_from(["n64romfs", "put"]).is_err());
    }

    #[test]
    fn test_cli_parse_get() {
        let cli = Cli::try_parse_from(["n64romfs", "get", "/saves/a.eep"]).unwrap();
        match cli.command {
            Commands::Get {
                remote_paths,
                output,
                force,
            } => {
                assert_eq!(remote_paths, vec!["/saves/a.eep"]);
                assert!(output.is_none());
                assert!(!force);
            },
            _ => panic!("expected get"),
        }

        let cli = Cli::try_parse_from(["n64romfs", "get", "/roms", "/saves", "-o", "backup", "-f"])
            .unwrap();
        match cli.command {
            Commands::Get {
                remote_paths,
                output,
                force,
            } => {
                assert_eq!(remote_paths, vec!["/roms", "/saves"]);
                assert_eq!(output, Some(PathBuf::from("backup")));
                assert!(force);
            },
            _ => panic!("expected get"),
        }
        assert!(Cli::try_parse_from(["n64romfs", "get"]).is_err());
    }

    #[test]
    fn test_cli_parse_rm_and_mv() {
        let cli = Cli::try_parse_from(["n64romfs", "rm", "/a", "/b", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::Rm { ref paths, yes: true } if paths.len() == 2));

        let cli = Cli::try_parse_from(["n64romfs", "mv", "/a", "b"]).unwrap();
        assert!(matches!(cli.command, Commands::Mv { .. }));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "n64romfs",
            "info",
            "--remote",
            "192.168.0.10:6464",
            "--timeout",
            "3000",
            "-vv",
            "--non-interactive",
        ])
        .unwrap();
        assert_eq!(cli.remote.as_deref(), Some("192.168.0.10:6464"));
        assert_eq!(cli.timeout, Some(3000));
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["n64romfs"]).is_err());
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x12"), Ok(0x12));
        assert_eq!(parse_byte("0XFF"), Ok(0xFF));
        assert_eq!(parse_byte("64"), Ok(64));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("abc").is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code_for(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code_for(&n64romfs::Error::DeviceBusy.into()), 1);
        let bad = n64romfs::Target::network("nope").unwrap_err();
        assert_eq!(exit_code_for(&anyhow::Error::from(bad).context("connecting")), 2);
    }
}
