//! Shell completion generation.

use {
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    std::io,
};

use crate::Cli;

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
