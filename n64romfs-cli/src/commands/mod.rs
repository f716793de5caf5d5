//! Command implementations.
//!
//! Each group of subcommands lives in its own module; the prompts they share
//! are here.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod fs;
pub(crate) mod rom;
pub(crate) mod transfer;

use {
    crate::{Cli, CliError, is_interactive, target::map_prompt_error},
    anyhow::Result,
    dialoguer::{Confirm, theme::ColorfulTheme},
};

/// Ask a yes/no question.
///
/// `assume_yes` answers without asking. Without a terminal (or with
/// `--non-interactive`) the question cannot be asked and `refusal` becomes a
/// usage error.
pub(crate) fn confirm(cli: &Cli, prompt: &str, assume_yes: bool, refusal: &str) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !is_interactive(cli) {
        return Err(CliError::Usage(refusal.to_string()).into());
    }
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false))
}
