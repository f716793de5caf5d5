//! Locale selection and localized help output.

use clap::CommandFactory;
use rust_i18n::t;

use crate::Cli;

/// Supported locales for i18n.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "ru"];

/// Detect the best matching locale from system settings.
pub(crate) fn detect_locale() -> String {
    match_locale(&sys_locale::get_locale().unwrap_or_else(|| "en".to_string()))
}

/// Map a system locale string (`ru_RU.UTF-8`, `en-US`, `C`) onto a
/// supported locale.
pub(crate) fn match_locale(system_locale: &str) -> String {
    let locale = system_locale.split('.').next().unwrap_or(system_locale);
    let lang_code = locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_lowercase();

    if SUPPORTED_LOCALES.contains(&lang_code.as_str()) {
        lang_code
    } else {
        "en".to_string()
    }
}

/// Build a clap `Command` whose section headings, command descriptions and
/// argument help come from the locale files.
pub(crate) fn build_localized_command() -> clap::Command {
    // Leaked once per process; clap wants 'static headings.
    let args_heading: &'static str =
        Box::leak(t!("help.arguments_heading").to_string().into_boxed_str());
    let opts_heading: &'static str =
        Box::leak(t!("help.options_heading").to_string().into_boxed_str());

    let tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {cmds_h}:\n{{subcommands}}\n\n\
         {opts_h}:\n{{options}}\n\n\
         {{after-help}}\n",
        usage_h = t!("help.usage_heading"),
        cmds_h = t!("help.commands_heading"),
        opts_h = t!("help.options_heading"),
    );

    let sub_tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {{all-args}}\n",
        usage_h = t!("help.usage_heading"),
    );

    let heading = move |arg: clap::Arg| {
        let arg = localize_arg(arg);
        if arg.get_short().is_none() && arg.get_long().is_none() {
            arg.help_heading(args_heading)
        } else {
            arg.help_heading(opts_heading)
        }
    };

    Cli::command()
        .help_template(&tpl)
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .mut_args(heading)
        .mut_subcommands(move |sub| {
            let about_key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let localized = t!(&about_key).to_string();
            let sub = if localized != about_key {
                sub.about(localized)
            } else {
                sub
            };
            sub.help_template(sub_tpl.clone()).mut_args(heading)
        })
}

/// Replace an arg's help text with `arg.<id>.help` from the current locale,
/// keeping the doc-comment text when there is no translation.
pub(crate) fn localize_arg(arg: clap::Arg) -> clap::Arg {
    let key = format!("arg.{}.help", arg.get_id().as_str());
    let localized = t!(&key).to_string();
    if localized != key {
        arg.help(localized)
    } else {
        arg
    }
}
