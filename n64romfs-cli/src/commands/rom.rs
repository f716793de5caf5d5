//! Offline ROM inspection.

use {
    anyhow::{Context, Result},
    console::style,
    indicatif::HumanBytes,
    n64romfs::{RomFormat, rom},
    rust_i18n::t,
    std::{fs, path::Path},
};

fn rom_json(file: &Path, format: RomFormat, size: u64) -> serde_json::Value {
    serde_json::json!({
        "path": file.display().to_string(),
        "format": format.label(),
        "is_rom": format != RomFormat::NotARom,
        "needs_conversion": format.needs_conversion(),
        "rom_extension": rom::has_rom_extension(file),
        "size": size,
    })
}

/// Rom command implementation.
pub(crate) fn cmd_rom(file: &Path, json: bool) -> Result<()> {
    let format = rom::classify_file(file)
        .with_context(|| t!("error.read_file", path = file.display()).to_string())?;
    let size = fs::metadata(file)?.len();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rom_json(file, format, size))?
        );
        return Ok(());
    }

    println!("{}: {format} ({})", file.display(), HumanBytes(size));
    if format.needs_conversion() {
        eprintln!(
            "{} {}",
            style("!").yellow(),
            t!("rom.needs_conversion", format = format)
        );
    } else if format == RomFormat::NotARom && rom::has_rom_extension(file) {
        eprintln!("{} {}", style("!").yellow(), t!("rom.bad_header"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_json() {
        let value = rom_json(Path::new("mario.v64"), RomFormat::V64, 8);
        assert_eq!(value["format"], "V64");
        assert_eq!(value["is_rom"], true);
        assert_eq!(value["needs_conversion"], true);
        assert_eq!(value["rom_extension"], true);

        let value = rom_json(Path::new("notes.txt"), RomFormat::NotARom, 3);
        assert_eq!(value["is_rom"], false);
        assert_eq!(value["rom_extension"], false);
    }
}
