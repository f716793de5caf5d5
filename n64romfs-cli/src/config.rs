//! Configuration file support for n64romfs.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (N64ROMFS_*)
//! 3. Local config file (./n64romfs.toml)
//! 4. Global config file (~/.config/n64romfs/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "n64romfs.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred USB serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub usb_port: Option<String>,
    /// Default network target as `host:port`.
    pub remote: Option<String>,
    /// Per-call I/O timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Convert byte-swapped ROMs to Z64 order when not asking.
    pub fix_rom: Option<bool>,
    /// Ask before converting a byte-swapped ROM.
    pub ask_fix_rom: Option<bool>,
    /// PI bus speed byte to patch into uploaded ROMs.
    pub pi_bus_speed: Option<u8>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload settings.
    #[serde(default)]
    pub upload: UploadConfig,
    /// File named with `--config`, if any.
    #[serde(skip)]
    explicit_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        let mut config = if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            if path.exists() {
                warn!(
                    "Could not load config from {}, using defaults",
                    path.display()
                );
            }
            Self::default()
        };
        config.explicit_path = Some(path.to_path_buf());
        config
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "n64romfs").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Values set in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            upload,
            explicit_path: _,
        } = other;

        if connection.usb_port.is_some() {
            self.connection.usb_port = connection.usb_port;
        }
        if connection.remote.is_some() {
            self.connection.remote = connection.remote;
        }
        if connection.timeout_ms.is_some() {
            self.connection.timeout_ms = connection.timeout_ms;
        }

        if upload.fix_rom.is_some() {
            self.upload.fix_rom = upload.fix_rom;
        }
        if upload.ask_fix_rom.is_some() {
            self.upload.ask_fix_rom = upload.ask_fix_rom;
        }
        if upload.pi_bus_speed.is_some() {
            self.upload.pi_bus_speed = upload.pi_bus_speed;
        }
    }

    /// Whether the byte-order prompt should be shown.
    pub fn should_ask_fix_rom(&self) -> bool {
        self.upload.ask_fix_rom.unwrap_or(true)
    }

    /// Byte-order conversion to apply when not asking.
    pub fn fix_rom_default(&self) -> bool {
        self.upload.fix_rom.unwrap_or(false)
    }

    /// Remember a "don't ask again" answer to the byte-order prompt.
    ///
    /// Written to the `--config` file when one was given, else to the local
    /// file when it exists, else to the global file.
    pub fn remember_fix_rom(&mut self, fix: bool) -> anyhow::Result<PathBuf> {
        let path = if let Some(path) = &self.explicit_path {
            path.clone()
        } else if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };

        store_fix_rom(&path, fix)?;
        self.upload.fix_rom = Some(fix);
        self.upload.ask_fix_rom = Some(false);
        info!("Saved byte-order preference to {}", path.display());
        Ok(path)
    }
}

/// Update the `[upload]` answer in `path`, keeping the rest of the file.
fn store_fix_rom(path: &Path, fix: bool) -> anyhow::Result<()> {
    let mut on_disk = Config::load_from_file(path).unwrap_or_default();
    on_disk.upload.fix_rom = Some(fix);
    on_disk.upload.ask_fix_rom = Some(false);
    fs::write(path, toml::to_string_pretty(&on_disk)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.usb_port.is_none());
        assert!(config.connection.remote.is_none());
        assert!(config.connection.timeout_ms.is_none());
        assert!(config.should_ask_fix_rom());
        assert!(!config.fix_rom_default());
        assert!(config.upload.pi_bus_speed.is_none());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.connection.usb_port = Some("/dev/ttyACM0".to_string());
        base.connection.timeout_ms = Some(1000);

        let mut other = Config::default();
        other.connection.remote = Some("192.168.1.20:6464".to_string());
        other.connection.timeout_ms = Some(5000);
        other.upload.ask_fix_rom = Some(false);

        base.merge(other);

        assert_eq!(base.connection.usb_port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.connection.remote.as_deref(), Some("192.168.1.20:6464"));
        assert_eq!(base.connection.timeout_ms, Some(5000));
        assert!(!base.should_ask_fix_rom());
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.upload.fix_rom = Some(true);
        base.upload.pi_bus_speed = Some(0x12);

        base.merge(Config::default());

        assert_eq!(base.upload.fix_rom, Some(true));
        assert_eq!(base.upload.pi_bus_speed, Some(0x12));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
usb_port = "/dev/ttyACM1"
remote = "10.0.0.2:6464"
timeout_ms = 2500

[upload]
fix_rom = true
ask_fix_rom = false
pi_bus_speed = 18
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.usb_port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.connection.remote.as_deref(), Some("10.0.0.2:6464"));
        assert_eq!(config.connection.timeout_ms, Some(2500));
        assert!(config.fix_rom_default());
        assert!(!config.should_ask_fix_rom());
        assert_eq!(config.upload.pi_bus_speed, Some(18));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.remote.is_none());
        assert!(config.upload.fix_rom.is_none());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[connection]\nremote = \"127.0.0.1:6464\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.remote.as_deref(), Some("127.0.0.1:6464"));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.remote.is_none());
    }

    #[test]
    fn test_remember_fix_rom_keeps_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[connection]\nusb_port = \"COM4\"\n").unwrap();

        let mut config = Config::load_from_path(&path);
        let written = config.remember_fix_rom(true).unwrap();
        assert_eq!(written, path);
        assert!(!config.should_ask_fix_rom());

        let reloaded = Config::load_from_path(&path);
        assert_eq!(reloaded.connection.usb_port.as_deref(), Some("COM4"));
        assert_eq!(reloaded.upload.fix_rom, Some(true));
        assert_eq!(reloaded.upload.ask_fix_rom, Some(false));
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("n64romfs"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
