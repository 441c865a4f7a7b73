//! # Settings Module
//!
//! Persisted operator settings: the link configuration plus the handful of
//! session toggles worth restoring between runs. Stored as RON; a missing or
//! unreadable file falls back to defaults with a logged warning, and missing
//! fields default individually so old files keep loading.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::serial::port::LinkConfig;

fn default_auto_send_interval_ms() -> u64 {
    1000
}

/// Everything the tool remembers between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub config: LinkConfig,
    /// Timestamp every log entry.
    #[serde(default)]
    pub show_timestamp: bool,
    /// Append `\r\n` to outbound text frames.
    #[serde(default)]
    pub append_newline: bool,
    /// Render inbound traffic as hex instead of text.
    #[serde(default)]
    pub hex_display: bool,
    #[serde(default = "default_auto_send_interval_ms")]
    pub auto_send_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config: LinkConfig::default(),
            show_timestamp: false,
            append_newline: false,
            hex_display: false,
            auto_send_interval_ms: default_auto_send_interval_ms(),
        }
    }
}

impl Settings {
    /// Loads settings, falling back to defaults when the file is absent or
    /// unparseable.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let Ok(data) = std::fs::read_to_string(path) else {
            return Settings::default();
        };
        match ron::from_str::<Settings>(&data) {
            Ok(settings) => {
                info!("loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!(
                    "failed to parse settings file {}: {e}, using defaults",
                    path.display()
                );
                Settings::default()
            }
        }
    }

    /// Saves settings, creating the parent directory when needed.
    ///
    /// # Errors
    ///
    /// File and serialization failures.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let data = ron::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, data)?;
        info!("saved settings to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port::{DataBits, Parity, StopBits};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join("serial_probe_settings_test")
            .join(name)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("/definitely/not/here.ron"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path("round_trip.ron");
        let mut settings = Settings::default();
        settings.config = LinkConfig {
            port_name: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::Two,
            parity: Parity::Even,
            ..LinkConfig::default()
        };
        settings.show_timestamp = true;
        settings.auto_send_interval_ms = 250;

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path);
        assert_eq!(loaded, settings);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_fields_default() {
        let path = temp_path("partial.ron");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "(show_timestamp: true)").unwrap();

        let settings = Settings::load(&path);
        assert!(settings.show_timestamp);
        assert_eq!(settings.config, LinkConfig::default());
        assert_eq!(settings.auto_send_interval_ms, 1000);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let path = temp_path("corrupt.ron");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not ron at all {{{").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
        let _ = std::fs::remove_file(&path);
    }
}
