//! User configuration loading for tdbridge.
//!
//! User config location: $XDG_CONFIG_HOME/tdbridge/tdbridge.toml
//! Fallback: the platform config directory (`dirs::config_dir()`).

use std::fs;
use std::path::{Path, PathBuf};

use super::settings::SettingsLayer;
use crate::error::{BridgeError, BridgeResult};

/// Directory and file name of the user config.
const APP_DIR: &str = "tdbridge";
const FILE_NAME: &str = "tdbridge.toml";

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/tdbridge/tdbridge.toml
/// 2. Otherwise: <platform config dir>/tdbridge/tdbridge.toml
///
/// Returns None if neither can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config.is_empty() {
            return Some(PathBuf::from(xdg_config).join(APP_DIR).join(FILE_NAME));
        }
    }

    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}

/// Read one settings file.
pub fn load_settings_file(path: &Path) -> BridgeResult<SettingsLayer> {
    let contents = fs::read_to_string(path)
        .map_err(|e| BridgeError::config(format!("failed to read {}: {}", path.display(), e)))?;
    SettingsLayer::from_toml_str(&contents)
        .map_err(|e| BridgeError::config(format!("{}: {}", path.display(), e)))
}

/// Load the user config if it exists.
///
/// Returns `Ok(None)` when there is no user config file.
pub fn load_user_config() -> BridgeResult<Option<SettingsLayer>> {
    match user_config_path() {
        Some(path) if path.exists() => load_settings_file(&path).map(Some),
        _ => Ok(None),
    }
}
