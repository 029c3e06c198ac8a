pub mod settings;
pub mod user;

pub use settings::{
    BridgeSettings, EngineLogSettings, SessionSettings, SettingsLayer,
    DEFAULT_SESSION_RECEIVE_TIMEOUT, DEFAULT_UPDATE_BUFFER,
};
pub use user::{load_settings_file, load_user_config, user_config_path};

use std::path::Path;

use crate::error::BridgeResult;

/// Severity of a settings loading event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

/// Something worth reporting that happened while loading settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }

    /// Forward the event to the `log` facade.
    pub fn log(&self) {
        match self.kind {
            SettingsEventKind::Info => log::info!(target: "tdbridge::config", "{}", self.message),
            SettingsEventKind::Warning => {
                log::warn!(target: "tdbridge::config", "{}", self.message)
            }
        }
    }
}

/// Result of [`load_settings`].
#[derive(Debug)]
pub struct SettingsLoadOutcome {
    pub settings: BridgeSettings,
    pub events: Vec<SettingsEvent>,
}

/// Load settings from all sources.
///
/// Precedence (later wins): programmed defaults < user config < `explicit`.
/// A broken user config is reported as a warning and skipped; a broken
/// explicit file is an error since the caller asked for it.
pub fn load_settings(explicit: Option<&Path>) -> BridgeResult<SettingsLoadOutcome> {
    let mut events = Vec::new();
    let mut layer = SettingsLayer::default();

    match load_user_config() {
        Ok(Some(user)) => {
            events.push(SettingsEvent::info("Loaded user config"));
            layer = layer.merge(user);
        }
        Ok(None) => {}
        Err(err) => events.push(SettingsEvent::warning(format!(
            "Failed to load user config: {}",
            err
        ))),
    }

    if let Some(path) = explicit {
        layer = layer.merge(load_settings_file(path)?);
        events.push(SettingsEvent::info(format!(
            "Loaded config file {}",
            path.display()
        )));
    }

    let settings = BridgeSettings::try_from(layer)?;
    Ok(SettingsLoadOutcome { settings, events })
}

/// Run `f` with `XDG_CONFIG_HOME` pointing at `dir`, restoring it afterwards.
///
/// Callers must be `#[serial(xdg_env)]`.
#[cfg(test)]
pub(crate) fn with_xdg_config_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
    let original = std::env::var_os("XDG_CONFIG_HOME");

    // SAFETY: #[serial(xdg_env)] on every caller prevents concurrent access to XDG_CONFIG_HOME
    unsafe {
        std::env::set_var("XDG_CONFIG_HOME", dir);
    }

    let result = f();

    // SAFETY: Same as above - restoring original env state
    unsafe {
        match original {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
    result
}
