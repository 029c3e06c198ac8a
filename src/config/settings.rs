//! Bridge settings as read from TOML.
//!
//! Files deserialize into [`SettingsLayer`], where every field is optional.
//! Layers are merged (later wins) on top of the programmed defaults and
//! validated into [`BridgeSettings`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::sink::{DEFAULT_MAX_BATCH, DEFAULT_POLL_INTERVAL, PollerConfig};

/// Default timeout of each receive issued by a session pump.
pub const DEFAULT_SESSION_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity of a session's update channel.
pub const DEFAULT_UPDATE_BUFFER: usize = 256;

/// Highest verbosity level TDLib accepts.
pub const MAX_LOG_VERBOSITY: i32 = 1024;

/// Engine log configuration applied at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineLogSettings {
    /// 0 fatal, 1 errors, 2 warnings, 3 info, 4 debug, 5 verbose
    pub verbosity: Option<i32>,
    /// Log file; empty or unset keeps the engine default
    pub file_path: Option<PathBuf>,
    /// Rotation size in bytes
    pub max_file_size: Option<i64>,
}

impl EngineLogSettings {
    fn merge(self, over: EngineLogSettings) -> Self {
        Self {
            verbosity: over.verbosity.or(self.verbosity),
            file_path: over.file_path.or(self.file_path),
            max_file_size: over.max_file_size.or(self.max_file_size),
        }
    }
}

/// One configuration source. Unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsLayer {
    pub library_path: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub max_batch: Option<usize>,
    pub session_receive_timeout_ms: Option<u64>,
    pub update_buffer: Option<usize>,
    #[serde(default)]
    pub log: EngineLogSettings,
}

impl SettingsLayer {
    /// Parse a layer from TOML text.
    pub fn from_toml_str(contents: &str) -> BridgeResult<Self> {
        toml::from_str(contents).map_err(|e| BridgeError::config(e.to_string()))
    }

    /// Overlay `over` on top of `self`.
    pub fn merge(self, over: SettingsLayer) -> Self {
        Self {
            library_path: over.library_path.or(self.library_path),
            poll_interval_ms: over.poll_interval_ms.or(self.poll_interval_ms),
            max_batch: over.max_batch.or(self.max_batch),
            session_receive_timeout_ms: over
                .session_receive_timeout_ms
                .or(self.session_receive_timeout_ms),
            update_buffer: over.update_buffer.or(self.update_buffer),
            log: self.log.merge(over.log),
        }
    }
}

/// Validated settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeSettings {
    /// `libtdjson` to load; `None` uses the platform library name
    pub library_path: Option<PathBuf>,
    pub poller: PollerConfig,
    pub session: SessionSettings,
    pub log: EngineLogSettings,
}

/// Settings of a [`Session`](crate::session::Session) pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub receive_timeout: Duration,
    pub update_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            receive_timeout: DEFAULT_SESSION_RECEIVE_TIMEOUT,
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }
}

impl TryFrom<SettingsLayer> for BridgeSettings {
    type Error = BridgeError;

    fn try_from(layer: SettingsLayer) -> BridgeResult<Self> {
        let interval = layer
            .poll_interval_ms
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis);
        if interval.is_zero() {
            return Err(BridgeError::config("poll_interval_ms must be positive"));
        }

        let max_batch = layer.max_batch.unwrap_or(DEFAULT_MAX_BATCH);
        if max_batch == 0 {
            return Err(BridgeError::config("max_batch must be at least 1"));
        }

        let receive_timeout = layer
            .session_receive_timeout_ms
            .map_or(DEFAULT_SESSION_RECEIVE_TIMEOUT, Duration::from_millis);
        if receive_timeout.is_zero() {
            return Err(BridgeError::config(
                "session_receive_timeout_ms must be positive",
            ));
        }

        let update_buffer = layer.update_buffer.unwrap_or(DEFAULT_UPDATE_BUFFER);
        if update_buffer == 0 {
            return Err(BridgeError::config("update_buffer must be at least 1"));
        }

        if let Some(level) = layer.log.verbosity {
            if !(0..=MAX_LOG_VERBOSITY).contains(&level) {
                return Err(BridgeError::config(format!(
                    "log.verbosity must be between 0 and {MAX_LOG_VERBOSITY}, got {level}"
                )));
            }
        }
        if layer.log.max_file_size.is_some_and(|size| size <= 0) {
            return Err(BridgeError::config("log.max_file_size must be positive"));
        }

        Ok(Self {
            library_path: layer.library_path,
            poller: PollerConfig {
                interval,
                max_batch,
            },
            session: SessionSettings {
                receive_timeout,
                update_buffer,
            },
            log: layer.log,
        })
    }
}
