//! Error handling types for tdbridge
//!
//! Registry errors are returned synchronously. Errors produced on a receive
//! worker only ever travel through the completion that worker owns.

use std::sync::PoisonError;
use thiserror::Error;

use crate::client::ClientId;

/// Error type shared by every bridge operation
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The identifier does not name a live client
    #[error("Unknown client: {id}")]
    UnknownClient { id: ClientId },

    /// The engine failed to create or operate a client
    #[error("Engine resource error: {message}")]
    EngineResource { message: String },

    /// A sink could not be written to
    #[error("Failed to write to sink of client {id}: {source}")]
    SinkWrite {
        id: ClientId,
        #[source]
        source: std::io::Error,
    },

    /// A receive worker could not be launched or died before delivering
    #[error("Dispatch error: {message}")]
    Dispatch { message: String },

    /// A request could not be built or sent
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// TDLib answered a request with an `error` object
    #[error("TDLib error {code}: {message}")]
    Td { code: i64, message: String },

    /// The engine library could not be loaded
    #[error("Library error: {0}")]
    Library(#[from] libloading::Error),

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Helper trait to recover from poisoned locks
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "tdbridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

impl BridgeError {
    /// Create an unknown client error
    pub fn unknown_client(id: ClientId) -> Self {
        BridgeError::UnknownClient { id }
    }

    /// Create an engine resource error
    pub fn engine_resource(message: impl Into<String>) -> Self {
        BridgeError::EngineResource {
            message: message.into(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch(message: impl Into<String>) -> Self {
        BridgeError::Dispatch {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        BridgeError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Whether this error means the client id is not (or no longer) registered.
    pub fn is_unknown_client(&self) -> bool {
        matches!(self, BridgeError::UnknownClient { .. })
    }
}
