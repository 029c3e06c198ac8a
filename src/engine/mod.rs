//! Client engine abstraction.
//!
//! The engine owns the actual client sessions. Everything it exposes is
//! blocking and per-handle; the rest of the crate only multiplexes access.
//!
//! Two implementations ship with the crate:
//! - [`TdJson`]: `libtdjson` loaded at runtime
//! - [`Loopback`]: in-process engine answering requests locally

mod loopback;
mod tdjson;

pub use loopback::{Loopback, LoopbackHandle};
pub use tdjson::{TdJson, TdJsonHandle, default_library_name};

use std::time::Duration;

/// Blocking primitives of a client engine.
///
/// Implementations must be safe to call from several threads for *different*
/// handles. Calls on the same handle are serialized by the caller, except for
/// `send` which may interleave with `receive`.
pub trait Engine: Send + Sync + 'static {
    /// Opaque per-client handle. Not `Clone`: `destroy` consumes it.
    type Handle: Send + Sync + 'static;

    /// Create a new client. `None` means the engine ran out of resources.
    fn create(&self) -> Option<Self::Handle>;

    /// Destroy a client. Called exactly once per handle.
    fn destroy(&self, handle: Self::Handle);

    /// Queue a request. Delivery problems surface through later receives.
    fn send(&self, handle: &Self::Handle, request: &str);

    /// Wait up to `timeout` for the next message of this client.
    fn receive(&self, handle: &Self::Handle, timeout: Duration) -> Option<String>;

    /// Synchronously execute a request. Only a subset of requests is allowed;
    /// `handle` may be `None` for requests that do not need a client.
    fn execute(&self, handle: Option<&Self::Handle>, request: &str) -> Option<String>;

    /// Set the verbosity of the engine's internal log.
    fn set_log_verbosity_level(&self, level: i32);

    /// Redirect the engine's internal log to a file. An empty path restores the
    /// default destination. Returns `false` if the file can't be opened.
    fn set_log_file_path(&self, path: &str) -> bool;

    /// Maximum log file size before the engine rotates it.
    fn set_log_max_file_size(&self, max_file_size: i64);
}
