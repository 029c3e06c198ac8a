//! Non-blocking access to blocking TDLib JSON clients.
//!
//! Messages are either pulled (`receive_all`, `receive_async`,
//! `receive_future`) or pushed by a background poller into registered sinks.

pub mod bridge;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod receive;
pub mod session;
pub mod sink;

pub use bridge::TdBridge;
pub use client::{ClientId, ClientRegistry};
pub use config::{BridgeSettings, load_settings};
pub use engine::{Engine, Loopback, TdJson};
pub use error::{BridgeError, BridgeResult};
pub use receive::{Completion, ReceiveFuture};
pub use session::Session;
pub use sink::{PollerConfig, SinkWriter, create_pipe};
