//! The bridge facade.
//!
//! `TdBridge` ties the client registry, the receive paths and the sink
//! poller together and is the surface bindings talk to.
//!
//! # Sink registration policy
//!
//! `register_sink` requires the client to be live and fails with
//! [`BridgeError::UnknownClient`] otherwise, both before `create` and after
//! `destroy`. The liveness check and the insertion happen while the registry
//! entry is pinned, so a concurrent `destroy` always observes (and removes)
//! the new sink.
//!
//! # Mixing delivery paths
//!
//! Pulling (`receive_all`, `receive_async`) from a client that also has a sink
//! is allowed but splits its messages between the two paths. Receives never
//! overlap on one handle, so neither path sees reordered or duplicated
//! messages, but each sees only part of the stream.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{Client, ClientId, ClientRegistry};
use crate::config::{BridgeSettings, EngineLogSettings};
use crate::engine::Engine;
use crate::error::{BridgeError, BridgeResult};
use crate::receive::{self, Completion, ReceiveFuture};
use crate::sink::{Poller, PollerConfig, SinkTable, SinkWriter};

const LOG_TARGET: &str = "tdbridge::bridge";

/// Multiplexes blocking engine clients for non-blocking consumers.
pub struct TdBridge<E: Engine> {
    registry: Arc<ClientRegistry<E>>,
    sinks: Arc<SinkTable>,
    poller: Poller,
}

impl<E: Engine> TdBridge<E> {
    /// Create a bridge with the default poller configuration.
    pub fn new(engine: E) -> BridgeResult<Self> {
        Self::with_poller_config(engine, PollerConfig::default())
    }

    /// Create a bridge and start its poller thread.
    pub fn with_poller_config(engine: E, config: PollerConfig) -> BridgeResult<Self> {
        let registry = Arc::new(ClientRegistry::new(Arc::new(engine)));
        let sinks = Arc::new(SinkTable::new());
        let poller = Poller::spawn(registry.clone(), sinks.clone(), config).map_err(|e| {
            BridgeError::dispatch(format!("failed to start poller thread: {e}"))
        })?;

        Ok(Self {
            registry,
            sinks,
            poller,
        })
    }

    /// Create a bridge from settings, applying the engine log configuration.
    pub fn from_settings(engine: E, settings: &BridgeSettings) -> BridgeResult<Self> {
        let bridge = Self::with_poller_config(engine, settings.poller)?;
        bridge.apply_log_settings(&settings.log)?;
        Ok(bridge)
    }

    /// The engine this bridge drives.
    pub fn engine(&self) -> &Arc<E> {
        self.registry.engine()
    }

    /// The client registry.
    pub fn registry(&self) -> &ClientRegistry<E> {
        &self.registry
    }

    fn client(&self, id: ClientId) -> BridgeResult<Arc<Client<E>>> {
        self.registry.get(id)
    }

    // ---- client lifecycle ----

    /// Create a client.
    pub fn create(&self) -> BridgeResult<ClientId> {
        self.registry.create()
    }

    /// Destroy a client and drop its sink.
    ///
    /// Waits for engine calls already running on the client, at most the
    /// longest pending receive timeout. Afterwards every operation on `id`
    /// fails with [`BridgeError::UnknownClient`].
    pub fn destroy(&self, id: ClientId) -> BridgeResult<()> {
        let client = self.registry.remove(id)?;
        if self.sinks.remove(id) {
            log::debug!(target: LOG_TARGET, "Removed sink of destroyed client {}", id);
        }
        client.destroy();
        log::debug!(target: LOG_TARGET, "Destroyed client {}", id);
        Ok(())
    }

    /// Queue a request for a client.
    pub fn send(&self, id: ClientId, request: &str) -> BridgeResult<()> {
        self.registry.send(id, request)
    }

    /// Synchronously execute a request on a client.
    pub fn execute(&self, id: ClientId, request: &str) -> BridgeResult<String> {
        self.registry.execute(id, request)
    }

    /// Execute a request that needs no client.
    pub fn execute_static(&self, request: &str) -> String {
        self.registry.execute_static(request)
    }

    // ---- pull delivery ----

    /// Wait up to `timeout` for a message, then drain the burst that is
    /// immediately available. Blocks the calling thread.
    pub fn receive_all(&self, id: ClientId, timeout: Duration) -> BridgeResult<Vec<String>> {
        let client = self.client(id)?;
        receive::receive_all(&client, timeout)
    }

    /// Receive one message on a worker thread and hand the result to
    /// `on_complete` exactly once. An empty string means nothing arrived.
    ///
    /// Fails synchronously only if `id` is unknown.
    pub fn receive_async<F>(
        &self,
        id: ClientId,
        timeout: Duration,
        on_complete: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(BridgeResult<String>) + Send + 'static,
    {
        let client = self.client(id)?;
        receive::dispatch_receive(client, timeout, Completion::new(on_complete));
        Ok(())
    }

    /// Receive one message on a worker thread, awaiting the result.
    pub fn receive_future(&self, id: ClientId, timeout: Duration) -> BridgeResult<ReceiveFuture> {
        let client = self.client(id)?;
        Ok(receive::receive_future(client, timeout))
    }

    // ---- push delivery ----

    /// Register (or replace) the sink of a live client.
    pub fn register_sink(&self, id: ClientId, writer: SinkWriter) -> BridgeResult<()> {
        self.registry.with_live(id, |_| self.sinks.insert(id, writer))?;
        log::debug!(target: LOG_TARGET, "Registered sink for client {}", id);
        Ok(())
    }

    /// Remove the sink of a client; no-op if there is none.
    pub fn unregister_sink(&self, id: ClientId) {
        if self.sinks.remove(id) {
            log::debug!(target: LOG_TARGET, "Unregistered sink for client {}", id);
        }
    }

    /// Remove every sink.
    pub fn clear_sinks(&self) {
        let removed = self.sinks.clear();
        log::debug!(target: LOG_TARGET, "Cleared {} sinks", removed);
    }

    /// Whether `id` has a sink registered.
    pub fn has_sink(&self, id: ClientId) -> bool {
        self.sinks.contains(id)
    }

    /// Stop the poller. Registered sinks stay registered but receive nothing
    /// more. Idempotent.
    pub fn shutdown(&mut self) {
        self.poller.shutdown();
    }

    /// Whether the poller thread is running.
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    // ---- engine log passthrough ----

    /// Set the engine's log verbosity.
    pub fn set_log_verbosity_level(&self, level: i32) {
        self.engine().set_log_verbosity_level(level);
    }

    /// Redirect the engine log to a file; empty restores the default.
    pub fn set_log_file_path(&self, path: &str) -> bool {
        self.engine().set_log_file_path(path)
    }

    /// Maximum engine log file size before rotation.
    pub fn set_log_max_file_size(&self, max_file_size: i64) {
        self.engine().set_log_max_file_size(max_file_size);
    }

    /// Apply every configured engine log setting.
    pub fn apply_log_settings(&self, log: &EngineLogSettings) -> BridgeResult<()> {
        if let Some(level) = log.verbosity {
            self.set_log_verbosity_level(level);
        }
        if let Some(size) = log.max_file_size {
            self.set_log_max_file_size(size);
        }
        if let Some(path) = &log.file_path {
            let path = path.to_string_lossy();
            if !self.set_log_file_path(&path) {
                return Err(BridgeError::config(format!(
                    "engine could not open log file {path}"
                )));
            }
        }
        Ok(())
    }
}

impl<E: Engine> Drop for TdBridge<E> {
    fn drop(&mut self) {
        self.poller.shutdown();
        self.sinks.clear();
    }
}
