//! Request/response correlation on top of one client.
//!
//! A `Session` tags each request with a unique `@extra`, which TDLib echoes
//! back in the matching response. A pump task keeps receiving through the
//! async bridge and routes every message either to the waiter registered for
//! its `@extra` or, if there is none, onto the update channel.
//!
//! The pump only checks for cancellation between receives, so no message is
//! lost to a receive that was abandoned halfway. Closing therefore takes up to
//! one receive timeout.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::bridge::TdBridge;
use crate::client::ClientId;
use crate::config::SessionSettings;
use crate::engine::Engine;
use crate::error::{BridgeError, BridgeResult};

const LOG_TARGET: &str = "tdbridge::session";

type Waiters = DashMap<String, oneshot::Sender<Value>>;

/// Request/response front end for one client.
pub struct Session<E: Engine> {
    bridge: Arc<TdBridge<E>>,
    id: ClientId,
    waiters: Arc<Waiters>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl<E: Engine> Session<E> {
    /// Start pumping messages of client `id`.
    ///
    /// Must be called within a tokio runtime. Returns the session and the
    /// receiver of updates (messages that answer no pending request). If the
    /// update buffer is full, further updates are dropped with a warning.
    pub fn start(
        bridge: Arc<TdBridge<E>>,
        id: ClientId,
        settings: SessionSettings,
    ) -> BridgeResult<(Self, mpsc::Receiver<Value>)> {
        if !bridge.registry().contains(id) {
            return Err(BridgeError::unknown_client(id));
        }

        let (updates_tx, updates_rx) = mpsc::channel(settings.update_buffer);
        let waiters = Arc::new(Waiters::new());
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump_loop(
            bridge.clone(),
            id,
            settings,
            waiters.clone(),
            updates_tx,
            cancel.clone(),
        ));

        let session = Self {
            bridge,
            id,
            waiters,
            cancel,
            pump: Some(pump),
        };
        Ok((session, updates_rx))
    }

    /// Client this session drives.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Send `request` (a JSON object with `@type`) and wait for its response.
    ///
    /// A TDLib `error` response becomes [`BridgeError::Td`]. The returned
    /// object no longer carries the internal `@extra` tag.
    pub async fn run(&self, request: Value) -> BridgeResult<Value> {
        let Value::Object(mut fields) = request else {
            return Err(BridgeError::invalid_request("request must be a JSON object"));
        };
        let method = fields
            .get("@type")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::invalid_request("request has no @type"))?
            .to_string();

        let extra = Ulid::new().to_string();
        fields.insert("@extra".to_string(), Value::String(extra.clone()));

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(extra.clone(), tx);

        if let Err(e) = self.bridge.send(self.id, &Value::Object(fields).to_string()) {
            self.waiters.remove(&extra);
            return Err(e);
        }
        log::trace!(target: LOG_TARGET, "Sent {} as {}", method, extra);

        let mut response = rx.await.map_err(|_| {
            BridgeError::dispatch(format!("session closed before {method} was answered"))
        })?;

        if let Some(object) = response.as_object_mut() {
            object.remove("@extra");
        }
        match response.get("@type").and_then(Value::as_str) {
            Some("error") => Err(BridgeError::Td {
                code: response.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: response
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => Ok(response),
        }
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    /// Stop the pump. Requests still pending fail with a dispatch error.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                log::error!(target: LOG_TARGET, "Session pump for {} failed: {}", self.id, e);
            }
        }
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump_loop<E: Engine>(
    bridge: Arc<TdBridge<E>>,
    id: ClientId,
    settings: SessionSettings,
    waiters: Arc<Waiters>,
    updates: mpsc::Sender<Value>,
    cancel: CancellationToken,
) {
    log::debug!(target: LOG_TARGET, "Session pump for client {} started", id);

    while !cancel.is_cancelled() {
        let received = match bridge.receive_future(id, settings.receive_timeout) {
            Ok(future) => future.await,
            Err(e) => Err(e),
        };

        match received {
            Ok(text) if text.is_empty() => {}
            Ok(text) => route(&text, &waiters, &updates),
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Session pump for client {} stopping: {}", id, e);
                break;
            }
        }
    }

    // Dropping the senders fails every pending run()
    waiters.clear();
    log::debug!(target: LOG_TARGET, "Session pump for client {} stopped", id);
}

/// Deliver one message to its waiter, or publish it as an update.
fn route(text: &str, waiters: &Waiters, updates: &mpsc::Sender<Value>) {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "Dropping unparsable message: {}", e);
            return;
        }
    };

    let waiter = message
        .get("@extra")
        .and_then(Value::as_str)
        .and_then(|extra| waiters.remove(extra))
        .map(|(_, tx)| tx);

    match waiter {
        Some(tx) => {
            // The caller may have given up waiting
            let _ = tx.send(message);
        }
        None => match updates.try_send(message) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                log::warn!(
                    target: LOG_TARGET,
                    "Update buffer full, dropping {}",
                    dropped.get("@type").and_then(Value::as_str).unwrap_or("message")
                );
            }
        },
    }
}
