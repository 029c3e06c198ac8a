//! Receive paths: synchronous draining and the asynchronous bridge.
//!
//! Every path takes the client's receive guard first, so at most one engine
//! receive runs per handle and messages come out in engine order.
//!
//! ```text
//! receive_async(id, timeout, cb)
//!       │
//!       ├─► resolve client (UnknownClient returned synchronously)
//!       │
//!       └─► spawn worker thread ──► lock receive guard
//!                                       │
//!                                       └─► engine.receive(handle, timeout)
//!                                               │
//!                                               └─► Completion::complete(result)
//! ```

mod completion;

pub use completion::Completion;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::client::Client;
use crate::engine::Engine;
use crate::error::{BridgeError, BridgeResult};

const LOG_TARGET: &str = "tdbridge::receive";

/// Wait up to `timeout` for one message, then drain whatever else is
/// immediately available.
///
/// Returns an empty vector when nothing arrived. Blocks the calling thread.
pub fn receive_all<E: Engine>(
    client: &Client<E>,
    timeout: Duration,
) -> BridgeResult<Vec<String>> {
    let guard = client.lock_receive();
    let mut messages = Vec::new();
    let mut next = guard.receive(timeout)?;
    while let Some(message) = next {
        messages.push(message);
        next = guard.receive(Duration::ZERO)?;
    }
    Ok(messages)
}

/// Run one receive on a dedicated worker thread and report it through
/// `completion`.
///
/// Returns immediately. An empty string means nothing arrived within
/// `timeout`. If the worker can't be spawned, the dropped completion reports
/// a dispatch error.
pub fn dispatch_receive<E: Engine>(
    client: Arc<Client<E>>,
    timeout: Duration,
    completion: Completion,
) {
    let id = client.id();
    let spawned = thread::Builder::new()
        .name(format!("tdbridge-receive-{id}"))
        .spawn(move || {
            let result = {
                let guard = client.lock_receive();
                guard.receive(timeout).map(Option::unwrap_or_default)
            };
            drop(client);
            completion.complete(result);
        });

    if let Err(e) = spawned {
        log::error!(
            target: LOG_TARGET,
            "Failed to spawn receive worker for client {}: {}",
            id,
            e
        );
    }
}

/// Like [`dispatch_receive`], but the outcome is awaited as a future.
pub fn receive_future<E: Engine>(client: Arc<Client<E>>, timeout: Duration) -> ReceiveFuture {
    let (tx, rx) = oneshot::channel();
    dispatch_receive(
        client,
        timeout,
        Completion::new(move |result| {
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(result);
        }),
    );
    ReceiveFuture { rx }
}

/// Future resolving to the outcome of one asynchronous receive.
#[must_use = "futures do nothing unless awaited"]
pub struct ReceiveFuture {
    rx: oneshot::Receiver<BridgeResult<String>>,
}

impl Future for ReceiveFuture {
    type Output = BridgeResult<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(BridgeError::dispatch("receive worker dropped its result channel"))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientId;
    use crate::engine::Loopback;
    use std::sync::mpsc;
    use std::time::Instant;

    fn client(engine: Loopback) -> Arc<Client<Loopback>> {
        let engine = Arc::new(engine);
        let handle = engine.create().unwrap();
        Arc::new(Client::new(ClientId::new(1), engine, handle))
    }

    #[test]
    fn receive_all_returns_empty_on_timeout() {
        let client = client(Loopback::new());
        let start = Instant::now();
        let messages = receive_all(&client, Duration::from_millis(20)).unwrap();
        assert!(messages.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn receive_all_drains_burst_in_order() {
        let client = client(Loopback::new());
        for x in ["a", "b", "c"] {
            client
                .send(&format!(r#"{{"@type":"testCallString","x":"{x}"}}"#))
                .unwrap();
        }
        let messages = receive_all(&client, Duration::from_secs(1)).unwrap();
        let values: Vec<String> = messages
            .iter()
            .map(|m| {
                let value: serde_json::Value = serde_json::from_str(m).unwrap();
                value["value"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn dispatch_receive_delivers_empty_string_when_nothing_arrives() {
        let client = client(Loopback::new());
        let (tx, rx) = mpsc::channel();
        dispatch_receive(
            client,
            Duration::from_millis(10),
            Completion::new(move |result| tx.send(result).unwrap()),
        );
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap(), "");
    }

    #[test]
    fn dispatch_receive_reports_destroyed_client() {
        let client = client(Loopback::new());
        client.destroy();
        let (tx, rx) = mpsc::channel();
        dispatch_receive(
            client,
            Duration::from_millis(10),
            Completion::new(move |result| tx.send(result).unwrap()),
        );
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(result.unwrap_err().is_unknown_client());
    }

    #[tokio::test]
    async fn receive_future_resolves_with_message() {
        let client = client(Loopback::new());
        client.send(r#"{"@type":"testCallEmpty"}"#).unwrap();
        let message = receive_future(client, Duration::from_secs(1)).await.unwrap();
        assert!(message.contains("\"ok\""));
    }

    #[test]
    fn concurrent_receives_on_one_client_never_overlap() {
        let engine = Arc::new(Loopback::new());
        let handle = engine.create().unwrap();
        let client = Arc::new(Client::new(ClientId::new(1), engine.clone(), handle));
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            dispatch_receive(
                client.clone(),
                Duration::from_millis(20),
                Completion::new(move |result| tx.send(result).unwrap()),
            );
        }
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        }
        assert_eq!(engine.overlapping_receives(), 0);
    }
}
