//! Background poller pushing client messages into their sinks.
//!
//! One dedicated thread repeatedly walks a snapshot of the sink table. For
//! every entry it resolves the client, takes the entry lock, and if no other
//! receive is running on that client drains up to `max_batch` messages with
//! zero-timeout receives, writing each one to the sink. After a full pass it
//! sleeps for `interval`.
//!
//! Failures stay local to their entry: a write error unregisters that sink
//! and the pass continues with the next one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::table::{SinkEntry, SinkTable, write_message};
use crate::client::{Client, ClientRegistry};
use crate::engine::Engine;
use crate::error::BridgeError;

const LOG_TARGET: &str = "tdbridge::sink::poller";

/// Default pause between passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3);

/// Default number of messages drained per client and pass.
pub const DEFAULT_MAX_BATCH: usize = 32;

/// Poller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause after each full pass
    pub interval: Duration,
    /// Upper bound of messages taken from one client per pass
    pub max_batch: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// Counters for a single pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassStats {
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Handle to the running poller thread. Stops the thread on drop.
pub(crate) struct Poller {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Start the poller thread.
    pub(crate) fn spawn<E: Engine>(
        registry: Arc<ClientRegistry<E>>,
        sinks: Arc<SinkTable>,
        config: PollerConfig,
    ) -> std::io::Result<Self> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("tdbridge-poller".to_string())
            .spawn(move || poll_loop(&registry, &sinks, config, &token))?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for the current pass to finish.
    pub(crate) fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!(target: LOG_TARGET, "Poller thread panicked");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop<E: Engine>(
    registry: &ClientRegistry<E>,
    sinks: &SinkTable,
    config: PollerConfig,
    cancel: &CancellationToken,
) {
    log::debug!(
        target: LOG_TARGET,
        "Poller started (interval {:?}, max batch {})",
        config.interval,
        config.max_batch
    );

    while !cancel.is_cancelled() {
        let stats = poll_pass(registry, sinks, config.max_batch);
        if stats != PassStats::default() {
            log::trace!(target: LOG_TARGET, "Pass finished: {:?}", stats);
        }
        thread::sleep(config.interval);
    }

    log::debug!(target: LOG_TARGET, "Poller stopped");
}

/// One pass over every registered sink.
pub(crate) fn poll_pass<E: Engine>(
    registry: &ClientRegistry<E>,
    sinks: &SinkTable,
    max_batch: usize,
) -> PassStats {
    let mut stats = PassStats::default();

    for entry in sinks.snapshot().values() {
        // Resolved before the entry lock is taken
        let client = match registry.get(entry.id()) {
            Ok(client) => client,
            Err(_) => {
                if sinks.remove_entry(entry) {
                    log::debug!(
                        target: LOG_TARGET,
                        "Pruned sink of vanished client {}",
                        entry.id()
                    );
                    stats.pruned += 1;
                }
                continue;
            }
        };

        match drain_into(entry, &client, max_batch) {
            Ok(count) => stats.delivered += count,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "{}; unregistering sink", e);
                sinks.remove_entry(entry);
                stats.failed += 1;
            }
        }
    }

    stats
}

/// Move up to `max_batch` ready messages of `client` into `entry`.
fn drain_into<E: Engine>(
    entry: &SinkEntry,
    client: &Client<E>,
    max_batch: usize,
) -> Result<usize, BridgeError> {
    entry
        .with_writer(|writer| -> Result<usize, BridgeError> {
            // Someone else is receiving on this client; try again next pass
            let Some(guard) = client.try_lock_receive() else {
                return Ok(0);
            };

            let mut delivered = 0;
            while delivered < max_batch {
                let message = match guard.receive(Duration::ZERO) {
                    Ok(Some(message)) => message,
                    // Nothing ready, or the client went away mid-pass
                    Ok(None) | Err(_) => break,
                };
                write_message(writer, &message).map_err(|source| BridgeError::SinkWrite {
                    id: entry.id(),
                    source,
                })?;
                delivered += 1;
            }
            Ok(delivered)
        })
        .unwrap_or(Ok(0))
}
