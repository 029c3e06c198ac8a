//! Registry of live clients.
//!
//! Maps [`ClientId`]s to shared [`Client`]s. Lookups clone the `Arc` out of
//! the map, so no map lock is ever held across an engine call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use super::{Client, ClientId};
use crate::engine::Engine;
use crate::error::{BridgeError, BridgeResult};

const LOG_TARGET: &str = "tdbridge::client::registry";

/// Table of live clients keyed by identifier.
pub struct ClientRegistry<E: Engine> {
    engine: Arc<E>,
    clients: DashMap<ClientId, Arc<Client<E>>>,
    next_id: AtomicU32,
}

impl<E: Engine> ClientRegistry<E> {
    /// Create an empty registry on top of `engine`.
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            clients: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// The engine backing this registry.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Create a client and register it under a fresh identifier.
    pub fn create(&self) -> BridgeResult<ClientId> {
        let handle = self
            .engine
            .create()
            .ok_or_else(|| BridgeError::engine_resource("engine could not create a client"))?;

        // Stops at u32::MAX instead of wrapping, so no id is ever issued twice
        let raw = match self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
        {
            Ok(raw) => raw,
            Err(_) => {
                self.engine.destroy(handle);
                return Err(BridgeError::engine_resource("client identifiers exhausted"));
            }
        };
        let id = ClientId::new(raw);

        self.clients
            .insert(id, Arc::new(Client::new(id, self.engine.clone(), handle)));
        log::debug!(target: LOG_TARGET, "Created client {}", id);
        Ok(id)
    }

    /// Look up a live client.
    pub fn get(&self, id: ClientId) -> BridgeResult<Arc<Client<E>>> {
        self.clients
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BridgeError::unknown_client(id))
    }

    /// Run `f` while `id` is guaranteed to stay registered.
    ///
    /// Removal of `id` waits until `f` returns, so anything `f` attaches to the
    /// client is visible to whoever removes it afterwards. `f` must not block
    /// on the engine.
    pub fn with_live<T>(
        &self,
        id: ClientId,
        f: impl FnOnce(&Arc<Client<E>>) -> T,
    ) -> BridgeResult<T> {
        let entry = self
            .clients
            .get(&id)
            .ok_or_else(|| BridgeError::unknown_client(id))?;
        Ok(f(entry.value()))
    }

    /// Unregister a client without destroying its handle yet.
    ///
    /// After this returns, lookups of `id` fail; the caller is responsible for
    /// calling [`Client::destroy`] on the returned client.
    pub(crate) fn remove(&self, id: ClientId) -> BridgeResult<Arc<Client<E>>> {
        self.clients
            .remove(&id)
            .map(|(_, client)| client)
            .ok_or_else(|| BridgeError::unknown_client(id))
    }

    /// Unregister a client and destroy its engine handle.
    ///
    /// Waits for engine calls already running on this client to finish.
    pub fn destroy(&self, id: ClientId) -> BridgeResult<()> {
        let client = self.remove(id)?;
        client.destroy();
        log::debug!(target: LOG_TARGET, "Destroyed client {}", id);
        Ok(())
    }

    /// Queue a request for a client.
    pub fn send(&self, id: ClientId, request: &str) -> BridgeResult<()> {
        self.get(id)?.send(request)
    }

    /// Synchronously execute a request on a client. An absent engine response
    /// is returned as an empty string.
    pub fn execute(&self, id: ClientId, request: &str) -> BridgeResult<String> {
        self.get(id)?.execute(request)
    }

    /// Execute a request that does not need a client.
    pub fn execute_static(&self, request: &str) -> String {
        self.engine.execute(None, request).unwrap_or_default()
    }

    /// Whether `id` names a live client.
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Identifiers of all live clients, sorted.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is live.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<E: Engine> Drop for ClientRegistry<E> {
    fn drop(&mut self) {
        for id in self.ids() {
            if let Some((_, client)) = self.clients.remove(&id) {
                client.destroy();
            }
        }
    }
}
