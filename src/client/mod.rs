//! Client identifiers, owned engine handles and the registry mapping one to
//! the other.

mod registry;

pub use registry::ClientRegistry;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{BridgeError, BridgeResult, LockResultExt};

/// Caller-visible identifier of a client.
///
/// Assigned monotonically by the registry and never handed out twice.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u32);

impl ClientId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClientId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// One live engine client.
///
/// Owns the engine handle. The handle sits behind a `RwLock`: engine calls
/// take the read side (so `send` can interleave with `receive`), destruction
/// takes the write side, which waits for in-flight calls and then consumes
/// the handle. A handle is therefore destroyed exactly once and never used
/// afterwards.
pub struct Client<E: Engine> {
    id: ClientId,
    engine: Arc<E>,
    handle: RwLock<Option<E::Handle>>,
    /// Serializes receives on this handle across all delivery paths
    receive_guard: Mutex<()>,
}

impl<E: Engine> Client<E> {
    pub(crate) fn new(id: ClientId, engine: Arc<E>, handle: E::Handle) -> Self {
        Self {
            id,
            engine,
            handle: RwLock::new(Some(handle)),
            receive_guard: Mutex::new(()),
        }
    }

    /// Identifier of this client.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Run `f` against the live handle, or fail if it was destroyed meanwhile.
    fn with_handle<T>(&self, f: impl FnOnce(&E, &E::Handle) -> T) -> BridgeResult<T> {
        let handle = self.handle.read().recover_poison("Client::with_handle");
        match handle.as_ref() {
            Some(h) => Ok(f(&self.engine, h)),
            None => Err(BridgeError::unknown_client(self.id)),
        }
    }

    pub(crate) fn send(&self, request: &str) -> BridgeResult<()> {
        self.with_handle(|engine, h| engine.send(h, request))
    }

    pub(crate) fn execute(&self, request: &str) -> BridgeResult<String> {
        self.with_handle(|engine, h| engine.execute(Some(h), request).unwrap_or_default())
    }

    /// Wait for the receive guard; used by callers that accept blocking.
    pub(crate) fn lock_receive(&self) -> ReceiveGuard<'_, E> {
        ReceiveGuard {
            client: self,
            _guard: self.receive_guard.lock().recover_poison("Client::lock_receive"),
        }
    }

    /// Take the receive guard only if no other receive is running.
    pub(crate) fn try_lock_receive(&self) -> Option<ReceiveGuard<'_, E>> {
        let guard = match self.receive_guard.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return None,
        };
        Some(ReceiveGuard {
            client: self,
            _guard: guard,
        })
    }

    /// Consume the handle. Returns `false` if it was already gone.
    pub(crate) fn destroy(&self) -> bool {
        let handle = self.handle.write().recover_poison("Client::destroy").take();
        match handle {
            Some(h) => {
                self.engine.destroy(h);
                true
            }
            None => false,
        }
    }
}

impl<E: Engine> Drop for Client<E> {
    fn drop(&mut self) {
        if self.destroy() {
            log::debug!(
                target: "tdbridge::client",
                "Client {} destroyed on drop",
                self.id
            );
        }
    }
}

/// Exclusive right to receive on one client.
pub(crate) struct ReceiveGuard<'a, E: Engine> {
    client: &'a Client<E>,
    _guard: MutexGuard<'a, ()>,
}

impl<E: Engine> ReceiveGuard<'_, E> {
    /// One engine receive. `Ok(None)` means nothing arrived within `timeout`.
    pub(crate) fn receive(&self, timeout: Duration) -> BridgeResult<Option<String>> {
        self.client.with_handle(|engine, h| engine.receive(h, timeout))
    }
}
