//! Concurrently mutable `ClientId -> writer` table.
//!
//! Readers (the poller) take lock-free snapshots through `ArcSwap`; writers
//! copy the map, modify the copy and swap it in under `write_lock`. Each
//! entry guards its writer with its own mutex, and removal closes the writer
//! under that mutex. Once a removal returns, no pass can write to the removed
//! writer even if it still holds an old snapshot.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::client::ClientId;
use crate::error::LockResultExt;

/// A byte-stream destination for pushed messages.
pub type SinkWriter = Box<dyn Write + Send + 'static>;

type Entries = HashMap<ClientId, Arc<SinkEntry>>;

/// One registered sink.
pub(crate) struct SinkEntry {
    id: ClientId,
    writer: Mutex<Option<SinkWriter>>,
}

impl SinkEntry {
    fn new(id: ClientId, writer: SinkWriter) -> Self {
        Self {
            id,
            writer: Mutex::new(Some(writer)),
        }
    }

    pub(crate) fn id(&self) -> ClientId {
        self.id
    }

    /// Run `f` with the writer, if the entry has not been closed.
    pub(crate) fn with_writer<T>(&self, f: impl FnOnce(&mut SinkWriter) -> T) -> Option<T> {
        let mut writer = self.writer.lock().recover_poison("SinkEntry::with_writer");
        writer.as_mut().map(f)
    }

    /// Drop the writer. Waits for a write in progress.
    fn close(&self) {
        let writer = self.writer.lock().recover_poison("SinkEntry::close").take();
        if let Some(mut writer) = writer {
            // Best effort; the writer is closed on drop either way
            let _ = writer.flush();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .recover_poison("SinkEntry::is_closed")
            .is_none()
    }
}

/// Write one message followed by a newline and flush.
pub(crate) fn write_message(writer: &mut SinkWriter, message: &str) -> io::Result<()> {
    writer.write_all(message.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Table of registered sinks.
pub struct SinkTable {
    entries: ArcSwap<Entries>,
    write_lock: Mutex<()>,
}

impl Default for SinkTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Copy-modify-swap under the writer lock. Returns whatever `f` removed.
    fn update<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> T {
        let _guard = self.write_lock.lock().recover_poison("SinkTable::update");
        let mut next = Entries::clone(&self.entries.load());
        let out = f(&mut next);
        self.entries.store(Arc::new(next));
        out
    }

    /// Insert or replace the sink of `id`. A replaced writer is closed.
    pub fn insert(&self, id: ClientId, writer: SinkWriter) {
        let entry = Arc::new(SinkEntry::new(id, writer));
        if let Some(old) = self.update(|entries| entries.insert(id, entry)) {
            old.close();
        }
    }

    /// Remove and close the sink of `id`. Returns whether one was registered.
    pub fn remove(&self, id: ClientId) -> bool {
        match self.update(|entries| entries.remove(&id)) {
            Some(old) => {
                old.close();
                true
            }
            None => false,
        }
    }

    /// Remove `entry` only if it is still the registered sink of its client,
    /// so a failure on an old writer never unregisters its replacement.
    pub(crate) fn remove_entry(&self, entry: &Arc<SinkEntry>) -> bool {
        let removed = self.update(|entries| match entries.get(&entry.id()) {
            Some(current) if Arc::ptr_eq(current, entry) => entries.remove(&entry.id()),
            _ => None,
        });
        entry.close();
        removed.is_some()
    }

    /// Remove and close every sink. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let _guard = self.write_lock.lock().recover_poison("SinkTable::clear");
            self.entries.swap(Arc::new(HashMap::new()))
        };
        for entry in removed.values() {
            entry.close();
        }
        removed.len()
    }

    /// Current entries. The snapshot never changes; entries removed after it
    /// was taken are closed and skipped by [`SinkEntry::with_writer`].
    pub(crate) fn snapshot(&self) -> Arc<Entries> {
        self.entries.load_full()
    }

    /// Whether `id` has a registered sink.
    pub fn contains(&self, id: ClientId) -> bool {
        self.entries.load().contains_key(&id)
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether no sink is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}
