//! In-process engine that answers requests locally.
//!
//! Implements the handful of TDLib requests that work without a network
//! connection (`getOption`, `testCallEmpty`, `testCallString`,
//! `testSquareInt`) and answers everything else with a TDLib style `error`.
//! Responses echo the request's `@extra` like TDLib does.
//!
//! Besides backing the CLI's `--loopback` mode, it keeps the accounting the
//! test suite relies on: destroyed handles, overlapping receives on one
//! handle, and the last log configuration.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use super::Engine;
use crate::error::LockResultExt;

const LOG_TARGET: &str = "tdbridge::engine::loopback";

/// Version reported for the `version` option.
pub const LOOPBACK_VERSION: &str = "1.8.0-loopback";

/// Handle to a loopback client.
#[derive(Debug)]
pub struct LoopbackHandle {
    id: u64,
}

/// Last log configuration applied through the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopbackLogState {
    pub verbosity: Option<i32>,
    pub file_path: Option<String>,
    pub max_file_size: Option<i64>,
}

#[derive(Default)]
struct Queues {
    pending: HashMap<u64, VecDeque<String>>,
    receiving: HashSet<u64>,
}

/// In-process [`Engine`].
pub struct Loopback {
    queues: Mutex<Queues>,
    arrived: Condvar,
    next_id: AtomicU64,
    capacity: Option<usize>,
    receive_delay: Duration,
    destroyed: AtomicUsize,
    overlapping_receives: AtomicUsize,
    log_state: Mutex<LoopbackLogState>,
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Loopback {
    /// Create an engine without limits or delays.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            arrived: Condvar::new(),
            next_id: AtomicU64::new(1),
            capacity: None,
            receive_delay: Duration::ZERO,
            destroyed: AtomicUsize::new(0),
            overlapping_receives: AtomicUsize::new(0),
            log_state: Mutex::new(LoopbackLogState::default()),
        }
    }

    /// Limit the number of live clients; `create` fails beyond it.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Make every non-zero-timeout receive stall for `delay` before looking
    /// at the queue, like a slow engine.
    pub fn with_receive_delay(mut self, delay: Duration) -> Self {
        self.receive_delay = delay;
        self
    }

    /// Number of handles destroyed so far.
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of live clients.
    pub fn live_count(&self) -> usize {
        self.queues
            .lock()
            .recover_poison("Loopback::live_count")
            .pending
            .len()
    }

    /// Number of times a receive started while another receive was running on
    /// the same handle.
    pub fn overlapping_receives(&self) -> usize {
        self.overlapping_receives.load(Ordering::SeqCst)
    }

    /// Last log configuration.
    pub fn log_state(&self) -> LoopbackLogState {
        self.log_state
            .lock()
            .recover_poison("Loopback::log_state")
            .clone()
    }

    fn enqueue(&self, id: u64, message: String) {
        let mut queues = self.queues.lock().recover_poison("Loopback::enqueue");
        match queues.pending.get_mut(&id) {
            Some(queue) => {
                queue.push_back(message);
                self.arrived.notify_all();
            }
            None => log::debug!(target: LOG_TARGET, "Dropping message for closed client {}", id),
        }
    }

    /// Answer a request the way TDLib would.
    fn respond(request: &str, synchronous: bool) -> Value {
        let request: Value = match serde_json::from_str(request) {
            Ok(value) => value,
            Err(e) => return error_object(400, &format!("Failed to parse JSON object: {e}")),
        };
        let method = request.get("@type").and_then(Value::as_str).unwrap_or("");

        let mut response = match method {
            "getOption" => match request.get("name").and_then(Value::as_str) {
                Some("version") => json!({
                    "@type": "option",
                    "name": "version",
                    "value": { "@type": "optionValueString", "value": LOOPBACK_VERSION },
                }),
                Some(_) => json!({ "@type": "optionValueEmpty" }),
                None => error_object(400, "Option name must be non-empty"),
            },
            "setLogVerbosityLevel" | "setLogStream" => json!({ "@type": "ok" }),
            "testCallEmpty" if !synchronous => json!({ "@type": "ok" }),
            "testCallString" if !synchronous => json!({
                "@type": "testString",
                "value": request.get("x").cloned().unwrap_or(Value::String(String::new())),
            }),
            "testSquareInt" if !synchronous => {
                let x = request.get("x").and_then(Value::as_i64).unwrap_or(0);
                json!({ "@type": "testInt", "value": x.saturating_mul(x) })
            }
            _ if synchronous => error_object(400, "The method can't be executed synchronously"),
            _ => error_object(400, &format!("Unknown method {method:?}")),
        };

        if let Some(extra) = request.get("@extra") {
            response["@extra"] = extra.clone();
        }
        response
    }
}

fn error_object(code: i64, message: &str) -> Value {
    json!({ "@type": "error", "code": code, "message": message })
}

impl Engine for Loopback {
    type Handle = LoopbackHandle;

    fn create(&self) -> Option<LoopbackHandle> {
        let mut queues = self.queues.lock().recover_poison("Loopback::create");
        if self.capacity.is_some_and(|cap| queues.pending.len() >= cap) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        queues.pending.insert(id, VecDeque::new());
        Some(LoopbackHandle { id })
    }

    fn destroy(&self, handle: LoopbackHandle) {
        let mut queues = self.queues.lock().recover_poison("Loopback::destroy");
        queues.pending.remove(&handle.id);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_all();
    }

    fn send(&self, handle: &LoopbackHandle, request: &str) {
        let response = Self::respond(request, false);
        self.enqueue(handle.id, response.to_string());
    }

    fn receive(&self, handle: &LoopbackHandle, timeout: Duration) -> Option<String> {
        {
            let mut queues = self.queues.lock().recover_poison("Loopback::receive");
            if !queues.receiving.insert(handle.id) {
                self.overlapping_receives.fetch_add(1, Ordering::SeqCst);
            }
        }

        if !timeout.is_zero() && !self.receive_delay.is_zero() {
            std::thread::sleep(self.receive_delay);
        }

        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock().recover_poison("Loopback::receive");
        let message = loop {
            let next = queues.pending.get_mut(&handle.id).and_then(VecDeque::pop_front);
            if next.is_some() {
                break next;
            }
            let now = Instant::now();
            if now >= deadline || !queues.pending.contains_key(&handle.id) {
                break None;
            }
            queues = self
                .arrived
                .wait_timeout(queues, deadline - now)
                .recover_poison("Loopback::receive")
                .0;
        };
        queues.receiving.remove(&handle.id);
        message
    }

    fn execute(&self, _handle: Option<&LoopbackHandle>, request: &str) -> Option<String> {
        Some(Self::respond(request, true).to_string())
    }

    fn set_log_verbosity_level(&self, level: i32) {
        self.log_state
            .lock()
            .recover_poison("Loopback::set_log_verbosity_level")
            .verbosity = Some(level);
    }

    fn set_log_file_path(&self, path: &str) -> bool {
        self.log_state
            .lock()
            .recover_poison("Loopback::set_log_file_path")
            .file_path = (!path.is_empty()).then(|| path.to_string());
        true
    }

    fn set_log_max_file_size(&self, max_file_size: i64) {
        self.log_state
            .lock()
            .recover_poison("Loopback::set_log_max_file_size")
            .max_file_size = Some(max_file_size);
    }
}
