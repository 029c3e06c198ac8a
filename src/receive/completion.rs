//! Single-shot delivery of a receive outcome.

use crate::error::{BridgeError, BridgeResult};

type Callback = Box<dyn FnOnce(BridgeResult<String>) + Send + 'static>;

/// Delivers exactly one outcome to a callback.
///
/// `complete` consumes the completion, so a second delivery cannot be
/// expressed. If the completion is dropped without being completed (the
/// worker never started, or panicked), the callback receives a
/// [`BridgeError::Dispatch`] instead of being silently lost.
pub struct Completion {
    callback: Option<Callback>,
}

impl Completion {
    /// Wrap a callback.
    pub fn new(callback: impl FnOnce(BridgeResult<String>) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Deliver the outcome.
    pub fn complete(mut self, result: BridgeResult<String>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            log::warn!(
                target: "tdbridge::receive",
                "Receive worker exited without a result, reporting dispatch failure"
            );
            callback(Err(BridgeError::dispatch(
                "receive worker exited without delivering a result",
            )));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
