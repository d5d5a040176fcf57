//! # tmpl-rs-signals
//!
//! Ordered, id-keyed receiver lists. A [`Signal`] holds receivers of any callable
//! type `F` (usually a `dyn Fn(..) -> ReceiverResult`), calls them in connection
//! order, and stops at the first receiver that fails.
//!
//! Dispatch iterates over a snapshot of the receiver list, so receivers may be
//! connected or disconnected from other threads (or from inside a receiver)
//! while a send is in flight. [`Signal::connect_scoped`] returns a
//! [`ScopedReceiver`] guard that disconnects its receiver when dropped, which is
//! how per-request observers are attached.
//!
//! ## Usage
//!
//! ```
//! use tmpl_rs_signals::{ReceiverResult, Signal};
//! use std::sync::Arc;
//!
//! type Listener = dyn Fn(&str) -> ReceiverResult + Send + Sync;
//!
//! let signal: Signal<Listener> = Signal::new();
//!
//! signal.connect("printer", Arc::new(|msg: &str| {
//!     println!("Received: {msg}");
//!     Ok(())
//! }));
//!
//! let notified = signal.send(|receiver| receiver("hello")).unwrap();
//! assert_eq!(notified, 1);
//! ```

use std::sync::{Arc, RwLock};

use thiserror::Error;

/// The error a receiver may fail with.
pub type ReceiverError = Box<dyn std::error::Error + Send + Sync>;

/// The result every receiver returns.
pub type ReceiverResult = Result<(), ReceiverError>;

/// A receiver failed while a signal was being sent.
///
/// Receivers connected before the failing one have already run.
#[derive(Debug, Error)]
#[error("receiver '{receiver_id}' failed: {source}")]
pub struct SendError {
    /// The id of the receiver that failed.
    pub receiver_id: String,
    /// The receiver's own error.
    #[source]
    pub source: ReceiverError,
}

type ReceiverList<F> = Arc<RwLock<Vec<(String, Arc<F>)>>>;

/// An ordered list of receivers that can be connected to and dispatched.
pub struct Signal<F: ?Sized + Send + Sync + 'static> {
    receivers: ReceiverList<F>,
}

impl<F: ?Sized + Send + Sync + 'static> Default for Signal<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized + Send + Sync + 'static> Signal<F> {
    /// Creates a new signal with no connected receivers.
    pub fn new() -> Self {
        Self {
            receivers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Connects a receiver to this signal.
    ///
    /// If a receiver with the same id is already connected it is replaced in
    /// place, keeping its position; otherwise the receiver is appended.
    pub fn connect(&self, receiver_id: impl Into<String>, callback: Arc<F>) {
        let id = receiver_id.into();
        let mut receivers = self.receivers.write().expect("signal lock poisoned");

        if let Some(entry) = receivers.iter_mut().find(|(rid, _)| *rid == id) {
            entry.1 = callback;
        } else {
            tracing::trace!(receiver = %id, "Receiver connected");
            receivers.push((id, callback));
        }
    }

    /// Connects a receiver under a fresh unique id for the lifetime of the
    /// returned guard.
    #[must_use = "the receiver is disconnected as soon as the guard is dropped"]
    pub fn connect_scoped(&self, callback: Arc<F>) -> ScopedReceiver<F> {
        let id = format!("scoped-{}", uuid::Uuid::new_v4());
        self.connect(id.clone(), callback);
        ScopedReceiver {
            receivers: Arc::clone(&self.receivers),
            id,
        }
    }

    /// Disconnects the receiver with the given id.
    ///
    /// Returns `true` if a receiver was found and removed.
    pub fn disconnect(&self, receiver_id: &str) -> bool {
        disconnect_from(&self.receivers, receiver_id)
    }

    /// Returns a copy of the current receivers, in connection order.
    pub fn snapshot(&self) -> Vec<(String, Arc<F>)> {
        self.receivers.read().expect("signal lock poisoned").clone()
    }

    /// Sends the signal to all connected receivers.
    ///
    /// `call` is invoked once per receiver, in connection order, against a
    /// snapshot taken when the send starts. Returns how many receivers ran.
    ///
    /// # Errors
    ///
    /// Stops at the first failing receiver and returns its error.
    pub fn send(
        &self,
        mut call: impl FnMut(&F) -> ReceiverResult,
    ) -> Result<usize, SendError> {
        let receivers = self.snapshot();
        for (id, callback) in &receivers {
            call(callback).map_err(|source| SendError {
                receiver_id: id.clone(),
                source,
            })?;
        }
        Ok(receivers.len())
    }

    /// Returns the number of connected receivers.
    pub fn receiver_count(&self) -> usize {
        self.receivers.read().expect("signal lock poisoned").len()
    }

    /// Returns the ids of connected receivers, in connection order.
    pub fn receiver_ids(&self) -> Vec<String> {
        self.receivers
            .read()
            .expect("signal lock poisoned")
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn disconnect_from<F: ?Sized>(receivers: &ReceiverList<F>, receiver_id: &str) -> bool {
    let mut receivers = receivers.write().expect("signal lock poisoned");
    let len_before = receivers.len();
    receivers.retain(|(id, _)| id != receiver_id);
    let removed = receivers.len() < len_before;
    if removed {
        tracing::trace!(receiver = %receiver_id, "Receiver disconnected");
    }
    removed
}

/// Keeps a receiver connected until dropped.
///
/// Returned by [`Signal::connect_scoped`]. Dropping the guard (including during
/// unwinding or when a request future is cancelled) disconnects the receiver.
pub struct ScopedReceiver<F: ?Sized + Send + Sync + 'static> {
    receivers: ReceiverList<F>,
    id: String,
}

impl<F: ?Sized + Send + Sync + 'static> ScopedReceiver<F> {
    /// Returns the generated receiver id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<F: ?Sized + Send + Sync + 'static> Drop for ScopedReceiver<F> {
    fn drop(&mut self) {
        disconnect_from(&self.receivers, &self.id);
    }
}
