//! Bounded dispatch between change producers and consumer callbacks.
//!
//! Each registration owns a `tokio::broadcast` queue drained by one task.
//! When the callback falls behind, the oldest pending changes are dropped and
//! the number skipped is logged; producers never block.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::source::ValueChangeCallback;
use crate::value::Value;

/// Default number of pending changes buffered per registration.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Tuning for watch registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Pending changes buffered before the oldest are dropped.
    pub queue_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
struct Change {
    previous: Value,
    current: Value,
}

/// Producer handle for one watch registration.
#[derive(Debug, Clone)]
pub struct WatchQueue {
    sender: broadcast::Sender<Change>,
    cancel: CancellationToken,
}

impl WatchQueue {
    /// Spawn the dispatcher task for `callback` and return its queue.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        key: &str,
        callback: ValueChangeCallback,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = broadcast::channel(options.queue_capacity.max(1));
        tokio::spawn(dispatch(
            key.to_string(),
            receiver,
            callback,
            cancel.clone(),
        ));
        Self { sender, cancel }
    }

    /// Enqueue a change; never blocks.
    pub fn push(&self, previous: Value, current: Value) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.sender.send(Change { previous, current });
    }

    /// Whether the registration has been cancelled or its dispatcher exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.receiver_count() == 0
    }

    /// Token that ends this registration.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

async fn dispatch(
    key: String,
    mut receiver: broadcast::Receiver<Change>,
    callback: ValueChangeCallback,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(change) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    callback(change.previous, change.current);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(key = %key, skipped, "watch queue overflowed; oldest changes dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!(key = %key, "watch dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn changes_are_delivered_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = WatchQueue::spawn(
            "amount",
            Arc::new(move |previous: Value, current: Value| {
                let _ = tx.send((previous.string(), current.string()));
            }),
            WatchOptions::default(),
            CancellationToken::new(),
        );

        queue.push(Value::from("1"), Value::from("2"));
        queue.push(Value::from("2"), Value::from("3"));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(("1".to_string(), "2".to_string())));
        assert_eq!(second, Some(("2".to_string(), "3".to_string())));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cancel = CancellationToken::new();
        let (sender, receiver) = broadcast::channel(2);
        for index in 0..5 {
            let _ = sender.send(Change {
                previous: Value::empty(),
                current: Value::from(index.to_string()),
            });
        }
        drop(sender);
        dispatch(
            "burst".to_string(),
            receiver,
            Arc::new(move |_, current: Value| {
                sink.lock().unwrap().push(current.string());
            }),
            cancel,
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec!["3".to_string(), "4".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_registration_stops_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();
        let queue = WatchQueue::spawn(
            "amount",
            Arc::new(move |_, current: Value| {
                let _ = tx.send(current.string());
            }),
            WatchOptions::default(),
            cancel.clone(),
        );

        cancel.cancel();
        queue.push(Value::empty(), Value::from("ignored"));
        assert!(queue.is_closed());
        let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, None);
    }
}
