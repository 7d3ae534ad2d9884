// SPDX-License-Identifier: Apache-2.0
//! Cooperative shutdown signalling for spawned tasks.

use std::sync::Arc;
use tokio::sync::watch;

/// Broadcasts a one-way shutdown signal to any number of subscribers.
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: Arc<watch::Sender<bool>>,
}

impl Notifier {
    /// Create a new notifier.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    /// Signal shutdown to all current and future subscribers.
    pub fn notify(&self) {
        let _ = self.sender.send(true);
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> NotifyReceiver {
        NotifyReceiver { receiver: self.sender.subscribe() }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a [`Notifier`].
#[derive(Clone, Debug)]
pub struct NotifyReceiver {
    receiver: watch::Receiver<bool>,
}

impl NotifyReceiver {
    /// Wait until shutdown is signalled (or the notifier is dropped).
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Returns true if shutdown has been signalled.
    pub fn is_notified(&self) -> bool {
        *self.receiver.borrow()
    }
}
