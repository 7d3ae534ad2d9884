// SPDX-License-Identifier: Apache-2.0
//! Named task spawning with cooperative shutdown.

use crate::{Notifier, NotifyReceiver};
use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the long-running tasks of a subsystem.
///
/// Tasks are spawned with a name for logging, subscribe to the manager's
/// shutdown notifier, and are aborted if still running when the manager is
/// dropped.
#[derive(Debug)]
pub struct TaskManager {
    name: String,
    shutdown: Notifier,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskManager {
    /// Create a new manager.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), shutdown: Notifier::new(), handles: Mutex::new(Vec::new()) }
    }

    /// Spawn a named task.
    pub fn spawn_task<F>(&self, task_name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(target: "task-manager", manager = %self.name, task = %task_name, "spawning task");
        let handle = tokio::spawn(future);
        self.handles.lock().push((task_name.to_string(), handle));
    }

    /// Subscribe to this manager's shutdown signal.
    pub fn subscribe_shutdown(&self) -> NotifyReceiver {
        self.shutdown.subscribe()
    }

    /// The shutdown notifier shared with spawned tasks.
    pub fn shutdown_notifier(&self) -> Notifier {
        self.shutdown.clone()
    }

    /// Signal shutdown and wait for every task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.notify();
        let handles = std::mem::take(&mut *self.handles.lock());
        for (task_name, handle) in handles {
            if handle.await.is_err() {
                debug!(target: "task-manager", manager = %self.name, task = %task_name, "task ended abnormally");
            }
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown.notify();
        for (_, handle) in self.handles.lock().iter() {
            handle.abort();
        }
    }
}
