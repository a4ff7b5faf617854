//! Periodic status heartbeat to the central queue.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::contract::Broker;
use crate::settings::SettingsHandle;
use crate::status::{StatusHandle, StatusSnapshot};

/// Sends a [`StatusSnapshot`] every `timeout_seconds`.
///
/// The timer task is replaced, not rescheduled, on [`Heartbeat::restart`]: the old
/// task is aborted and a new one fires immediately with the current settings.
pub struct Heartbeat {
    broker: Arc<dyn Broker>,
    queue: String,
    settings: SettingsHandle,
    status: StatusHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        settings: SettingsHandle,
        status: StatusHandle,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            settings,
            status,
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        self.restart();
    }

    /// Destroys the running timer, if any, and starts a new one.
    pub fn restart(&self) {
        let mut task = self.task();
        if let Some(old) = task.take() {
            old.abort();
        }
        let period = self.settings.current().heartbeat_period();
        info!(queue = %self.queue, ?period, "[HEARTBEAT] Starting timer");
        *task = Some(tokio::spawn(run_timer(
            self.broker.clone(),
            self.queue.clone(),
            self.settings.clone(),
            self.status.clone(),
        )));
    }

    pub fn stop(&self) {
        if let Some(old) = self.task().take() {
            old.abort();
            info!(queue = %self.queue, "[HEARTBEAT] Stopped timer");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            task.abort();
        }
    }
}

async fn run_timer(
    broker: Arc<dyn Broker>,
    queue: String,
    settings: SettingsHandle,
    status: StatusHandle,
) {
    let mut ticker = tokio::time::interval(settings.current().heartbeat_period());
    loop {
        ticker.tick().await;
        send_snapshot(broker.as_ref(), &queue, &settings, &status).await;
    }
}

/// Sends one snapshot. Failures are logged and swallowed; the next tick tries again.
pub async fn send_snapshot(
    broker: &dyn Broker,
    queue: &str,
    settings: &SettingsHandle,
    status: &StatusHandle,
) {
    let snapshot = StatusSnapshot {
        status: status.current(),
        settings: settings.current(),
    };
    let body = match serde_json::to_vec(&snapshot) {
        Ok(body) => body,
        Err(e) => {
            error!(error = ?e, "[HEARTBEAT] Failed to serialise status snapshot");
            return;
        }
    };
    match broker.send(queue, body).await {
        Ok(()) => debug!(queue, ?snapshot, "[HEARTBEAT] Sent status snapshot"),
        Err(e) => error!(queue, error = %e, "[HEARTBEAT] Failed to send status snapshot"),
    }
}
