//! Processing status shared between the worker and the heartbeat.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::settings::Settings;

/// Whether the producer currently has unconsumed files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessingStatus {
    #[default]
    Waiting,
    InProcess,
}

/// Body of a heartbeat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: ProcessingStatus,
    pub settings: Settings,
}

/// Single-writer handle on the current [`ProcessingStatus`].
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<ProcessingStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new(ProcessingStatus::Waiting)
    }
}

impl StatusHandle {
    pub fn new(initial: ProcessingStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ProcessingStatus {
        *self.tx.borrow()
    }

    pub fn set(&self, status: ProcessingStatus) {
        self.tx.send_replace(status);
    }
}
