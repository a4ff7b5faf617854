//! Consumer role: document queue → reassembly → outbound directory.
//!
//! Also hosts the settings publisher and a monitor that logs every heartbeat
//! arriving on the central queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{ensure_topology, spawn_dispatch};
use crate::config::ServiceConfig;
use crate::contract::{Broker, Endpoint, MessageHandler};
use crate::error::BrokerError;
use crate::settings::SettingsPublisher;
use crate::status::StatusSnapshot;
use crate::transport::{content_hash, Reassembler};

/// Persists documents under fresh unique names.
#[derive(Debug, Clone)]
pub struct DocumentWriter {
    out_dir: PathBuf,
    extension: String,
}

impl DocumentWriter {
    pub fn new(out_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Writes `payload` to `<uuid-v4>.<extension>` and returns the path.
    pub async fn persist(&self, payload: &[u8]) -> std::io::Result<PathBuf> {
        let path = self
            .out_dir
            .join(format!("{}.{}", Uuid::new_v4(), self.extension));
        tokio::fs::write(&path, payload).await?;
        info!(
            path = %path.display(),
            bytes = payload.len(),
            content_hash = %content_hash(payload),
            "[RECEIVE] Document persisted"
        );
        Ok(path)
    }
}

/// Handler for the document queue.
pub struct DocumentConsumer {
    reassembler: Reassembler,
    writer: DocumentWriter,
}

impl DocumentConsumer {
    pub fn new(reassembler: Reassembler, writer: DocumentWriter) -> Self {
        Self { reassembler, writer }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Reassembler::new()
                .with_max_document_bytes(config.max_document_bytes)
                .with_deadline(config.reassembly_deadline()),
            DocumentWriter::new(&config.directories.outbound, &config.document_extension),
        )
    }
}

#[async_trait]
impl MessageHandler for DocumentConsumer {
    async fn handle(&mut self, body: Vec<u8>) {
        match self.reassembler.accept(body) {
            Ok(Some(document)) => {
                if let Err(e) = self.writer.persist(&document).await {
                    error!(dir = %self.writer.out_dir().display(), error = ?e, bytes = document.len(), "[RECEIVE] Failed to persist document");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "[RECEIVE] Document dropped"),
        }
    }

    async fn on_idle(&mut self) {
        self.reassembler.expire_stale(Instant::now());
    }
}

/// Logs every status snapshot arriving on the central queue.
#[derive(Debug, Default)]
pub struct CentralMonitor {
    last: Option<StatusSnapshot>,
}

impl CentralMonitor {
    pub fn last(&self) -> Option<&StatusSnapshot> {
        self.last.as_ref()
    }
}

#[async_trait]
impl MessageHandler for CentralMonitor {
    async fn handle(&mut self, body: Vec<u8>) {
        match serde_json::from_slice::<StatusSnapshot>(&body) {
            Ok(snapshot) => {
                info!(
                    status = ?snapshot.status,
                    timeout_seconds = snapshot.settings.timeout_seconds,
                    barcode_separator = %snapshot.settings.barcode_separator,
                    "[CENTRAL] Heartbeat"
                );
                self.last = Some(snapshot);
            }
            Err(e) => warn!(error = %e, size = body.len(), "[CENTRAL] Undecodable status message"),
        }
    }
}

/// Everything the consumer role runs.
pub struct Consumer {
    config: ServiceConfig,
    broker: Arc<dyn Broker>,
}

impl Consumer {
    pub fn new(config: ServiceConfig, broker: Arc<dyn Broker>) -> Self {
        Self { config, broker }
    }

    /// Ensures the broker topology, publishes the current settings once, then
    /// serves the document and central queues and republishes settings on
    /// every change notification until `cancel` fires.
    pub async fn run(
        self,
        settings_changes: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        let topology = &self.config.topology;
        ensure_topology(self.broker.as_ref(), topology, None).await?;

        let documents = spawn_dispatch(
            self.broker.clone(),
            Endpoint::queue(&topology.document_queue),
            DocumentConsumer::from_config(&self.config),
            self.config.receive_wait(),
            cancel.clone(),
        );
        let central = spawn_dispatch(
            self.broker.clone(),
            Endpoint::queue(&topology.central_queue),
            CentralMonitor::default(),
            self.config.receive_wait(),
            cancel.clone(),
        );

        let publisher = SettingsPublisher::new(
            self.broker.clone(),
            &topology.settings_topic,
            self.config.directories.settings_path(),
            self.config.settings_retry_delay(),
        );
        if publisher.publish(&cancel).await.is_some() {
            publisher.run(settings_changes, cancel).await;
        }

        for (name, task) in [("documents", documents), ("central", central)] {
            if let Err(e) = task.await {
                error!(listener = name, error = ?e, "[CONSUMER] Listener ended abnormally");
            }
        }
        info!("[CONSUMER] Shut down");
        Ok(())
    }
}
