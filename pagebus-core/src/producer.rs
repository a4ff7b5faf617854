//! Producer role: inbound directory → assembler → chunked sender.
//!
//! The [`Worker`] owns the whole pipeline for one inbound directory and runs
//! one pass at a time:
//!   - scan and quarantine via the [`FileSequencer`]
//!   - push each valid file, in batch order, into the [`DocumentAssembler`]
//!   - deliver finished documents with the [`ChunkedSender`] and delete their
//!     source files only once delivery succeeded
//!   - delete the files of a broken sequence and start over
//!
//! Between passes the worker sleeps until a new-file signal, the rescan
//! interval or cancellation, whichever comes first.
//!
//! [`Producer`] wires the worker together with the settings subscription and
//! the status heartbeat.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{ensure_topology, spawn_dispatch};
use crate::config::ServiceConfig;
use crate::contract::{AssemblyEvent, Broker, DocumentAssembler, Endpoint, FinishedDocument};
use crate::error::BrokerError;
use crate::heartbeat::Heartbeat;
use crate::retry::RetryPolicy;
use crate::sequencer::FileSequencer;
use crate::settings::{SettingsHandle, SettingsSubscriber};
use crate::status::{ProcessingStatus, StatusHandle};
use crate::transport::ChunkedSender;

/// What one pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub quarantined: usize,
    pub delivered: usize,
    pub discarded_files: usize,
    /// Documents whose delivery failed; their files stay in the inbound directory.
    pub failed: usize,
}

pub struct Worker {
    sequencer: FileSequencer,
    assembler: Box<dyn DocumentAssembler>,
    sender: ChunkedSender,
    retry: RetryPolicy,
    status: StatusHandle,
    rescan_interval: Duration,
}

impl Worker {
    pub fn new(
        sequencer: FileSequencer,
        assembler: Box<dyn DocumentAssembler>,
        sender: ChunkedSender,
        retry: RetryPolicy,
        status: StatusHandle,
        rescan_interval: Duration,
    ) -> Self {
        Self {
            sequencer,
            assembler,
            sender,
            retry,
            status,
            rescan_interval,
        }
    }

    /// Runs passes until cancelled.
    pub async fn run(mut self, mut new_files: mpsc::Receiver<()>, cancel: CancellationToken) {
        info!(inbound = %self.sequencer.inbound().display(), "[WORKER] Started");
        let mut signals_open = true;
        loop {
            let report = self.run_pass(&cancel).await;
            debug!(?report, "[WORKER] Pass finished");

            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = new_files.recv(), if signals_open => {
                    if signal.is_none() {
                        warn!("[WORKER] New-file signal channel closed, falling back to rescans");
                        signals_open = false;
                    }
                }
                _ = tokio::time::sleep(self.rescan_interval) => {}
            }
        }
        info!("[WORKER] Stopped");
    }

    /// One scan of the inbound directory.
    pub async fn run_pass(&mut self, cancel: &CancellationToken) -> PassReport {
        let mut report = PassReport::default();
        let outcome = match self.sequencer.scan().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(dir = %self.sequencer.inbound().display(), error = ?e, "[WORKER] Failed to scan inbound directory");
                return report;
            }
        };
        report.quarantined = outcome.quarantined;

        if outcome.valid.is_empty() {
            self.status.set(ProcessingStatus::Waiting);
            return report;
        }
        self.status.set(ProcessingStatus::InProcess);
        info!(files = outcome.valid.len(), "[WORKER] Processing batch");

        let mut in_flight: HashSet<PathBuf> = self.assembler.pending().into_iter().collect();
        for file in &outcome.valid {
            if cancel.is_cancelled() {
                info!("[WORKER] Shutdown requested, ending pass");
                break;
            }
            if in_flight.contains(&file.path) {
                continue;
            }
            // A later page must not overtake a locked one.
            if !self.retry.try_open(&file.path).await {
                warn!(path = %file.path.display(), "[WORKER] File still locked, ending pass");
                break;
            }

            match self.assembler.push_file(file) {
                AssemblyEvent::Pending => {
                    in_flight.insert(file.path.clone());
                }
                AssemblyEvent::Ready(document) => {
                    let delivered = deliver(&self.sender, &self.retry, document).await;
                    self.assembler.reset();
                    in_flight.clear();
                    if delivered {
                        report.delivered += 1;
                    } else {
                        report.failed += 1;
                        break;
                    }
                }
                AssemblyEvent::SequenceBroken { files, reason } => {
                    warn!(?reason, files = files.len(), "[WORKER] Sequence broken, discarding its files");
                    remove_files(&self.retry, &files).await;
                    report.discarded_files += files.len();
                    self.assembler.reset();
                    in_flight.clear();
                }
            }
        }

        self.status.set(ProcessingStatus::Waiting);
        report
    }
}

/// Sends a finished document and deletes its source files. Returns whether it was delivered.
async fn deliver(sender: &ChunkedSender, retry: &RetryPolicy, document: FinishedDocument) -> bool {
    match sender.send(&document.payload).await {
        Ok(delivery) => {
            info!(
                queue = %sender.queue(),
                mode = ?delivery.mode,
                bytes = delivery.bytes,
                content_hash = %delivery.content_hash,
                files = document.consumed.len(),
                "[WORKER] Document delivered"
            );
            remove_files(retry, &document.consumed).await;
            true
        }
        Err(e) => {
            error!(error = %e, files = document.consumed.len(), "[WORKER] Delivery failed, keeping source files for the next pass");
            false
        }
    }
}

async fn remove_files(retry: &RetryPolicy, files: &[PathBuf]) {
    for path in files {
        if retry.remove_file(path).await {
            debug!(path = %path.display(), "[WORKER] Deleted source file");
        } else {
            error!(path = %path.display(), "[WORKER] Could not delete source file");
        }
    }
}

/// Everything the producer role runs: worker, settings subscription and heartbeat.
pub struct Producer {
    config: ServiceConfig,
    broker: Arc<dyn Broker>,
    settings: SettingsHandle,
    status: StatusHandle,
}

impl Producer {
    pub fn new(config: ServiceConfig, broker: Arc<dyn Broker>) -> Self {
        let settings = SettingsHandle::new(config.settings.clone());
        Self {
            config,
            broker,
            settings,
            status: StatusHandle::default(),
        }
    }

    pub fn settings(&self) -> SettingsHandle {
        self.settings.clone()
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Ensures the broker topology, then runs until `cancel` fires.
    pub async fn run(
        self,
        assembler: Box<dyn DocumentAssembler>,
        new_files: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        let topology = &self.config.topology;
        ensure_topology(
            self.broker.as_ref(),
            topology,
            Some(topology.settings_subscription.as_str()),
        )
        .await?;

        let heartbeat = Arc::new(Heartbeat::new(
            self.broker.clone(),
            topology.central_queue.clone(),
            self.settings.clone(),
            self.status.clone(),
        ));
        heartbeat.start();

        let listener = spawn_dispatch(
            self.broker.clone(),
            Endpoint::subscription(&topology.settings_topic, &topology.settings_subscription),
            SettingsSubscriber::new(self.settings.clone(), heartbeat.clone()),
            self.config.receive_wait(),
            cancel.clone(),
        );

        let worker = Worker::new(
            FileSequencer::new(
                &self.config.directories.inbound,
                &self.config.directories.quarantine,
                self.config.retry,
            ),
            assembler,
            ChunkedSender::new(self.broker.clone(), topology.document_queue.clone()),
            self.config.retry,
            self.status.clone(),
            self.config.rescan_interval(),
        );
        worker.run(new_files, cancel).await;

        if let Err(e) = listener.await {
            error!(error = ?e, "[PRODUCER] Settings listener ended abnormally");
        }
        heartbeat.stop();
        info!("[PRODUCER] Shut down");
        Ok(())
    }
}
