//! Settings synchronisation over a broker topic.
//!
//! The publisher watches a YAML settings file and pushes its content to the
//! settings topic whenever it changes. Every process that cares about settings
//! (the producer included) holds a named subscription on that topic and applies
//! what it receives through a [`SettingsSubscriber`].
//!
//! Settings are held in a [`SettingsHandle`]: a single-writer, multi-reader
//! value that is always replaced whole, so a reader never sees a half-applied
//! update.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::contract::{Broker, MessageHandler};
use crate::error::SettingsError;
use crate::heartbeat::Heartbeat;

/// Runtime settings propagated between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Heartbeat period, in seconds.
    pub timeout_seconds: u64,
    /// File prefix that marks a document separator page.
    pub barcode_separator: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            barcode_separator: "separator".to_string(),
        }
    }
}

impl Settings {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn to_message(&self) -> Result<Vec<u8>, SettingsError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_message(body: &[u8]) -> Result<Self, SettingsError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Reads and parses a YAML settings file.
pub fn read_settings_file(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Shared, atomically replaceable settings value.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// A snapshot of the current settings.
    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, settings: Settings) -> Settings {
        self.tx.send_replace(settings)
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

/// Pushes the settings file to the settings topic.
pub struct SettingsPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
    path: PathBuf,
    retry_delay: Duration,
}

impl SettingsPublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        topic: impl Into<String>,
        path: impl Into<PathBuf>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            broker,
            topic: topic.into(),
            path: path.into(),
            retry_delay,
        }
    }

    /// Reads the settings file and publishes it, retrying until it succeeds.
    ///
    /// Only cancellation ends the loop early, in which case `None` is returned.
    pub async fn publish(&self, cancel: &CancellationToken) -> Option<Settings> {
        loop {
            match self.try_publish().await {
                Ok(settings) => {
                    info!(topic = %self.topic, ?settings, "[SETTINGS] New settings sent to all subscribers");
                    return Some(settings);
                }
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, delay = ?self.retry_delay, "[SETTINGS] Cannot publish settings, retrying");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("[SETTINGS] Shutdown while settings were still unpublished");
                    return None;
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn try_publish(&self) -> Result<Settings, Box<dyn std::error::Error + Send + Sync>> {
        let settings = read_settings_file(&self.path)?;
        self.broker.send(&self.topic, settings.to_message()?).await?;
        Ok(settings)
    }

    /// Publishes once per change notification until cancelled or the notification channel closes.
    pub async fn run(self, mut changes: mpsc::Receiver<()>, cancel: CancellationToken) {
        info!(path = %self.path.display(), topic = %self.topic, "[SETTINGS] Watching settings file");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => {
                    if change.is_none() {
                        break;
                    }
                    info!(path = %self.path.display(), "[SETTINGS] Settings file was changed");
                    if self.publish(&cancel).await.is_none() {
                        break;
                    }
                }
            }
        }
        info!("[SETTINGS] Publisher stopped");
    }
}

/// Applies settings received on this process's subscription.
pub struct SettingsSubscriber {
    settings: SettingsHandle,
    heartbeat: Arc<Heartbeat>,
}

impl SettingsSubscriber {
    pub fn new(settings: SettingsHandle, heartbeat: Arc<Heartbeat>) -> Self {
        Self { settings, heartbeat }
    }

    /// Replaces the local settings and restarts the heartbeat so the new period applies now.
    pub fn apply(&self, settings: Settings) {
        let previous = self.settings.replace(settings.clone());
        info!(?previous, current = ?settings, "[SETTINGS] Applied new settings");
        self.heartbeat.restart();
    }
}

#[async_trait]
impl MessageHandler for SettingsSubscriber {
    async fn handle(&mut self, body: Vec<u8>) {
        match Settings::from_message(&body) {
            Ok(settings) => self.apply(settings),
            Err(e) => error!(error = %e, size = body.len(), "[SETTINGS] Dropping undecodable settings message"),
        }
    }
}
