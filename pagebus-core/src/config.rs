use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::settings::Settings;

/// Directories the service reads from and writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub inbound: PathBuf,
    pub outbound: PathBuf,
    pub quarantine: PathBuf,
    pub settings_dir: PathBuf,
    pub settings_file: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            inbound: PathBuf::from("inbound"),
            outbound: PathBuf::from("outbound"),
            quarantine: PathBuf::from("quarantine"),
            settings_dir: PathBuf::from("settings"),
            settings_file: "settings.yaml".to_string(),
        }
    }
}

impl DirectoryConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.settings_dir.join(&self.settings_file)
    }
}

/// Names of the broker entities used by both roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerTopology {
    pub document_queue: String,
    pub central_queue: String,
    pub settings_topic: String,
    /// This process's named subscription on the settings topic.
    pub settings_subscription: String,
}

impl Default for BrokerTopology {
    fn default() -> Self {
        Self {
            document_queue: "documents".to_string(),
            central_queue: "central".to_string(),
            settings_topic: "settings".to_string(),
            settings_subscription: "producer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub directories: DirectoryConfig,
    pub topology: BrokerTopology,
    /// Settings in effect until the first settings message arrives.
    pub settings: Settings,
    pub retry: RetryPolicy,
    pub rescan_interval_secs: u64,
    pub settings_retry_delay_ms: u64,
    /// Extension given to persisted documents.
    pub document_extension: String,
    pub max_document_bytes: Option<usize>,
    pub reassembly_deadline_secs: Option<u64>,
    /// How long one broker receive waits for a message.
    pub receive_wait_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            directories: DirectoryConfig::default(),
            topology: BrokerTopology::default(),
            settings: Settings::default(),
            retry: RetryPolicy::default(),
            rescan_interval_secs: 5,
            settings_retry_delay_ms: 2_000,
            document_extension: "pdf".to_string(),
            max_document_bytes: None,
            reassembly_deadline_secs: None,
            receive_wait_ms: 1_000,
        }
    }
}

impl ServiceConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn settings_retry_delay(&self) -> Duration {
        Duration::from_millis(self.settings_retry_delay_ms)
    }

    pub fn reassembly_deadline(&self) -> Option<Duration> {
        self.reassembly_deadline_secs.map(Duration::from_secs)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.attempts == 0 {
            return Err(invalid("retry.attempts", "must allow at least one attempt"));
        }
        if self.rescan_interval_secs == 0 {
            return Err(invalid("rescan_interval_secs", "must be at least one second"));
        }
        if self.receive_wait_ms == 0 {
            return Err(invalid("receive_wait_ms", "must be positive"));
        }
        if self.max_document_bytes == Some(0) {
            return Err(invalid("max_document_bytes", "must be positive when set"));
        }
        if self.directories.settings_file.trim().is_empty() {
            return Err(invalid("directories.settings_file", "must not be empty"));
        }
        if self.document_extension.trim().is_empty() {
            return Err(invalid("document_extension", "must not be empty"));
        }
        let topology = [
            ("topology.document_queue", &self.topology.document_queue),
            ("topology.central_queue", &self.topology.central_queue),
            ("topology.settings_topic", &self.topology.settings_topic),
            ("topology.settings_subscription", &self.topology.settings_subscription),
        ];
        for (field, name) in topology {
            if name.trim().is_empty() {
                return Err(invalid(field, "entity name must not be empty"));
            }
        }
        Ok(())
    }

    /// Creates every configured directory that does not exist yet.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        let dirs = &self.directories;
        for dir in [&dirs.inbound, &dirs.outbound, &dirs.quarantine, &dirs.settings_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            inbound = %self.directories.inbound.display(),
            outbound = %self.directories.outbound.display(),
            quarantine = %self.directories.quarantine.display(),
            settings = %self.directories.settings_path().display(),
            document_queue = %self.topology.document_queue,
            settings_topic = %self.topology.settings_topic,
            "Loaded ServiceConfig"
        );
        debug!(?self, "ServiceConfig loaded (full debug)");
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(ServiceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "directories:\n  inbound: /data/in\nretry:\n  attempts: 3\n";
        let cfg: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.directories.inbound, PathBuf::from("/data/in"));
        assert_eq!(cfg.directories.outbound, PathBuf::from("outbound"));
        assert_eq!(cfg.retry.attempts, 3);
        assert_eq!(cfg.retry.delay_ms, 2_000);
        assert_eq!(cfg.rescan_interval(), Duration::from_secs(5));
        assert_eq!(cfg.reassembly_deadline(), None);
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let mut cfg = ServiceConfig::default();
        cfg.retry.attempts = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "retry.attempts", .. })
        ));
    }

    #[test]
    fn empty_queue_name_is_rejected() {
        let mut cfg = ServiceConfig::default();
        cfg.topology.central_queue = " ".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "topology.central_queue", .. })
        ));
    }

    #[test]
    fn ensure_directories_creates_missing_ones() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = ServiceConfig::default();
        cfg.directories.inbound = root.path().join("a/in");
        cfg.directories.outbound = root.path().join("out");
        cfg.directories.quarantine = root.path().join("q");
        cfg.directories.settings_dir = root.path().join("s");
        cfg.ensure_directories().unwrap();
        assert!(cfg.directories.inbound.is_dir());
        assert!(cfg.directories.settings_dir.is_dir());
    }
}
