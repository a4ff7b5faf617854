/// `load_config` module: loads the YAML configuration file into a [`CliConfig`].
///
/// This is the only place where the user-supplied YAML is parsed. It yields
/// the broker selection (used by the CLI to build a [`Broker`](pagebus_core::contract::Broker))
/// and the core [`ServiceConfig`], validated before it is handed out.
///
/// Secrets are never part of the file: the Service Bus SAS token is read from the
/// environment when the broker is constructed (see [`crate::servicebus`]).
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use pagebus_core::broker::memory::DEFAULT_MAX_MESSAGE_SIZE;
use pagebus_core::config::ServiceConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Which broker the process talks to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BrokerSection {
    /// In-process broker; only useful for `standalone` and tests.
    Memory {
        #[serde(default = "default_max_message_size")]
        max_message_size: usize,
    },
    /// Azure Service Bus namespace, reached over its REST interface.
    Servicebus {
        namespace: String,
        #[serde(default = "default_max_message_size")]
        max_message_size: usize,
    },
}

impl Default for BrokerSection {
    fn default() -> Self {
        BrokerSection::Memory {
            max_message_size: default_max_message_size(),
        }
    }
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Loads and validates a YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Err(e) = config.service.validate() {
        error!(error = %e, config_path = ?path_ref, "Config failed validation");
        return Err(anyhow::anyhow!("Invalid config: {e}"));
    }
    info!(broker = ?config.broker, "Broker selected");
    config.service.trace_loaded();

    Ok(config)
}
