//! Error types shared across the core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a [`crate::contract::Broker`] implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker refused the message because it exceeds its size limit.
    #[error("message of {size} bytes exceeds the broker limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },
    /// The queue, topic or subscription does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),
    /// Any other transport or protocol failure.
    #[error("broker transport error: {0}")]
    Transport(String),
}

/// A document could not be delivered to the document queue.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A one-byte payload equal to a control marker cannot be told apart from the marker.
    #[error("payload is a single byte equal to control marker {0}")]
    AmbiguousPayload(u8),
    /// The single-message attempt failed for a reason other than size.
    #[error("single-message send failed: {0}")]
    Single(#[source] BrokerError),
    /// A message of the chunked sequence failed; the document as a whole is undelivered.
    #[error("chunked send failed at message {index} of {total}: {source}")]
    Chunk {
        index: usize,
        total: usize,
        #[source]
        source: BrokerError,
    },
}

/// The receiver gave up on a partially reassembled document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("document exceeds the maximum of {limit} bytes; {discarded} buffered bytes discarded")]
    Oversized { limit: usize, discarded: usize },
}

/// Rendering ordered pages into a document failed.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no pages to render")]
    EmptyInput,
    #[error("failed to read page {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode page {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

/// Reading or decoding a settings resource failed.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to decode settings message: {0}")]
    Json(#[from] serde_json::Error),
}

/// A loaded configuration cannot be used as-is.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
