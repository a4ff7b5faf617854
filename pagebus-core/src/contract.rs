//! # contract: interfaces between the pagebus core and its collaborators
//!
//! This module defines the traits the core is written against, plus the plain
//! data types that cross them:
//!
//! - [`Broker`]: the message broker facade (queues, topics, named subscriptions).
//! - [`MessageHandler`]: a consumer of one endpoint's deliveries, driven by
//!   [`crate::broker::dispatch`].
//! - [`DocumentAssembler`]: turns ordered page files into finished documents.
//! - [`PageRenderer`]: the imaging step used by the PDF assembler.
//!
//! ## Mocking & Testing
//! - `Broker`, `DocumentAssembler` and `PageRenderer` are annotated for `mockall`;
//!   the mocks are exported with the `test-export-mocks` feature (on by default)
//!   so integration tests and dependent crates can use them.
//!
//! ## Broker contract
//! Every implementation must honour three properties the transport relies on:
//! a maximum message size (oversized sends fail with
//! [`BrokerError::MessageTooLarge`]), at-least-once delivery, and FIFO delivery
//! for one sender/queue pair.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;

use crate::error::{BrokerError, RenderError};
use crate::sequencer::SourceFile;

/// Where messages are received from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A point-to-point queue.
    Queue(String),
    /// A named subscription on a topic; each subscription gets its own copy of every message.
    Subscription { topic: String, name: String },
}

impl Endpoint {
    pub fn queue(name: impl Into<String>) -> Self {
        Endpoint::Queue(name.into())
    }

    pub fn subscription(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Endpoint::Subscription {
            topic: topic.into(),
            name: name.into(),
        }
    }

    /// Entity path as used in broker addresses, e.g. `settings/subscriptions/producer`.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Queue(name) => name.clone(),
            Endpoint::Subscription { topic, name } => format!("{topic}/subscriptions/{name}"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Thin capability over a message broker.
///
/// `send` addresses a queue or a topic by name. `receive` removes and returns the
/// next message of an endpoint (receive-and-delete), waiting at most `wait` for
/// one to arrive.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Send one message to a queue or topic.
    async fn send(&self, entity: &str, body: Vec<u8>) -> Result<(), BrokerError>;

    /// Take the next message from an endpoint, or `None` if nothing arrived within `wait`.
    async fn receive(
        &self,
        endpoint: &Endpoint,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Create the queue if it does not exist yet.
    async fn ensure_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Create the topic if it does not exist yet.
    async fn ensure_topic(&self, name: &str) -> Result<(), BrokerError>;

    /// Create the named subscription on `topic` if it does not exist yet.
    async fn ensure_subscription(&self, topic: &str, subscription: &str)
        -> Result<(), BrokerError>;
}

/// Receives the messages of one endpoint, in delivery order.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, body: Vec<u8>);

    /// Called when a receive wait elapsed without a message.
    async fn on_idle(&mut self) {}
}

/// A finished document together with every source file it consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedDocument {
    pub payload: Vec<u8>,
    pub consumed: Vec<PathBuf>,
}

/// Why an assembler abandoned the current sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenReason {
    /// A page with a different file type than the rest of the sequence.
    MixedExtensions { expected: String, found: String },
    /// The pages could not be rendered.
    RenderFailed(String),
}

/// Outcome of pushing one page into an assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyEvent {
    /// The page was accumulated; no document is ready yet.
    Pending,
    /// A document is complete.
    Ready(FinishedDocument),
    /// The sequence is inconsistent; `files` must be discarded and the assembler reset.
    SequenceBroken {
        files: Vec<PathBuf>,
        reason: BrokenReason,
    },
}

/// External document-rendering collaborator, fed one page at a time in order.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait DocumentAssembler: Send {
    fn push_file(&mut self, file: &SourceFile) -> AssemblyEvent;

    /// Paths accumulated for the in-flight document.
    fn pending(&self) -> Vec<PathBuf>;

    /// Discard all in-flight accumulation state.
    fn reset(&mut self);
}

/// Renders ordered page images into a single document.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait PageRenderer: Send + Sync {
    fn render(&self, pages: &[PathBuf]) -> Result<Vec<u8>, RenderError>;
}
