//! In-process broker with the same contract as the real one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::contract::{Broker, Endpoint};
use crate::error::BrokerError;

/// Default size limit, matching a standard-tier Service Bus namespace.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;

#[derive(Debug, Default)]
struct Entities {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    /// Topic name to its subscriptions, each with its own backlog.
    topics: HashMap<String, HashMap<String, VecDeque<Vec<u8>>>>,
}

impl Entities {
    fn backlog(&mut self, endpoint: &Endpoint) -> Option<&mut VecDeque<Vec<u8>>> {
        match endpoint {
            Endpoint::Queue(name) => self.queues.get_mut(name),
            Endpoint::Subscription { topic, name } => self.topics.get_mut(topic)?.get_mut(name),
        }
    }
}

/// FIFO queues and fan-out topics held in memory, with a message size limit.
#[derive(Debug)]
pub struct MemoryBroker {
    max_message_size: usize,
    entities: Mutex<Entities>,
    arrivals: Notify,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MemoryBroker {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            entities: Mutex::new(Entities::default()),
            arrivals: Notify::new(),
        }
    }

    fn entities(&self) -> MutexGuard<'_, Entities> {
        self.entities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of messages waiting on an endpoint.
    pub fn pending(&self, endpoint: &Endpoint) -> usize {
        self.entities().backlog(endpoint).map_or(0, |b| b.len())
    }

    /// Removes and returns every message waiting on an endpoint.
    pub fn drain(&self, endpoint: &Endpoint) -> Vec<Vec<u8>> {
        self.entities()
            .backlog(endpoint)
            .map(|b| b.drain(..).collect())
            .unwrap_or_default()
    }

    fn pop(&self, endpoint: &Endpoint) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut entities = self.entities();
        let backlog = entities
            .backlog(endpoint)
            .ok_or_else(|| BrokerError::NotFound(endpoint.path()))?;
        Ok(backlog.pop_front())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, entity: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        if body.len() > self.max_message_size {
            return Err(BrokerError::MessageTooLarge {
                size: body.len(),
                limit: self.max_message_size,
            });
        }
        {
            let mut entities = self.entities();
            if let Some(queue) = entities.queues.get_mut(entity) {
                queue.push_back(body);
            } else if let Some(subscriptions) = entities.topics.get_mut(entity) {
                for backlog in subscriptions.values_mut() {
                    backlog.push_back(body.clone());
                }
            } else {
                return Err(BrokerError::NotFound(entity.to_string()));
            }
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        endpoint: &Endpoint,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(body) = self.pop(endpoint)? {
                return Ok(Some(body));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ensure_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut entities = self.entities();
        if !entities.queues.contains_key(name) {
            debug!(queue = name, "Creating in-memory queue");
            entities.queues.insert(name.to_string(), VecDeque::new());
        }
        Ok(())
    }

    async fn ensure_topic(&self, name: &str) -> Result<(), BrokerError> {
        self.entities().topics.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn ensure_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<(), BrokerError> {
        let mut entities = self.entities();
        let subscriptions = entities
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::NotFound(topic.to_string()))?;
        subscriptions.entry(subscription.to_string()).or_default();
        Ok(())
    }
}
