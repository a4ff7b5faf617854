//! # Azure Service Bus broker over REST
//!
//! Implements the core [`Broker`] trait against a Service Bus namespace using
//! plain HTTPS calls:
//!
//! - send: `POST /{entity}/messages` (413 means the message is too large)
//! - receive: `DELETE /{entity}/messages/head?timeout=N` (receive-and-delete; 204 means empty)
//! - ensure: `PUT /{entity}` with an Atom entry description (409 means it already exists)
//!
//! Authentication uses a pre-generated SAS token from `SERVICEBUS_SAS_TOKEN`.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use pagebus_core::contract::{Broker, Endpoint};
use pagebus_core::error::BrokerError;
use reqwest::{Client, Response, StatusCode};

pub const SAS_TOKEN_VAR: &str = "SERVICEBUS_SAS_TOKEN";

const ATOM_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

pub struct ServiceBusClient {
    http: Client,
    base_url: String,
    sas_token: String,
    max_message_size: usize,
}

impl ServiceBusClient {
    pub fn new(namespace: &str, sas_token: String, max_message_size: usize) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("https://{namespace}.servicebus.windows.net"),
            sas_token,
            max_message_size,
        }
    }

    pub fn new_from_env(
        namespace: &str,
        max_message_size: usize,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();
        match env::var(SAS_TOKEN_VAR) {
            Ok(token) if !token.trim().is_empty() => {
                tracing::info!(namespace, max_message_size, "Initialized ServiceBusClient from environment");
                Ok(Self::new(namespace, token, max_message_size))
            }
            Ok(_) => {
                tracing::error!("{SAS_TOKEN_VAR} is empty");
                Err(format!("{SAS_TOKEN_VAR} is empty").into())
            }
            Err(e) => {
                tracing::error!(error = ?e, "{SAS_TOKEN_VAR} missing in environment");
                Err(Box::new(e))
            }
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn put_entity(&self, path: &str, description: &str) -> Result<(), BrokerError> {
        let response = self
            .http
            .put(format!("{}?api-version=2017-04", self.url(path)))
            .header("Authorization", &self.sas_token)
            .header("Content-Type", ATOM_CONTENT_TYPE)
            .body(entity_description(description))
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                tracing::info!(entity = path, "Created Service Bus entity");
                Ok(())
            }
            StatusCode::CONFLICT => {
                tracing::debug!(entity = path, "Service Bus entity already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BrokerError::NotFound(path.to_string())),
            _ => Err(unexpected(response).await),
        }
    }
}

/// Atom entry body for creating a queue, topic or subscription.
fn entity_description(kind: &str) -> String {
    format!(
        r#"<entry xmlns="http://www.w3.org/2005/Atom"><content type="application/xml"><{kind} xmlns:i="http://www.w3.org/2001/XMLSchema-instance" xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect" /></content></entry>"#
    )
}

fn transport(e: reqwest::Error) -> BrokerError {
    BrokerError::Transport(e.to_string())
}

async fn unexpected(response: Response) -> BrokerError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    BrokerError::Transport(format!("unexpected status {status}: {text}"))
}

#[async_trait]
impl Broker for ServiceBusClient {
    async fn send(&self, entity: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let size = body.len();
        if size > self.max_message_size {
            return Err(BrokerError::MessageTooLarge {
                size,
                limit: self.max_message_size,
            });
        }
        let response = self
            .http
            .post(self.url(&format!("{entity}/messages")))
            .header("Authorization", &self.sas_token)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::PAYLOAD_TOO_LARGE => Err(BrokerError::MessageTooLarge {
                size,
                limit: self.max_message_size,
            }),
            StatusCode::NOT_FOUND => Err(BrokerError::NotFound(entity.to_string())),
            _ => Err(unexpected(response).await),
        }
    }

    async fn receive(
        &self,
        endpoint: &Endpoint,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let timeout = wait.as_secs().max(1);
        let response = self
            .http
            .delete(self.url(&format!("{}/messages/head?timeout={timeout}", endpoint.path())))
            .header("Authorization", &self.sas_token)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::NOT_FOUND => Err(BrokerError::NotFound(endpoint.path())),
            s if s.is_success() => {
                let bytes = response.bytes().await.map_err(transport)?;
                Ok(Some(bytes.to_vec()))
            }
            _ => Err(unexpected(response).await),
        }
    }

    async fn ensure_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.put_entity(name, "QueueDescription").await
    }

    async fn ensure_topic(&self, name: &str) -> Result<(), BrokerError> {
        self.put_entity(name, "TopicDescription").await
    }

    async fn ensure_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<(), BrokerError> {
        let endpoint = Endpoint::subscription(topic, subscription);
        self.put_entity(&endpoint.path(), "SubscriptionDescription")
            .await
    }
}
