//! Broker plumbing shared by every role.
//!
//! - [`dispatch`] pumps one endpoint's deliveries into a [`MessageHandler`],
//!   one message at a time, so handlers observe send order.
//! - [`ensure_topology`] creates the queues, topic and subscription a process
//!   needs before it starts sending or receiving.
//! - [`memory::MemoryBroker`] is the in-process implementation of
//!   [`Broker`](crate::contract::Broker).

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::BrokerTopology;
use crate::contract::{Broker, Endpoint, MessageHandler};
use crate::error::BrokerError;

pub use memory::MemoryBroker;

/// Receives from `endpoint` until cancelled, handing each message to `handler`.
///
/// Cancellation is observed between receives, never in the middle of one, so a
/// message already taken off the broker always reaches the handler. Broker
/// errors are logged and retried after `wait`.
pub async fn dispatch<H>(
    broker: Arc<dyn Broker>,
    endpoint: Endpoint,
    handler: &mut H,
    wait: Duration,
    cancel: CancellationToken,
) where
    H: MessageHandler + ?Sized,
{
    info!(%endpoint, "[DISPATCH] Listening");
    while !cancel.is_cancelled() {
        match broker.receive(&endpoint, wait).await {
            Ok(Some(body)) => {
                debug!(%endpoint, size = body.len(), "[DISPATCH] Message received");
                handler.handle(body).await;
            }
            Ok(None) => handler.on_idle().await,
            Err(e) => {
                error!(%endpoint, error = %e, "[DISPATCH] Receive failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }
    info!(%endpoint, "[DISPATCH] Stopped");
}

/// Spawns [`dispatch`] for a handler the task takes ownership of.
pub fn spawn_dispatch<H>(
    broker: Arc<dyn Broker>,
    endpoint: Endpoint,
    mut handler: H,
    wait: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    H: MessageHandler + 'static,
{
    tokio::spawn(async move {
        dispatch(broker, endpoint, &mut handler, wait, cancel).await;
    })
}

/// Ensures the queues and the settings topic exist, then this process's
/// subscription on the topic when one is given.
pub async fn ensure_topology(
    broker: &dyn Broker,
    topology: &BrokerTopology,
    subscription: Option<&str>,
) -> Result<(), BrokerError> {
    try_join_all([
        broker.ensure_queue(&topology.document_queue),
        broker.ensure_queue(&topology.central_queue),
        broker.ensure_topic(&topology.settings_topic),
    ])
    .await?;

    if let Some(name) = subscription {
        broker
            .ensure_subscription(&topology.settings_topic, name)
            .await?;
    }
    info!(
        document_queue = %topology.document_queue,
        central_queue = %topology.central_queue,
        settings_topic = %topology.settings_topic,
        subscription = ?subscription,
        "[BROKER] Topology ensured"
    );
    Ok(())
}
