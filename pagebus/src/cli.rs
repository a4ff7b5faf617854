/// # pagebus CLI interface
///
/// Command parsing and process wiring for the `pagebus` binary. All behaviour
/// (sequencing, assembly, transport, settings sync) lives in `pagebus-core`;
/// this module only builds the broker, the watchers and the cancellation token
/// and hands them to the core roles.
///
/// For programmatic or integration use, call [`run`] with a constructed [`Cli`].
use std::ffi::OsString;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagebus_core::assembler::PdfAssembler;
use pagebus_core::broker::{ensure_topology, MemoryBroker};
use pagebus_core::consumer::Consumer;
use pagebus_core::contract::Broker;
use pagebus_core::producer::Producer;
use pagebus_core::settings::SettingsPublisher;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::load_config::{load_config, BrokerSection, CliConfig};
use crate::servicebus::ServiceBusClient;
use crate::watcher::watch_directory;

/// CLI for pagebus: move scanned page batches to a remote consumer as documents.
#[derive(Parser)]
#[clap(
    name = "pagebus",
    version,
    about = "Assemble scanned pages into documents and ship them over a message broker"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the inbound directory and send assembled documents
    Produce {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Receive documents and publish settings changes
    Consume {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Run producer and consumer in one process over the in-memory broker
    Standalone {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Publish the settings file to the settings topic once and exit
    PublishSettings {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Produce { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "produce", "Starting producer");
            let broker = connect(&config.broker)?;
            produce(config, broker, shutdown_on_ctrl_c()).await
        }
        Commands::Consume { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "consume", "Starting consumer");
            let broker = connect(&config.broker)?;
            consume(config, broker, shutdown_on_ctrl_c()).await
        }
        Commands::Standalone { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "standalone", "Starting producer and consumer in one process");
            standalone(config, shutdown_on_ctrl_c()).await
        }
        Commands::PublishSettings { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "publish-settings", "Publishing settings once");
            let broker = connect(&config.broker)?;
            publish_settings(config, broker).await
        }
    }
}

fn connect(section: &BrokerSection) -> Result<Arc<dyn Broker>> {
    match section {
        BrokerSection::Memory { max_message_size } => {
            tracing::warn!("Using the in-memory broker; nothing leaves this process");
            Ok(Arc::new(MemoryBroker::new(*max_message_size)))
        }
        BrokerSection::Servicebus {
            namespace,
            max_message_size,
        } => {
            let client = ServiceBusClient::new_from_env(namespace, *max_message_size)
                .map_err(|e| anyhow::anyhow!("Failed to construct Service Bus client from env: {e}"))?;
            Ok(Arc::new(client))
        }
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = ?e, "Cannot listen for shutdown signal"),
        }
        trigger.cancel();
    });
    cancel
}

async fn produce(config: CliConfig, broker: Arc<dyn Broker>, cancel: CancellationToken) -> Result<()> {
    let service = config.service;
    service
        .ensure_directories()
        .context("Failed to create configured directories")?;
    let (_watcher, new_files) = watch_directory(&service.directories.inbound, None)
        .context("Failed to watch inbound directory")?;

    let producer = Producer::new(service, broker);
    let assembler = Box::new(PdfAssembler::new(producer.settings()));
    producer
        .run(assembler, new_files, cancel)
        .await
        .context("Producer failed")?;
    Ok(())
}

async fn consume(config: CliConfig, broker: Arc<dyn Broker>, cancel: CancellationToken) -> Result<()> {
    let service = config.service;
    service
        .ensure_directories()
        .context("Failed to create configured directories")?;
    let settings_file = OsString::from(&service.directories.settings_file);
    let (_watcher, changes) = watch_directory(&service.directories.settings_dir, Some(settings_file))
        .context("Failed to watch settings directory")?;

    Consumer::new(service, broker)
        .run(changes, cancel)
        .await
        .context("Consumer failed")?;
    Ok(())
}

async fn standalone(config: CliConfig, cancel: CancellationToken) -> Result<()> {
    let max_message_size = match &config.broker {
        BrokerSection::Memory { max_message_size } => *max_message_size,
        BrokerSection::Servicebus { max_message_size, .. } => {
            tracing::warn!("Standalone mode ignores the Service Bus selection");
            *max_message_size
        }
    };
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new(max_message_size));
    let topology = &config.service.topology;
    // The producer's subscription must exist before the consumer publishes settings.
    ensure_topology(broker.as_ref(), topology, Some(topology.settings_subscription.as_str()))
        .await
        .context("Failed to set up the in-memory broker")?;

    let producer_config = CliConfig {
        broker: config.broker.clone(),
        service: config.service.clone(),
    };
    tokio::try_join!(
        produce(producer_config, broker.clone(), cancel.clone()),
        consume(config, broker, cancel),
    )?;
    Ok(())
}

async fn publish_settings(config: CliConfig, broker: Arc<dyn Broker>) -> Result<()> {
    let service = config.service;
    broker
        .ensure_topic(&service.topology.settings_topic)
        .await
        .context("Failed to ensure settings topic")?;
    let publisher = SettingsPublisher::new(
        broker,
        &service.topology.settings_topic,
        service.directories.settings_path(),
        service.settings_retry_delay(),
    );
    match publisher.publish(&shutdown_on_ctrl_c()).await {
        Some(settings) => {
            println!(
                "Settings published: timeout_seconds={} barcode_separator={}",
                settings.timeout_seconds, settings.barcode_separator
            );
            Ok(())
        }
        None => Err(anyhow::anyhow!("Interrupted before the settings were published")),
    }
}
