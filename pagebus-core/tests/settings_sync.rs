use std::sync::Arc;
use std::time::Duration;

use pagebus_core::broker::{spawn_dispatch, MemoryBroker};
use pagebus_core::contract::{Broker, Endpoint};
use pagebus_core::heartbeat::Heartbeat;
use pagebus_core::settings::{Settings, SettingsHandle, SettingsPublisher, SettingsSubscriber};
use pagebus_core::status::{ProcessingStatus, StatusHandle, StatusSnapshot};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const CENTRAL: &str = "central";
const TOPIC: &str = "settings";

async fn broker() -> Arc<MemoryBroker> {
    let broker = Arc::new(MemoryBroker::default());
    broker.ensure_queue(CENTRAL).await.unwrap();
    broker.ensure_topic(TOPIC).await.unwrap();
    broker.ensure_subscription(TOPIC, "producer").await.unwrap();
    broker
}

fn snapshots(broker: &MemoryBroker) -> Vec<StatusSnapshot> {
    broker
        .drain(&Endpoint::queue(CENTRAL))
        .iter()
        .map(|body| serde_json::from_slice(body).unwrap())
        .collect()
}

/// Lets spawned tasks run; with paused time this does not move the clock past pending timers.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_ticks_immediately_then_every_period() {
    let broker = broker().await;
    let settings = SettingsHandle::new(Settings {
        timeout_seconds: 10,
        barcode_separator: "SEP".into(),
    });
    let status = StatusHandle::default();
    let heartbeat = Heartbeat::new(broker.clone(), CENTRAL, settings, status.clone());

    heartbeat.start();
    settle().await;
    assert_eq!(snapshots(&broker).len(), 1);

    status.set(ProcessingStatus::InProcess);
    tokio::time::sleep(Duration::from_secs(10)).await;
    let sent = snapshots(&broker);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, ProcessingStatus::InProcess);

    heartbeat.stop();
    assert!(!heartbeat.is_running());
}

#[tokio::test(start_paused = true)]
async fn new_settings_take_effect_without_waiting_for_the_old_period() {
    let broker = broker().await;
    let settings = SettingsHandle::new(Settings {
        timeout_seconds: 3600,
        barcode_separator: "SEP".into(),
    });
    let heartbeat = Arc::new(Heartbeat::new(
        broker.clone(),
        CENTRAL,
        settings.clone(),
        StatusHandle::default(),
    ));
    heartbeat.start();
    settle().await;
    assert_eq!(snapshots(&broker).len(), 1);

    let subscriber = SettingsSubscriber::new(settings.clone(), heartbeat.clone());
    subscriber.apply(Settings {
        timeout_seconds: 5,
        barcode_separator: "NEXT".into(),
    });
    settle().await;

    let sent = snapshots(&broker);
    assert_eq!(sent.len(), 1, "restart fires immediately");
    assert_eq!(sent[0].settings.timeout_seconds, 5);
    assert_eq!(sent[0].settings.barcode_separator, "NEXT");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(snapshots(&broker).len(), 1, "next tick uses the new period");
    assert_eq!(settings.current().barcode_separator, "NEXT");
}

#[tokio::test(start_paused = true)]
async fn publisher_retries_until_the_settings_file_appears() {
    let broker = broker().await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.yaml");
    let publisher = SettingsPublisher::new(broker.clone(), TOPIC, &path, Duration::from_secs(2));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(async move { publisher.publish(&cancel).await });
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(broker.pending(&Endpoint::subscription(TOPIC, "producer")), 0);

    std::fs::write(&path, "timeout_seconds: 7\nbarcode_separator: CUT\n").unwrap();
    let published = task.await.unwrap().expect("published once the file exists");

    assert_eq!(published.timeout_seconds, 7);
    let messages = broker.drain(&Endpoint::subscription(TOPIC, "producer"));
    assert_eq!(messages.len(), 1);
    assert_eq!(Settings::from_message(&messages[0]).unwrap(), published);
}

#[tokio::test(start_paused = true)]
async fn publisher_gives_up_only_on_cancellation() {
    let broker = broker().await;
    let dir = tempdir().unwrap();
    let publisher = SettingsPublisher::new(
        broker.clone(),
        TOPIC,
        dir.path().join("missing.yaml"),
        Duration::from_secs(2),
    );
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();

    let task = tokio::spawn(async move { publisher.publish(&cancel).await });
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!task.is_finished());

    stopper.cancel();
    assert_eq!(task.await.unwrap(), None);
}

#[tokio::test]
async fn published_settings_reach_every_subscriber() {
    let broker = broker().await;
    broker.ensure_subscription(TOPIC, "consumer").await.unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.yaml");
    std::fs::write(&path, "timeout_seconds: 30\nbarcode_separator: BARCODE\n").unwrap();

    let settings = SettingsHandle::new(Settings::default());
    let heartbeat = Arc::new(Heartbeat::new(
        broker.clone(),
        CENTRAL,
        settings.clone(),
        StatusHandle::default(),
    ));
    let cancel = CancellationToken::new();
    let listener = spawn_dispatch(
        broker.clone(),
        Endpoint::subscription(TOPIC, "producer"),
        SettingsSubscriber::new(settings.clone(), heartbeat.clone()),
        Duration::from_millis(20),
        cancel.clone(),
    );

    let publisher = SettingsPublisher::new(broker.clone(), TOPIC, &path, Duration::from_millis(10));
    publisher.publish(&cancel).await.unwrap();

    let mut watch = settings.subscribe();
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| s.barcode_separator == "BARCODE"))
        .await
        .expect("settings applied in time")
        .unwrap();

    assert_eq!(settings.current().timeout_seconds, 30);
    assert!(heartbeat.is_running());
    assert_eq!(broker.pending(&Endpoint::subscription(TOPIC, "consumer")), 1);

    cancel.cancel();
    listener.await.unwrap();
    heartbeat.stop();
}
