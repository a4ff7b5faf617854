use std::fs::{write, File};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use pagebus_core::assembler::PdfAssembler;
use pagebus_core::broker::MemoryBroker;
use pagebus_core::contract::{Broker, Endpoint, MockBroker, MockPageRenderer};
use pagebus_core::error::BrokerError;
use pagebus_core::producer::{PassReport, Worker};
use pagebus_core::retry::RetryPolicy;
use pagebus_core::sequencer::FileSequencer;
use pagebus_core::settings::{Settings, SettingsHandle};
use pagebus_core::status::{ProcessingStatus, StatusHandle};
use pagebus_core::transport::ChunkedSender;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

const QUEUE: &str = "documents";

struct Dirs {
    inbound: TempDir,
    quarantine: TempDir,
}

impl Dirs {
    fn new(files: &[&str]) -> Self {
        let dirs = Dirs {
            inbound: tempdir().unwrap(),
            quarantine: tempdir().unwrap(),
        };
        for name in files {
            write(dirs.inbound.path().join(name), b"page").unwrap();
        }
        dirs
    }

    fn has(&self, name: &str) -> bool {
        self.inbound.path().join(name).exists()
    }
}

fn settings() -> SettingsHandle {
    SettingsHandle::new(Settings {
        timeout_seconds: 60,
        barcode_separator: "SEP".into(),
    })
}

fn renderer_returning(payload: &'static [u8]) -> Box<MockPageRenderer> {
    let mut renderer = MockPageRenderer::new();
    renderer.expect_render().returning(move |_| Ok(payload.to_vec()));
    Box::new(renderer)
}

fn worker(dirs: &Dirs, broker: Arc<dyn Broker>, status: StatusHandle, renderer: Box<MockPageRenderer>) -> Worker {
    worker_with_retry(dirs, broker, status, renderer, RetryPolicy::new(2, Duration::from_millis(1)))
}

fn worker_with_retry(
    dirs: &Dirs,
    broker: Arc<dyn Broker>,
    status: StatusHandle,
    renderer: Box<MockPageRenderer>,
    retry: RetryPolicy,
) -> Worker {
    Worker::new(
        FileSequencer::new(dirs.inbound.path(), dirs.quarantine.path(), retry),
        Box::new(PdfAssembler::with_renderer(settings(), renderer)),
        ChunkedSender::new(broker, QUEUE),
        retry,
        status,
        Duration::from_secs(5),
    )
}

async fn memory_broker() -> Arc<MemoryBroker> {
    let broker = Arc::new(MemoryBroker::default());
    broker.ensure_queue(QUEUE).await.unwrap();
    broker
}

#[tokio::test]
async fn delivered_document_deletes_its_source_files() {
    let dirs = Dirs::new(&["a_1.jpg", "a_2.jpg", "SEP_3.jpg", "b_4.jpg"]);
    let broker = memory_broker().await;
    let status = StatusHandle::default();
    let mut worker = worker(&dirs, broker.clone(), status.clone(), renderer_returning(b"%PDF-1"));

    let report = worker.run_pass(&CancellationToken::new()).await;

    assert_eq!(
        report,
        PassReport {
            delivered: 1,
            ..PassReport::default()
        }
    );
    assert_eq!(broker.drain(&Endpoint::queue(QUEUE)), vec![b"%PDF-1".to_vec()]);
    assert!(!dirs.has("a_1.jpg"));
    assert!(!dirs.has("a_2.jpg"));
    assert!(!dirs.has("SEP_3.jpg"));
    // Waits for the next separator.
    assert!(dirs.has("b_4.jpg"));
    assert_eq!(status.current(), ProcessingStatus::Waiting);
}

#[tokio::test]
async fn failed_delivery_keeps_source_files_for_the_next_pass() {
    let dirs = Dirs::new(&["a_1.jpg", "SEP_2.jpg"]);
    let mut broker = MockBroker::new();
    broker
        .expect_send()
        .times(2)
        .returning(|_, _| Err(BrokerError::Transport("unreachable".into())));
    let mut worker = worker(&dirs, Arc::new(broker), StatusHandle::default(), renderer_returning(b"%PDF"));

    let first = worker.run_pass(&CancellationToken::new()).await;
    assert_eq!(first.failed, 1);
    assert!(dirs.has("a_1.jpg"));
    assert!(dirs.has("SEP_2.jpg"));

    // The assembler was reset, so the same files form the same document again.
    let second = worker.run_pass(&CancellationToken::new()).await;
    assert_eq!(second.failed, 1);
    assert!(dirs.has("a_1.jpg"));
}

#[tokio::test]
async fn broken_sequence_discards_its_files_and_starts_clean() {
    let dirs = Dirs::new(&["a_1.jpg", "a_2.png", "c_3.png", "SEP_4.png"]);
    let broker = memory_broker().await;
    let mut worker = worker(&dirs, broker.clone(), StatusHandle::default(), renderer_returning(b"%PDF-c"));

    let report = worker.run_pass(&CancellationToken::new()).await;

    assert_eq!(report.discarded_files, 2);
    assert_eq!(report.delivered, 1);
    assert!(!dirs.has("a_1.jpg"));
    assert!(!dirs.has("a_2.png"));
    assert!(!dirs.has("c_3.png"));
    assert_eq!(broker.drain(&Endpoint::queue(QUEUE)), vec![b"%PDF-c".to_vec()]);
}

#[tokio::test]
async fn rescan_does_not_push_pending_pages_twice() {
    let dirs = Dirs::new(&["a_1.jpg"]);
    let broker = memory_broker().await;
    let mut renderer = MockPageRenderer::new();
    renderer
        .expect_render()
        .withf(|pages| pages.len() == 2)
        .times(1)
        .returning(|_| Ok(b"%PDF-2".to_vec()));
    let mut worker = worker(&dirs, broker.clone(), StatusHandle::default(), Box::new(renderer));

    worker.run_pass(&CancellationToken::new()).await;
    write(dirs.inbound.path().join("a_2.jpg"), b"page").unwrap();
    worker.run_pass(&CancellationToken::new()).await;
    write(dirs.inbound.path().join("SEP_3.jpg"), b"page").unwrap();
    let report = worker.run_pass(&CancellationToken::new()).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(broker.pending(&Endpoint::queue(QUEUE)), 1);
}

#[tokio::test]
async fn cancelled_pass_hands_off_nothing() {
    let dirs = Dirs::new(&["a_1.jpg", "SEP_2.jpg"]);
    let broker = memory_broker().await;
    let mut worker = worker(&dirs, broker.clone(), StatusHandle::default(), Box::new(MockPageRenderer::new()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = worker.run_pass(&cancel).await;

    assert_eq!(report, PassReport::default());
    assert!(dirs.has("a_1.jpg"));
    assert_eq!(broker.pending(&Endpoint::queue(QUEUE)), 0);
}

#[tokio::test]
async fn invalid_files_are_quarantined_during_a_pass() {
    let dirs = Dirs::new(&["report.jpg"]);
    let broker = memory_broker().await;
    let mut worker = worker(&dirs, broker, StatusHandle::default(), Box::new(MockPageRenderer::new()));

    let report = worker.run_pass(&CancellationToken::new()).await;

    assert_eq!(report.quarantined, 1);
    assert!(dirs.quarantine.path().join("report.jpg").exists());
}

#[tokio::test(start_paused = true)]
async fn locked_files_are_left_untouched_after_the_retries() {
    let dirs = Dirs::new(&["a_1.jpg", "SEP_2.jpg", "report.jpg"]);
    let page = File::open(dirs.inbound.path().join("a_1.jpg")).unwrap();
    let stray = File::open(dirs.inbound.path().join("report.jpg")).unwrap();
    FileExt::lock_exclusive(&page).unwrap();
    FileExt::lock_exclusive(&stray).unwrap();
    let broker = memory_broker().await;
    let status = StatusHandle::default();
    let retry = RetryPolicy::new(3, Duration::from_millis(100));
    let mut worker = worker_with_retry(&dirs, broker.clone(), status.clone(), Box::new(MockPageRenderer::new()), retry);

    let started = tokio::time::Instant::now();
    let report = worker.run_pass(&CancellationToken::new()).await;
    let waited = started.elapsed();

    assert_eq!(report, PassReport::default());
    assert!(dirs.has("a_1.jpg"));
    assert!(dirs.has("SEP_2.jpg"));
    assert!(dirs.has("report.jpg"));
    assert!(!dirs.quarantine.path().join("report.jpg").exists());
    assert_eq!(broker.pending(&Endpoint::queue(QUEUE)), 0);
    // Three attempts each for the stray file and the first page, two delays each.
    assert!(waited >= Duration::from_millis(400) && waited < Duration::from_millis(500), "waited {waited:?}");
    assert_eq!(status.current(), ProcessingStatus::Waiting);
}
