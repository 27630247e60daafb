//! Delivery Integration Tests
//!
//! Ledger idempotence and dedup across worker restarts.

mod common;

use std::sync::{Arc, Barrier};
use std::time::Duration;

use callwatch::adapters::IngestionClient;
use callwatch::core::{BackoffPolicy, DedupLedger, MarkResult};
use callwatch::delivery::{DeliveryConfig, DeliveryMode, DeliveryWorker};
use common::{RecordingSink, Responder};
use tempfile::TempDir;

fn config(temp: &TempDir) -> DeliveryConfig {
    let staging_dir = temp.path().join("chunks");
    std::fs::create_dir_all(&staging_dir).unwrap();
    DeliveryConfig {
        staging_dir,
        sent_dir: temp.path().join("sentchunks"),
        extensions: vec!["wav".to_string()],
        poll_interval: Duration::from_millis(20),
        mode: DeliveryMode::Ledger,
        backoff: BackoffPolicy::immediate(),
    }
}

#[test]
fn test_mark_sent_is_idempotent_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sent_chunks.db");

    {
        let ledger = DedupLedger::open(&path).unwrap();
        assert_eq!(ledger.mark_sent("100_1_000.wav").unwrap(), MarkResult::Recorded);
        assert_eq!(ledger.mark_sent("100_1_000.wav").unwrap(), MarkResult::AlreadyRecorded);
    }

    let ledger = DedupLedger::open(&path).unwrap();
    assert!(ledger.is_sent("100_1_000.wav").unwrap());
    assert_eq!(ledger.mark_sent("100_1_000.wav").unwrap(), MarkResult::AlreadyRecorded);
    assert_eq!(ledger.sent_count().unwrap(), 1);
}

#[test]
fn test_racing_connections_record_once() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sent_chunks.db");
    DedupLedger::open(&path).unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                // Separate connections, like separate worker processes
                let ledger = DedupLedger::open(&path).unwrap();
                barrier.wait();
                ledger.mark_sent("100_1_000.wav").unwrap()
            })
        })
        .collect();

    let recorded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_new())
        .count();
    assert_eq!(recorded, 1);
}

#[tokio::test]
async fn test_restart_delivers_only_new_chunks() {
    let temp = TempDir::new().unwrap();
    let ledger_path = temp.path().join("sent_chunks.db");
    let config = config(&temp);

    for name in ["100_1_000.wav", "100_1_001.wav", "100_1_002.wav"] {
        std::fs::write(config.staging_dir.join(name), b"RIFF").unwrap();
    }

    // Previous run confirmed the first two before stopping
    {
        let ledger = DedupLedger::open(&ledger_path).unwrap();
        ledger.mark_sent("100_1_000.wav").unwrap();
        ledger.mark_sent("100_1_001.wav").unwrap();
    }

    let sink = Arc::new(RecordingSink::default());
    let ledger = Arc::new(DedupLedger::open(&ledger_path).unwrap());
    let mut worker = DeliveryWorker::new(config, Arc::clone(&ledger), sink.clone());

    let cycle = worker.poll_once().await.unwrap();
    assert_eq!(cycle.delivered, 1);
    assert_eq!(cycle.already_sent, 2);
    assert_eq!(sink.attempts(), vec!["100_1_002.wav"]);

    // Nothing left to do on the next cycle
    assert_eq!(worker.poll_once().await.unwrap().attempted(), 0);
    assert_eq!(ledger.sent_count().unwrap(), 3);
}

#[tokio::test]
async fn test_chunks_are_never_deleted() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let staged = config.staging_dir.join("100_1_000.wav");
    std::fs::write(&staged, b"RIFF").unwrap();

    let ledger = Arc::new(DedupLedger::open_in_memory().unwrap());
    let mut worker = DeliveryWorker::new(config, ledger, Arc::new(RecordingSink::default()));
    worker.poll_once().await.unwrap();

    assert!(staged.exists());
}

#[tokio::test]
async fn test_uploads_carry_the_ledger_key() {
    let responder = Responder::start(200).await;
    let temp = TempDir::new().unwrap();
    let config = config(&temp);

    // Short index width is not a canonical chunk name
    std::fs::write(config.staging_dir.join("100_1_7.wav"), b"RIFF-seven").unwrap();
    std::fs::write(config.staging_dir.join("100_1_007.wav"), b"RIFF-007").unwrap();

    let client = IngestionClient::new(format!("{}/receive_audio", responder.url), Duration::from_secs(5)).unwrap();
    let ledger = Arc::new(DedupLedger::open_in_memory().unwrap());
    let mut worker = DeliveryWorker::new(config, Arc::clone(&ledger), Arc::new(client));

    let cycle = worker.poll_once().await.unwrap();
    assert_eq!(cycle.delivered, 1);
    assert_eq!(cycle.malformed, 1);

    assert_eq!(responder.upload_names(), vec!["100_1_007.wav"]);
    assert_eq!(responder.uploads()[0].file_bytes, b"RIFF-007");
    assert!(ledger.is_sent("100_1_007.wav").unwrap());
    assert!(!ledger.is_sent("100_1_7.wav").unwrap());
    assert_eq!(ledger.sent_count().unwrap(), 1);
}

#[tokio::test]
async fn test_ledger_read_error_skips_only_that_chunk() {
    let temp = TempDir::new().unwrap();
    let ledger_path = temp.path().join("sent_chunks.db");
    let config = config(&temp);

    // Lookups of 100_1_000.wav raise an SQL error; the others read normally
    {
        let conn = rusqlite::Connection::open(&ledger_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sent_files_store (filename TEXT PRIMARY KEY, sent_at TEXT NOT NULL);
             INSERT INTO sent_files_store VALUES ('100_1_000.wav', '2024-04-05T12:00:00+00:00');
             CREATE VIEW sent_files AS
                 SELECT filename, sent_at FROM sent_files_store
                 WHERE CASE WHEN filename = '100_1_000.wav' THEN json(filename) ELSE 1 END;
             CREATE TRIGGER sent_files_insert INSTEAD OF INSERT ON sent_files BEGIN
                 INSERT OR IGNORE INTO sent_files_store VALUES (NEW.filename, NEW.sent_at);
             END;",
        )
        .unwrap();
    }

    for name in ["100_1_000.wav", "100_1_001.wav", "100_1_002.wav"] {
        std::fs::write(config.staging_dir.join(name), b"RIFF").unwrap();
    }

    let sink = Arc::new(RecordingSink::default());
    let ledger = Arc::new(DedupLedger::open(&ledger_path).unwrap());
    assert!(ledger.is_sent("100_1_000.wav").is_err());

    let mut worker = DeliveryWorker::new(config, Arc::clone(&ledger), sink.clone());
    let cycle = worker.poll_once().await.unwrap();

    assert_eq!(cycle.unchecked, 1);
    assert_eq!(cycle.delivered, 2);
    assert_eq!(sink.attempts(), vec!["100_1_001.wav", "100_1_002.wav"]);
    assert!(ledger.is_sent("100_1_002.wav").unwrap());
}
