use super::*;
use crate::breaker::CircuitBreaker;
use crate::catalog::{CatalogEntry, MemoryCatalog};
use crate::fetch::scripted::{Reply, ScriptedFetcher};
use crate::invoker::InvokerLimits;
use crate::progress::{self, Snapshot};
use crate::retry::RetryPolicy;
use crate::throttle::AdaptiveThrottle;
use chrono::NaiveDate;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

struct Harness {
    pool: WorkerPool,
    catalog: Arc<MemoryCatalog>,
    fetcher: Arc<ScriptedFetcher>,
    progress: ProgressHandle,
    aggregator: progress::Aggregator,
}

impl Harness {
    fn new(fetcher: ScriptedFetcher, max_parallel: usize, breaker_threshold: u32) -> Self {
        let fetcher = Arc::new(fetcher);
        let invoker = DownloadInvoker::new(
            fetcher.clone(),
            Arc::new(CircuitBreaker::new(breaker_threshold, Duration::from_secs(30))),
            Arc::new(AdaptiveThrottle::default()),
            RetryPolicy::default(),
            InvokerLimits {
                min_free_bytes: 0,
                ..InvokerLimits::default()
            },
        );
        let catalog = Arc::new(MemoryCatalog::default());
        let (progress, aggregator, _rx) = progress::channel(1000, Duration::from_millis(100));
        let pool = WorkerPool::new(
            Arc::new(invoker),
            ArchiveExpander::default(),
            catalog.clone(),
            catalog.clone(),
            progress.clone(),
            PoolSettings {
                max_parallel,
                max_archive_depth: 5,
                on_failure: FailureMode::Ignore,
            },
        );
        Self {
            pool,
            catalog,
            fetcher,
            progress,
            aggregator,
        }
    }

    /// Close the producer side and collect the final snapshot.
    async fn finish(self) -> Snapshot {
        let Harness {
            pool,
            progress,
            aggregator,
            ..
        } = self;
        drop(pool);
        drop(progress);
        (*aggregator.run().await).clone()
    }
}

fn task(dir: &Path, id: i64, name: &str) -> DownloadTask {
    DownloadTask {
        id,
        url: format!("https://example.com/{}", name),
        destination: dir.join(name),
        publish_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        theme_id: 1,
    }
}

fn tasks(dir: &Path, ids: std::ops::RangeInclusive<i64>) -> Vec<DownloadTask> {
    ids.map(|id| task(dir, id, &format!("{}.bin", id))).collect()
}

#[tokio::test(start_paused = true)]
async fn never_exceeds_max_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::always(Reply::Body(b"data".to_vec()))
        .with_latency(Duration::from_millis(200));
    let h = Harness::new(fetcher, 3, 5);

    let summary = h
        .pool
        .run(tasks(dir.path(), 1..=10), &CancellationToken::new())
        .await;
    assert_eq!(summary.succeeded, 10);
    assert_eq!(h.pool.peak_in_flight(), 3);
    assert_eq!(h.pool.in_flight(), 0);
    assert_eq!(h.pool.processed().len(), 10);
    for id in 1..=10 {
        assert!(h.catalog.is_downloaded(id));
    }
    assert_eq!(h.catalog.registered_files().len(), 10);

    let snap = h.finish().await;
    assert_eq!(snap.logs.len(), 10, "one terminal event per task");
    assert_eq!(snap.totals.succeeded, 10);
    let day = snap
        .daily_for(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap())
        .unwrap();
    assert_eq!(day.processed, 10);
}

#[tokio::test(start_paused = true)]
async fn processed_ids_are_not_redispatched() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(ScriptedFetcher::always(Reply::Body(b"x".to_vec())), 2, 5);
    let cancel = CancellationToken::new();

    h.pool.run(tasks(dir.path(), 1..=2), &cancel).await;
    let summary = h.pool.run(tasks(dir.path(), 1..=3), &cancel).await;
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.fetcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_processed_but_not_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(ScriptedFetcher::always(Reply::Status(404, None)), 2, 5);
    let summary = h
        .pool
        .run(tasks(dir.path(), 1..=1), &CancellationToken::new())
        .await;
    assert_eq!(summary.failed, 1);
    assert!(h.pool.processed().contains(1));
    assert!(!h.catalog.is_downloaded(1));
    assert!(h.catalog.registered_files().is_empty());

    let snap = h.finish().await;
    assert_eq!(snap.logs.len(), 1);
    assert!(snap.logs[0].message.contains("HTTP 404"), "{}", snap.logs[0].message);
    assert_eq!(snap.logs[0].level, LogLevel::Warn);
}

#[tokio::test(start_paused = true)]
async fn breaker_deferral_leaves_task_unprocessed() {
    let dir = tempfile::tempdir().unwrap();
    // Threshold 1: the first 429 opens the breaker and the retry is rejected.
    let fetcher = ScriptedFetcher::new(vec![Reply::Status(429, None)], Reply::Body(b"x".to_vec()));
    let h = Harness::new(fetcher, 1, 1);
    let summary = h
        .pool
        .run(tasks(dir.path(), 1..=1), &CancellationToken::new())
        .await;
    assert_eq!(summary.deferred, 1);
    assert!(!h.pool.processed().contains(1));
    assert!(!h.catalog.is_downloaded(1));

    let snap = h.finish().await;
    assert_eq!(snap.logs.len(), 1, "one terminal event per task");
    assert_eq!(snap.logs[0].task_id, Some(1));
    assert_eq!(snap.logs[0].level, LogLevel::Warn);
    assert!(snap.logs[0].message.contains("deferred"), "{}", snap.logs[0].message);
    assert!(
        snap.logs[0].message.contains("circuit breaker open"),
        "{}",
        snap.logs[0].message
    );
    assert_eq!(snap.totals.deferred, 1);
    assert!(snap.daily.iter().all(|d| d.processed == 0));
}

#[tokio::test(start_paused = true)]
async fn cancelled_tasks_are_not_marked_processed() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::always(Reply::Body(b"x".to_vec()))
        .with_latency(Duration::from_secs(60));
    let h = Harness::new(fetcher, 2, 5);
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        })
    };

    let summary = h.pool.run(tasks(dir.path(), 1..=4), &cancel).await;
    canceller.await.unwrap();
    assert_eq!(summary.cancelled, 2, "two in flight when cancelled");
    assert_eq!(summary.dispatched(), 2, "the rest never started");
    assert!(h.pool.processed().is_empty());
    assert_eq!(h.pool.in_flight(), 0);

    let snap = h.finish().await;
    assert_eq!(snap.logs.len(), 2, "one terminal event per started task");
    let mut ids: Vec<_> = snap.logs.iter().map(|l| l.task_id).collect();
    ids.sort();
    assert_eq!(ids, vec![Some(1), Some(2)]);
    for log in &snap.logs {
        assert_eq!(log.level, LogLevel::Info);
        assert!(log.message.ends_with("cancelled"), "{}", log.message);
    }
    assert_eq!(snap.totals.cancelled, 2);
    assert!(snap.daily.iter().all(|d| d.processed == 0));
}

#[tokio::test(start_paused = true)]
async fn entries_sharing_a_url_file_name_keep_separate_files() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(
        vec![
            Reply::Body(b"AAAA-first".to_vec()),
            Reply::Body(b"BBBB-second".to_vec()),
        ],
        Reply::Status(500, None),
    )
    .with_latency(Duration::from_millis(50));
    let h = Harness::new(fetcher, 2, 5);
    let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
    let tasks: Vec<DownloadTask> = [1, 2]
        .iter()
        .map(|&id| {
            DownloadTask::from_entry(
                &CatalogEntry {
                    id,
                    url: format!("https://a.example.com/download.php?id={}", id),
                    publish_date: date,
                    theme_id: 1,
                    dest_hint: None,
                },
                dir.path(),
            )
        })
        .collect();
    assert_ne!(tasks[0].destination, tasks[1].destination);

    let summary = h.pool.run(tasks.clone(), &CancellationToken::new()).await;
    assert_eq!(summary.succeeded, 2);

    let mut bodies: Vec<Vec<u8>> = tasks
        .iter()
        .map(|t| std::fs::read(&t.destination).unwrap())
        .collect();
    bodies.sort();
    assert_eq!(bodies, vec![b"AAAA-first".to_vec(), b"BBBB-second".to_vec()]);

    let mut registered: Vec<_> = h
        .catalog
        .registered_files()
        .into_iter()
        .map(|f| (f.entry_id, f.path))
        .collect();
    registered.sort();
    assert_eq!(
        registered,
        vec![
            (1, tasks[0].destination.clone()),
            (2, tasks[1].destination.clone()),
        ]
    );
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut w = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        w.start_file(*name, ::zip::write::SimpleFileOptions::default())
            .unwrap();
        w.write_all(data).unwrap();
    }
    w.finish().unwrap().into_inner()
}

#[tokio::test]
async fn archive_download_registers_extracted_files() {
    let dir = tempfile::tempdir().unwrap();
    let inner = zip_bytes(&[("deep.txt", b"deep")]);
    let body = zip_bytes(&[("a.txt", b"alpha"), ("more/inner.zip", &inner)]);
    let h = Harness::new(ScriptedFetcher::always(Reply::Body(body)), 1, 5);
    let t = task(dir.path(), 9, "bundle.zip");

    let summary = h.pool.run(vec![t.clone()], &CancellationToken::new()).await;
    assert_eq!(summary.succeeded, 1);
    assert!(!t.destination.exists(), "archive removed after full expansion");

    let mut files = h.catalog.registered_files();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            dir.path().join("bundle/a.txt"),
            dir.path().join("bundle/more/inner/deep.txt"),
        ]
    );
    assert_eq!(files[0].size, 5);
    assert_eq!(files[0].source_archive.as_deref(), Some(t.destination.as_path()));
    assert!(files.iter().all(|f| f.entry_id == 9));
    assert!(h.catalog.is_downloaded(9));
}

#[tokio::test]
async fn registration_failure_does_not_block_flag_update() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(ScriptedFetcher::always(Reply::Body(b"x".to_vec())), 1, 5);
    h.catalog.fail_next_registrations(1);
    h.catalog.insert(CatalogEntry {
        id: 1,
        url: "https://example.com/1.bin".into(),
        publish_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        theme_id: 1,
        dest_hint: None,
    });

    let summary = h
        .pool
        .run(tasks(dir.path(), 1..=1), &CancellationToken::new())
        .await;
    assert_eq!(summary.succeeded, 1);
    assert!(h.catalog.is_downloaded(1));
    assert!(h.pool.processed().contains(1));

    let snap = h.finish().await;
    assert_eq!(snap.logs.len(), 1);
    assert!(snap.logs[0].message.contains("1 registrations failed"));
}
