use drover_monitor::{
    Checkpoint, Completion, Dispatch, FileCommand, FileItem, FileItemStore, ItemStatus, Monitor, Outcome,
    RegexFileFilter, REGEX_XML_EXTENSION, command_fn,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;

fn counting_command(calls: &Arc<AtomicUsize>) -> Arc<dyn FileCommand> {
    let calls = Arc::clone(calls);
    command_fn(move |_item| {
        calls.fetch_add(1, Ordering::SeqCst);
        Completion::success()
    })
}

fn write_with_mtime(path: &Path, content: &[u8], mtime: SystemTime) {
    fs::write(path, content).unwrap();
    File::options().write(true).open(path).unwrap().set_modified(mtime).unwrap();
}

fn epoch(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

#[tokio::test]
async fn test_file_is_dispatched_once_after_it_settles() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"hello").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let monitor = Monitor::builder("e2e").directory(dir.path()).command(counting_command(&calls)).build();

    let first = monitor.run_cycle().await;
    assert_eq!((first.seen, first.dispatched), (1, 0));
    assert!(first.changed);
    assert_eq!(monitor.store().get(&file).unwrap().status, ItemStatus::Valid);

    let second = monitor.run_cycle().await;
    assert_eq!(second.dispatched, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let item = monitor.store().get(&file).unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert!(item.hash.is_some());
    assert!(!item.used);

    let third = monitor.run_cycle().await;
    assert_eq!(third.dispatched, 0);
    assert!(!third.changed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.counters().total_succeeded, 1);
    assert_eq!(monitor.counters().today_succeeded, 1);
}

#[tokio::test]
async fn test_failed_command_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let command = {
        let calls = Arc::clone(&calls);
        command_fn(move |_item| Completion::from(calls.fetch_add(1, Ordering::SeqCst) > 0))
    };
    let monitor = Monitor::builder("retry").directory(dir.path()).command(command).build();

    monitor.run_cycle().await;
    assert_eq!(monitor.run_cycle().await.dispatched, 1);
    let item = monitor.store().get(&dir.path().join("a.txt")).unwrap();
    assert_eq!(item.status, ItemStatus::Valid);
    assert_eq!(item.hash, None);

    assert_eq!(monitor.run_cycle().await.dispatched, 1);
    assert_eq!(monitor.store().get(&dir.path().join("a.txt")).unwrap().status, ItemStatus::Done);
    assert_eq!(monitor.run_cycle().await.dispatched, 0);

    let counters = monitor.counters();
    assert_eq!((counters.total_succeeded, counters.total_failed), (1, 1));
}

#[tokio::test]
async fn test_new_content_with_old_mtime_is_dispatched_again() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    write_with_mtime(&file, b"first", epoch(1_000_000));
    let calls = Arc::new(AtomicUsize::new(0));
    let monitor = Monitor::builder("rewrite").directory(dir.path()).command(counting_command(&calls)).build();
    monitor.run_cycle().await;
    monitor.run_cycle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Same mtime, different content: the hash catches it, the next scan
    // confirms it.
    write_with_mtime(&file, b"second", epoch(1_000_000));
    let changed = monitor.run_cycle().await;
    assert_eq!(changed.dispatched, 0);
    assert!(changed.changed);
    assert_eq!(monitor.store().get(&file).unwrap().status, ItemStatus::Valid);

    assert_eq!(monitor.run_cycle().await.dispatched, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_file_still_being_written_is_not_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    let calls = Arc::new(AtomicUsize::new(0));
    let monitor = Monitor::builder("growing").directory(dir.path()).command(counting_command(&calls)).build();
    for (n, secs) in [1_000, 1_010, 1_020].into_iter().enumerate() {
        write_with_mtime(&file, &vec![b'x'; n + 1], epoch(secs));
        assert_eq!(monitor.run_cycle().await.dispatched, 0);
    }
    assert_eq!(monitor.run_cycle().await.dispatched, 1);
}

#[tokio::test]
async fn test_vanished_file_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"hello").unwrap();
    let removed: Arc<parking_lot::Mutex<Vec<PathBuf>>> = Arc::default();
    let monitor = {
        let removed = Arc::clone(&removed);
        Monitor::builder("vanish")
            .directory(dir.path())
            .on_removed(move |item: &FileItem| removed.lock().push(item.path.clone()))
            .build()
    };
    monitor.run_cycle().await;
    assert_eq!(monitor.history_len(), 1);

    fs::remove_file(&file).unwrap();
    let report = monitor.run_cycle().await;
    assert_eq!(report.removed, 1);
    assert!(report.changed);
    assert_eq!(monitor.history_len(), 0);
    assert_eq!(monitor.run_cycle().await.removed, 0);
    assert_eq!(*removed.lock(), vec![file]);
}

#[tokio::test]
async fn test_filter_limits_what_is_tracked() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.xml"), b"<a/>").unwrap();
    fs::write(dir.path().join("b.txt"), b"b").unwrap();
    let filter = RegexFileFilter::new(Some(REGEX_XML_EXTENSION), 0).unwrap();
    let monitor = Monitor::builder("xml").directory(dir.path()).filter(Arc::new(filter)).build();
    assert_eq!(monitor.run_cycle().await.seen, 1);
    assert!(monitor.store().get(&dir.path().join("a.xml")).is_some());
    assert!(monitor.store().get(&dir.path().join("b.txt")).is_none());
}

#[tokio::test]
async fn test_pull_mode() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"hello").unwrap();
    let monitor = Monitor::builder("pull").directory(dir.path()).dispatch(Dispatch::Queue).build();

    monitor.run_cycle().await;
    assert!(monitor.poll().is_none());
    assert_eq!(monitor.run_cycle().await.dispatched, 1);

    assert_eq!(monitor.peek().unwrap().path, file);
    let item = monitor.poll().unwrap();
    assert_eq!(item.path, file);
    assert!(item.used);
    assert!(monitor.poll().is_none());

    // Claimed until released.
    assert_eq!(monitor.run_cycle().await.dispatched, 0);
    assert!(monitor.release(&file, Completion::success().with_correlation_id(42)));
    let item = monitor.store().get(&file).unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.external_id, Some(42));
    assert_eq!(monitor.counters().total_succeeded, 1);
    assert_eq!(monitor.run_cycle().await.dispatched, 0);
}

#[tokio::test]
async fn test_pull_release_is_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("in");
    fs::create_dir(&watched).unwrap();
    let file = watched.join("a.txt");
    fs::write(&file, b"hello").unwrap();
    let status_file = dir.path().join("status.json");
    let monitor = Monitor::builder("pull").directory(&watched).status_file(&status_file).build();

    monitor.run_cycle().await;
    assert_eq!(monitor.run_cycle().await.dispatched, 1);
    let saved = Checkpoint::load(&status_file).await.unwrap().unwrap();
    assert!(saved.items[0].used);

    assert_eq!(monitor.poll().unwrap().path, file);
    assert!(monitor.release(&file, Completion::success()));
    let report = monitor.run_cycle().await;
    assert!(report.changed);
    assert!(report.checkpointed);

    let saved = Checkpoint::load(&status_file).await.unwrap().unwrap();
    assert_eq!(saved.items.len(), 1);
    assert!(!saved.items[0].used);
    assert_eq!(saved.items[0].status, ItemStatus::Done);
    assert_eq!(saved.counters.total_succeeded, 1);

    // Nothing left to write.
    assert!(!monitor.run_cycle().await.checkpointed);
}

#[tokio::test]
async fn test_removed_directory_is_checkpointed_without_its_files() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = (dir.path().join("first"), dir.path().join("second"));
    fs::create_dir(&first).unwrap();
    fs::create_dir(&second).unwrap();
    fs::write(first.join("a.txt"), b"a").unwrap();
    fs::write(second.join("b.txt"), b"b").unwrap();
    let status_file = dir.path().join("status.json");
    let monitor = Monitor::builder("dirs").directories([&first, &second]).status_file(&status_file).build();

    monitor.run_cycle().await;
    assert_eq!(monitor.history_len(), 2);
    assert_eq!(monitor.remove_directory(&first), 1);
    assert!(monitor.run_cycle().await.checkpointed);

    let saved = Checkpoint::load(&status_file).await.unwrap().unwrap();
    let paths: Vec<&PathBuf> = saved.items.iter().map(|item| &item.path).collect();
    assert_eq!(paths, vec![&second.join("b.txt")]);
    assert!(first.join("a.txt").exists());
}

#[tokio::test]
async fn test_queued_file_that_vanished_is_not_polled() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, b"hello").unwrap();
    let monitor = Monitor::builder("pull").directory(dir.path()).build();
    monitor.run_cycle().await;
    monitor.run_cycle().await;
    fs::remove_file(&file).unwrap();
    assert_eq!(monitor.run_cycle().await.removed, 1);
    assert!(monitor.poll().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_dispatch_runs_every_file() {
    let dir = tempfile::tempdir().unwrap();
    for n in 0..10 {
        fs::write(dir.path().join(format!("{n}.txt")), format!("file {n}")).unwrap();
    }
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    struct Slow {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }
    #[async_trait::async_trait]
    impl FileCommand for Slow {
        async fn run(&self, _item: &FileItem) -> Completion {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Completion::success()
        }
    }
    let command: Arc<dyn FileCommand> = Arc::new(Slow {
        running: Arc::clone(&running),
        peak: Arc::clone(&peak),
        calls: Arc::clone(&calls),
    });
    let monitor = Monitor::builder("pool")
        .directory(dir.path())
        .dispatch(Dispatch::with_parallelism(Arc::new(command), 3))
        .build();

    monitor.run_cycle().await;
    let report = monitor.run_cycle().await;
    assert_eq!(report.dispatched, 10);
    assert_eq!(report.task_errors, 0);
    // Every command finished before the cycle returned.
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(monitor.store().snapshot().iter().all(|item| item.status == ItemStatus::Done));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claim_has_one_winner() {
    let store = Arc::new(FileItemStore::new());
    let path = PathBuf::from("/in/a.txt");
    store.upsert_seen(&path, OffsetDateTime::UNIX_EPOCH);
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let (store, path) = (Arc::clone(&store), path.clone());
            tokio::spawn(async move { store.claim(&path) })
        })
        .collect();
    let mut winners = 0;
    for handle in handles {
        winners += usize::from(handle.await.unwrap());
    }
    assert_eq!(winners, 1);
    assert!(store.release(&path, Outcome::Success, None));
    assert!(store.claim(&path));
}

#[tokio::test]
async fn test_panicking_command_skips_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("in");
    fs::create_dir(&watched).unwrap();
    fs::write(watched.join("a.txt"), b"hello").unwrap();
    let status_file = dir.path().join("status.json");
    let monitor = Monitor::builder("panic")
        .directory(&watched)
        .status_file(&status_file)
        .command(command_fn(|_item| panic!("boom")))
        .build();

    assert!(monitor.run_cycle().await.checkpointed);
    let report = monitor.run_cycle().await;
    assert_eq!(report.task_errors, 1);
    assert!(!report.checkpointed);
    let item = monitor.store().get(&watched.join("a.txt")).unwrap();
    assert!(!item.used);
    assert_eq!(monitor.counters().total_failed, 1);
}

#[tokio::test]
async fn test_stop_file_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("in");
    fs::create_dir(&watched).unwrap();
    let stop_file = dir.path().join("stop");
    let status_file = dir.path().join("status.json");
    let monitor = Monitor::builder("stop")
        .directory(&watched)
        .stop_file(&stop_file)
        .status_file(&status_file)
        .interval(Duration::from_millis(100))
        .build();

    let handle = monitor.start();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(status_file.with_extension("json.chk").exists());
    fs::write(&stop_file, b"").unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();
    assert!(monitor.is_stopped());
    assert!(monitor.last_report().stopped);
    assert!(!status_file.with_extension("json.chk").exists());
}

#[tokio::test]
async fn test_stop_interrupts_the_wait() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = Monitor::builder("stop").directory(dir.path()).interval(Duration::from_secs(3600)).build();
    let handle = monitor.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_in_flight_items_are_recovered_after_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("in");
    fs::create_dir(&watched).unwrap();
    let file = watched.join("a.txt");
    fs::write(&file, b"hello").unwrap();
    let status_file = dir.path().join("status.json");

    // Claimed into the pull queue, then "crash" without releasing.
    let crashed = Monitor::builder("recover").directory(&watched).status_file(&status_file).build();
    crashed.run_cycle().await;
    assert_eq!(crashed.run_cycle().await.dispatched, 1);
    drop(crashed);
    let saved = Checkpoint::load(&status_file).await.unwrap().unwrap();
    assert!(saved.items[0].used);

    let restarted = Monitor::builder("recover")
        .directory(&watched)
        .status_file(&status_file)
        .interval(Duration::from_millis(100))
        .build();
    let handle = restarted.start();
    let item = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(item) = restarted.poll() {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(item.path, file);
    assert_eq!(item.status, ItemStatus::Restart);
    restarted.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_status_reports_differences() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"a").unwrap();
    fs::write(dir.path().join("b.txt"), b"b").unwrap();
    let monitor = Monitor::builder("status").directory(dir.path()).build();
    monitor.run_cycle().await;

    let full = monitor.status();
    assert_eq!(full.changed.len(), 2);
    assert!(full.removed.is_empty());
    assert_eq!(full.name, "status");
    assert!(monitor.status().changed.is_empty());

    fs::remove_file(dir.path().join("b.txt")).unwrap();
    monitor.run_cycle().await;
    let diff = monitor.status();
    assert!(diff.changed.contains_key(&dir.path().join("a.txt")));
    assert_eq!(diff.removed.into_iter().collect::<Vec<_>>(), vec![dir.path().join("b.txt")]);

    monitor.set_next_as_full_status();
    let json: serde_json::Value = serde_json::from_str(&monitor.status().to_json().unwrap()).unwrap();
    assert_eq!(json["changed"].as_object().unwrap().len(), 1);
    assert_eq!(json["recursive"], false);
}
