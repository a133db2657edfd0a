//! End-to-end integrity monitoring flow.
//!
//! Exercises the scan -> modify -> delete lifecycle against a real ledger
//! database and a mock notification webhook, verifying both ledger state and
//! the notifications that reach the sink.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use fileguard::hasher::hash_file;
use fileguard::ledger::HashLedger;
use fileguard::notifier::Notifier;
use fileguard::reconciler::Reconciler;
use fileguard::resolver::PathResolver;
use fileguard::scanner::run_scan;
use fileguard::watcher::FsEvent;

struct Harness {
    reconciler: Reconciler,
    server: MockServer,
    data_dir: TempDir,
    _db_dir: TempDir,
}

async fn harness() -> Harness {
    let data_dir = tempfile::tempdir().expect("Failed to create data dir");
    let db_dir = tempfile::tempdir().expect("Failed to create db dir");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let resolver = Arc::new(PathResolver::new([data_dir.path()]).expect("valid root"));
    let notifier = Arc::new(Notifier::new(
        Some(format!("{}/notify", server.uri())),
        Arc::clone(&resolver),
    ));
    let ledger = HashLedger::open(&db_dir.path().join("ledger.db"))
        .await
        .expect("Failed to open ledger");

    Harness {
        reconciler: Reconciler::new(ledger, resolver, notifier),
        server,
        data_dir,
        _db_dir: db_dir,
    }
}

impl Harness {
    fn root(&self) -> PathBuf {
        self.data_dir
            .path()
            .canonicalize()
            .expect("canonical root")
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    async fn notifications(&self) -> Vec<(String, String)> {
        self.server
            .received_requests()
            .await
            .expect("request recording enabled")
            .iter()
            .map(parse_notification)
            .collect()
    }
}

fn parse_notification(request: &Request) -> (String, String) {
    let body: Value = serde_json::from_slice(&request.body).expect("JSON notification body");
    (
        body["title"].as_str().expect("title").to_string(),
        body["body"].as_str().expect("body").to_string(),
    )
}

fn ledger_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn scan_modify_delete_lifecycle() {
    let h = harness().await;
    let file = h.write("a.txt", "hello");
    let h1 = hash_file(&file).unwrap();

    // Startup scan inserts the record quietly.
    let summary = run_scan(&h.reconciler).await.unwrap();
    assert_eq!(summary.created, 1);

    let record = h
        .reconciler
        .ledger()
        .lookup(&ledger_path(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.filename, "a.txt");
    assert_eq!(record.current_hash, h1);
    assert_eq!(record.previous_hash, None);
    assert!(h.notifications().await.is_empty());

    // Editing the file and receiving a modify event updates history and
    // emits exactly one modification notification.
    h.write("a.txt", "hello!");
    let h2 = hash_file(&file).unwrap();
    h.reconciler
        .handle_event(FsEvent::Modified(file.clone()))
        .await;

    let record = h
        .reconciler
        .ledger()
        .lookup(&ledger_path(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.current_hash, h2);
    assert_eq!(record.previous_hash, Some(h1));

    let notifications = h.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, "File modified");
    assert!(notifications[0].1.contains(&h1.short()));
    assert!(notifications[0].1.contains(&h2.short()));

    // Deleting the file removes the record and emits one deletion
    // notification carrying the last known hash.
    fs::remove_file(&file).unwrap();
    h.reconciler
        .handle_event(FsEvent::Deleted(file.clone()))
        .await;

    assert!(h
        .reconciler
        .ledger()
        .lookup(&ledger_path(&file))
        .await
        .unwrap()
        .is_none());

    let notifications = h.notifications().await;
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[1].0, "File deleted");
    assert!(notifications[1].1.contains(&h2.short()));
}

#[tokio::test]
async fn creation_event_notifies_once() {
    let h = harness().await;
    let file = h.write("fresh.txt", "new content");

    h.reconciler
        .handle_event(FsEvent::Created(file.clone()))
        .await;

    let notifications = h.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, "File created");
    assert!(notifications[0].1.contains("fresh.txt"));
}

#[tokio::test]
async fn duplicate_deliveries_are_absorbed() {
    let h = harness().await;
    let file = h.write("a.txt", "hello");

    run_scan(&h.reconciler).await.unwrap();

    h.write("a.txt", "hello!");
    // The same modify event delivered twice, as an at-least-once
    // subscription may do.
    h.reconciler
        .handle_event(FsEvent::Modified(file.clone()))
        .await;
    h.reconciler
        .handle_event(FsEvent::Modified(file.clone()))
        .await;

    let notifications = h.notifications().await;
    assert_eq!(notifications.len(), 1, "second delivery must be silent");
}

#[tokio::test]
async fn move_event_carries_both_paths() {
    let h = harness().await;
    let from = h.write("old.txt", "contents");

    run_scan(&h.reconciler).await.unwrap();

    let to = h.root().join("new.txt");
    fs::rename(&from, &to).unwrap();
    h.reconciler
        .handle_event(FsEvent::Moved {
            from: from.clone(),
            to: to.clone(),
        })
        .await;

    assert!(h
        .reconciler
        .ledger()
        .lookup(&ledger_path(&from))
        .await
        .unwrap()
        .is_none());
    let record = h
        .reconciler
        .ledger()
        .lookup(&ledger_path(&to))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.current_hash, hash_file(&to).unwrap());

    let notifications = h.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, "File moved");
    assert!(notifications[0].1.contains("old.txt"));
    assert!(notifications[0].1.contains("new.txt"));
}

#[tokio::test]
async fn move_to_previously_deleted_path_still_notifies() {
    let h = harness().await;
    let a = h.write("a.txt", "same content");
    let b = h.write("b.txt", "same content");

    run_scan(&h.reconciler).await.unwrap();

    // Delete b, then rename a over b's old path with identical content: the
    // destination reconcile may be a plain re-creation, but a move is still
    // reported as a move.
    fs::remove_file(&b).unwrap();
    h.reconciler.handle_event(FsEvent::Deleted(b.clone())).await;
    fs::rename(&a, &b).unwrap();
    h.reconciler
        .handle_event(FsEvent::Moved {
            from: a.clone(),
            to: b.clone(),
        })
        .await;

    let notifications = h.notifications().await;
    let titles: Vec<&str> = notifications.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(titles, vec!["File deleted", "File moved"]);
}

#[tokio::test]
async fn scan_reports_offline_change_and_deletion() {
    let h = harness().await;
    h.write("changed.txt", "v1");
    let deleted = h.write("deleted.txt", "short-lived");

    run_scan(&h.reconciler).await.unwrap();

    // Changes made while nothing was watching.
    h.write("changed.txt", "v2");
    fs::remove_file(&deleted).unwrap();

    let summary = run_scan(&h.reconciler).await.unwrap();
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.removed, 1);

    let notifications = h.notifications().await;
    let titles: Vec<&str> = notifications.iter().map(|(t, _)| t.as_str()).collect();
    assert!(titles.contains(&"File changed during scan"));
    assert!(titles.contains(&"File deleted"));
}
