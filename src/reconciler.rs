//! The shared observe-and-reconcile primitive and event routing.
//!
//! Both producers of filesystem signals - the live watcher and the full-tree
//! scanner - call into the same [`Reconciler`]: hash the file, reconcile the
//! digest against the ledger, and dispatch a notification when the transition
//! represents a real change. That shared path is what makes duplicate or
//! interleaved observations safe: an event replaying something the scan
//! already recorded lands as `Unchanged` and stays silent.
//!
//! A failure while processing one event (unreadable file, ledger error) is
//! logged and isolated to that event; the loop keeps consuming.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::hasher::{self, HashError};
use crate::ledger::{HashLedger, Transition};
use crate::notifier::{ChangeNotice, Notifier};
use crate::resolver::PathResolver;
use crate::watcher::FsEvent;

/// Routes observations from the watcher and scanner through the ledger.
pub struct Reconciler {
    ledger: HashLedger,
    resolver: Arc<PathResolver>,
    notifier: Arc<Notifier>,
}

impl Reconciler {
    /// Creates a reconciler over the given ledger, roots, and dispatcher.
    #[must_use]
    pub fn new(ledger: HashLedger, resolver: Arc<PathResolver>, notifier: Arc<Notifier>) -> Self {
        Self {
            ledger,
            resolver,
            notifier,
        }
    }

    /// The ledger records flow through.
    #[must_use]
    pub fn ledger(&self) -> &HashLedger {
        &self.ledger
    }

    /// The monitored-root resolver.
    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// The notification dispatcher.
    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Hashes a file and reconciles the digest against the ledger.
    ///
    /// This is the primitive both the scanner and the event handlers use.
    ///
    /// # Errors
    ///
    /// Returns the hash failure when the file cannot be read (the ledger is
    /// left untouched), or the ledger error when storage fails.
    pub async fn observe(&self, path: &Path) -> Result<Transition> {
        let digest = hasher::hash_file(path)?;
        let transition = self
            .ledger
            .reconcile(&file_name_of(path), &path.to_string_lossy(), &digest)
            .await?;
        Ok(transition)
    }

    /// Processes one logical filesystem event.
    ///
    /// Failures are logged with the offending path and never propagate.
    pub async fn handle_event(&self, event: FsEvent) {
        match event {
            FsEvent::Created(path) => self.on_created(&path).await,
            FsEvent::Modified(path) => self.on_modified(&path).await,
            FsEvent::Deleted(path) => self.on_deleted(&path).await,
            FsEvent::Moved { from, to } => self.on_moved(&from, &to).await,
        }
    }

    async fn on_created(&self, path: &Path) {
        let Some(digest) = self.try_hash(path) else {
            return;
        };

        match self
            .ledger
            .reconcile(&file_name_of(path), &path.to_string_lossy(), &digest)
            .await
        {
            Ok(Transition::Created) => {
                info!(path = %path.display(), "New file detected");
                let size = std::fs::metadata(path).ok().map(|m| m.len());
                self.notifier
                    .dispatch(&ChangeNotice::Created {
                        path: path.to_path_buf(),
                        hash: digest,
                        size,
                    })
                    .await;
            }
            // A create event for a path the ledger already tracks: content
            // comparison decides, same as a modify event.
            Ok(Transition::Modified { old, new }) => {
                info!(path = %path.display(), "Tracked file replaced");
                self.notifier
                    .dispatch(&ChangeNotice::Modified {
                        path: path.to_path_buf(),
                        old_hash: old,
                        new_hash: new,
                        during_scan: false,
                    })
                    .await;
            }
            Ok(Transition::Unchanged) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to reconcile created file");
            }
        }
    }

    async fn on_modified(&self, path: &Path) {
        let Some(digest) = self.try_hash(path) else {
            return;
        };

        match self
            .ledger
            .reconcile(&file_name_of(path), &path.to_string_lossy(), &digest)
            .await
        {
            Ok(Transition::Modified { old, new }) => {
                info!(path = %path.display(), "File content changed");
                self.notifier
                    .dispatch(&ChangeNotice::Modified {
                        path: path.to_path_buf(),
                        old_hash: old,
                        new_hash: new,
                        during_scan: false,
                    })
                    .await;
            }
            // First sighting through a modify event: record it quietly, the
            // same way the scanner treats new files.
            Ok(Transition::Created) => {
                info!(path = %path.display(), "Previously untracked file added to monitoring");
            }
            // Routine for metadata-only touches.
            Ok(Transition::Unchanged) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to reconcile modified file");
            }
        }
    }

    async fn on_deleted(&self, path: &Path) {
        match self.ledger.remove(&path.to_string_lossy()).await {
            Ok(Some(record)) => {
                info!(path = %path.display(), "Tracked file deleted");
                self.notifier
                    .dispatch(&ChangeNotice::Deleted {
                        path: path.to_path_buf(),
                        last_hash: record.current_hash,
                    })
                    .await;
            }
            // Untracked path, or a directory-level remove.
            Ok(None) => {
                debug!(path = %path.display(), "Delete event for untracked path");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove ledger record");
            }
        }
    }

    async fn on_moved(&self, from: &Path, to: &Path) {
        match self.ledger.remove(&from.to_string_lossy()).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(from = %from.display(), "Move source was not tracked");
            }
            Err(e) => {
                warn!(from = %from.display(), error = %e, "Failed to remove moved record");
            }
        }

        let Some(digest) = self.try_hash(to) else {
            return;
        };

        if let Err(e) = self
            .ledger
            .reconcile(&file_name_of(to), &to.to_string_lossy(), &digest)
            .await
        {
            warn!(to = %to.display(), error = %e, "Failed to reconcile move destination");
            return;
        }

        info!(from = %from.display(), to = %to.display(), "Tracked file moved");

        // A move is a move even when the destination happens to already
        // match ledger state, so the notice goes out regardless of the
        // reconcile outcome.
        self.notifier
            .dispatch(&ChangeNotice::Moved {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                hash: digest,
            })
            .await;
    }

    /// Hashes a file, logging and absorbing read failures.
    fn try_hash(&self, path: &Path) -> Option<crate::hasher::Digest> {
        match hasher::hash_file(path) {
            Ok(digest) => Some(digest),
            Err(HashError::ReadFailure { ref source, .. }) => {
                warn!(path = %path.display(), error = %source, "Cannot observe file, skipping this round");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot hash file, skipping this round");
                None
            }
        }
    }
}

/// Base name of a path, lossily converted.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::hasher::hash_file;

    async fn reconciler_for(dir: &TempDir) -> Reconciler {
        let resolver = Arc::new(PathResolver::new([dir.path()]).unwrap());
        let notifier = Arc::new(Notifier::new(None, Arc::clone(&resolver)));
        let ledger = HashLedger::open_in_memory().await.unwrap();
        Reconciler::new(ledger, resolver, notifier)
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    #[tokio::test]
    async fn created_event_inserts_record() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let path = write_file(&dir, "a.txt", "hello");

        reconciler.handle_event(FsEvent::Created(path.clone())).await;

        let record = reconciler
            .ledger()
            .lookup(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_hash, hash_file(&path).unwrap());
        assert_eq!(record.previous_hash, None);
    }

    #[tokio::test]
    async fn modified_event_shifts_history() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let path = write_file(&dir, "a.txt", "hello");
        let first = hash_file(&path).unwrap();

        reconciler.handle_event(FsEvent::Created(path.clone())).await;

        fs::write(&path, "hello!").unwrap();
        reconciler.handle_event(FsEvent::Modified(path.clone())).await;

        let record = reconciler
            .ledger()
            .lookup(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_hash, hash_file(&path).unwrap());
        assert_eq!(record.previous_hash, Some(first));
    }

    #[tokio::test]
    async fn modify_event_for_unknown_path_creates_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let path = write_file(&dir, "a.txt", "hello");

        reconciler.handle_event(FsEvent::Modified(path.clone())).await;

        let record = reconciler
            .ledger()
            .lookup(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.previous_hash, None);
    }

    #[tokio::test]
    async fn deleted_event_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let path = write_file(&dir, "a.txt", "hello");

        reconciler.handle_event(FsEvent::Created(path.clone())).await;
        fs::remove_file(&path).unwrap();
        reconciler.handle_event(FsEvent::Deleted(path.clone())).await;

        assert!(reconciler
            .ledger()
            .lookup(&path.to_string_lossy())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deleted_event_for_untracked_path_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;

        reconciler
            .handle_event(FsEvent::Deleted(dir.path().join("never-seen.txt")))
            .await;
    }

    #[tokio::test]
    async fn moved_event_retires_source_and_tracks_destination() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let from = write_file(&dir, "a.txt", "hello");

        reconciler.handle_event(FsEvent::Created(from.clone())).await;

        // Content also changed during the move.
        let to = dir.path().join("b.txt");
        fs::remove_file(&from).unwrap();
        fs::write(&to, "hello, moved").unwrap();

        reconciler
            .handle_event(FsEvent::Moved {
                from: from.clone(),
                to: to.clone(),
            })
            .await;

        assert!(reconciler
            .ledger()
            .lookup(&from.to_string_lossy())
            .await
            .unwrap()
            .is_none());

        let record = reconciler
            .ledger()
            .lookup(&to.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_hash, hash_file(&to).unwrap());
    }

    #[tokio::test]
    async fn unreadable_file_leaves_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let ghost = dir.path().join("ghost.txt");

        // File vanished before the event could be processed.
        reconciler.handle_event(FsEvent::Created(ghost.clone())).await;

        assert!(reconciler
            .ledger()
            .lookup(&ghost.to_string_lossy())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn observe_returns_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = reconciler_for(&dir).await;
        let path = write_file(&dir, "a.txt", "hello");

        assert_eq!(reconciler.observe(&path).await.unwrap(), Transition::Created);
        assert_eq!(
            reconciler.observe(&path).await.unwrap(),
            Transition::Unchanged
        );

        fs::write(&path, "hello!").unwrap();
        assert!(matches!(
            reconciler.observe(&path).await.unwrap(),
            Transition::Modified { .. }
        ));
    }

    #[test]
    fn file_name_of_takes_base_name() {
        assert_eq!(file_name_of(Path::new("/data/sub/a.txt")), "a.txt");
        assert_eq!(file_name_of(Path::new("a.txt")), "a.txt");
    }
}
