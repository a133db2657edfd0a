//! Full-tree reconciliation scan.
//!
//! Walks every monitored root and feeds each regular file through the same
//! observe-and-reconcile primitive the live watcher uses, then sweeps the
//! ledger for paths that were not seen during the walk - files deleted while
//! nothing was watching - and retires them.
//!
//! The scan runs once at startup, before steady-state event processing is
//! trusted, and can be re-run on demand to repair drift after a watcher gap.
//! Because `reconcile` is idempotent on unchanged content, the scan can
//! overlap live event delivery safely.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, Transition};
use crate::notifier::ChangeNotice;
use crate::reconciler::Reconciler;

/// Counters describing what a scan found.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Regular files visited.
    pub files_seen: usize,
    /// Paths newly added to the ledger.
    pub created: usize,
    /// Paths whose content changed since last observation.
    pub modified: usize,
    /// Ledger records retired because their path was gone.
    pub removed: usize,
    /// Files that could not be observed this round.
    pub skipped: usize,
}

/// Scans all monitored roots and reconciles the ledger against them.
///
/// Per-file failures are logged and counted as skipped; only a ledger-wide
/// failure during the deletion sweep aborts the scan.
///
/// # Errors
///
/// Returns [`LedgerError`] when the deletion sweep cannot enumerate the
/// ledger.
pub async fn run_scan(reconciler: &Reconciler) -> Result<ScanSummary, LedgerError> {
    let mut summary = ScanSummary::default();
    let mut observed: HashSet<String> = HashSet::new();

    for root in reconciler.resolver().roots() {
        info!(root = %root.display(), "Scanning monitored root");

        let mut files = Vec::new();
        collect_files(root, &mut files);

        for path in files {
            summary.files_seen += 1;

            match reconciler.observe(&path).await {
                Ok(transition) => {
                    observed.insert(path.to_string_lossy().into_owned());
                    match transition {
                        // Startup population stays quiet; alerting on every
                        // pre-existing file would bury real changes.
                        Transition::Created => {
                            debug!(path = %path.display(), "Added file to monitoring");
                            summary.created += 1;
                        }
                        Transition::Unchanged => {}
                        Transition::Modified { old, new } => {
                            info!(path = %path.display(), "File changed since last observation");
                            summary.modified += 1;
                            reconciler
                                .notifier()
                                .dispatch(&ChangeNotice::Modified {
                                    path: path.clone(),
                                    old_hash: old,
                                    new_hash: new,
                                    during_scan: true,
                                })
                                .await;
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping file during scan");
                    summary.skipped += 1;
                }
            }
        }
    }

    summary.removed = sweep_deleted(reconciler, &observed).await?;

    info!(
        files_seen = summary.files_seen,
        created = summary.created,
        modified = summary.modified,
        removed = summary.removed,
        skipped = summary.skipped,
        "Scan complete"
    );

    Ok(summary)
}

/// Retires ledger records whose path was not observed during the walk.
///
/// Only paths under a currently monitored root are swept: a record outside
/// every root was not confirmed absent, merely unmonitored.
async fn sweep_deleted(
    reconciler: &Reconciler,
    observed: &HashSet<String>,
) -> Result<usize, LedgerError> {
    let mut removed = 0;

    for path in reconciler.ledger().list_paths().await? {
        if observed.contains(&path) {
            continue;
        }

        let under_root = reconciler
            .resolver()
            .roots()
            .iter()
            .any(|root| Path::new(&path).starts_with(root));
        if !under_root {
            debug!(path, "Unobserved record outside monitored roots, leaving in place");
            continue;
        }

        match reconciler.ledger().remove(&path).await {
            Ok(Some(record)) => {
                info!(path, "File deleted while unmonitored");
                removed += 1;
                reconciler
                    .notifier()
                    .dispatch(&ChangeNotice::Deleted {
                        path: PathBuf::from(&record.path),
                        last_hash: record.current_hash,
                    })
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path, error = %e, "Failed to retire stale record");
            }
        }
    }

    Ok(removed)
}

/// Recursively collects regular files under `dir`.
///
/// Unreadable directories are skipped with a warning so one bad subtree does
/// not abort the walk.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read directory, skipping");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else if path.is_file() {
            files.push(path);
        }
    }
}
