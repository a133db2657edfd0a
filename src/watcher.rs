//! Filesystem event watcher.
//!
//! Subscribes to OS-level change notifications, recursively, for every
//! monitored root and converts native events into the four logical kinds the
//! reconciler understands: created, modified, deleted, moved.
//!
//! The notify callback is kept lightweight: it only maps the native event and
//! pushes the result through a channel. All hashing, ledger access, and
//! notification dispatch happen in the reconciliation task consuming the
//! channel, which also gives events for the same path a single serialization
//! point.

use std::path::{Path, PathBuf};

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Logical filesystem events, one per affected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A file appeared under a monitored root.
    Created(PathBuf),

    /// A file's content may have changed.
    ///
    /// Metadata-only touches also arrive as this kind; the reconciler absorbs
    /// them as `Unchanged`.
    Modified(PathBuf),

    /// A file disappeared.
    Deleted(PathBuf),

    /// A file was renamed or moved within the watched trees.
    Moved {
        /// Previous path.
        from: PathBuf,
        /// Current path.
        to: PathBuf,
    },
}

/// Errors that can occur while setting up the watch subscription.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize or register the file system watcher.
    #[error("failed to create watcher: {0}")]
    Init(#[from] notify::Error),
}

/// Watches the monitored roots and forwards [`FsEvent`]s through a channel.
///
/// Dropping the watcher tears down the OS subscription.
#[derive(Debug)]
pub struct FsWatcher {
    /// Kept alive to maintain the watch subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    /// Roots being watched.
    roots: Vec<PathBuf>,
}

impl FsWatcher {
    /// Subscribes recursively to every root, forwarding events to `tx`.
    ///
    /// The channel is fed with `try_send`: when the consumer falls far enough
    /// behind to fill it, events are dropped with a warning rather than
    /// blocking the notify thread. A reconciliation scan repairs any drift
    /// that causes.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Init`] if the watcher cannot be created or a
    /// root cannot be registered.
    pub fn new(roots: &[PathBuf], tx: mpsc::Sender<FsEvent>) -> Result<Self, WatcherError> {
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                handle_notify_event(res, &tx);
            },
            Config::default(),
        )?;

        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            debug!(root = %root.display(), "Started recursive watch");
        }

        Ok(Self {
            watcher,
            roots: roots.to_vec(),
        })
    }

    /// Returns the roots being watched.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Handles one callback from the notify crate: map and forward, nothing more.
fn handle_notify_event(res: Result<Event, notify::Error>, tx: &mpsc::Sender<FsEvent>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for fs_event in map_event(&event) {
        if let Err(e) = tx.try_send(fs_event) {
            warn!(error = %e, "Failed to queue filesystem event, channel may be full");
        }
    }
}

/// Converts a native notify event into logical [`FsEvent`]s.
///
/// Directory-only events are ignored. Removals cannot be distinguished from
/// directory removals after the fact; they pass through and the ledger's
/// `remove` no-ops on paths it never tracked.
fn map_event(event: &Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => event
            .paths
            .iter()
            .filter(|p| !is_directory(p))
            .map(|p| FsEvent::Created(p.clone()))
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match &event.paths[..] {
            [from, to] if !is_directory(to) => vec![FsEvent::Moved {
                from: from.clone(),
                to: to.clone(),
            }],
            _ => Vec::new(),
        },

        // Rename halves delivered separately: the old path is gone, the new
        // path is a fresh sighting.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(|p| FsEvent::Deleted(p.clone())).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter(|p| !is_directory(p))
            .map(|p| FsEvent::Created(p.clone()))
            .collect(),

        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => event
            .paths
            .iter()
            .filter(|p| !is_directory(p))
            .map(|p| FsEvent::Modified(p.clone()))
            .collect(),

        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            event.paths.iter().map(|p| FsEvent::Deleted(p.clone())).collect()
        }

        _ => {
            trace!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

fn is_directory(path: &Path) -> bool {
    path.is_dir()
}
