//! FileGuard - file integrity monitor.
//!
//! This crate continuously verifies the integrity of files under one or more
//! monitored directory trees. It maintains a persistent content-hash ledger
//! and raises notifications when file state changes: creation, content
//! modification, deletion, or a move/rename.
//!
//! # Overview
//!
//! Two producers feed the engine: a reconciliation scanner that walks every
//! monitored root, and a filesystem watcher that subscribes to OS-level change
//! events. Both route every observation through the same primitive - hash the
//! file, compare the digest against the ledger, update the record - so
//! duplicate or interleaved observations of the same path are absorbed rather
//! than double-reported. Transitions that represent a real change are handed
//! to the notification dispatcher.
//!
//! Only digests and metadata are stored, never file content.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for monitor operations
//! - [`hasher`]: Streaming SHA-256 content digests
//! - [`resolver`]: Monitored-root validation and path resolution
//! - [`ledger`]: Persistent hash ledger with change-history semantics
//! - [`scanner`]: Full-tree reconciliation scan
//! - [`watcher`]: Filesystem event watcher
//! - [`reconciler`]: Shared observe-and-reconcile primitive and event routing
//! - [`notifier`]: Change notification rendering and dispatch

pub mod config;
pub mod error;
pub mod hasher;
pub mod ledger;
pub mod notifier;
pub mod reconciler;
pub mod resolver;
pub mod scanner;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use error::{MonitorError, Result};
pub use hasher::{hash_file, Digest, HashError};
pub use ledger::{FileRecord, HashLedger, LedgerError, Transition};
pub use notifier::{ChangeNotice, Notifier};
pub use reconciler::Reconciler;
pub use resolver::{PathResolver, ResolverError};
pub use scanner::{run_scan, ScanSummary};
pub use watcher::{FsEvent, FsWatcher, WatcherError};
