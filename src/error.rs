//! Error types for the FileGuard monitor.
//!
//! Each component defines its own error enum; this module provides the
//! top-level [`MonitorError`] that the binary and the reconciler work with.
//! Errors from processing a single file or event never terminate the watch
//! loop or a scan - they are logged against the offending path and the next
//! observation repairs the state.

use thiserror::Error;

use crate::config::ConfigError;
use crate::hasher::HashError;
use crate::ledger::LedgerError;
use crate::resolver::ResolverError;
use crate::watcher::WatcherError;

/// Errors that can occur during monitor operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file could not be hashed; the observation is skipped.
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Monitored-root validation failed.
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// The ledger storage backend failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The filesystem watch subscription failed.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
