mod backing;
mod node;
mod tracker;
mod tree;

use prefs_core::PrefPath;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

pub use node::{NodeId, PreferenceNode};
pub use tracker::LoadTracker;
pub use tree::PreferenceTree;

/// Format marker written into every native file and ignored on load.
pub const VERSION_KEY: &str = "preferences.version";
pub const VERSION_VALUE: &str = "1";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("the root node cannot be removed")]
    CannotRemoveRoot,
    #[error("failed to delete {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Flush(#[from] FlushError),
}

#[derive(Debug, Error)]
#[error("failed to write {} for {node}: {source}", .location.display())]
pub struct FlushFailure {
    pub node: PrefPath,
    pub location: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Every load level that could not be written during one flush call.
/// Load levels that did write successfully are not rolled back.
#[derive(Debug, Error)]
#[error("{} preference file(s) failed to flush", .failures.len())]
pub struct FlushError {
    pub failures: Vec<FlushFailure>,
}

/// Problems hit while materializing a node. These never reach callers; they
/// are reported to the log at debug level and the data is treated as absent.
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read legacy file {}: {source}", .path.display())]
    LegacyRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to delete legacy file {}: {source}", .path.display())]
    LegacyDelete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("skipped malformed entry in {} at line {line}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("failed to list qualifiers under {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LoadFailure {
    pub(crate) fn report(&self, node: &PrefPath) {
        tracing::debug!(event = "load_failure", node = %node, error = %self);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
