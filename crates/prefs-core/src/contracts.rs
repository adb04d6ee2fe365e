use crate::config::PrefsConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_SUFFIX: &str = ".prefs";
pub const DEFAULT_LEGACY_FILE_NAME: &str = "pref_store.ini";

/// Where a scope keeps its files. Implementations must be cheap to call;
/// the tree caches the base location once it resolves.
pub trait StorageLocator: Send + Sync {
    /// Root directory for native backing files, or `None` when the scope has
    /// no writable location and runs in memory only.
    fn base_location(&self) -> Option<PathBuf>;

    /// Legacy flat file for `qualifier`, or `None` when there is no legacy
    /// area to migrate from.
    fn legacy_file_location(&self, qualifier: &str) -> Option<PathBuf>;

    /// Qualifiers that already have a backing file under `base`.
    fn list_qualifiers(&self, base: &Path) -> io::Result<Vec<String>> {
        list_with_suffix(base, self.file_suffix())
    }

    fn file_suffix(&self) -> &str {
        DEFAULT_FILE_SUFFIX
    }

    fn location(&self, base: &Path, qualifier: &str) -> PathBuf {
        base.join(format!("{qualifier}{}", self.file_suffix()))
    }
}

/// Raw file access used by the tree. Split out so tests can count or fail
/// individual operations.
pub trait BackingStore: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the whole file, creating parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Returns whether a file was removed.
    fn delete(&self, path: &Path) -> io::Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsBackingStore;

impl BackingStore for FsBackingStore {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let temp = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(temp.path(), contents)?;
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Directory layout driven by [`PrefsConfig`]:
/// `<state>/<qualifier><suffix>` for native files and
/// `<legacy>/<qualifier>/<legacy_file_name>` for legacy ones.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    state_location: Option<PathBuf>,
    legacy_location: Option<PathBuf>,
    file_suffix: String,
    legacy_file_name: String,
}

impl DirectoryLocator {
    pub fn new(state_location: Option<PathBuf>, legacy_location: Option<PathBuf>) -> Self {
        Self {
            state_location,
            legacy_location,
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            legacy_file_name: DEFAULT_LEGACY_FILE_NAME.to_string(),
        }
    }

    pub fn from_config(config: &PrefsConfig) -> Self {
        Self {
            state_location: config.state_location.clone(),
            legacy_location: config.legacy_location.clone(),
            file_suffix: config.file_suffix.clone(),
            legacy_file_name: config.legacy_file_name.clone(),
        }
    }
}

impl StorageLocator for DirectoryLocator {
    fn base_location(&self) -> Option<PathBuf> {
        self.state_location.clone()
    }

    fn legacy_file_location(&self, qualifier: &str) -> Option<PathBuf> {
        self.legacy_location
            .as_ref()
            .map(|root| root.join(qualifier).join(&self.legacy_file_name))
    }

    fn file_suffix(&self) -> &str {
        &self.file_suffix
    }
}

/// Locator for scopes that are never persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryLocator;

impl StorageLocator for MemoryLocator {
    fn base_location(&self) -> Option<PathBuf> {
        None
    }

    fn legacy_file_location(&self, _qualifier: &str) -> Option<PathBuf> {
        None
    }

    fn list_qualifiers(&self, _base: &Path) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn list_with_suffix(base: &Path, suffix: &str) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(stem) = file_name.strip_suffix(suffix) {
            if !stem.is_empty() {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
