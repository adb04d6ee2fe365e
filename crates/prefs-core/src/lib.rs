pub mod config;
pub mod contracts;
pub mod path;
pub mod properties;
pub mod values;

pub use config::{ConfigError, PrefsConfig};
pub use contracts::{
    BackingStore, DirectoryLocator, FsBackingStore, MemoryLocator, StorageLocator,
    DEFAULT_FILE_SUFFIX, DEFAULT_LEGACY_FILE_NAME,
};
pub use path::{NodeKind, PrefPath, PATH_SEPARATOR};
pub use properties::ParsedProperties;
