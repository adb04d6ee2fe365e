use prefs_core::{BackingStore, DirectoryLocator, FsBackingStore, PrefsConfig};
use prefs_storage::{PreferenceTree, StorageError};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use tempfile::TempDir;

/// Filesystem store that records how often each path is read and can be
/// told to fail writes.
#[derive(Default)]
struct CountingStore {
    inner: FsBackingStore,
    reads: Mutex<HashMap<PathBuf, usize>>,
    writes: Mutex<usize>,
    fail_writes: AtomicBool,
}

impl CountingStore {
    fn reads_of(&self, path: &Path) -> usize {
        self.reads
            .lock()
            .expect("reads lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn total_reads(&self) -> usize {
        self.reads.lock().expect("reads lock").values().sum()
    }

    fn writes(&self) -> usize {
        *self.writes.lock().expect("writes lock")
    }
}

impl BackingStore for CountingStore {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        *self
            .reads
            .lock()
            .expect("reads lock")
            .entry(path.to_path_buf())
            .or_default() += 1;
        self.inner.read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        *self.writes.lock().expect("writes lock") += 1;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        self.inner.write(path, contents)
    }

    fn delete(&self, path: &Path) -> io::Result<bool> {
        self.inner.delete(path)
    }
}

struct Fixture {
    dir: TempDir,
    store: Arc<CountingStore>,
    tree: PreferenceTree,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(CountingStore::default());
        let tree = PreferenceTree::new(store.clone());
        tree.register_scope(
            "instance",
            Arc::new(DirectoryLocator::new(
                Some(dir.path().join("state")),
                Some(dir.path().join("legacy")),
            )),
        );
        Self { dir, store, tree }
    }

    fn native(&self, qualifier: &str) -> PathBuf {
        self.dir
            .path()
            .join("state")
            .join(format!("{qualifier}.prefs"))
    }

    fn legacy(&self, qualifier: &str) -> PathBuf {
        self.dir
            .path()
            .join("legacy")
            .join(qualifier)
            .join("pref_store.ini")
    }

    fn write_native(&self, qualifier: &str, contents: &str) {
        let path = self.native(qualifier);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write native");
    }

    fn write_legacy(&self, qualifier: &str, contents: &str) {
        let path = self.legacy(qualifier);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write legacy");
    }
}

#[test]
fn backing_file_is_read_once() {
    let fx = Fixture::new();
    fx.write_native("org.example", "a=1\nui//b=2\n");

    let first = fx.tree.node("instance/org.example");
    let child = fx.tree.node("instance/org.example/ui");
    let again = fx.tree.node("/instance/org.example/");

    assert_eq!(fx.store.reads_of(&fx.native("org.example")), 1);
    assert_eq!(first.id(), again.id());
    assert_eq!(first.get("a").as_deref(), Some("1"));
    assert_eq!(child.get("b").as_deref(), Some("2"));
}

#[test]
fn root_and_scope_access_reads_nothing() {
    let fx = Fixture::new();
    fx.tree.root();
    fx.tree.node("instance").child_names();
    assert_eq!(fx.store.total_reads(), 0);
    assert_eq!(fx.tree.tracker().loaded_count(), 0);
}

#[test]
fn legacy_file_is_migrated_once() {
    let fx = Fixture::new();
    fx.write_legacy("org.example", "a=1\nb=2\n");

    let node = fx.tree.node("instance/org.example");
    assert_eq!(node.get("a").as_deref(), Some("1"));
    assert_eq!(node.get("b").as_deref(), Some("2"));
    assert!(node.is_dirty());
    assert!(!fx.legacy("org.example").exists());

    node.flush().expect("flush");
    assert!(!node.is_dirty());
    let text = fs::read_to_string(fx.native("org.example")).expect("native file");
    assert!(text.contains("a=1\n"));
    assert!(text.contains("b=2\n"));

    fx.tree.reset();
    let reloaded = fx.tree.node("instance/org.example");
    assert_eq!(reloaded.get("a").as_deref(), Some("1"));
    assert!(!reloaded.is_dirty());
    assert_eq!(fx.store.reads_of(&fx.legacy("org.example")), 2);
}

#[test]
fn native_values_overlay_legacy_values() {
    let fx = Fixture::new();
    fx.write_legacy("org.example", "a=1\nb=legacy\n");
    fx.write_native("org.example", "b=native\nc=3\n");

    let node = fx.tree.node("instance/org.example");
    assert_eq!(node.get("a").as_deref(), Some("1"));
    assert_eq!(node.get("b").as_deref(), Some("native"));
    assert_eq!(node.get("c").as_deref(), Some("3"));
    assert!(!fx.legacy("org.example").exists());
}

#[test]
fn missing_locations_leave_an_empty_node() {
    let tree = PreferenceTree::default();
    tree.register_scope("instance", Arc::new(DirectoryLocator::new(None, None)));

    let node = tree.node("instance/org.example");
    assert!(node.keys().is_empty());
    assert!(node.is_loaded());

    node.put("k", "v");
    node.flush().expect("memory-only flush succeeds");
    assert!(!node.is_dirty());
    assert_eq!(node.get("k").as_deref(), Some("v"));
}

#[test]
fn flush_clears_dirty_and_second_flush_does_no_io() {
    let fx = Fixture::new();
    let node = fx.tree.node("instance/org.example");
    node.put("k", "v");
    assert!(node.is_dirty());

    node.flush().expect("flush");
    assert!(!node.is_dirty());
    assert_eq!(fx.store.writes(), 1);

    node.flush().expect("flush");
    fx.tree.flush_all().expect("flush all");
    assert_eq!(fx.store.writes(), 1);

    node.put("k", "v");
    node.flush().expect("flush");
    assert_eq!(fx.store.writes(), 1);
}

#[test]
fn failed_flush_keeps_dirty_and_reports_the_file() {
    let fx = Fixture::new();
    fx.tree.node("instance/org.alpha").put("k", "1");
    fx.tree.node("instance/org.beta").put("k", "2");
    fx.store.fail_writes.store(true, Ordering::SeqCst);

    let err = fx.tree.flush_all().expect_err("writes fail");
    assert_eq!(err.failures.len(), 2);
    assert!(err
        .failures
        .iter()
        .any(|failure| failure.location == fx.native("org.alpha")));
    assert!(fx.tree.node("instance/org.alpha").is_dirty());

    fx.store.fail_writes.store(false, Ordering::SeqCst);
    fx.tree.flush_all().expect("flush");
    assert!(!fx.tree.node("instance/org.alpha").is_dirty());
    assert!(fx.native("org.beta").exists());
}

#[test]
fn flush_error_converts_into_storage_error() {
    let fx = Fixture::new();
    fx.tree.node("instance/q").put("k", "v");
    fx.store.fail_writes.store(true, Ordering::SeqCst);

    let err: StorageError = fx.tree.flush("instance/q").expect_err("fails").into();
    assert!(matches!(err, StorageError::Flush(_)));
}

#[test]
fn unknown_paths_are_created_empty() {
    let fx = Fixture::new();
    let deep = fx.tree.node("instance/org.example/a/b/c");
    assert!(deep.keys().is_empty());
    assert!(fx.tree.node_exists("instance/org.example/a/b"));
    assert!(!fx.tree.node_exists("instance/org.other/a"));
}

#[test]
fn concurrent_first_access_loads_once() {
    let fx = Fixture::new();
    fx.write_native("org.example", "shared=yes\nleft//k=1\nright//k=2\n");

    let threads = 8;
    let barrier = Barrier::new(threads);
    std::thread::scope(|scope| {
        for idx in 0..threads {
            let tree = fx.tree.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                let path = if idx % 2 == 0 {
                    "instance/org.example/left"
                } else {
                    "instance/org.example/right"
                };
                let node = tree.node(path);
                let expected = if idx % 2 == 0 { "1" } else { "2" };
                assert_eq!(node.get("k").as_deref(), Some(expected));
                assert_eq!(
                    tree.node("instance/org.example").get("shared").as_deref(),
                    Some("yes")
                );
            });
        }
    });

    assert_eq!(fx.store.reads_of(&fx.native("org.example")), 1);
    assert_eq!(fx.tree.node("instance/org.example").child_names().len(), 2);
}

#[test]
fn concurrent_writes_and_flushes_keep_every_value() {
    let fx = Fixture::new();
    std::thread::scope(|scope| {
        for idx in 0..4 {
            let tree = fx.tree.clone();
            scope.spawn(move || {
                let node = tree.node(&format!("instance/org.example/worker{idx}"));
                for round in 0..10 {
                    node.put_i32("round", round);
                    node.flush().expect("flush");
                }
            });
        }
    });

    fx.tree.reset();
    for idx in 0..4 {
        let node = fx.tree.node(&format!("instance/org.example/worker{idx}"));
        assert_eq!(node.get_i32("round", -1), 9);
    }
}

#[test]
fn removing_a_scope_deletes_every_file() {
    let fx = Fixture::new();
    fx.write_native("org.alpha", "k=1\n");
    fx.write_native("org.beta", "k=2\n");

    fx.tree.remove_node("instance").expect("remove scope");
    assert!(!fx.native("org.alpha").exists());
    assert!(!fx.native("org.beta").exists());

    assert!(fx.tree.node("instance").child_names().is_empty());
}

#[test]
fn tree_from_config_uses_configured_directories() {
    let dir = TempDir::new().expect("tempdir");
    let config = PrefsConfig {
        state_location: Some(dir.path().join("state")),
        legacy_location: Some(dir.path().join("legacy")),
        ..PrefsConfig::default()
    };
    let tree = PreferenceTree::from_config(&config);
    let node = tree.node(&format!("{}/org.example", config.scope));
    node.put("k", "v");
    node.flush().expect("flush");
    assert!(dir.path().join("state/org.example.prefs").exists());
}

#[test]
fn unreadable_backing_file_is_treated_as_absent() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.native("org.example")).expect("directory in place of file");

    let node = fx.tree.node("instance/org.example");
    assert!(node.keys().is_empty());
    assert!(node.is_loaded());
    node.put("k", "v");
    assert_eq!(node.get("k").as_deref(), Some("v"));
    assert!(node.flush().is_err());
    assert!(node.is_dirty());
}

#[test]
fn legacy_file_is_kept_without_a_native_location() {
    let dir = TempDir::new().expect("tempdir");
    let legacy = dir.path().join("legacy/org.example/pref_store.ini");
    fs::create_dir_all(legacy.parent().expect("parent")).expect("mkdir");
    fs::write(&legacy, "a=1\n").expect("write legacy");

    let tree = PreferenceTree::default();
    tree.register_scope(
        "instance",
        Arc::new(DirectoryLocator::new(None, Some(dir.path().join("legacy")))),
    );
    let node = tree.node("instance/org.example");
    node.flush().expect("memory-only flush");

    assert!(legacy.exists());
    assert_eq!(node.get("a"), None);
    assert!(!node.is_dirty());
}

#[test]
fn legacy_keys_land_on_the_load_level_unchanged() {
    let fx = Fixture::new();
    fx.write_legacy("org.example", "ui/theme=dark\nplain=1\n");

    let node = fx.tree.node("instance/org.example");
    assert_eq!(node.get("ui/theme").as_deref(), Some("dark"));
    assert!(node.child_names().is_empty());
    assert!(node.is_dirty());
    node.flush().expect("flush");

    fx.tree.reset();
    let reloaded = fx.tree.node("instance/org.example");
    assert_eq!(reloaded.get("ui/theme").as_deref(), Some("dark"));
    assert_eq!(reloaded.get("plain").as_deref(), Some("1"));
}
