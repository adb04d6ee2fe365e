use crate::backing::{self, NodeSnapshot};
use crate::node::{ChildSlot, NodeEntry, NodeId, NodeState, PreferenceNode};
use crate::tracker::LoadTracker;
use crate::{lock, read, write, FlushError, FlushFailure, LoadFailure, StorageError};
use chrono::Utc;
use prefs_core::{
    BackingStore, DirectoryLocator, FsBackingStore, NodeKind, ParsedProperties, PrefPath,
    PrefsConfig, StorageLocator, PATH_SEPARATOR,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, RwLock};
use tracing::{debug, info, warn};

struct ScopeStorage {
    locator: Arc<dyn StorageLocator>,
    /// Only a resolved location is cached, so a location configured after
    /// the first access is still picked up.
    base: Mutex<Option<PathBuf>>,
    initialized: Once,
}

impl ScopeStorage {
    fn new(locator: Arc<dyn StorageLocator>) -> Self {
        Self {
            locator,
            base: Mutex::new(None),
            initialized: Once::new(),
        }
    }

    fn base_location(&self) -> Option<PathBuf> {
        let mut cached = lock(&self.base);
        if cached.is_none() {
            *cached = self.locator.base_location();
        }
        cached.clone()
    }

    fn location(&self, qualifier: &str) -> Option<PathBuf> {
        self.base_location()
            .map(|base| self.locator.location(&base, qualifier))
    }
}

struct Captured {
    entry: Arc<NodeEntry>,
    generation: u64,
    dirty: bool,
    snapshot: NodeSnapshot,
}

pub(crate) struct TreeInner {
    nodes: RwLock<HashMap<NodeId, Arc<NodeEntry>>>,
    next_id: AtomicU64,
    root: Arc<NodeEntry>,
    scopes: RwLock<HashMap<String, Arc<ScopeStorage>>>,
    store: Arc<dyn BackingStore>,
    pub(crate) tracker: LoadTracker,
}

impl TreeInner {
    pub(crate) fn entry(&self, id: NodeId) -> Option<Arc<NodeEntry>> {
        read(&self.nodes).get(&id).cloned()
    }

    fn scope(&self, name: &str) -> Option<Arc<ScopeStorage>> {
        read(&self.scopes).get(name).cloned()
    }

    fn scope_for(&self, path: &PrefPath) -> Option<Arc<ScopeStorage>> {
        path.scope().and_then(|name| self.scope(name))
    }

    fn location_for(&self, path: &PrefPath) -> Option<PathBuf> {
        let qualifier = path.qualifier()?;
        self.scope_for(path)?.location(qualifier)
    }

    fn create_entry(&self, parent: &NodeEntry, name: &str) -> Arc<NodeEntry> {
        let id = NodeId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(NodeEntry::new(id, parent.path.child(name), Some(parent)));
        write(&self.nodes).insert(id, Arc::clone(&entry));
        entry
    }

    /// Finds or creates the child `name` of `parent`, promoting a placeholder
    /// if needed. Never loads anything.
    fn child_entry(&self, parent: &NodeEntry, name: &str) -> Arc<NodeEntry> {
        let entry = {
            let mut state = lock(&parent.state);
            match state.children.iter().position(|slot| slot.name == name) {
                Some(idx) => match state.children[idx].node.and_then(|id| self.entry(id)) {
                    Some(entry) => entry,
                    None => {
                        let entry = self.create_entry(parent, name);
                        state.children[idx].node = Some(entry.id);
                        debug!(event = "placeholder_promoted", node = %entry.path);
                        entry
                    }
                },
                None => {
                    let entry = self.create_entry(parent, name);
                    state.children.push(ChildSlot {
                        name: name.to_string(),
                        node: Some(entry.id),
                    });
                    entry
                }
            }
        };
        if entry.kind == NodeKind::Scope {
            self.initialize_scope(&entry);
        }
        entry
    }

    pub(crate) fn resolve_from(&self, start: &Arc<NodeEntry>, relative: &str) -> Arc<NodeEntry> {
        let mut current = Arc::clone(start);
        for segment in relative
            .split(PATH_SEPARATOR)
            .filter(|segment| !segment.is_empty())
        {
            current = self.child_entry(&current, segment);
        }
        current
    }

    /// Walks existing nodes only. Placeholders along the way are promoted
    /// and loaded so their stored descendants become visible.
    fn lookup(&self, path: &PrefPath) -> Option<Arc<NodeEntry>> {
        let mut current = Arc::clone(&self.root);
        for segment in path.segments() {
            let slot = lock(&current.state).child_slot(segment).cloned()?;
            let next = match slot.node.and_then(|id| self.entry(id)) {
                Some(next) => {
                    if next.kind == NodeKind::Scope {
                        self.initialize_scope(&next);
                    }
                    next
                }
                None => {
                    let next = self.child_entry(&current, segment);
                    self.ensure_loaded(&next);
                    next
                }
            };
            current = next;
        }
        Some(current)
    }

    /// Adds one placeholder per stored qualifier the first time a scope node
    /// is reached. Runs once per registration even if listing fails.
    pub(crate) fn initialize_scope(&self, entry: &NodeEntry) {
        let Some(scope) = self.scope(entry.path.name()) else {
            return;
        };
        scope.initialized.call_once(|| {
            let Some(base) = scope.base_location() else {
                debug!(event = "scope_memory_only", scope = %entry.path);
                return;
            };
            match scope.locator.list_qualifiers(&base) {
                Ok(names) => {
                    let mut state = lock(&entry.state);
                    for name in &names {
                        state.add_placeholder(name);
                    }
                    debug!(
                        event = "scope_initialized",
                        scope = %entry.path,
                        qualifiers = names.len()
                    );
                }
                Err(source) => LoadFailure::List { path: base, source }.report(&entry.path),
            }
        });
    }

    pub(crate) fn ensure_loaded(&self, entry: &NodeEntry) {
        let Some(level_id) = entry.load_level else {
            return;
        };
        let Some(level) = self.entry(level_id) else {
            return;
        };
        self.tracker.ensure(level_id, || self.load(&level));
    }

    fn load(&self, level: &Arc<NodeEntry>) {
        let Some(qualifier) = level.path.qualifier() else {
            return;
        };
        let Some(scope) = self.scope_for(&level.path) else {
            debug!(event = "load_skipped", node = %level.path, reason = "unregistered_scope");
            return;
        };

        // Without a native location an imported legacy file could never be
        // written back, so the legacy file is left untouched.
        let Some(location) = scope.location(qualifier) else {
            debug!(event = "legacy_skipped", node = %level.path, reason = "no_base_location");
            return;
        };

        self.migrate_legacy(level, &scope, qualifier);

        match self.store.read(&location) {
            Ok(Some(bytes)) => {
                let applied = self.apply_native(level, &location, &bytes);
                debug!(
                    event = "native_loaded",
                    node = %level.path,
                    location = %location.display(),
                    entries = applied
                );
            }
            Ok(None) => {
                debug!(event = "native_absent", node = %level.path, location = %location.display());
            }
            Err(source) => LoadFailure::Read {
                path: location,
                source,
            }
            .report(&level.path),
        }
    }

    /// One-time import of the legacy flat file. Every key lands on the load
    /// level unchanged, through the same path as user writes, so the node
    /// turns dirty and the next flush persists it natively. The legacy file is deleted once
    /// read; any failure here only skips the import.
    fn migrate_legacy(&self, level: &Arc<NodeEntry>, scope: &ScopeStorage, qualifier: &str) {
        let Some(location) = scope.locator.legacy_file_location(qualifier) else {
            debug!(event = "legacy_skipped", node = %level.path, reason = "no_legacy_location");
            return;
        };
        let bytes = match self.store.read(&location) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(event = "legacy_absent", node = %level.path, location = %location.display());
                return;
            }
            Err(source) => {
                LoadFailure::LegacyRead {
                    path: location,
                    source,
                }
                .report(&level.path);
                return;
            }
        };

        let parsed = self.parse_file(level, &location, &bytes);
        let imported = parsed.entries.len();
        {
            let mut state = lock(&level.state);
            for (key, value) in parsed.entries {
                state.put(&key, value);
            }
        }
        info!(
            event = "legacy_imported",
            node = %level.path,
            location = %location.display(),
            entries = imported
        );

        if let Err(source) = self.store.delete(&location) {
            LoadFailure::LegacyDelete {
                path: location,
                source,
            }
            .report(&level.path);
        }
    }

    fn parse_file(&self, level: &NodeEntry, location: &Path, bytes: &[u8]) -> ParsedProperties {
        let mut parsed = ParsedProperties::from_bytes(bytes);
        for malformed in parsed.malformed.drain(..) {
            LoadFailure::Malformed {
                path: location.to_path_buf(),
                line: malformed.line,
                reason: malformed.reason,
            }
            .report(&level.path);
        }
        parsed
    }

    /// Routes each stored entry to the node it belongs to, creating
    /// descendants as needed. Loaded values do not mark anything dirty.
    fn apply_native(&self, level: &Arc<NodeEntry>, location: &Path, bytes: &[u8]) -> usize {
        let mut applied = 0;
        for (stored, value) in self.parse_file(level, location, bytes).entries {
            let Some((relative, key)) = backing::decode_key(&stored) else {
                continue;
            };
            let target = relative
                .iter()
                .fold(Arc::clone(level), |node, segment| self.child_entry(&node, segment));
            lock(&target.state).properties.insert(key, value);
            applied += 1;
        }
        applied
    }

    fn materialized_children(&self, entry: &NodeEntry) -> Vec<Arc<NodeEntry>> {
        let ids: Vec<NodeId> = lock(&entry.state)
            .children
            .iter()
            .filter_map(|slot| slot.node)
            .collect();
        ids.into_iter().filter_map(|id| self.entry(id)).collect()
    }

    fn load_levels_under(&self, entry: &Arc<NodeEntry>) -> Vec<Arc<NodeEntry>> {
        if let Some(level_id) = entry.load_level {
            return self.entry(level_id).into_iter().collect();
        }
        let mut levels = Vec::new();
        let mut pending = vec![Arc::clone(entry)];
        while let Some(node) = pending.pop() {
            if node.kind == NodeKind::LoadLevel {
                levels.push(node);
                continue;
            }
            pending.extend(self.materialized_children(&node));
        }
        levels
    }

    pub(crate) fn flush_entry(&self, entry: &Arc<NodeEntry>) -> Result<(), FlushError> {
        if lock(&entry.state).removed {
            debug!(event = "flush_detached", node = %entry.path, id = %entry.id);
            return Ok(());
        }
        let failures: Vec<FlushFailure> = self
            .load_levels_under(entry)
            .iter()
            .filter_map(|level| self.flush_level(level).err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlushError { failures })
        }
    }

    fn capture(&self, level: &Arc<NodeEntry>) -> Vec<Captured> {
        let mut captured = Vec::new();
        let mut pending = vec![Arc::clone(level)];
        while let Some(entry) = pending.pop() {
            let (properties, generation, dirty) = {
                let state = lock(&entry.state);
                (state.properties.clone(), state.generation, state.dirty)
            };
            pending.extend(self.materialized_children(&entry));
            let relative = entry
                .path
                .relative_to(&level.path)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            captured.push(Captured {
                entry,
                generation,
                dirty,
                snapshot: NodeSnapshot {
                    relative,
                    properties,
                },
            });
        }
        captured
    }

    /// Rewrites the whole backing file of `level` if anything in its subtree
    /// is dirty. Without a location the flush succeeds without I/O.
    fn flush_level(&self, level: &Arc<NodeEntry>) -> Result<(), FlushFailure> {
        let _gate = lock(&level.flush_gate);
        self.ensure_loaded(level);

        let captured = self.capture(level);
        if !captured.iter().any(|node| node.dirty) {
            return Ok(());
        }

        match self.location_for(&level.path) {
            Some(location) => {
                let snapshots: Vec<NodeSnapshot> =
                    captured.iter().map(|node| node.snapshot.clone()).collect();
                let bytes = backing::encode(&snapshots, Utc::now());
                if let Err(source) = self.store.write(&location, &bytes) {
                    warn!(
                        event = "flush_failed",
                        node = %level.path,
                        location = %location.display(),
                        error = %source
                    );
                    return Err(FlushFailure {
                        node: level.path.clone(),
                        location,
                        source,
                    });
                }
                debug!(event = "flushed", node = %level.path, location = %location.display());
            }
            None => {
                debug!(event = "flush_memory_only", node = %level.path);
            }
        }

        for node in captured {
            let mut state = lock(&node.entry.state);
            if state.generation == node.generation {
                state.dirty = false;
            }
        }
        Ok(())
    }

    fn detach_subtree(&self, entry: &Arc<NodeEntry>) {
        let mut pending = vec![Arc::clone(entry)];
        while let Some(node) = pending.pop() {
            {
                let mut state = lock(&node.state);
                state.removed = true;
            }
            pending.extend(self.materialized_children(&node));
            write(&self.nodes).remove(&node.id);
            if node.kind == NodeKind::LoadLevel {
                self.tracker.forget(node.id);
            }
        }
    }

    fn remove_node(&self, target: &PrefPath) -> Result<(), StorageError> {
        let Some(parent_path) = target.parent() else {
            return Err(StorageError::CannotRemoveRoot);
        };
        let Some(parent) = self.lookup(&parent_path) else {
            return Ok(());
        };
        let slot = {
            let mut state = lock(&parent.state);
            match state
                .children
                .iter()
                .position(|slot| slot.name == target.name())
            {
                Some(idx) => state.children.remove(idx),
                None => return Ok(()),
            }
        };
        let removed = slot.node.and_then(|id| self.entry(id));

        let mut doomed = Vec::new();
        match target.kind() {
            NodeKind::Root => return Err(StorageError::CannotRemoveRoot),
            NodeKind::Scope => {
                let mut qualifiers: Vec<String> = removed
                    .as_ref()
                    .map(|entry| {
                        lock(&entry.state)
                            .children
                            .iter()
                            .map(|slot| slot.name.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(scope) = self.scope(target.name()) {
                    // The scope may never have been opened, so its children
                    // are not known yet.
                    if let Some(base) = scope.base_location() {
                        match scope.locator.list_qualifiers(&base) {
                            Ok(stored) => qualifiers.extend(stored),
                            Err(source) => LoadFailure::List { path: base, source }
                                .report(target),
                        }
                    }
                    qualifiers.sort();
                    qualifiers.dedup();
                    doomed.extend(
                        qualifiers
                            .iter()
                            .filter_map(|qualifier| scope.location(qualifier)),
                    );
                    write(&self.scopes).insert(
                        target.name().to_string(),
                        Arc::new(ScopeStorage::new(Arc::clone(&scope.locator))),
                    );
                }
            }
            NodeKind::LoadLevel => doomed.extend(self.location_for(target)),
            NodeKind::Leaf => {
                if let Some(level) = parent.load_level.and_then(|id| self.entry(id)) {
                    lock(&level.state).mark_dirty();
                }
            }
        }

        if let Some(entry) = removed {
            self.detach_subtree(&entry);
        }
        info!(event = "node_removed", node = %target, files = doomed.len());

        let mut first_error = None;
        for path in doomed {
            if let Err(source) = self.store.delete(&path) {
                warn!(event = "delete_failed", location = %path.display(), error = %source);
                if first_error.is_none() {
                    first_error = Some(StorageError::Io { path, source });
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reset(&self) {
        let detached: Vec<Arc<NodeEntry>> = {
            let mut nodes = write(&self.nodes);
            let root_id = self.root.id;
            let detached = nodes
                .values()
                .filter(|entry| entry.id != root_id)
                .cloned()
                .collect();
            nodes.retain(|id, _| *id == root_id);
            detached
        };
        for entry in &detached {
            lock(&entry.state).removed = true;
        }
        *lock(&self.root.state) = NodeState::default();
        self.tracker.clear();

        let names: Vec<String> = {
            let mut scopes = write(&self.scopes);
            for scope in scopes.values_mut() {
                *scope = Arc::new(ScopeStorage::new(Arc::clone(&scope.locator)));
            }
            scopes.keys().cloned().collect()
        };
        let mut root = lock(&self.root.state);
        for name in &names {
            root.add_placeholder(name);
        }
    }
}

/// Path-addressed preference hierarchy: root, scopes, and below each scope
/// one load level per qualifier backed by a single file.
///
/// Cloning is cheap; clones share the same nodes and load state.
#[derive(Clone)]
pub struct PreferenceTree {
    inner: Arc<TreeInner>,
}

impl fmt::Debug for PreferenceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceTree")
            .field("nodes", &read(&self.inner.nodes).len())
            .field("scopes", &read(&self.inner.scopes).keys().collect::<Vec<_>>())
            .field("loaded", &self.inner.tracker.loaded_count())
            .finish()
    }
}

impl Default for PreferenceTree {
    fn default() -> Self {
        Self::new(Arc::new(FsBackingStore))
    }
}

impl PreferenceTree {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self::with_tracker(store, LoadTracker::new())
    }

    pub fn with_tracker(store: Arc<dyn BackingStore>, tracker: LoadTracker) -> Self {
        let root_id = NodeId::from_raw(0);
        let root = Arc::new(NodeEntry::new(root_id, PrefPath::root(), None));
        let mut nodes = HashMap::new();
        nodes.insert(root_id, Arc::clone(&root));
        Self {
            inner: Arc::new(TreeInner {
                nodes: RwLock::new(nodes),
                next_id: AtomicU64::new(1),
                root,
                scopes: RwLock::new(HashMap::new()),
                store,
                tracker,
            }),
        }
    }

    /// Filesystem-backed tree with the configured scope registered.
    pub fn from_config(config: &PrefsConfig) -> Self {
        let tree = Self::default();
        tree.register_scope(&config.scope, Arc::new(DirectoryLocator::from_config(config)));
        tree
    }

    /// Registers (or replaces) the storage for scope `name`. Scopes that are
    /// never registered keep their nodes in memory only.
    pub fn register_scope(&self, name: &str, locator: Arc<dyn StorageLocator>) {
        let path = PrefPath::parse(name);
        let Some(name) = path.scope() else {
            return;
        };
        write(&self.inner.scopes).insert(name.to_string(), Arc::new(ScopeStorage::new(locator)));
        lock(&self.inner.root.state).add_placeholder(name);
        debug!(event = "scope_registered", scope = name);
    }

    pub fn root(&self) -> PreferenceNode {
        self.handle(Arc::clone(&self.inner.root))
    }

    /// Resolves `path`, creating missing nodes, and makes sure the node's
    /// backing file has been read.
    pub fn node(&self, path: &str) -> PreferenceNode {
        let entry = self.inner.resolve_from(&self.inner.root, path);
        self.inner.ensure_loaded(&entry);
        self.handle(entry)
    }

    /// Whether `path` exists, counting placeholders. Never creates nodes.
    pub fn node_exists(&self, path: &str) -> bool {
        let target = PrefPath::parse(path);
        let Some(parent_path) = target.parent() else {
            return true;
        };
        match self.inner.lookup(&parent_path) {
            Some(parent) => lock(&parent.state).child_slot(target.name()).is_some(),
            None => false,
        }
    }

    /// Removes `path` and its subtree. Removing a load level or a scope
    /// deletes the backing files involved; removing a deeper node marks its
    /// load level dirty so the next flush rewrites the file without it.
    pub fn remove_node(&self, path: &str) -> Result<(), StorageError> {
        self.inner.remove_node(&PrefPath::parse(path))
    }

    /// Flushes every dirty load level at or below `path`. Failures are
    /// collected; load levels that were written stay written.
    pub fn flush(&self, path: &str) -> Result<(), FlushError> {
        match self.inner.lookup(&PrefPath::parse(path)) {
            Some(entry) => self.inner.flush_entry(&entry),
            None => Ok(()),
        }
    }

    pub fn flush_all(&self) -> Result<(), FlushError> {
        self.inner.flush_entry(&self.inner.root)
    }

    /// Backing file for the load level of `path`, if its scope has a
    /// resolvable location.
    pub fn location_of(&self, path: &str) -> Option<PathBuf> {
        self.inner.location_for(&PrefPath::parse(path))
    }

    pub fn tracker(&self) -> &LoadTracker {
        &self.inner.tracker
    }

    /// Drops every node and load marker. Registered scopes stay registered
    /// and are initialized again on next access.
    pub fn reset(&self) {
        self.inner.reset();
    }

    fn handle(&self, entry: Arc<NodeEntry>) -> PreferenceNode {
        PreferenceNode {
            entry,
            tree: Arc::clone(&self.inner),
        }
    }
}
