use crate::tree::TreeInner;
use crate::{lock, FlushError};
use prefs_core::values::{self, LIST_DELIMITER};
use prefs_core::{NodeKind, PrefPath};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A child known by name. `node` is `None` while it is only a placeholder
/// for a backing file that has not been opened yet.
#[derive(Debug, Clone)]
pub(crate) struct ChildSlot {
    pub(crate) name: String,
    pub(crate) node: Option<NodeId>,
}

#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) children: Vec<ChildSlot>,
    pub(crate) dirty: bool,
    /// Bumped on every write so a flush only clears `dirty` when nothing
    /// changed after its snapshot.
    pub(crate) generation: u64,
    pub(crate) removed: bool,
}

impl NodeState {
    pub(crate) fn put(&mut self, key: &str, value: String) -> bool {
        if self.properties.get(key) == Some(&value) {
            return false;
        }
        self.properties.insert(key.to_string(), value);
        self.mark_dirty();
        true
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<String> {
        let previous = self.properties.remove(key);
        if previous.is_some() {
            self.mark_dirty();
        }
        previous
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }

    pub(crate) fn child_slot(&self, name: &str) -> Option<&ChildSlot> {
        self.children.iter().find(|slot| slot.name == name)
    }

    pub(crate) fn add_placeholder(&mut self, name: &str) {
        if self.child_slot(name).is_none() {
            self.children.push(ChildSlot {
                name: name.to_string(),
                node: None,
            });
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodeEntry {
    pub(crate) id: NodeId,
    pub(crate) path: PrefPath,
    pub(crate) kind: NodeKind,
    /// Non-owning back reference; the tree's node table owns every entry.
    pub(crate) parent: Option<NodeId>,
    pub(crate) load_level: Option<NodeId>,
    pub(crate) state: Mutex<NodeState>,
    /// Serializes flushes of one load level.
    pub(crate) flush_gate: Mutex<()>,
}

impl NodeEntry {
    pub(crate) fn new(id: NodeId, path: PrefPath, parent: Option<&NodeEntry>) -> Self {
        let kind = path.kind();
        let load_level = match kind {
            NodeKind::Root | NodeKind::Scope => None,
            NodeKind::LoadLevel => Some(id),
            NodeKind::Leaf => parent.and_then(|parent| parent.load_level),
        };
        Self {
            id,
            path,
            kind,
            parent: parent.map(|parent| parent.id),
            load_level,
            state: Mutex::new(NodeState::default()),
            flush_gate: Mutex::new(()),
        }
    }
}

/// Handle to one node of a [`crate::PreferenceTree`].
///
/// Property reads and writes are in-memory only. The tree materializes the
/// node's backing file before handing out a handle, so `get` never does I/O;
/// writes only mark the node dirty until [`PreferenceNode::flush`] runs.
#[derive(Clone)]
pub struct PreferenceNode {
    pub(crate) entry: Arc<NodeEntry>,
    pub(crate) tree: Arc<TreeInner>,
}

impl fmt::Debug for PreferenceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceNode")
            .field("id", &self.entry.id)
            .field("path", &self.entry.path)
            .field("kind", &self.entry.kind)
            .finish()
    }
}

impl PreferenceNode {
    pub fn id(&self) -> NodeId {
        self.entry.id
    }

    pub fn name(&self) -> &str {
        self.entry.path.name()
    }

    pub fn path(&self) -> &PrefPath {
        &self.entry.path
    }

    pub fn kind(&self) -> NodeKind {
        self.entry.kind
    }

    pub fn get(&self, key: &str) -> Option<String> {
        lock(&self.entry.state).properties.get(key).cloned()
    }

    pub fn put(&self, key: &str, value: impl Into<String>) {
        lock(&self.entry.state).put(key, value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        lock(&self.entry.state).remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.entry.state).properties.keys().cloned().collect()
    }

    pub fn clear(&self) {
        let mut state = lock(&self.entry.state);
        if !state.properties.is_empty() {
            state.properties.clear();
            state.mark_dirty();
        }
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.entry.state).dirty
    }

    pub fn is_removed(&self) -> bool {
        lock(&self.entry.state).removed
    }

    /// Whether the backing file this node belongs to has been read. Root and
    /// scope nodes have no backing file and always report `false`.
    pub fn is_loaded(&self) -> bool {
        self.entry
            .load_level
            .map(|id| self.tree.tracker.is_loaded(id))
            .unwrap_or(false)
    }

    /// Known child names in insertion order, including placeholders.
    pub fn child_names(&self) -> Vec<String> {
        if self.entry.kind == NodeKind::Scope {
            self.tree.initialize_scope(&self.entry);
        }
        lock(&self.entry.state)
            .children
            .iter()
            .map(|slot| slot.name.clone())
            .collect()
    }

    pub fn get_or_create_child(&self, name: &str) -> PreferenceNode {
        let entry = self.tree.resolve_from(&self.entry, name);
        self.tree.ensure_loaded(&entry);
        PreferenceNode {
            entry,
            tree: Arc::clone(&self.tree),
        }
    }

    pub fn parent(&self) -> Option<PreferenceNode> {
        let entry = self.tree.entry(self.entry.parent?)?;
        Some(PreferenceNode {
            entry,
            tree: Arc::clone(&self.tree),
        })
    }

    pub fn flush(&self) -> Result<(), FlushError> {
        self.tree.flush_entry(&self.entry)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        values::parse_bool(self.get(key).as_deref(), default)
    }

    pub fn get_i32(&self, key: &str, default: i32) -> i32 {
        values::parse_i32(self.get(key).as_deref(), default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        values::parse_i64(self.get(key).as_deref(), default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        values::parse_f64(self.get(key).as_deref(), default)
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| values::split_list(&value, LIST_DELIMITER))
            .unwrap_or_default()
    }

    /// List value truncated or padded with `pad` to `len` entries, for lists
    /// that run parallel to another list preference.
    pub fn get_list_aligned(&self, key: &str, len: usize, pad: &str) -> Vec<String> {
        values::align_list(self.get_list(key), len, pad)
    }

    pub fn put_bool(&self, key: &str, value: bool) {
        self.put(key, value.to_string());
    }

    pub fn put_i32(&self, key: &str, value: i32) {
        self.put(key, value.to_string());
    }

    pub fn put_i64(&self, key: &str, value: i64) {
        self.put(key, value.to_string());
    }

    pub fn put_f64(&self, key: &str, value: f64) {
        self.put(key, value.to_string());
    }

    pub fn put_list<S: AsRef<str>>(&self, key: &str, entries: &[S]) {
        self.put(key, values::join_list(entries, LIST_DELIMITER));
    }
}
