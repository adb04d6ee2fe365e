use crate::lock;
use crate::node::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

/// Records which load levels have been materialized. Owned by a single
/// tree, so independent trees never share load state.
#[derive(Debug, Default)]
pub struct LoadTracker {
    loads: Mutex<HashMap<NodeId, Arc<Once>>>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `load` the first time `id` is seen and returns whether this call
    /// ran it. Concurrent callers for the same id block until the first
    /// load has finished; the map lock is only held to look up the gate.
    pub fn ensure<F: FnOnce()>(&self, id: NodeId, load: F) -> bool {
        let gate = {
            let mut loads = lock(&self.loads);
            Arc::clone(loads.entry(id).or_insert_with(|| Arc::new(Once::new())))
        };
        let mut ran = false;
        gate.call_once(|| {
            load();
            ran = true;
        });
        ran
    }

    pub fn is_loaded(&self, id: NodeId) -> bool {
        lock(&self.loads)
            .get(&id)
            .map(|gate| gate.is_completed())
            .unwrap_or(false)
    }

    pub fn forget(&self, id: NodeId) {
        lock(&self.loads).remove(&id);
    }

    pub fn clear(&self) {
        lock(&self.loads).clear();
    }

    pub fn loaded_count(&self) -> usize {
        lock(&self.loads)
            .values()
            .filter(|gate| gate.is_completed())
            .count()
    }
}
