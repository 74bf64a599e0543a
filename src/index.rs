//! ## Index façade
//!
//! Maps opaque user payloads to internal integer ids and wraps every public
//! operation in a bounded-wait reader/writer lock. This is the only module
//! user code is expected to touch directly.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::exceptions::RTreeError;
use crate::geometry::{Point, Rectangle};
use crate::node::EntryId;
use crate::tree::TreeCore;

const DEFAULT_MAX_ENTRIES: usize = 10;
const DEFAULT_MIN_ENTRIES: usize = 5;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

struct IndexState<T> {
    tree: TreeCore,
    ids_to_items: HashMap<EntryId, T>,
    items_to_ids: HashMap<T, EntryId>,
    next_id: EntryId,
}

/// An in-memory R-tree spatial index over 2-D integer rectangles, keyed by an
/// opaque payload type `T`.
///
/// All public operations are synchronous and take a bounded-wait
/// reader/writer lock internally (see [`RTree::with_timeout`]); `add` and
/// `delete` take the writer side, the rest take the reader side.
pub struct RTree<T> {
    state: RwLock<IndexState<T>>,
    lock_timeout: Duration,
}

impl<T> Default for RTree<T>
where
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RTree<T>
where
    T: Eq + Hash + Clone,
{
    /// Constructs an index with the default fanout (`maxEntries = 10`,
    /// `minEntries = 5`) and the default 10-second lock-wait bound.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES, DEFAULT_MIN_ENTRIES)
            .expect("default capacity is always valid")
    }

    /// Constructs an index with explicit fanout parameters.
    ///
    /// Fails with [`RTreeError::InvalidArgument`] if `max_entries < 2`, or if
    /// `min_entries` is not in `1..=max_entries/2`.
    pub fn with_capacity(max_entries: usize, min_entries: usize) -> Result<Self, RTreeError> {
        if max_entries < 2 {
            return Err(RTreeError::InvalidArgument {
                message: format!("maxEntries must be >= 2, got {max_entries}"),
            });
        }
        if min_entries < 1 || min_entries > max_entries / 2 {
            return Err(RTreeError::InvalidArgument {
                message: format!(
                    "minEntries must be between 1 and {}, got {min_entries}",
                    max_entries / 2
                ),
            });
        }
        info!(max_entries, min_entries, "constructing RTree index");
        Ok(RTree {
            state: RwLock::new(IndexState {
                tree: TreeCore::new(max_entries, min_entries),
                ids_to_items: HashMap::new(),
                items_to_ids: HashMap::new(),
                next_id: EntryId::MIN,
            }),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Like [`Self::with_capacity`], but with an explicit lock-wait bound
    /// instead of the 10-second default. Mainly useful for tests that want a
    /// short timeout to exercise the lock-timeout error path.
    pub fn with_capacity_and_timeout(
        max_entries: usize,
        min_entries: usize,
        lock_timeout: Duration,
    ) -> Result<Self, RTreeError> {
        let mut rtree = Self::with_capacity(max_entries, min_entries)?;
        rtree.lock_timeout = lock_timeout;
        Ok(rtree)
    }

    /// Inserts `item` under `rect`. Fails with
    /// [`RTreeError::DuplicatePayload`] if `item` is already indexed, or
    /// [`RTreeError::LockTimeout`] if the writer lock could not be acquired
    /// within the bound.
    pub fn add(&self, rect: Rectangle, item: T) -> Result<(), RTreeError> {
        let mut state = self
            .state
            .try_write_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "add" })?;

        if state.items_to_ids.contains_key(&item) {
            return Err(RTreeError::DuplicatePayload);
        }

        let id = state.next_id;
        state.next_id += 1;
        debug!(id, "adding payload to index");
        state.tree.insert(rect, id);
        state.items_to_ids.insert(item.clone(), id);
        state.ids_to_items.insert(id, item);
        Ok(())
    }

    /// Removes `(rect, item)`. Returns `Ok(true)` if it was present and
    /// removed. Fails with [`RTreeError::NotFound`] if `item` is not
    /// currently indexed.
    pub fn delete(&self, rect: Rectangle, item: &T) -> Result<bool, RTreeError> {
        let mut state = self
            .state
            .try_write_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "delete" })?;

        let id = match state.items_to_ids.get(item) {
            Some(id) => *id,
            None => return Err(RTreeError::NotFound),
        };

        let removed = state.tree.delete(&rect, id);
        if removed {
            debug!(id, "removed payload from index");
            state.items_to_ids.remove(item);
            state.ids_to_items.remove(&id);
        }
        Ok(removed)
    }

    /// All payloads whose indexed rectangle intersects `rect`.
    pub fn intersects(&self, rect: Rectangle) -> Result<Vec<T>, RTreeError> {
        let state = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "intersects" })?;
        Ok(resolve(&state, state.tree.intersects(&rect)))
    }

    /// All payloads whose indexed rectangle is fully contained by `rect`.
    pub fn contains(&self, rect: Rectangle) -> Result<Vec<T>, RTreeError> {
        let state = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "contains" })?;
        Ok(resolve(&state, state.tree.contains(&rect)))
    }

    /// Payloads at the minimum rectangle-distance from `point`, restricted to
    /// those within `furthest_distance`. Empty if none qualify.
    pub fn nearest(&self, point: Point, furthest_distance: f64) -> Result<Vec<T>, RTreeError> {
        let state = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "nearest" })?;
        Ok(resolve(&state, state.tree.nearest(&point, furthest_distance)))
    }

    /// Number of payloads currently indexed.
    pub fn count(&self) -> Result<usize, RTreeError> {
        let state = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "count" })?;
        Ok(state.items_to_ids.len())
    }

    /// A fresh copy of the root node's MBR, or `None` when the index is empty.
    pub fn bounds(&self) -> Result<Option<Rectangle>, RTreeError> {
        let state = self
            .state
            .try_read_for(self.lock_timeout)
            .ok_or(RTreeError::LockTimeout { operation: "bounds" })?;
        Ok(state.tree.root_mbr())
    }
}

fn resolve<T: Clone + Eq + Hash>(state: &IndexState<T>, ids: Vec<EntryId>) -> Vec<T> {
    ids.into_iter()
        .filter_map(|id| state.ids_to_items.get(&id).cloned())
        .collect()
}
