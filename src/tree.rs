//! ## Tree core: Guttman insertion/split, deletion/condensation, and queries
//!
//! `TreeCore` owns the node-id -> [`Node`] arena and all structural mutation.
//! It knows nothing about payload types or locking; [`crate::index::RTree`]
//! sits on top of it.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::geometry::{Point, Rectangle};
use crate::node::{EntryId, Node, NodeId};

/// `entry_status` marker: candidate not yet assigned to either split group.
const UNASSIGNED: u8 = 0;
/// Assigned to the original node during a split.
const GROUP_N: u8 = 1;
/// Assigned to the freshly created sibling during a split.
const GROUP_NN: u8 = 2;

pub struct TreeCore {
    nodes: HashMap<NodeId, Node>,
    root_id: NodeId,
    height: u32,
    next_node_id: NodeId,
    free_node_ids: Vec<NodeId>,
    max_entries: usize,
    min_entries: usize,

    // Scratch state, owned by the tree and reused across writer operations.
    // Valid only within a single insert/delete call; cleared at the top of each.
    parents: Vec<NodeId>,
    parents_entry: Vec<usize>,
    entry_status: Vec<u8>,
}

impl TreeCore {
    pub fn new(max_entries: usize, min_entries: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(0, Node::new(0, 1));
        info!(
            max_entries,
            min_entries, "creating new R-tree core with an empty root leaf"
        );
        TreeCore {
            nodes,
            root_id: 0,
            height: 1,
            next_node_id: 1,
            free_node_ids: Vec::new(),
            max_entries,
            min_entries,
            parents: Vec::new(),
            parents_entry: Vec::new(),
            entry_status: Vec::new(),
        }
    }

    pub fn root_mbr(&self) -> Option<Rectangle> {
        self.nodes[&self.root_id].mbr
    }

    fn alloc_node_id(&mut self) -> NodeId {
        match self.free_node_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_node_id;
                self.next_node_id += 1;
                id
            }
        }
    }

    // ---- Insertion -----------------------------------------------------

    pub fn insert(&mut self, rect: Rectangle, id: EntryId) {
        self.insert_at_level(rect, id, 1);
    }

    fn insert_at_level(&mut self, rect: Rectangle, id: EntryId, target_level: u32) {
        debug!(?rect, id, target_level, "inserting entry");
        self.parents.clear();
        self.parents_entry.clear();
        let chosen_id = self.choose_node(rect, target_level);

        let split_sibling = {
            let node = self.nodes.get_mut(&chosen_id).expect("chosen node must exist");
            if node.entry_count() < self.max_entries {
                node.add_entry_no_copy(rect, id);
                None
            } else {
                Some(self.split_node(chosen_id, rect, id))
            }
        };

        self.adjust_tree(chosen_id, split_sibling);
    }

    /// Descends from the root, at each internal node picking the child entry
    /// with least enlargement (ties broken by smaller area), stopping at
    /// `target_level`. Records the descent path in `parents`/`parents_entry`.
    fn choose_node(&mut self, rect: Rectangle, target_level: u32) -> NodeId {
        let mut current = self.root_id;
        self.parents.push(current);
        loop {
            let level = self.nodes[&current].level;
            if level == target_level {
                return current;
            }
            let node = &self.nodes[&current];
            debug_assert!(!node.entries.is_empty(), "internal node cannot be empty");

            let mut best_index = 0usize;
            let mut best_enlargement = node.entries[0].enlargement(&rect);
            let mut best_area = node.entries[0].area();
            for i in 1..node.entries.len() {
                let enlargement = node.entries[i].enlargement(&rect);
                let area = node.entries[i].area();
                if enlargement < best_enlargement || (enlargement == best_enlargement && area < best_area) {
                    best_enlargement = enlargement;
                    best_area = area;
                    best_index = i;
                }
            }
            self.parents_entry.push(best_index);
            current = node.ids[best_index];
            self.parents.push(current);
        }
    }

    /// Ascends from `n_id` (with an optional split sibling `nn_id`) via the
    /// scratch descent stacks, refreshing MBRs and propagating splits upward.
    /// Grows the tree by one level if the split reaches the root.
    fn adjust_tree(&mut self, mut n_id: NodeId, mut nn_id: Option<NodeId>) {
        self.parents.pop(); // drop n_id itself; remaining top is its parent
        while self.nodes[&n_id].level != self.height {
            let parent_id = self.parents.pop().expect("descent path must reach n_id's parent");
            let entry_index = self.parents_entry.pop().expect("parents_entry must match parents");

            let n_mbr = self.nodes[&n_id].mbr.expect("non-empty node must have an mbr");
            {
                let parent = self.nodes.get_mut(&parent_id).unwrap();
                debug_assert_eq!(parent.ids[entry_index], n_id);
                if parent.entries[entry_index] != n_mbr {
                    parent.entries[entry_index] = n_mbr;
                    let mut rebuilt = parent.entries[0];
                    for rect in &parent.entries[1..] {
                        rebuilt.add(rect);
                    }
                    parent.mbr = Some(rebuilt);
                }
            }

            let mut new_sibling = None;
            if let Some(nn) = nn_id {
                let nn_mbr = self.nodes[&nn].mbr.expect("split sibling must have an mbr");
                let parent = self.nodes.get_mut(&parent_id).unwrap();
                if parent.entry_count() < self.max_entries {
                    parent.add_entry_no_copy(nn_mbr, nn);
                } else {
                    info!(parent_id, "parent overflowed while adjusting tree; splitting");
                    new_sibling = Some(self.split_node(parent_id, nn_mbr, nn));
                }
            }

            n_id = parent_id;
            nn_id = new_sibling;
        }

        if let Some(nn) = nn_id {
            debug_assert_eq!(n_id, self.root_id);
            info!("root split; growing tree by one level");
            let new_root_id = self.alloc_node_id();
            let mut new_root = Node::new(new_root_id, self.height + 1);
            let n_mbr = self.nodes[&n_id].mbr.unwrap();
            let nn_mbr = self.nodes[&nn].mbr.unwrap();
            new_root.add_entry_no_copy(n_mbr, n_id);
            new_root.add_entry_no_copy(nn_mbr, nn);
            self.nodes.insert(new_root_id, new_root);
            self.root_id = new_root_id;
            self.height += 1;
        }
    }

    /// Guttman quadratic split of node `n_id`, whose `M` existing entries plus
    /// the incoming `(new_rect, new_id)` overflow its capacity. Returns the
    /// id of the freshly allocated sibling.
    fn split_node(&mut self, n_id: NodeId, new_rect: Rectangle, new_id: EntryId) -> NodeId {
        let level = self.nodes[&n_id].level;
        let nn_id = self.alloc_node_id();
        info!(n_id, nn_id, level, "splitting overflowing node");

        let node = self.nodes.get_mut(&n_id).unwrap();
        let mut cand_rects = std::mem::take(&mut node.entries);
        let mut cand_ids = std::mem::take(&mut node.ids);
        cand_rects.push(new_rect);
        cand_ids.push(new_id);
        let total = cand_rects.len();

        self.entry_status.clear();
        self.entry_status.resize(total, UNASSIGNED);

        let mut group_mbr = cand_rects[0];
        for rect in &cand_rects[1..] {
            group_mbr.add(rect);
        }

        let (seed_n, seed_nn) = pick_seeds(&cand_rects, &group_mbr);
        self.entry_status[seed_n] = GROUP_N;
        self.entry_status[seed_nn] = GROUP_NN;

        let mut n_mbr = cand_rects[seed_n];
        let mut nn_mbr = cand_rects[seed_nn];
        let mut n_count = 1usize;
        let mut nn_count = 1usize;
        let mut assigned = 2usize;

        while assigned < total {
            let remaining = total - assigned;

            if remaining == self.min_entries.saturating_sub(n_count) && n_count < self.min_entries {
                for i in 0..total {
                    if self.entry_status[i] == UNASSIGNED {
                        self.entry_status[i] = GROUP_N;
                        n_mbr.add(&cand_rects[i]);
                        n_count += 1;
                        assigned += 1;
                    }
                }
                continue;
            }
            if remaining == self.min_entries.saturating_sub(nn_count) && nn_count < self.min_entries {
                for i in 0..total {
                    if self.entry_status[i] == UNASSIGNED {
                        self.entry_status[i] = GROUP_NN;
                        nn_mbr.add(&cand_rects[i]);
                        nn_count += 1;
                        assigned += 1;
                    }
                }
                continue;
            }

            // PickNext: choose the unassigned candidate maximizing the
            // absolute difference in enlargement cost between the two groups.
            let mut best_index = usize::MAX;
            let mut best_diff = -1i64;
            for i in 0..total {
                if self.entry_status[i] != UNASSIGNED {
                    continue;
                }
                let diff = (n_mbr.enlargement(&cand_rects[i]) - nn_mbr.enlargement(&cand_rects[i])).abs();
                if diff > best_diff {
                    best_diff = diff;
                    best_index = i;
                }
            }
            let i = best_index;
            let enl_n = n_mbr.enlargement(&cand_rects[i]);
            let enl_nn = nn_mbr.enlargement(&cand_rects[i]);

            let goes_to_n = if enl_n != enl_nn {
                enl_n < enl_nn
            } else if n_mbr.area() != nn_mbr.area() {
                n_mbr.area() < nn_mbr.area()
            } else if n_count != nn_count {
                n_count < nn_count
            } else {
                true // final tie-break: keep with the original node
            };

            if goes_to_n {
                self.entry_status[i] = GROUP_N;
                n_mbr.add(&cand_rects[i]);
                n_count += 1;
            } else {
                self.entry_status[i] = GROUP_NN;
                nn_mbr.add(&cand_rects[i]);
                nn_count += 1;
            }
            assigned += 1;
        }

        let mut n_entries = Vec::with_capacity(n_count);
        let mut n_ids = Vec::with_capacity(n_count);
        let mut nn_entries = Vec::with_capacity(nn_count);
        let mut nn_ids = Vec::with_capacity(nn_count);
        for i in 0..total {
            match self.entry_status[i] {
                GROUP_N => {
                    n_entries.push(cand_rects[i]);
                    n_ids.push(cand_ids[i]);
                }
                GROUP_NN => {
                    nn_entries.push(cand_rects[i]);
                    nn_ids.push(cand_ids[i]);
                }
                _ => unreachable!("PickNext must assign every candidate"),
            }
        }

        let node = self.nodes.get_mut(&n_id).unwrap();
        node.entries = n_entries;
        node.ids = n_ids;
        node.mbr = Some(n_mbr);

        let mut nn_node = Node::new(nn_id, level);
        nn_node.entries = nn_entries;
        nn_node.ids = nn_ids;
        nn_node.mbr = Some(nn_mbr);
        self.nodes.insert(nn_id, nn_node);

        nn_id
    }

    // ---- Deletion --------------------------------------------------------

    pub fn delete(&mut self, rect: &Rectangle, id: EntryId) -> bool {
        let Some(leaf_id) = self.locate(rect, id) else {
            return false;
        };
        debug!(leaf_id, id, "deleting entry from leaf");
        let index = self.nodes[&leaf_id].find_entry(rect, id);
        self.nodes.get_mut(&leaf_id).unwrap().delete_entry(index, self.min_entries);

        self.condense_tree(leaf_id);

        while !self.nodes[&self.root_id].is_leaf() && self.nodes[&self.root_id].entry_count() == 1 {
            info!("root has a single child; collapsing tree by one level");
            let only_child = self.nodes[&self.root_id].ids[0];
            self.free_node_ids.push(self.root_id);
            self.nodes.remove(&self.root_id);
            self.root_id = only_child;
            self.height -= 1;
        }

        true
    }

    /// Locates the leaf holding `(rect, id)`, descending only into children
    /// whose entry rectangle *contains* the query (a stronger test than
    /// intersection). Backtracks via `parents`/`parents_entry` when a
    /// sub-tree turns out not to hold the target.
    fn locate(&mut self, rect: &Rectangle, id: EntryId) -> Option<NodeId> {
        self.parents.clear();
        self.parents_entry.clear();
        self.parents.push(self.root_id);
        let mut resume_from = 0usize;

        loop {
            let current_id = *self.parents.last().unwrap();
            let node = &self.nodes[&current_id];

            if node.is_leaf() {
                if node.find_entry(rect, id) != crate::node::NOT_FOUND {
                    return Some(current_id);
                }
            } else {
                let mut next_child = None;
                for i in resume_from..node.entry_count() {
                    if node.entries[i].contains(rect) {
                        next_child = Some(i);
                        break;
                    }
                }
                if let Some(i) = next_child {
                    self.parents_entry.push(i);
                    let child_id = node.ids[i];
                    self.parents.push(child_id);
                    resume_from = 0;
                    continue;
                }
            }

            // Backtrack: this node (leaf or exhausted internal) holds no match.
            self.parents.pop();
            if self.parents.is_empty() {
                return None;
            }
            resume_from = self.parents_entry.pop().unwrap() + 1;
        }
    }

    /// Ascends from the deleted leaf, removing under-full nodes from their
    /// parents and refreshing MBRs, then reinserts every entry of every
    /// eliminated node at its original level.
    fn condense_tree(&mut self, leaf_id: NodeId) {
        let mut eliminated = Vec::new();
        let mut current = leaf_id;
        self.parents.pop(); // drop leaf_id itself; remaining top is its parent

        while let Some(parent_id) = self.parents.pop() {
            let entry_index = self.parents_entry.pop().unwrap();
            let current_count = self.nodes[&current].entry_count();

            if current_count < self.min_entries {
                debug!(current, parent_id, "eliminating under-full node");
                self.nodes.get_mut(&parent_id).unwrap().delete_entry(entry_index, self.min_entries);
                eliminated.push(current);
            } else {
                let current_mbr = self.nodes[&current].mbr.unwrap();
                let parent = self.nodes.get_mut(&parent_id).unwrap();
                if parent.entries[entry_index] != current_mbr {
                    let old_rect = parent.entries[entry_index];
                    parent.entries[entry_index] = current_mbr;
                    parent.recalculate_mbr(&old_rect);
                }
            }
            current = parent_id;
        }

        for elim_id in eliminated {
            let elim_node = self.nodes.remove(&elim_id).unwrap();
            info!(elim_id, count = elim_node.entry_count(), "reinserting entries of eliminated node");
            let level = elim_node.level;
            for i in 0..elim_node.entries.len() {
                self.insert_at_level(elim_node.entries[i], elim_node.ids[i], level);
            }
            self.free_node_ids.push(elim_id);
        }
    }

    // ---- Queries -----------------------------------------------------------

    pub fn intersects(&self, rect: &Rectangle) -> Vec<EntryId> {
        let mut result = Vec::new();
        self.intersects_node(self.root_id, rect, &mut result);
        result
    }

    fn intersects_node(&self, node_id: NodeId, rect: &Rectangle, result: &mut Vec<EntryId>) {
        let node = &self.nodes[&node_id];
        for i in 0..node.entry_count() {
            if node.entries[i].intersects(rect) {
                if node.is_leaf() {
                    result.push(node.ids[i]);
                } else {
                    self.intersects_node(node.ids[i], rect, result);
                }
            }
        }
    }

    /// Non-recursive; uses a local stack so it never aliases the tree's
    /// writer-only scratch stacks.
    pub fn contains(&self, rect: &Rectangle) -> Vec<EntryId> {
        let mut result = Vec::new();
        let mut stack = vec![self.root_id];
        while let Some(node_id) = stack.pop() {
            let node = &self.nodes[&node_id];
            if node.is_leaf() {
                for i in 0..node.entry_count() {
                    if rect.contains(&node.entries[i]) {
                        result.push(node.ids[i]);
                    }
                }
            } else {
                for i in 0..node.entry_count() {
                    if node.entries[i].intersects(rect) {
                        stack.push(node.ids[i]);
                    }
                }
            }
        }
        result
    }

    pub fn nearest(&self, point: &Point, furthest_distance: f64) -> Vec<EntryId> {
        let mut nearest_distance = furthest_distance;
        let mut result = Vec::new();
        self.nearest_node(self.root_id, point, &mut nearest_distance, &mut result);
        result
    }

    fn nearest_node(&self, node_id: NodeId, point: &Point, nearest_distance: &mut f64, result: &mut Vec<EntryId>) {
        let node = &self.nodes[&node_id];
        if node.is_leaf() {
            for i in 0..node.entry_count() {
                let d = node.entries[i].distance(point);
                if d < *nearest_distance {
                    *nearest_distance = d;
                    result.clear();
                }
                if d <= *nearest_distance {
                    result.push(node.ids[i]);
                }
            }
        } else {
            for i in 0..node.entry_count() {
                if node.entries[i].distance(point) <= *nearest_distance {
                    self.nearest_node(node.ids[i], point, nearest_distance, result);
                }
            }
        }
    }

    // ---- Invariant checking (used by tests) -------------------------------

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        self.check_node(self.root_id, true, None);
    }

    #[cfg(test)]
    fn check_node(&self, node_id: NodeId, is_root: bool, expected_level: Option<u32>) {
        let node = &self.nodes[&node_id];
        if !is_root {
            assert!(
                node.entry_count() >= self.min_entries && node.entry_count() <= self.max_entries,
                "node {node_id} has {} entries, expected {}..={}",
                node.entry_count(),
                self.min_entries,
                self.max_entries
            );
        }
        if let Some(level) = expected_level {
            assert_eq!(node.level, level, "sibling nodes must share a level");
        }
        if node.is_leaf() {
            return;
        }
        for i in 0..node.entry_count() {
            let child_id = node.ids[i];
            let child = &self.nodes[&child_id];
            assert_eq!(child.level + 1, node.level, "level must increase by exactly one");
            assert_eq!(
                Some(node.entries[i]),
                child.mbr,
                "non-leaf entry must equal the mbr of its child"
            );
            self.check_node(child_id, false, Some(child.level));
        }
    }
}

/// Guttman's PickSeeds: choose the pair of candidates with the greatest
/// normalized separation across either dimension.
fn pick_seeds(cand_rects: &[Rectangle], group_mbr: &Rectangle) -> (usize, usize) {
    let mut best_separation = f64::NEG_INFINITY;
    let mut best_pair: Option<(usize, usize)> = None;

    for d in 0..2 {
        let mut highest_low = cand_rects[0].min[d];
        let mut highest_low_index = 0usize;
        let mut lowest_high = cand_rects[0].max[d];
        let mut lowest_high_index = 0usize;

        for i in 1..cand_rects.len() {
            let low = cand_rects[i].min[d];
            if low > highest_low {
                highest_low = low;
                highest_low_index = i;
            } else {
                let high = cand_rects[i].max[d];
                if high < lowest_high {
                    lowest_high = high;
                    lowest_high_index = i;
                }
            }
        }

        if highest_low_index != lowest_high_index {
            let span = group_mbr.max[d] - group_mbr.min[d];
            // A zero-width group (all candidates share this dimension's
            // extent) makes the separation undefined; skip it.
            if span > 0 {
                let normalized = (highest_low - lowest_high) as f64 / span as f64;
                if normalized > best_separation {
                    best_separation = normalized;
                    best_pair = Some((lowest_high_index, highest_low_index));
                }
            }
        }
    }

    best_pair.unwrap_or_else(|| (0, cand_rects.len() - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x1: i64, y1: i64, x2: i64, y2: i64) -> Rectangle {
        Rectangle::from_corners(x1, y1, x2, y2)
    }

    #[test]
    fn single_insert_makes_root_a_one_entry_leaf() {
        let mut tree = TreeCore::new(4, 2);
        tree.insert(r(0, 0, 10, 10), 1);
        assert_eq!(tree.root_mbr(), Some(r(0, 0, 10, 10)));
        assert_eq!(tree.intersects(&r(0, 0, 10, 10)), vec![1]);
    }

    #[test]
    fn splits_maintain_invariants() {
        let mut tree = TreeCore::new(4, 2);
        for i in 0..50 {
            tree.insert(r(i, i, i + 1, i + 1), i);
        }
        tree.check_invariants();
        assert_eq!(tree.intersects(&r(-100, -100, 200, 200)).len(), 50);
    }

    #[test]
    fn delete_then_requery_finds_nothing() {
        let mut tree = TreeCore::new(4, 2);
        for i in 0..30 {
            tree.insert(r(i, i, i + 1, i + 1), i);
        }
        assert!(tree.delete(&r(5, 5, 6, 6), 5));
        tree.check_invariants();
        assert!(tree.intersects(&r(5, 5, 6, 6)).is_empty());
        assert!(!tree.delete(&r(5, 5, 6, 6), 5));
    }

    #[test]
    fn scenario_two_from_spec() {
        let mut tree = TreeCore::new(4, 2);
        let rects = [
            r(0, 0, 1, 1),
            r(2, 2, 3, 3),
            r(4, 4, 5, 5),
            r(6, 6, 7, 7),
            r(8, 8, 9, 9),
        ];
        for (i, rect) in rects.iter().enumerate() {
            tree.insert(*rect, i as i64);
        }
        let mut hit = tree.intersects(&r(3, 3, 7, 7));
        hit.sort();
        assert_eq!(hit, vec![1, 2, 3]);

        let mut contained = tree.contains(&r(1, 1, 6, 6));
        contained.sort();
        assert_eq!(contained, vec![1, 2]);
    }

    #[test]
    fn scenario_three_nearest_from_spec() {
        let mut tree = TreeCore::new(4, 2);
        let rects = [
            r(0, 0, 1, 1),
            r(2, 2, 3, 3),
            r(4, 4, 5, 5),
            r(6, 6, 7, 7),
            r(8, 8, 9, 9),
        ];
        for (i, rect) in rects.iter().enumerate() {
            tree.insert(*rect, i as i64);
        }
        assert_eq!(tree.nearest(&Point::new(10, 10), 3.0), vec![4]);
        assert!(tree.nearest(&Point::new(10, 10), 1.0).is_empty());
    }

    #[test]
    fn bounds_absent_after_deleting_last_item() {
        let mut tree = TreeCore::new(4, 2);
        tree.insert(r(0, 0, 1, 1), 1);
        assert!(tree.delete(&r(0, 0, 1, 1), 1));
        assert_eq!(tree.root_mbr(), None);
    }
}
