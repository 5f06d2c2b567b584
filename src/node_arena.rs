use crate::Node;
use crate::NodeId;

const SENTINEL: usize = usize::MAX;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SlotStatus {
    Free,
    Detached,
    Linked,
}

/// Owner of all nodes of a forest.
///
/// Linked nodes form a doubly-linked list sorted by height,
/// independent of where a node lives in memory.
/// Freed slots are recycled by [`NodeArena::create_node`].
#[derive(Debug, Clone)]
pub struct NodeArena {
    data: Vec<Node>,
    next: Vec<usize>,
    previous: Vec<usize>,
    generation: Vec<u32>,
    status: Vec<SlotStatus>,
    free_list: Vec<usize>,
    first: usize,
    last: usize,
    len: usize,
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeArena {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            next: Vec::with_capacity(capacity),
            previous: Vec::with_capacity(capacity),
            generation: Vec::with_capacity(capacity),
            status: Vec::with_capacity(capacity),
            free_list: vec![],
            first: SENTINEL,
            last: SENTINEL,
            len: 0,
        }
    }

    #[inline(always)]
    fn id_at(&self, index: usize) -> NodeId {
        NodeId::new(index, self.generation[index])
    }

    #[inline(always)]
    fn into_option(&self, index: usize) -> Option<NodeId> {
        if index == SENTINEL {
            None
        } else {
            Some(self.id_at(index))
        }
    }

    /// # Panics
    ///
    /// * If `node` refers to a freed or recycled slot.
    #[inline(always)]
    fn index_of(&self, node: NodeId) -> usize {
        let index = node.as_index();
        assert!(
            index < self.data.len()
                && self.generation[index] == node.generation()
                && self.status[index] != SlotStatus::Free,
            "stale node handle {node:?}"
        );
        index
    }

    fn linked_index_of(&self, node: NodeId) -> usize {
        let index = self.index_of(node);
        assert_eq!(
            self.status[index],
            SlotStatus::Linked,
            "node {node:?} is not part of the arena's order"
        );
        index
    }

    /// Create a detached node, reusing a freed slot if there is one.
    ///
    /// The node is local, has no relatives, and counts itself
    /// as a sample if `label != 0`.
    /// It becomes part of the height order with [`NodeArena::add`].
    pub fn create_node(&mut self, height: f64, label: usize) -> NodeId {
        let node = Node::new(height, label);
        let index = if let Some(index) = self.free_list.pop() {
            self.data[index] = node;
            self.next[index] = SENTINEL;
            self.previous[index] = SENTINEL;
            index
        } else {
            self.data.push(node);
            self.next.push(SENTINEL);
            self.previous.push(SENTINEL);
            self.generation.push(0);
            self.status.push(SlotStatus::Free);
            self.data.len() - 1
        };
        self.status[index] = SlotStatus::Detached;
        self.id_at(index)
    }

    pub fn get(&self, node: NodeId) -> &Node {
        &self.data[self.index_of(node)]
    }

    pub(crate) fn get_mut(&mut self, node: NodeId) -> &mut Node {
        let index = self.index_of(node);
        &mut self.data[index]
    }

    /// Insert a detached node into the height order.
    ///
    /// The search for the insertion point starts at `hint`
    /// (or at the lowest node) and the node is placed after
    /// all nodes of equal height.
    ///
    /// # Panics
    ///
    /// * If `node` is not detached.
    /// * If `hint` is not linked.
    ///
    /// # Complexity
    ///
    /// Linear in the number of nodes between `hint` and the insertion point.
    pub fn add(&mut self, node: NodeId, hint: Option<NodeId>) {
        let index = self.index_of(node);
        assert_eq!(
            self.status[index],
            SlotStatus::Detached,
            "node {node:?} is already linked"
        );
        let height = self.data[index].height();

        if self.len == 0 {
            self.first = index;
            self.last = index;
        } else {
            let start = match hint {
                Some(hint) => self.linked_index_of(hint),
                None => self.first,
            };
            let mut after = start;
            if self.data[start].height() > height {
                while after != SENTINEL && self.data[after].height() > height {
                    after = self.previous[after];
                }
            } else {
                while self.next[after] != SENTINEL && self.data[self.next[after]].height() <= height
                {
                    after = self.next[after];
                }
            }

            if after == SENTINEL {
                self.next[index] = self.first;
                self.previous[index] = SENTINEL;
                self.previous[self.first] = index;
                self.first = index;
            } else {
                let next = self.next[after];
                self.next[index] = next;
                self.previous[index] = after;
                self.next[after] = index;
                if next == SENTINEL {
                    self.last = index;
                } else {
                    self.previous[next] = index;
                }
            }
        }
        self.status[index] = SlotStatus::Linked;
        self.len += 1;
    }

    /// Take a node out of the height order without freeing it.
    ///
    /// # Panics
    ///
    /// * If `node` is not linked.
    pub fn unlink(&mut self, node: NodeId) {
        let index = self.linked_index_of(node);
        let previous = self.previous[index];
        let next = self.next[index];
        if previous == SENTINEL {
            self.first = next;
        } else {
            self.next[previous] = next;
        }
        if next == SENTINEL {
            self.last = previous;
        } else {
            self.previous[next] = previous;
        }
        self.next[index] = SENTINEL;
        self.previous[index] = SENTINEL;
        self.status[index] = SlotStatus::Detached;
        self.len -= 1;
    }

    /// Unlink a node and return its slot to the free list.
    ///
    /// Every handle to the node is invalid afterwards.
    ///
    /// # Panics
    ///
    /// * If `node` is not linked.
    pub fn remove(&mut self, node: NodeId) {
        self.unlink(node);
        let index = node.as_index();
        self.status[index] = SlotStatus::Free;
        self.generation[index] = self.generation[index].wrapping_add(1);
        self.free_list.push(index);
    }

    /// Change the height of a linked node, keeping the order sorted.
    ///
    /// # Panics
    ///
    /// * If `node` is not linked.
    pub fn move_node(&mut self, node: NodeId, new_height: f64) {
        let index = self.linked_index_of(node);
        let hint = if self.previous[index] != SENTINEL {
            self.previous[index]
        } else {
            self.next[index]
        };
        let hint = self.into_option(hint);
        self.unlink(node);
        self.data[index].set_height(new_height);
        self.add(node, hint);
    }

    /// Drop all nodes but keep the allocated storage.
    pub fn clear(&mut self) {
        for (generation, status) in self.generation.iter_mut().zip(self.status.iter_mut()) {
            if *status != SlotStatus::Free {
                *generation = generation.wrapping_add(1);
                *status = SlotStatus::Free;
            }
        }
        self.free_list.clear();
        self.free_list.extend((0..self.data.len()).rev());
        self.first = SENTINEL;
        self.last = SENTINEL;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` if `node` is live and part of the height order.
    pub fn is_linked(&self, node: NodeId) -> bool {
        let index = node.as_index();
        index < self.data.len()
            && self.generation[index] == node.generation()
            && self.status[index] == SlotStatus::Linked
    }

    pub fn first(&self) -> Option<NodeId> {
        self.into_option(self.first)
    }

    pub fn last(&self) -> Option<NodeId> {
        self.into_option(self.last)
    }

    pub fn next(&self, node: NodeId) -> Option<NodeId> {
        self.into_option(self.next[self.linked_index_of(node)])
    }

    pub fn previous(&self, node: NodeId) -> Option<NodeId> {
        self.into_option(self.previous[self.linked_index_of(node)])
    }

    /// The `i`-th lowest node.
    ///
    /// # Panics
    ///
    /// * If `i >= self.len()`
    ///
    /// # Complexity
    ///
    /// Linear in `i`.
    pub fn at(&self, i: usize) -> NodeId {
        match self.iter().nth(i) {
            Some(node) => node,
            None => panic!("index {i} out of range for {} nodes", self.len),
        }
    }

    /// Nodes in ascending height order.
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter {
            arena: self,
            current: self.first,
            forward: true,
        }
    }

    /// Nodes in ascending height order, starting with `node`.
    pub fn iter_from(&self, node: NodeId) -> NodeIter<'_> {
        NodeIter {
            arena: self,
            current: self.linked_index_of(node),
            forward: true,
        }
    }

    /// Nodes in descending height order.
    pub fn iter_rev(&self) -> NodeIter<'_> {
        NodeIter {
            arena: self,
            current: self.last,
            forward: false,
        }
    }

    pub fn is_sorted(&self) -> bool {
        let mut count = 0;
        let mut previous_height = f64::NEG_INFINITY;
        let mut previous = SENTINEL;
        let mut current = self.first;
        while current != SENTINEL {
            if self.data[current].height() < previous_height || self.previous[current] != previous {
                return false;
            }
            previous_height = self.data[current].height();
            previous = current;
            current = self.next[current];
            count += 1;
        }
        previous == self.last && count == self.len
    }

    pub fn height(&self, node: NodeId) -> f64 {
        self.get(node).height()
    }

    /// Height of the parent, or infinity for a root.
    pub fn parent_height(&self, node: NodeId) -> f64 {
        match self.get(node).parent() {
            Some(parent) => self.get(parent).height(),
            None => f64::INFINITY,
        }
    }

    /// Length of the branch above `node`.
    pub fn height_above(&self, node: NodeId) -> f64 {
        self.parent_height(node) - self.height(node)
    }

    /// A node marks a migration if its single child lives in another population.
    pub fn is_migrating(&self, node: NodeId) -> bool {
        let n = self.get(node);
        match (n.first_child(), n.count_children()) {
            (Some(child), 1) => self.get(child).population() != n.population(),
            _ => false,
        }
    }

    /// A node that only marks a point on a branch and can be reused or dropped.
    pub fn is_unimportant(&self, node: NodeId) -> bool {
        let n = self.get(node);
        !n.in_sample() && n.count_children() == 1 && !self.is_migrating(node)
    }

    pub(crate) fn min_nonlocal_last_update(&self) -> Option<usize> {
        self.iter()
            .map(|node| self.get(node).last_update())
            .filter(|&last_update| last_update > 0)
            .min()
    }

    /// Subtract `by` from the `last_update` of every non-local node.
    ///
    /// # Panics
    ///
    /// * If a non-local node would become local.
    pub(crate) fn shift_last_updates(&mut self, by: usize) {
        let mut current = self.first;
        while current != SENTINEL {
            let node = &mut self.data[current];
            if !node.local() {
                assert!(node.last_update() > by);
                node.set_last_update(node.last_update() - by);
            }
            current = self.next[current];
        }
    }
}

pub struct NodeIter<'a> {
    arena: &'a NodeArena,
    current: usize,
    forward: bool,
}

impl Iterator for NodeIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == SENTINEL {
            return None;
        }
        let rv = self.arena.id_at(self.current);
        self.current = if self.forward {
            self.arena.next[self.current]
        } else {
            self.arena.previous[self.current]
        };
        Some(rv)
    }
}
