use std::collections::HashSet;
use std::fmt::Debug;

use nohash::BuildNoHashHasher;

use crate::NodeArena;
use crate::NodeId;
use crate::RandomGenerator;

/// Above this sample size, contemporaries are kept in hash sets.
pub(crate) const SET_STORE_THRESHOLD: usize = 750;

/// Unordered collection of the contemporaries of one population.
pub trait ContemporaryStore: Debug + Send {
    fn insert(&mut self, node: NodeId);
    /// Returns `false` if `node` was not stored.
    fn remove(&mut self, node: NodeId) -> bool;
    fn contains(&self, node: NodeId) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn nth(&self, n: usize) -> Option<NodeId>;
    fn clear(&mut self);
    fn iter(&self) -> Box<dyn Iterator<Item = NodeId> + '_>;
}

/// Contiguous storage, good for the few lineages of small samples.
#[derive(Debug, Default)]
pub struct VecStore(Vec<NodeId>);

impl ContemporaryStore for VecStore {
    fn insert(&mut self, node: NodeId) {
        debug_assert!(!self.0.contains(&node));
        self.0.push(node);
    }

    fn remove(&mut self, node: NodeId) -> bool {
        match self.0.iter().position(|&n| n == node) {
            Some(i) => {
                self.0.swap_remove(i);
                true
            }
            None => false,
        }
    }

    fn contains(&self, node: NodeId) -> bool {
        self.0.contains(&node)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn nth(&self, n: usize) -> Option<NodeId> {
        self.0.get(n).copied()
    }

    fn clear(&mut self) {
        self.0.clear()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.0.iter().copied())
    }
}

/// Hashed storage with constant-time removal for large samples.
#[derive(Debug, Default)]
pub struct SetStore(HashSet<NodeId, BuildNoHashHasher<NodeId>>);

impl ContemporaryStore for SetStore {
    fn insert(&mut self, node: NodeId) {
        let inserted = self.0.insert(node);
        debug_assert!(inserted);
    }

    fn remove(&mut self, node: NodeId) -> bool {
        self.0.remove(&node)
    }

    fn contains(&self, node: NodeId) -> bool {
        self.0.contains(&node)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn nth(&self, n: usize) -> Option<NodeId> {
        self.0.iter().nth(n).copied()
    }

    fn clear(&mut self) {
        self.0.clear()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.0.iter().copied())
    }
}

/// Nodes whose branch spans the current time, by population.
///
/// Besides the live roster, a buffer keeps the roster of an earlier
/// time, from which a later search can start instead of walking
/// up from the bottom of the tree.
#[derive(Debug)]
pub struct Contemporaries {
    live: Vec<Box<dyn ContemporaryStore>>,
    buffer: Vec<Box<dyn ContemporaryStore>>,
    buffer_time: Option<f64>,
    uses_set: bool,
}

impl Contemporaries {
    pub fn new(population_number: usize, sample_size: usize) -> Self {
        let uses_set = sample_size > SET_STORE_THRESHOLD;
        let stores = || {
            (0..population_number)
                .map(|_| Self::new_store(uses_set))
                .collect::<Vec<_>>()
        };
        Self {
            live: stores(),
            buffer: stores(),
            buffer_time: None,
            uses_set,
        }
    }

    fn new_store(uses_set: bool) -> Box<dyn ContemporaryStore> {
        if uses_set {
            Box::<SetStore>::default()
        } else {
            Box::<VecStore>::default()
        }
    }

    pub fn uses_set(&self) -> bool {
        self.uses_set
    }

    pub fn population_number(&self) -> usize {
        self.live.len()
    }

    /// # Panics
    ///
    /// * If `node` is a root: roots never span a time point.
    pub fn add(&mut self, nodes: &NodeArena, node: NodeId) {
        let n = nodes.get(node);
        assert!(!n.is_root(), "roots are never contemporaries");
        self.live[n.population()].insert(node);
    }

    /// Remove `node` if it is stored.
    pub fn remove(&mut self, nodes: &NodeArena, node: NodeId) {
        self.live[nodes.get(node).population()].remove(node);
    }

    /// Remove up to two nodes and add `add` unless it is a root.
    pub fn replace(
        &mut self,
        nodes: &NodeArena,
        add: NodeId,
        del1: Option<NodeId>,
        del2: Option<NodeId>,
    ) {
        for del in del1.into_iter().chain(del2) {
            self.remove(nodes, del);
        }
        if !nodes.get(add).is_root() {
            self.add(nodes, add);
        }
    }

    /// Replace the children of `node` by `node` itself.
    pub fn replace_children(&mut self, nodes: &NodeArena, node: NodeId) {
        let n = nodes.get(node);
        self.replace(nodes, node, n.first_child(), n.second_child());
    }

    /// Move the live roster into the buffer, remembering `time`.
    pub fn buffer(&mut self, time: f64) {
        std::mem::swap(&mut self.live, &mut self.buffer);
        for store in self.live.iter_mut() {
            store.clear();
        }
        self.buffer_time = Some(time);
    }

    pub fn clear(&mut self, clear_buffer: bool) {
        for store in self.live.iter_mut() {
            store.clear();
        }
        if clear_buffer {
            for store in self.buffer.iter_mut() {
                store.clear();
            }
            self.buffer_time = None;
        }
    }

    /// Time of the buffered roster, if there is one.
    pub fn buffer_time(&self) -> Option<f64> {
        self.buffer_time
    }

    /// A uniformly chosen contemporary of `population`.
    ///
    /// # Panics
    ///
    /// * If `population` has no contemporaries.
    pub fn sample<R: RandomGenerator + ?Sized>(&self, population: usize, rng: &mut R) -> NodeId {
        let store = &self.live[population];
        assert!(
            !store.is_empty(),
            "no contemporary to sample in population {population}"
        );
        let n = rng.sample_int(store.len());
        match store.nth(n) {
            Some(node) => node,
            None => unreachable!(),
        }
    }

    pub fn size(&self, population: usize) -> usize {
        self.live[population].len()
    }

    pub fn total_size(&self) -> usize {
        self.live.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.live.iter().all(|s| s.is_empty())
    }

    pub fn contains(&self, nodes: &NodeArena, node: NodeId) -> bool {
        self.live[nodes.get(node).population()].contains(node)
    }

    pub fn iter(&self, population: usize) -> impl Iterator<Item = NodeId> + '_ {
        self.live[population].iter()
    }

    pub fn buffer_iter(&self, population: usize) -> impl Iterator<Item = NodeId> + '_ {
        self.buffer[population].iter()
    }
}
