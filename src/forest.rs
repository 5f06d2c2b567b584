use crate::ChaChaGenerator;
use crate::Contemporaries;
use crate::Event;
use crate::ForestError;
use crate::ForestOptions;
use crate::IntervalHost;
use crate::LocalTree;
use crate::Model;
use crate::NodeArena;
use crate::NodeId;
use crate::NodeState;
use crate::RandomGenerator;
use crate::TimeIntervalIterator;
use crate::TreePoint;

// Entries of the recombination history that trigger a flush.
const FLUSH_INTERVAL: usize = 1024;

pub(crate) fn are_same(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// The genealogy of all samples at the current sequence position.
///
/// Besides the local tree, the forest keeps branches that are no longer
/// part of it but may still be reached by a later recombination.
/// A forest is advanced along the sequence with
/// [`Forest::sample_next_genealogy`] after [`Forest::build_initial_tree`].
#[derive(Debug)]
pub struct Forest<R: RandomGenerator = ChaChaGenerator> {
    pub(crate) nodes: NodeArena,
    pub(crate) contemporaries: Contemporaries,
    pub(crate) model: Model,
    pub(crate) rng: R,
    pub(crate) options: ForestOptions,
    pub(crate) local_root: Option<NodeId>,
    pub(crate) primary_root: Option<NodeId>,
    pub(crate) sample_size: usize,
    // Index into rec_bases; rec_bases[0] is a sentinel.
    pub(crate) current_rec: usize,
    pub(crate) rec_bases: Vec<f64>,
    pub(crate) flush_at: usize,
    // State of the coalescence loop.
    pub(crate) active_nodes: [Option<NodeId>; 2],
    pub(crate) states: [NodeState; 2],
    pub(crate) rates: [f64; 3],
    pub(crate) active_node_timelines: [usize; 2],
    pub(crate) tmp_event: Event,
    // Height of the last event, used to buffer contemporaries
    // for the next genealogy.
    pub(crate) tmp_event_time: Option<f64>,
    pub(crate) coalescence_finished: bool,
}

impl<R: RandomGenerator> Forest<R> {
    pub fn new(model: Model, rng: R) -> Self {
        Self::with_options(model, rng, ForestOptions::default())
    }

    pub fn with_options(model: Model, rng: R, options: ForestOptions) -> Self {
        let contemporaries = Contemporaries::new(model.population_number(), model.sample_size());
        Self {
            nodes: NodeArena::with_capacity(4 * model.sample_size()),
            contemporaries,
            model,
            rng,
            options,
            local_root: None,
            primary_root: None,
            sample_size: 0,
            current_rec: 0,
            rec_bases: vec![-1.0],
            flush_at: FLUSH_INTERVAL,
            active_nodes: [None; 2],
            states: [NodeState::Off; 2],
            rates: [0.0; 3],
            active_node_timelines: [0; 2],
            tmp_event: Event::none(),
            tmp_event_time: None,
            coalescence_finished: true,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    #[cfg(test)]
    pub(crate) fn nodes_mut(&mut self) -> &mut NodeArena {
        &mut self.nodes
    }

    pub fn contemporaries(&self) -> &Contemporaries {
        &self.contemporaries
    }

    pub fn options(&self) -> ForestOptions {
        self.options
    }

    /// Replace the source of randomness, e.g. for the next replicate.
    pub fn set_random_generator(&mut self, rng: R) {
        self.rng = rng;
    }

    pub fn random_generator(&self) -> &R {
        &self.rng
    }

    /// Number of samples attached to the genealogy so far.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Root of the local tree.
    ///
    /// # Panics
    ///
    /// * If no tree was built yet.
    pub fn local_root(&self) -> NodeId {
        match self.local_root {
            Some(root) => root,
            None => panic!("the forest has no local tree"),
        }
    }

    /// Root of the tree that contains the local tree.
    pub fn primary_root(&self) -> Option<NodeId> {
        self.primary_root
    }

    pub fn local_tree(&self) -> LocalTree<'_> {
        LocalTree::new(self)
    }

    /// Height of the local root.
    pub fn get_tmrca(&self) -> f64 {
        self.nodes.height(self.local_root())
    }

    /// Sum of the branch lengths of the local tree.
    pub fn get_local_tree_length(&self) -> f64 {
        self.nodes.get(self.local_root()).length_below()
    }

    /// Sequence position at which the current genealogy starts.
    pub fn current_base(&self) -> f64 {
        self.rec_bases[self.current_rec]
    }

    /// Sequence position at which the current genealogy ends.
    ///
    /// # Panics
    ///
    /// * If the end was not sampled yet.
    pub fn next_base(&self) -> f64 {
        self.rec_bases[self.current_rec + 1]
    }

    /// Number of genealogies produced since the initial tree,
    /// counting the initial tree.
    pub fn segment_count(&self) -> usize {
        self.current_rec
    }

    /// Length of the sequence segment of the current genealogy.
    pub fn segment_length(&self) -> f64 {
        self.next_base() - self.current_base()
    }

    /// `true` unless a coalescence loop was interrupted by an error.
    pub fn coalescence_finished(&self) -> bool {
        self.coalescence_finished
    }

    /// Remove all nodes and reset the model cursors, so that the forest
    /// can be reused for another replicate.
    pub fn clear(&mut self) {
        self.local_root = None;
        self.primary_root = None;
        self.nodes.clear();
        self.contemporaries.clear(true);
        self.rec_bases.clear();
        self.rec_bases.push(-1.0);
        self.current_rec = 0;
        self.flush_at = FLUSH_INTERVAL;
        self.sample_size = 0;
        self.active_nodes = [None; 2];
        self.tmp_event = Event::none();
        self.tmp_event_time = None;
        self.coalescence_finished = true;
        self.model.reset_time();
        self.model.reset_sequence_position();
    }

    /// Build the genealogy at the first sequence position by coalescing
    /// the samples one after another, and sample where it ends.
    ///
    /// # Panics
    ///
    /// * If the forest is not empty.
    pub fn build_initial_tree(&mut self) -> Result<(), ForestError> {
        assert!(self.nodes.is_empty(), "the initial tree needs an empty forest");
        assert_eq!(self.segment_count(), 0);
        self.rec_bases.push(0.0);
        self.current_rec += 1;
        self.model.reset_time();
        self.model.reset_sequence_position();

        let first = self
            .nodes
            .create_node(self.model.sample_time(0), 1);
        self.nodes
            .get_mut(first)
            .set_population(self.model.sample_population(0));
        self.nodes.add(first, None);
        self.local_root = Some(first);
        self.primary_root = Some(first);
        self.sample_size = 1;

        let mut last_added = Some(first).filter(|&n| self.nodes.height(n) == 0.0);
        for i in 1..self.model.sample_size() {
            self.sample_size = i + 1;
            let leaf = self.nodes.create_node(self.model.sample_time(i), i + 1);
            self.nodes
                .get_mut(leaf)
                .set_population(self.model.sample_population(i));
            self.nodes.add(leaf, last_added);
            if self.nodes.height(leaf) == 0.0 {
                last_added = Some(leaf);
            }
            self.sample_coalescences(leaf)?;
            self.run_tree_checks();
        }
        // The buffer is not usable below the tmrca.
        self.tmp_event_time = Some(self.get_tmrca());
        self.sample_next_base();
        tracing::debug!(
            tmrca = self.get_tmrca(),
            length = self.get_local_tree_length(),
            next_base = self.next_base(),
            "initial tree built"
        );
        self.run_tree_checks();
        Ok(())
    }

    /// Move to the next genealogy along the sequence.
    ///
    /// Returns the height of the recombination that produced it, or
    /// `None` if only the recombination rate changed at the new position.
    ///
    /// # Panics
    ///
    /// * If no initial tree was built.
    pub fn sample_next_genealogy(&mut self) -> Result<Option<f64>, ForestError> {
        assert!(self.segment_count() > 0, "the initial tree was not built");
        if self.rec_bases.len() > self.flush_at {
            self.flush_old_recombinations();
            self.flush_at = self.rec_bases.len() + FLUSH_INTERVAL;
        }
        self.current_rec += 1;

        if self.current_base() == self.model.current_sequence_position() {
            tracing::debug!(position = self.current_base(), "recombination rate changes");
            self.sample_next_base();
            return Ok(None);
        }
        assert!(self.current_base() < self.model.next_sequence_position());

        match self.tmp_event_time {
            Some(time) => self.contemporaries.buffer(time),
            None => self.contemporaries.clear(true),
        }

        let rec_point = self.sample_point();
        tracing::debug!(
            position = self.current_base(),
            height = rec_point.height(),
            "recombination"
        );
        let new_root = self.cut(rec_point);
        self.sample_coalescences(new_root)?;
        self.sample_next_base();
        self.run_tree_checks();
        Ok(Some(rec_point.height()))
    }

    /// Sample the sequence position where the current genealogy ends.
    pub(crate) fn sample_next_base(&mut self) {
        let next_change = self.model.next_sequence_position();
        let rate = self.get_local_tree_length() * self.model.recombination_rate();
        let limit = next_change - self.current_base();
        match self.rng.sample_expo_limit(rate, limit) {
            Some(distance) => self.rec_bases.push(self.current_base() + distance),
            None => {
                self.rec_bases.push(next_change);
                if next_change < self.model.loci_length() {
                    self.model.increase_sequence_position();
                }
            }
        }
    }

    /// A point uniformly distributed on the branches of the local tree.
    ///
    /// # Complexity
    ///
    /// Linear in the depth of the local tree.
    pub(crate) fn sample_point(&mut self) -> TreePoint {
        let local_root = self.local_root();
        let mut length_left = self.rng.sample() * self.get_local_tree_length();
        let mut node = local_root;
        loop {
            if node != local_root {
                let height_above = self.nodes.height_above(node);
                if length_left < height_above {
                    return TreePoint::from_relative(&self.nodes, node, length_left);
                }
                length_left = (length_left - height_above).max(0.0);
            }

            let n = self.nodes.get(node);
            let first = match n.first_child() {
                Some(first) => first,
                None => {
                    // Rounding left us at the top of a leaf branch.
                    let height_above = self.nodes.height_above(node);
                    return TreePoint::from_relative(&self.nodes, node, height_above);
                }
            };
            let second = n.second_child().filter(|&c| self.nodes.get(c).local());
            node = if !self.nodes.get(first).local() {
                match second {
                    Some(second) => second,
                    None => panic!("node {node:?} of the local tree has no local child"),
                }
            } else {
                match second {
                    None => first,
                    Some(second) => {
                        let left = self.nodes.height_above(first) + self.nodes.get(first).length_below();
                        if length_left <= left {
                            first
                        } else {
                            length_left -= left;
                            second
                        }
                    }
                }
            };
        }
    }

    /// Detach the subtree below `cut_point` and return the root that
    /// now sits on top of it at the cut height.
    ///
    /// The old branch keeps a non-local stub ending at the cut height.
    ///
    /// # Panics
    ///
    /// * If the base node of `cut_point` is a root.
    pub(crate) fn cut(&mut self, cut_point: TreePoint) -> NodeId {
        let base = cut_point.base_node();
        let height = cut_point.height();
        let parent = match self.nodes.get(base).parent() {
            Some(parent) => parent,
            None => panic!("can't cut above the root {base:?}"),
        };
        let (base_population, base_last_update, base_local) = {
            let n = self.nodes.get(base);
            (n.population(), n.last_update(), n.local())
        };

        let new_leaf = self.nodes.create_node(height, 0);
        {
            let leaf = self.nodes.get_mut(new_leaf);
            leaf.make_nonlocal(if base_local {
                self.current_rec
            } else {
                base_last_update
            });
            leaf.set_population(base_population);
            leaf.set_length_below(0.0);
            leaf.set_samples_below(0);
            leaf.set_parent(Some(parent));
        }
        self.nodes
            .get_mut(parent)
            .change_child(Some(base), Some(new_leaf));
        self.nodes.add(new_leaf, Some(base));
        self.update_above(parent, false, true, false);

        self.update_above(base, false, false, false);
        self.nodes.get_mut(base).make_local();

        let new_root = self.nodes.create_node(height, 0);
        let (base_samples, base_length, base_height) = {
            let n = self.nodes.get(base);
            (n.samples_below(), n.length_below(), n.height())
        };
        {
            let root = self.nodes.get_mut(new_root);
            root.set_population(base_population);
            root.set_first_child(Some(base));
            root.set_length_below(base_length + height - base_height);
            root.set_samples_below(base_samples);
        }
        self.nodes.get_mut(base).set_parent(Some(new_root));
        self.nodes.add(new_root, Some(new_leaf));
        tracing::trace!(?base, height, "cut subtree");
        new_root
    }

    /// Update `samples_below` and `length_below` of `node`, and its
    /// ancestors if `recursive` is set.
    ///
    /// Unless `invariants_only` is set, branches without samples or
    /// above all samples become non-local and the local and primary
    /// roots are updated. Local nodes are never made local here.
    pub(crate) fn update_above(
        &mut self,
        node: NodeId,
        above_local_root: bool,
        recursive: bool,
        invariants_only: bool,
    ) {
        let mut node = node;
        let mut above_local_root = above_local_root;
        loop {
            let n = self.nodes.get(node);
            let children = [n.first_child(), n.second_child()];
            let mut samples_below = usize::from(n.in_sample());
            let mut length_below = 0.0;
            for (i, child) in children.into_iter().enumerate() {
                if let Some(child) = child {
                    let c = self.nodes.get(child);
                    if i == 0 {
                        samples_below = c.samples_below();
                    } else {
                        samples_below += c.samples_below();
                    }
                    length_below += c.length_below();
                    if c.local() {
                        length_below += self.nodes.height_above(child);
                    }
                }
            }
            assert!(samples_below <= self.sample_size);

            // A branch that stops being local changes the length below its parent.
            let mut made_nonlocal = false;
            if above_local_root {
                made_nonlocal = n.local();
                if n.is_root() {
                    self.primary_root = Some(node);
                }
            } else if !invariants_only {
                if samples_below == 0 {
                    made_nonlocal = n.local();
                } else if samples_below == self.sample_size {
                    made_nonlocal = n.local();
                    if let [Some(first), Some(second)] = children {
                        if self.nodes.get(first).samples_below() > 0
                            && self.nodes.get(second).samples_below() > 0
                        {
                            self.local_root = Some(node);
                        }
                    }
                    if n.is_root() {
                        self.primary_root = Some(node);
                    }
                    above_local_root = true;
                }
            }

            let current_rec = self.current_rec;
            let n = self.nodes.get_mut(node);
            if made_nonlocal {
                n.make_nonlocal(current_rec);
            }
            if !made_nonlocal
                && samples_below == n.samples_below()
                && are_same(length_below, n.length_below())
            {
                return;
            }
            n.set_samples_below(samples_below);
            n.set_length_below(length_below);

            match n.parent() {
                Some(parent) if recursive => node = parent,
                _ => return,
            }
        }
    }

    pub(crate) fn run_tree_checks(&self) {
        if self.options.tree_checks() {
            self.check_tree();
        }
    }

    /// Remove every node that is no longer needed by walking the whole
    /// genealogy once.
    ///
    /// Without an approximation window nothing is removed.
    pub fn prune(&mut self) {
        if !self.model.has_approximation() {
            return;
        }
        let before = self.nodes.len();
        if let Some(first) = self.nodes.first() {
            let mut tii = TimeIntervalIterator::new(self, first);
            while tii.next(self).is_ok() {}
        }
        tracing::debug!(removed = before - self.nodes.len(), "pruned forest");
        self.contemporaries.clear(true);
        self.tmp_event_time = None;
        self.run_tree_checks();
    }
}

/// A copy of the genealogy that continues independently.
///
/// The random generator is cloned with its state, so both forests
/// produce the same genealogies unless one of them gets a new one.
impl<R: RandomGenerator + Clone> Clone for Forest<R> {
    fn clone(&self) -> Self {
        let mut forest = Self::with_options(self.model.clone(), self.rng.clone(), self.options);
        forest.nodes = self.nodes.clone();
        forest.local_root = self.local_root;
        forest.primary_root = self.primary_root;
        forest.sample_size = self.sample_size;
        forest.current_rec = self.current_rec;
        forest.rec_bases = self.rec_bases.clone();
        forest.flush_at = self.flush_at;
        // Contemporaries are not copied, so their buffer must not be used.
        forest.tmp_event_time = self.local_root.map(|_| self.get_tmrca());
        forest
    }
}

impl<R: RandomGenerator> IntervalHost for Forest<R> {
    fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    fn contemporaries(&self) -> &Contemporaries {
        &self.contemporaries
    }

    fn nodes_and_contemporaries(&mut self) -> (&NodeArena, &mut Contemporaries) {
        (&self.nodes, &mut self.contemporaries)
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    fn prune_node_if_needed(&mut self, node: NodeId) -> bool {
        self.prune_node(node)
    }
}
