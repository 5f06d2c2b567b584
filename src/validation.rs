use crate::Forest;
use crate::NodeId;
use crate::RandomGenerator;

// Sums of branch lengths are accumulated in different orders.
fn close_enough(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

impl<R: RandomGenerator> Forest<R> {
    /// Assert the structural invariants of the whole genealogy.
    ///
    /// # Panics
    ///
    /// * On the first violated invariant.
    ///
    /// # Complexity
    ///
    /// Linear in the number of nodes times the tree depth.
    pub fn check_tree(&self) {
        assert!(self.nodes.is_sorted(), "nodes are not sorted by height");
        for node in self.nodes.iter() {
            self.check_node_invariants(node);
        }

        let local_root = self.local_root();
        let lr = self.nodes.get(local_root);
        assert_eq!(
            lr.samples_below(),
            self.sample_size,
            "local root {local_root:?} is not above all samples"
        );
        if self.sample_size > 1 {
            let with_samples = lr
                .children()
                .filter(|&c| self.nodes.get(c).samples_below() > 0)
                .count();
            assert_eq!(with_samples, 2, "local root {local_root:?} is not a split");
        }

        let primary_root = match self.primary_root {
            Some(root) => root,
            None => panic!("the forest has no primary root"),
        };
        assert!(
            self.nodes.get(primary_root).is_root(),
            "primary root {primary_root:?} has a parent"
        );
        assert_eq!(self.root_of(local_root), primary_root);

        self.check_tree_length();
        self.check_leafs_on_local_tree();
    }

    fn root_of(&self, node: NodeId) -> NodeId {
        let mut node = node;
        while let Some(parent) = self.nodes.get(node).parent() {
            node = parent;
        }
        node
    }

    fn check_node_invariants(&self, node: NodeId) {
        let n = self.nodes.get(node);
        if let Some(parent) = n.parent() {
            assert!(self.nodes.is_linked(parent), "parent of {node:?} is not in the forest");
            let p = self.nodes.get(parent);
            assert!(
                p.children().any(|c| c == node),
                "{node:?} is not a child of its parent {parent:?}"
            );
            assert!(p.height() >= n.height(), "{node:?} is above its parent");
        }
        if n.first_child().is_none() {
            assert!(n.second_child().is_none(), "{node:?} has a second child only");
        }

        let mut samples_below = usize::from(n.in_sample());
        let mut length_below = 0.0;
        for (i, child) in n.children().enumerate() {
            assert!(self.nodes.is_linked(child), "child of {node:?} is not in the forest");
            let c = self.nodes.get(child);
            assert_eq!(c.parent(), Some(node), "{child:?} has another parent");
            if i == 0 {
                samples_below = c.samples_below();
            } else {
                samples_below += c.samples_below();
            }
            length_below += c.length_below();
            if c.local() {
                length_below += n.height() - c.height();
            }
        }
        assert_eq!(
            n.samples_below(),
            samples_below,
            "wrong number of samples below {node:?}"
        );
        assert!(
            close_enough(n.length_below(), length_below),
            "length below {node:?} is {} instead of {length_below}",
            n.length_below()
        );
        if !n.local() {
            assert!(
                n.last_update() <= self.current_rec,
                "{node:?} was updated at a future recombination"
            );
        }
    }

    /// The branches flagged local add up to the length of the local tree.
    pub(crate) fn check_tree_length(&self) {
        let length = self
            .nodes
            .iter()
            .filter(|&node| {
                let n = self.nodes.get(node);
                n.local() && !n.is_root()
            })
            .map(|node| self.nodes.height_above(node))
            .sum::<f64>();
        assert!(
            close_enough(length, self.get_local_tree_length()),
            "local branches add up to {length}, but the local tree is {} long",
            self.get_local_tree_length()
        );
    }

    /// Every sample reaches the primary root through the local root.
    pub(crate) fn check_leafs_on_local_tree(&self) {
        let local_root = self.local_root();
        for leaf in self.nodes.iter().filter(|&n| self.nodes.get(n).in_sample()) {
            let mut node = leaf;
            let mut passed_local_root = node == local_root;
            while let Some(parent) = self.nodes.get(node).parent() {
                node = parent;
                passed_local_root |= node == local_root;
            }
            assert!(
                passed_local_root && Some(node) == self.primary_root,
                "sample {leaf:?} is not on the local tree"
            );
        }
    }

    /// Assert that the contemporaries are exactly the non-root nodes
    /// whose branch spans `time`.
    ///
    /// # Panics
    ///
    /// * If a stored node does not span `time` or lives in another population.
    /// * If a spanning node is missing.
    pub(crate) fn check_contemporaries(&self, time: f64) {
        for population in 0..self.contemporaries.population_number() {
            for node in self.contemporaries.iter(population) {
                assert!(self.nodes.is_linked(node), "contemporary {node:?} was removed");
                let n = self.nodes.get(node);
                assert_eq!(
                    n.population(),
                    population,
                    "contemporary {node:?} is in the wrong population"
                );
                assert!(
                    n.height() <= time && time < self.nodes.parent_height(node),
                    "{node:?} is not a contemporary at {time}"
                );
            }
        }
        let spanning = self
            .nodes
            .iter()
            .take_while(|&node| self.nodes.height(node) <= time)
            .filter(|&node| !self.nodes.get(node).is_root() && self.nodes.parent_height(node) > time);
        let mut count = 0;
        for node in spanning {
            assert!(
                self.contemporaries.contains(&self.nodes, node),
                "{node:?} is missing from the contemporaries at {time}"
            );
            count += 1;
        }
        assert_eq!(count, self.contemporaries.total_size());
    }
}

#[cfg(test)]
mod test_validation {
    use crate::forest::test_utils::example_forest;
    use crate::ChaChaGenerator;
    use crate::Forest;
    use crate::ForestOptions;
    use crate::ModelBuilder;
    use crate::TimeIntervalIterator;

    #[test]
    fn test_example_forest_is_valid() {
        let (forest, _) = example_forest();
        forest.check_tree();
        forest.check_tree_length();
        forest.check_leafs_on_local_tree();
    }

    #[test]
    #[should_panic]
    fn test_wrong_length_below() {
        let (mut forest, nodes) = example_forest();
        forest.nodes.get_mut(nodes[5]).set_length_below(1.0);
        forest.check_tree();
    }

    #[test]
    #[should_panic]
    fn test_wrong_samples_below() {
        let (mut forest, nodes) = example_forest();
        forest.nodes.get_mut(nodes[4]).set_samples_below(1);
        forest.check_tree();
    }

    #[test]
    #[should_panic]
    fn test_broken_parent_link() {
        let (mut forest, nodes) = example_forest();
        forest.nodes.get_mut(nodes[0]).set_parent(Some(nodes[5]));
        forest.check_tree();
    }

    #[test]
    #[should_panic]
    fn test_local_branch_outside_local_tree() {
        let (mut forest, nodes) = example_forest();
        forest.nodes.get_mut(nodes[6]).make_local();
        forest.check_tree_length();
    }

    #[test]
    fn test_contemporaries_along_the_tree() {
        let (mut forest, nodes) = example_forest();
        let mut tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        loop {
            let start = tii.current().start_height();
            forest.check_contemporaries(start);
            if tii.next(&mut forest).is_err() {
                break;
            }
        }
    }

    #[test]
    #[should_panic]
    fn test_stale_contemporary() {
        let (mut forest, nodes) = example_forest();
        let _tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        // node34 only starts at time 3.
        forest.contemporaries.add(&forest.nodes, nodes[5]);
        forest.check_contemporaries(0.0);
    }

    #[test]
    fn test_simulated_trees_are_valid() {
        let model = ModelBuilder::new(8).recombination(1e-8, 1e5).build().unwrap();
        let mut forest = Forest::with_options(
            model,
            ChaChaGenerator::seed_from_u64(3),
            ForestOptions::all_checks(),
        );
        forest.build_initial_tree().unwrap();
        while forest.next_base() < forest.model().loci_length() {
            forest.sample_next_genealogy().unwrap();
            forest.check_tree();
        }
    }
}
