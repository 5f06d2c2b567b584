use crate::NodeId;

/// A point of the genealogy.
///
/// Sample leaves carry a label in `1..=n`, internal nodes have label 0.
/// A node is *local* when its branch (the one above it) is part of the
/// current local tree, which is encoded as `last_update == 0`.
/// Otherwise `last_update` is the index of the recombination after
/// which the branch stopped being local.
///
/// Nodes only reference each other by [`NodeId`]; storage belongs to
/// the [`NodeArena`](crate::NodeArena).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    height: f64,
    population: usize,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    second_child: Option<NodeId>,
    last_update: usize,
    samples_below: usize,
    length_below: f64,
    label: usize,
}

impl Node {
    pub(crate) fn new(height: f64, label: usize) -> Self {
        Self {
            height,
            population: 0,
            parent: None,
            first_child: None,
            second_child: None,
            last_update: 0,
            samples_below: usize::from(label != 0),
            length_below: 0.0,
            label,
        }
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    pub fn second_child(&self) -> Option<NodeId> {
        self.second_child
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> {
        self.first_child.into_iter().chain(self.second_child)
    }

    pub fn last_update(&self) -> usize {
        self.last_update
    }

    pub fn samples_below(&self) -> usize {
        self.samples_below
    }

    pub fn length_below(&self) -> f64 {
        self.length_below
    }

    pub fn label(&self) -> usize {
        self.label
    }

    pub fn local(&self) -> bool {
        self.last_update == 0
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn in_sample(&self) -> bool {
        self.label != 0
    }

    pub fn count_children(&self) -> usize {
        usize::from(self.first_child.is_some()) + usize::from(self.second_child.is_some())
    }

    // The height is only written through the arena, which keeps
    // the height order intact.
    pub(crate) fn set_height(&mut self, height: f64) {
        self.height = height;
    }

    pub(crate) fn set_population(&mut self, population: usize) {
        self.population = population;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn set_first_child(&mut self, child: Option<NodeId>) {
        self.first_child = child;
    }

    pub(crate) fn set_second_child(&mut self, child: Option<NodeId>) {
        self.second_child = child;
    }

    pub(crate) fn set_samples_below(&mut self, samples_below: usize) {
        self.samples_below = samples_below;
    }

    pub(crate) fn set_length_below(&mut self, length_below: f64) {
        self.length_below = length_below;
    }

    pub(crate) fn set_last_update(&mut self, last_update: usize) {
        self.last_update = last_update;
    }

    pub(crate) fn make_local(&mut self) {
        self.last_update = 0;
    }

    /// # Panics
    ///
    /// * If `rec` is 0, which would mark the node as local.
    pub(crate) fn make_nonlocal(&mut self, rec: usize) {
        assert!(rec > 0, "non-local nodes need a recombination index");
        self.last_update = rec;
    }

    /// Replace the child `from` by `to`.
    ///
    /// `from == None` fills the first free child slot.
    /// `to == None` drops `from` and moves a remaining second child
    /// into the first slot.
    ///
    /// # Panics
    ///
    /// * If `from` is not a child of this node.
    pub(crate) fn change_child(&mut self, from: Option<NodeId>, to: Option<NodeId>) {
        if self.first_child == from {
            self.first_child = to;
            if to.is_none() {
                self.first_child = self.second_child.take();
            }
        } else if self.second_child == from {
            self.second_child = to;
        } else {
            panic!("can't find child node {from:?} to replace");
        }
    }
}

#[cfg(test)]
mod test_node {
    use super::*;

    #[test]
    fn test_new_node() {
        let sample = Node::new(0.0, 3);
        assert!(sample.in_sample());
        assert!(sample.local());
        assert!(sample.is_root());
        assert_eq!(sample.samples_below(), 1);

        let internal = Node::new(2.5, 0);
        assert!(!internal.in_sample());
        assert_eq!(internal.samples_below(), 0);
        assert_eq!(internal.count_children(), 0);
    }

    #[test]
    fn test_change_child() {
        let a = NodeId::new(1, 0);
        let b = NodeId::new(2, 0);
        let c = NodeId::new(3, 0);
        let mut node = Node::new(1.0, 0);
        node.change_child(None, Some(a));
        node.change_child(None, Some(b));
        assert_eq!(node.first_child(), Some(a));
        assert_eq!(node.second_child(), Some(b));

        node.change_child(Some(b), Some(c));
        assert_eq!(node.second_child(), Some(c));

        node.change_child(Some(a), None);
        assert_eq!(node.first_child(), Some(c));
        assert_eq!(node.second_child(), None);
        assert_eq!(node.count_children(), 1);
    }

    #[test]
    #[should_panic]
    fn test_change_missing_child() {
        let mut node = Node::new(1.0, 0);
        node.change_child(Some(NodeId::new(7, 0)), None);
    }

    #[test]
    fn test_locality() {
        let mut node = Node::new(1.0, 0);
        node.make_nonlocal(4);
        assert!(!node.local());
        assert_eq!(node.last_update(), 4);
        node.make_local();
        assert!(node.local());
    }
}
