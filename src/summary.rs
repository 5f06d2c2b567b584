use crate::Forest;
use crate::Model;
use crate::Node;
use crate::NodeArena;
use crate::NodeId;
use crate::RandomGenerator;

/// Read-only view of the local tree of a [`Forest`] and the sequence
/// segment it belongs to.
///
/// Heights are in generations; the `scaled_` variants are in units of
/// `4 * N0` generations.
#[derive(Debug, Copy, Clone)]
pub struct LocalTree<'a> {
    nodes: &'a NodeArena,
    model: &'a Model,
    root: NodeId,
    segment_start: f64,
    segment_end: f64,
}

impl<'a> LocalTree<'a> {
    /// # Panics
    ///
    /// * If the forest has no local tree.
    pub(crate) fn new<R: RandomGenerator>(forest: &'a Forest<R>) -> Self {
        Self {
            nodes: forest.nodes(),
            model: forest.model(),
            root: forest.local_root(),
            segment_start: forest.current_base(),
            segment_end: forest.next_base(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, node: NodeId) -> &'a Node {
        self.nodes.get(node)
    }

    /// Children of `node` whose branch is part of the local tree.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + 'a {
        let nodes = self.nodes;
        nodes.get(node).children().filter(move |&c| nodes.get(c).local())
    }

    /// The sample leaves, in height order.
    pub fn samples(&self) -> impl Iterator<Item = NodeId> + 'a {
        let nodes = self.nodes;
        nodes.iter().filter(move |&n| nodes.get(n).in_sample())
    }

    pub fn tmrca(&self) -> f64 {
        self.nodes.height(self.root)
    }

    pub fn scaled_tmrca(&self) -> f64 {
        self.model.scale_time(self.tmrca())
    }

    /// Total branch length.
    pub fn length(&self) -> f64 {
        self.nodes.get(self.root).length_below()
    }

    pub fn scaled_length(&self) -> f64 {
        self.model.scale_time(self.length())
    }

    pub fn segment_start(&self) -> f64 {
        self.segment_start
    }

    pub fn segment_end(&self) -> f64 {
        self.segment_end
    }

    pub fn segment_length(&self) -> f64 {
        self.segment_end - self.segment_start
    }
}

/// Receives every local tree of a locus, from left to right.
pub trait SegmentObserver {
    fn observe(&mut self, tree: &LocalTree<'_>);
}

/// Summary statistics of one sequence segment.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SegmentSummary {
    pub start: f64,
    pub end: f64,
    pub tmrca: f64,
    pub length: f64,
}

/// Records a [`SegmentSummary`] per segment.
#[derive(Debug, Default, Clone)]
pub struct TreeSummary {
    segments: Vec<SegmentSummary>,
    scaled: bool,
}

impl TreeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record heights and lengths in units of `4 * N0` generations.
    pub fn scaled() -> Self {
        Self {
            segments: vec![],
            scaled: true,
        }
    }

    pub fn segments(&self) -> &[SegmentSummary] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sequence covered by the recorded segments.
    pub fn sequence_length(&self) -> f64 {
        self.segments.iter().map(|s| s.end - s.start).sum()
    }

    /// Mean TMRCA along the sequence, weighted by segment length.
    ///
    /// `None` if nothing was recorded.
    pub fn mean_tmrca(&self) -> Option<f64> {
        self.weighted_mean(|s| s.tmrca)
    }

    /// Mean tree length along the sequence, weighted by segment length.
    pub fn mean_length(&self) -> Option<f64> {
        self.weighted_mean(|s| s.length)
    }

    fn weighted_mean(&self, value: impl Fn(&SegmentSummary) -> f64) -> Option<f64> {
        let total = self.sequence_length();
        if self.segments.is_empty() || total <= 0.0 {
            return None;
        }
        let sum = self
            .segments
            .iter()
            .map(|s| value(s) * (s.end - s.start))
            .sum::<f64>();
        Some(sum / total)
    }

    pub fn clear(&mut self) {
        self.segments.clear()
    }
}

impl SegmentObserver for TreeSummary {
    fn observe(&mut self, tree: &LocalTree<'_>) {
        let (tmrca, length) = if self.scaled {
            (tree.scaled_tmrca(), tree.scaled_length())
        } else {
            (tree.tmrca(), tree.length())
        };
        self.segments.push(SegmentSummary {
            start: tree.segment_start(),
            end: tree.segment_end(),
            tmrca,
            length,
        });
    }
}

#[cfg(test)]
mod test_summary {
    use super::*;
    use crate::forest::test_utils::example_forest;

    #[test]
    fn test_local_tree_view() {
        let (mut forest, nodes) = example_forest();
        forest.rec_bases.push(12.0);
        let tree = forest.local_tree();
        assert_eq!(tree.root(), nodes[8]);
        assert_eq!(tree.tmrca(), 10.0);
        assert_eq!(tree.length(), 24.0);
        assert_eq!(tree.scaled_tmrca(), 10.0 / 40000.0);
        assert_eq!(tree.segment_start(), 5.0);
        assert_eq!(tree.segment_length(), 7.0);
        assert_eq!(tree.samples().count(), 4);
        assert_eq!(tree.children(nodes[8]).count(), 2);
        assert_eq!(tree.node(nodes[5]).samples_below(), 2);
    }

    #[test]
    fn test_children_skip_non_local_branches() {
        let (mut forest, nodes) = example_forest();
        forest.rec_bases.push(12.0);
        // nl_node hangs below nl_root without being part of the local tree.
        let tree = forest.local_tree();
        assert_eq!(tree.children(nodes[7]).count(), 0);
    }

    #[test]
    fn test_tree_summary() {
        let (mut forest, _) = example_forest();
        forest.rec_bases.push(15.0);
        let mut summary = TreeSummary::new();
        assert_eq!(summary.mean_tmrca(), None);
        summary.observe(&forest.local_tree());
        assert_eq!(summary.len(), 1);
        assert_eq!(
            summary.segments()[0],
            SegmentSummary {
                start: 5.0,
                end: 15.0,
                tmrca: 10.0,
                length: 24.0
            }
        );

        summary.segments.push(SegmentSummary {
            start: 15.0,
            end: 45.0,
            tmrca: 2.0,
            length: 8.0,
        });
        assert_eq!(summary.sequence_length(), 40.0);
        assert_eq!(summary.mean_tmrca(), Some((10.0 * 10.0 + 2.0 * 30.0) / 40.0));
        assert_eq!(summary.mean_length(), Some((24.0 * 10.0 + 8.0 * 30.0) / 40.0));
        summary.clear();
        assert!(summary.is_empty());
    }

    #[test]
    fn test_scaled_summary() {
        let (mut forest, _) = example_forest();
        forest.rec_bases.push(15.0);
        let mut summary = TreeSummary::scaled();
        summary.observe(&forest.local_tree());
        assert_eq!(summary.segments()[0].tmrca, 10.0 / 40000.0);
        assert_eq!(summary.segments()[0].length, 24.0 / 40000.0);
    }
}
