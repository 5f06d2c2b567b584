use crate::Contemporaries;
use crate::IntervalsExhausted;
use crate::Model;
use crate::NodeArena;
use crate::NodeId;

/// A half-open time window `[start_height, end_height)`.
///
/// Within an interval neither the set of contemporaries nor the
/// demographic model changes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeInterval {
    start_height: f64,
    end_height: f64,
}

impl TimeInterval {
    pub fn new(start_height: f64, end_height: f64) -> Self {
        assert!(start_height <= end_height);
        Self {
            start_height,
            end_height,
        }
    }

    pub fn start_height(&self) -> f64 {
        self.start_height
    }

    pub fn end_height(&self) -> f64 {
        self.end_height
    }

    pub fn length(&self) -> f64 {
        self.end_height - self.start_height
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_height == f64::INFINITY
    }
}

/// What a [`TimeIntervalIterator`] needs from the genealogy it walks.
pub trait IntervalHost {
    fn nodes(&self) -> &NodeArena;
    fn contemporaries(&self) -> &Contemporaries;
    fn nodes_and_contemporaries(&mut self) -> (&NodeArena, &mut Contemporaries);
    fn model(&self) -> &Model;
    /// Only the epoch cursor of the model is changed through this.
    fn model_mut(&mut self) -> &mut Model;
    /// Remove `node` (or the branch above it) if it is no longer needed.
    /// Returns `true` if something was pruned.
    fn prune_node_if_needed(&mut self, node: NodeId) -> bool;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum IteratorState {
    BeforeFirst,
    Yielding,
    Exhausted,
}

/// Walks the time above a start node in intervals bounded by node
/// heights and epoch boundaries, keeping the contemporaries of the
/// host up to date.
///
/// The iterator holds no borrow of its host, so the host can be
/// changed between two steps. After such a change,
/// [`TimeIntervalIterator::split_current_interval`] or
/// [`TimeIntervalIterator::recalculate_interval`] keep the iteration
/// consistent.
#[derive(Debug)]
pub struct TimeIntervalIterator {
    state: IteratorState,
    current: TimeInterval,
    // First node that has not been crossed yet.
    cursor: Option<NodeId>,
    inside_node: Option<NodeId>,
}

impl TimeIntervalIterator {
    /// Start iterating at the height of `start_node`.
    ///
    /// The contemporaries of the host are rebuilt for that height and
    /// the first interval is available right away.
    pub fn new<H: IntervalHost + ?Sized>(host: &mut H, start_node: NodeId) -> Self {
        let start_height = host.nodes().height(start_node);
        host.model_mut().reset_time();
        while host.model().next_time() <= start_height {
            host.model_mut().increase_time();
        }

        let mut tii = Self {
            state: IteratorState::BeforeFirst,
            current: TimeInterval::new(start_height, start_height),
            cursor: Some(start_node),
            inside_node: None,
        };
        tii.search_contemporaries(host, start_node);
        tii.advance(host);
        tii
    }

    pub fn good(&self) -> bool {
        self.state == IteratorState::Yielding
    }

    /// # Panics
    ///
    /// * If the iterator is exhausted.
    pub fn current(&self) -> TimeInterval {
        assert!(self.good(), "exhausted iterators have no interval");
        self.current
    }

    /// Move to the next interval.
    pub fn next<H: IntervalHost + ?Sized>(&mut self, host: &mut H) -> Result<(), IntervalsExhausted> {
        if self.advance(host) {
            Ok(())
        } else {
            Err(IntervalsExhausted)
        }
    }

    fn advance<H: IntervalHost + ?Sized>(&mut self, host: &mut H) -> bool {
        let start = match self.state {
            IteratorState::Exhausted => return false,
            IteratorState::BeforeFirst => self.current.start_height(),
            IteratorState::Yielding => {
                if let Some(inside) = self.inside_node.take() {
                    self.current = TimeInterval::new(host.nodes().height(inside), self.current.end_height());
                    return true;
                }
                if self.current.is_unbounded() {
                    self.state = IteratorState::Exhausted;
                    return false;
                }
                self.current.end_height()
            }
        };

        while host.model().next_time() <= start {
            host.model_mut().increase_time();
        }

        // Cross all nodes at the start of the interval.
        while let Some(node) = self.cursor {
            let (nodes, contemporaries) = host.nodes_and_contemporaries();
            if nodes.height(node) > start {
                break;
            }
            self.cursor = nodes.next(node);
            contemporaries.replace_children(nodes, node);
        }

        let end = self.next_node_height(host).min(host.model().next_time());
        self.current = TimeInterval::new(start, end);
        self.state = IteratorState::Yielding;
        tracing::trace!(start, end, "time interval");
        true
    }

    // Height of the next node that will be crossed.
    // Nodes that are pruned on the way are skipped.
    fn next_node_height<H: IntervalHost + ?Sized>(&mut self, host: &mut H) -> f64 {
        while let Some(node) = self.cursor {
            let next = host.nodes().next(node);
            if host.prune_node_if_needed(node) {
                // A pruned branch can leave the node in the tree as a new root.
                if !host.nodes().is_linked(node) {
                    self.cursor = next;
                }
                continue;
            }
            return host.nodes().height(node);
        }
        f64::INFINITY
    }

    /// Let the next interval start at `node`, which was created inside
    /// the current one, and drop `removed` from the contemporaries.
    pub fn split_current_interval<H: IntervalHost + ?Sized>(
        &mut self,
        host: &mut H,
        node: NodeId,
        removed: Option<NodeId>,
    ) {
        let height = host.nodes().height(node);
        assert!(
            self.current.start_height() <= height && height <= self.current.end_height(),
            "node at {height} is outside of {:?}",
            self.current
        );
        self.inside_node = Some(node);
        if let Some(removed) = removed {
            let (nodes, contemporaries) = host.nodes_and_contemporaries();
            contemporaries.remove(nodes, removed);
        }
    }

    /// Recompute the end of the current interval after nodes were
    /// added inside of it.
    pub fn recalculate_interval<H: IntervalHost + ?Sized>(&mut self, host: &mut H) {
        let nodes = host.nodes();
        let start = self.current.start_height();
        let mut candidate = match self.cursor {
            Some(cursor) => nodes.previous(cursor),
            None => nodes.last(),
        };
        while let Some(node) = candidate {
            if nodes.height(node) <= start {
                break;
            }
            self.cursor = Some(node);
            candidate = nodes.previous(node);
        }
        let node_height = match self.cursor {
            Some(cursor) => nodes.height(cursor),
            None => f64::INFINITY,
        };
        self.current = TimeInterval::new(start, node_height.min(host.model().next_time()));
    }

    /// Fill the contemporaries of the host for the height of `node`.
    ///
    /// A buffered roster at or below that height is used as starting
    /// point. Without one, leaves are searched from the bottom and all
    /// other nodes from the roots.
    pub fn search_contemporaries<H: IntervalHost + ?Sized>(&self, host: &mut H, node: NodeId) {
        let height = host.nodes().height(node);
        match host.contemporaries().buffer_time() {
            Some(buffer_time) if buffer_time <= height => {
                self.search_contemporaries_bottom_up(host, node, true)
            }
            _ if height == 0.0 => self.search_contemporaries_bottom_up(host, node, false),
            _ => self.search_contemporaries_top_down(host, node),
        }
    }

    /// Collect the contemporaries of `node` by descending from all
    /// roots above its height.
    pub fn search_contemporaries_top_down<H: IntervalHost + ?Sized>(&self, host: &mut H, node: NodeId) {
        let (nodes, contemporaries) = host.nodes_and_contemporaries();
        contemporaries.clear(false);
        let height = nodes.height(node);

        let mut stack = nodes
            .iter_rev()
            .take_while(|&n| nodes.height(n) > height)
            .filter(|&n| nodes.get(n).is_root())
            .collect::<Vec<_>>();
        while let Some(above) = stack.pop() {
            for child in nodes.get(above).children() {
                let child_height = nodes.height(child);
                if child_height > height {
                    stack.push(child);
                } else if child_height < height {
                    contemporaries.add(nodes, child);
                }
            }
        }

        // Nodes at the same height count if they come first in the order.
        let mut previous = nodes.previous(node);
        while let Some(n) = previous {
            if nodes.height(n) < height {
                break;
            }
            if !nodes.get(n).is_root() && nodes.parent_height(n) > height {
                contemporaries.add(nodes, n);
            }
            previous = nodes.previous(n);
        }
    }

    /// Collect the contemporaries of `node` by walking the node order
    /// up to it, either from the lowest node or from the buffered roster.
    ///
    /// # Panics
    ///
    /// * If `use_buffer` is set but there is no buffer at or below `node`.
    pub fn search_contemporaries_bottom_up<H: IntervalHost + ?Sized>(
        &self,
        host: &mut H,
        node: NodeId,
        use_buffer: bool,
    ) {
        let (nodes, contemporaries) = host.nodes_and_contemporaries();
        contemporaries.clear(false);
        let height = nodes.height(node);

        let start = if use_buffer {
            let buffer_time = match contemporaries.buffer_time() {
                Some(time) if time <= height => time,
                _ => panic!("no buffered contemporaries below height {height}"),
            };
            let buffered = (0..contemporaries.population_number())
                .flat_map(|pop| contemporaries.buffer_iter(pop))
                .filter(|&n| nodes.parent_height(n) > height)
                .collect::<Vec<_>>();
            for n in buffered {
                contemporaries.add(nodes, n);
            }
            // Rewind to the first node above the buffer.
            let mut first = node;
            while let Some(previous) = nodes.previous(first) {
                if nodes.height(previous) <= buffer_time {
                    break;
                }
                first = previous;
            }
            first
        } else {
            match nodes.first() {
                Some(first) => first,
                None => return,
            }
        };

        for n in nodes.iter_from(start).take_while(|&n| n != node) {
            if !nodes.get(n).is_root() && nodes.parent_height(n) > height {
                contemporaries.add(nodes, n);
            }
        }
    }
}

#[cfg(test)]
mod test_time_interval {
    use super::*;
    use crate::forest::test_utils::example_forest;
    use crate::forest::test_utils::example_forest_with_model;
    use crate::ModelBuilder;

    fn collect_intervals<H: IntervalHost>(host: &mut H, start: NodeId) -> Vec<(f64, f64, usize)> {
        let mut tii = TimeIntervalIterator::new(host, start);
        let mut intervals = vec![];
        while tii.good() {
            let ti = tii.current();
            intervals.push((ti.start_height(), ti.end_height(), host.contemporaries().size(0)));
            let _ = tii.next(host);
        }
        intervals
    }

    #[test]
    fn test_iterate_example_tree() {
        let (mut forest, nodes) = example_forest();
        let intervals = collect_intervals(&mut forest, nodes[0]);
        assert_eq!(
            intervals,
            vec![
                (0.0, 1.0, 4),
                (1.0, 3.0, 3),
                (3.0, 4.0, 2),
                (4.0, 6.0, 3),
                (6.0, 10.0, 2),
                (10.0, f64::INFINITY, 0),
            ]
        );
    }

    #[test]
    fn test_distinct_heights_give_bounded_intervals() {
        let (mut forest, nodes) = example_forest();
        let intervals = collect_intervals(&mut forest, nodes[0]);
        // Heights 0, 1, 3, 4, 6 and 10.
        let bounded = intervals.iter().filter(|i| i.1.is_finite()).count();
        assert_eq!(bounded, 5);
        assert!(intervals.iter().all(|i| i.1 > i.0));
    }

    #[test]
    fn test_exhaustion() {
        let (mut forest, nodes) = example_forest();
        let mut tii = TimeIntervalIterator::new(&mut forest, nodes[8]);
        assert!(tii.good());
        assert_eq!(tii.current(), TimeInterval::new(10.0, f64::INFINITY));
        assert_eq!(tii.next(&mut forest), Err(IntervalsExhausted));
        assert!(!tii.good());
        assert_eq!(tii.next(&mut forest), Err(IntervalsExhausted));
    }

    #[test]
    fn test_start_inside_tree() {
        let (mut forest, nodes) = example_forest();
        let intervals = collect_intervals(&mut forest, nodes[4]);
        assert_eq!(intervals[0], (1.0, 3.0, 3));
        assert_eq!(intervals.len(), 5);
    }

    #[test]
    fn test_epoch_boundaries() {
        let model = ModelBuilder::new(4)
            .growth_rate(0.0, 0, 1.0)
            .growth_rate(0.5, 0, 2.0)
            .growth_rate(1.0, 0, 3.0)
            .growth_rate(1.5, 0, 4.0)
            .build()
            .unwrap();
        let (mut forest, nodes) = example_forest_with_model(model);
        let intervals = collect_intervals(&mut forest, nodes[0]);
        assert_eq!(
            &intervals[..4],
            &[
                (0.0, 0.5, 4),
                (0.5, 1.0, 4),
                (1.0, 1.5, 3),
                (1.5, 3.0, 3)
            ]
        );
        assert_eq!(intervals.len(), 8);
        assert_eq!(forest.model().current_time(), 1.5);
    }

    #[test]
    fn test_start_above_epoch_boundaries() {
        let model = ModelBuilder::new(4)
            .growth_rate(0.5, 0, 2.0)
            .growth_rate(1.0, 0, 3.0)
            .build()
            .unwrap();
        let (mut forest, nodes) = example_forest_with_model(model);
        let tii = TimeIntervalIterator::new(&mut forest, nodes[4]);
        assert_eq!(tii.current(), TimeInterval::new(1.0, 3.0));
        assert_eq!(forest.model().current_time(), 1.0);
    }

    #[test]
    fn test_split_current_interval() {
        let (mut forest, nodes) = example_forest();
        let mut tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        let inside = forest.nodes_mut().create_node(0.5, 0);
        forest.nodes_mut().add(inside, Some(nodes[3]));
        tii.split_current_interval(&mut forest, inside, None);
        tii.next(&mut forest).unwrap();
        assert_eq!(tii.current(), TimeInterval::new(0.5, 1.0));
        assert_eq!(forest.contemporaries().size(0), 4);
        tii.next(&mut forest).unwrap();
        assert_eq!(tii.current(), TimeInterval::new(1.0, 3.0));
        assert_eq!(forest.contemporaries().size(0), 3);
    }

    #[test]
    fn test_split_removes_node() {
        let (mut forest, nodes) = example_forest();
        let mut tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        let inside = forest.nodes_mut().create_node(0.5, 0);
        forest.nodes_mut().add(inside, Some(nodes[3]));
        tii.split_current_interval(&mut forest, inside, Some(nodes[2]));
        assert_eq!(forest.contemporaries().size(0), 3);
    }

    #[test]
    fn test_recalculate_interval() {
        let (mut forest, nodes) = example_forest();
        let mut tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        tii.next(&mut forest).unwrap();
        assert_eq!(tii.current(), TimeInterval::new(1.0, 3.0));

        tii.recalculate_interval(&mut forest);
        assert_eq!(tii.current(), TimeInterval::new(1.0, 3.0));

        let added = forest.nodes_mut().create_node(2.0, 0);
        forest.nodes_mut().add(added, Some(nodes[4]));
        tii.recalculate_interval(&mut forest);
        assert_eq!(tii.current(), TimeInterval::new(1.0, 2.0));
        tii.next(&mut forest).unwrap();
        assert_eq!(tii.current(), TimeInterval::new(2.0, 3.0));
        assert_eq!(forest.contemporaries().size(0), 3);
    }

    #[test]
    fn test_search_contemporaries() {
        let (mut forest, nodes) = example_forest();
        let tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        for (index, expected) in [(4, 2), (5, 1), (6, 2), (7, 2), (8, 0)] {
            tii.search_contemporaries_top_down(&mut forest, nodes[index]);
            let mut top_down = forest.contemporaries().iter(0).collect::<Vec<_>>();
            top_down.sort();
            assert_eq!(top_down.len(), expected, "node {index}");

            tii.search_contemporaries_bottom_up(&mut forest, nodes[index], false);
            let mut bottom_up = forest.contemporaries().iter(0).collect::<Vec<_>>();
            bottom_up.sort();
            assert_eq!(bottom_up, top_down, "node {index}");
        }
    }

    #[test]
    fn test_search_contemporaries_with_buffer() {
        let (mut forest, nodes) = example_forest();
        let mut tii = TimeIntervalIterator::new(&mut forest, nodes[0]);
        tii.next(&mut forest).unwrap();
        tii.next(&mut forest).unwrap();
        assert_eq!(tii.current(), TimeInterval::new(3.0, 4.0));
        forest.nodes_and_contemporaries().1.buffer(3.0);
        assert!(forest.contemporaries().is_empty());
        for (index, expected) in [(6, 2), (7, 2), (8, 0)] {
            tii.search_contemporaries_bottom_up(&mut forest, nodes[index], true);
            let mut buffered = forest.contemporaries().iter(0).collect::<Vec<_>>();
            buffered.sort();
            assert_eq!(buffered.len(), expected, "node {index}");
            tii.search_contemporaries_top_down(&mut forest, nodes[index]);
            let mut top_down = forest.contemporaries().iter(0).collect::<Vec<_>>();
            top_down.sort();
            assert_eq!(buffered, top_down, "node {index}");
        }
    }
}
