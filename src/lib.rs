//! Sequential-Markov-Coalescent genealogy engine.
//!
//! A [`Forest`] holds the genealogy at the current sequence position:
//! the local tree spanning all samples plus non-local remnants that
//! a postponed recombination could still bring back.
//! Genealogies are produced left to right along the sequence, each one
//! derived from its predecessor by a single recombination.

use std::hash::Hash;
use std::hash::Hasher;

mod coalescence;
mod contemporaries;
mod error;
mod event;
mod flags;
mod forest;
mod model;
mod node;
mod node_arena;
mod pruning;
mod random;
mod simulation;
mod summary;
mod time_interval;
mod tree_point;
mod validation;

pub use contemporaries::Contemporaries;
pub use contemporaries::ContemporaryStore;
pub use contemporaries::SetStore;
pub use contemporaries::VecStore;
pub use error::ForestError;
pub use error::IntervalsExhausted;
pub use event::Event;
pub use event::EventKind;
pub use event::NodeState;
pub use flags::ForestOptions;
pub use forest::Forest;
pub use model::Model;
pub use model::ModelBuilder;
pub use model::ModelError;
pub use node::Node;
pub use node_arena::NodeArena;
pub use random::ChaChaGenerator;
pub use random::RandomGenerator;
pub use simulation::run_replicates;
pub use simulation::simulate_locus;
pub use summary::LocalTree;
pub use summary::SegmentObserver;
pub use summary::SegmentSummary;
pub use summary::TreeSummary;
pub use time_interval::IntervalHost;
pub use time_interval::TimeInterval;
pub use time_interval::TimeIntervalIterator;
pub use tree_point::TreePoint;

/// Handle to a node stored in a [`NodeArena`].
///
/// The generation distinguishes a live node from an earlier occupant
/// of the same slot, so a handle kept past [`NodeArena::remove`]
/// can never silently refer to a recycled node.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    fn new(index: usize, generation: u32) -> Self {
        assert!(index < u32::MAX as usize, "node arena overflow");
        Self {
            index: index as u32,
            generation,
        }
    }

    #[inline(always)]
    fn as_index(&self) -> usize {
        self.index as usize
    }

    #[inline(always)]
    fn generation(&self) -> u32 {
        self.generation
    }
}

// NOTE: a single write keeps this usable with nohash.
impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(((self.generation as u64) << 32) | self.index as u64)
    }
}

impl nohash::IsEnabled for NodeId {}

#[cfg(test)]
mod test_node_id {
    use super::NodeId;
    use nohash::BuildNoHashHasher;
    use std::collections::HashSet;

    #[test]
    fn test_generation_distinguishes_handles() {
        let a = NodeId::new(3, 0);
        let b = NodeId::new(3, 1);
        assert_ne!(a, b);
        let mut set = HashSet::<NodeId, BuildNoHashHasher<NodeId>>::default();
        set.insert(a);
        set.insert(b);
        set.insert(a);
        assert_eq!(set.len(), 2);
    }
}
