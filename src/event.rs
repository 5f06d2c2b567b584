use crate::NodeId;

/// What an active lineage can do during a time interval.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// The interval lies below the lineage.
    Off,
    /// The lineage is a root and can coalesce or migrate.
    Coalescing,
    /// The lineage is a non-local branch that can still recombine.
    Recombining,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
    None,
    Coalescence,
    PwCoalescence,
    Recombination,
    Migration { target_population: usize },
}

/// An event of the coalescence loop.
///
/// `active_node` is the slot (0 or 1) of the active lineage
/// the event happens to; `node` is the node in that slot.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    time: f64,
    active_node: usize,
    node: Option<NodeId>,
}

impl Default for Event {
    fn default() -> Self {
        Self::none()
    }
}

impl Event {
    pub fn none() -> Self {
        Self {
            kind: EventKind::None,
            time: -1.0,
            active_node: 0,
            node: None,
        }
    }

    pub(crate) fn new(kind: EventKind, time: f64, active_node: usize, node: Option<NodeId>) -> Self {
        Self {
            kind,
            time,
            active_node,
            node,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn active_node(&self) -> usize {
        self.active_node
    }

    /// # Panics
    ///
    /// * If the event does not happen to a node.
    pub fn node(&self) -> NodeId {
        match self.node {
            Some(node) => node,
            None => panic!("{:?} event has no node", self.kind),
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == EventKind::None
    }
}
