use crate::Forest;
use crate::NodeId;
use crate::RandomGenerator;

impl<R: RandomGenerator> Forest<R> {
    /// `true` if the branch above `node` left the local tree longer ago
    /// than the approximation window allows.
    ///
    /// Local branches, roots, the local root and migrations are never old.
    pub(crate) fn node_is_old(&self, node: NodeId) -> bool {
        let n = self.nodes.get(node);
        if n.local() || n.is_root() || self.local_root == Some(node) || self.nodes.is_migrating(node) {
            return false;
        }
        if let Some(window) = self.model.window_length_rec() {
            if self.segment_count().saturating_sub(n.last_update()) > window {
                return true;
            }
        }
        if let Some(window) = self.model.window_length_seq() {
            if self.current_base() - self.rec_bases[n.last_update()] > window {
                return true;
            }
        }
        false
    }

    /// Remove `node` (or its branch) if the approximation no longer needs it.
    ///
    /// Returns `true` if the genealogy was changed. The node itself may
    /// survive as the root of a detached subtree.
    pub(crate) fn prune_node(&mut self, node: NodeId) -> bool {
        if !self.model.has_approximation() {
            return false;
        }
        let n = self.nodes.get(node);
        if n.in_sample() || self.active_nodes.contains(&Some(node)) {
            return false;
        }

        let parent = match n.parent() {
            Some(parent) => parent,
            None => {
                if n.count_children() > 0 {
                    return false;
                }
                // Orphaned root.
                if self.primary_root == Some(node) {
                    self.primary_root = None;
                }
                self.nodes.remove(node);
                return true;
            }
        };

        if self.node_is_old(node) {
            tracing::trace!(?node, "pruning old branch");
            self.nodes.get_mut(parent).change_child(Some(node), None);
            if self.nodes.get(node).count_children() == 0 {
                self.nodes.remove(node);
            } else {
                self.nodes.get_mut(node).set_parent(None);
                if self.nodes.get(node).samples_below() > 0 {
                    self.primary_root = Some(node);
                }
            }
            self.update_above(parent, false, true, true);
            return true;
        }

        if n.count_children() == 1 && !self.nodes.is_migrating(node) {
            let child = match n.first_child() {
                Some(child) => child,
                None => unreachable!(),
            };
            let c = self.nodes.get(child);
            // Merging the branches must not change what is known about them.
            if c.last_update() != n.last_update() || c.population() != n.population() {
                return false;
            }
            tracing::trace!(?node, "removing single-child node");
            self.nodes.get_mut(child).set_parent(Some(parent));
            self.nodes
                .get_mut(parent)
                .change_child(Some(node), Some(child));
            self.nodes.remove(node);
            return true;
        }
        false
    }

    /// Drop the positions of recombinations that no non-local branch
    /// refers to anymore, renumbering the remaining ones.
    pub(crate) fn flush_old_recombinations(&mut self) {
        let oldest = self
            .nodes
            .min_nonlocal_last_update()
            .unwrap_or(usize::MAX)
            .min(self.segment_count());
        let remove = oldest.saturating_sub(1);
        if remove == 0 {
            return;
        }
        self.nodes.shift_last_updates(remove);
        self.current_rec -= remove;
        self.rec_bases.drain(..remove);
        tracing::debug!(remove, "flushed recombinations");
    }
}
