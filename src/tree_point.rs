use crate::NodeArena;
use crate::NodeId;

/// A point on the branch above `base_node`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TreePoint {
    base_node: NodeId,
    relative_height: f64,
    height: f64,
}

impl TreePoint {
    /// # Panics
    ///
    /// * If `height` is not on the branch above `base_node`.
    pub fn from_absolute(nodes: &NodeArena, base_node: NodeId, height: f64) -> Self {
        let base_height = nodes.height(base_node);
        assert!(
            base_height <= height && height <= nodes.parent_height(base_node),
            "height {height} is not on the branch above {base_node:?}"
        );
        Self {
            base_node,
            relative_height: height - base_height,
            height,
        }
    }

    /// # Panics
    ///
    /// * If `relative_height` exceeds the branch length.
    pub fn from_relative(nodes: &NodeArena, base_node: NodeId, relative_height: f64) -> Self {
        assert!(
            relative_height >= 0.0 && relative_height <= nodes.height_above(base_node),
            "relative height {relative_height} is outside of the branch above {base_node:?}"
        );
        Self {
            base_node,
            relative_height,
            height: nodes.height(base_node) + relative_height,
        }
    }

    pub fn base_node(&self) -> NodeId {
        self.base_node
    }

    pub fn relative_height(&self) -> f64 {
        self.relative_height
    }

    pub fn height(&self) -> f64 {
        self.height
    }
}

#[cfg(test)]
mod test_tree_point {
    use super::*;

    fn branch() -> (NodeArena, NodeId) {
        let mut nodes = NodeArena::new();
        let leaf = nodes.create_node(1.0, 1);
        let parent = nodes.create_node(4.0, 0);
        nodes.add(leaf, None);
        nodes.add(parent, Some(leaf));
        nodes.get_mut(leaf).set_parent(Some(parent));
        nodes.get_mut(parent).set_first_child(Some(leaf));
        (nodes, leaf)
    }

    #[test]
    fn test_heights() {
        let (nodes, leaf) = branch();
        let absolute = TreePoint::from_absolute(&nodes, leaf, 2.5);
        assert_eq!(absolute.relative_height(), 1.5);
        let relative = TreePoint::from_relative(&nodes, leaf, 1.5);
        assert_eq!(relative, absolute);
        assert_eq!(relative.base_node(), leaf);
    }

    #[test]
    #[should_panic]
    fn test_point_above_branch() {
        let (nodes, leaf) = branch();
        TreePoint::from_absolute(&nodes, leaf, 4.5);
    }
}
