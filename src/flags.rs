// This module encapsulates the bitflags API
// so that we don't leak details that may
// affect semver later on.

use bitflags::bitflags;

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    struct ForestBitFlags: u32 {
        const EMPTY = 0;
        const CHECK_TREE = 1 << 1;
        const CHECK_CONTEMPORARIES = 1 << 2;
    }
}

/// Diagnostics of a [`Forest`](crate::Forest).
///
/// Enabled checks panic as soon as an invariant is violated.
#[repr(transparent)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ForestOptions(ForestBitFlags);

impl ForestOptions {
    /// Validate the whole forest after each operation that changes it.
    pub fn with_tree_checks(self) -> Self {
        Self(self.0 | ForestBitFlags::CHECK_TREE)
    }

    /// Validate the contemporaries of every time interval.
    pub fn with_contemporary_checks(self) -> Self {
        Self(self.0 | ForestBitFlags::CHECK_CONTEMPORARIES)
    }

    pub fn all_checks() -> Self {
        Self::default().with_tree_checks().with_contemporary_checks()
    }

    pub fn tree_checks(&self) -> bool {
        self.0.contains(ForestBitFlags::CHECK_TREE)
    }

    pub fn contemporary_checks(&self) -> bool {
        self.0.contains(ForestBitFlags::CHECK_CONTEMPORARIES)
    }
}

#[cfg(test)]
mod test_forest_options {
    use super::ForestOptions;

    #[test]
    fn test_default_has_no_checks() {
        let flags = ForestOptions::default();
        assert!(!flags.tree_checks());
        assert!(!flags.contemporary_checks());
    }

    #[test]
    fn test_checks() {
        let flags = ForestOptions::default().with_tree_checks();
        assert!(flags.tree_checks());
        assert!(!flags.contemporary_checks());
        let flags = ForestOptions::all_checks();
        assert!(flags.tree_checks() && flags.contemporary_checks());
    }
}
