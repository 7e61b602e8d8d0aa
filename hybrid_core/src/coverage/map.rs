use super::key::CoverageKey;
use crate::HashSet;

/// Grow-only set of discovered coverage keys.
#[derive(Debug, Default)]
pub struct CoverageMap {
    keys: HashSet<CoverageKey>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff `key` was not known before.
    #[inline]
    pub fn register(&mut self, key: CoverageKey) -> bool {
        self.keys.insert(key)
    }

    #[inline]
    pub fn contains(&self, key: &CoverageKey) -> bool {
        self.keys.contains(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoverageKey> + '_ {
        self.keys.iter()
    }
}
