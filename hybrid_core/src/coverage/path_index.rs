use crate::{
    branch::{BranchId, Path},
    HashMap, HashSet,
};

/// Whether `sub` is a subsequence of `sup`: same relative order, gaps allowed.
///
/// Greedy two-pointer scan, O(|sup|) time and no allocation.
pub fn is_sub_path(sub: &[BranchId], sup: &[BranchId]) -> bool {
    if sub.len() > sup.len() {
        return false;
    }
    let mut rest = sup.iter();
    sub.iter().all(|b| rest.any(|s| s == b))
}

/// All accepted paths of a run. Paths are never removed or changed.
#[derive(Debug)]
pub struct PathIndex {
    paths: Vec<Path>,
    exact: HashSet<Path>,
    /// Prefix tree of the accepted paths, node 0 is the empty prefix.
    trie: Vec<HashMap<BranchId, usize>>,
    /// Length of the longest accepted path, shorter paths can't cover longer ones.
    max_len: usize,
}

impl Default for PathIndex {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exact: HashSet::new(),
            trie: vec![HashMap::new()],
            max_len: 0,
        }
    }
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[inline]
    pub fn contains(&self, p: &Path) -> bool {
        self.exact.contains(p)
    }

    /// Accept `p`, returns false if the exact path is already known.
    pub fn insert(&mut self, p: Path) -> bool {
        if !self.exact.insert(p.clone()) {
            return false;
        }
        self.max_len = self.max_len.max(p.len());
        let mut node = 0;
        for b in p.branches() {
            node = match self.trie[node].get(b) {
                Some(&next) => next,
                None => {
                    let next = self.trie.len();
                    self.trie.push(HashMap::new());
                    self.trie[node].insert(*b, next);
                    next
                }
            };
        }
        self.paths.push(p);
        true
    }

    /// Whether some accepted path starts with `p`, i.e. `p` was already walked.
    pub fn walked(&self, p: &[BranchId]) -> bool {
        let mut node = 0;
        for b in p {
            node = match self.trie[node].get(b) {
                Some(&next) => next,
                None => return false,
            };
        }
        true
    }

    /// Whether some accepted path has `p` as a sub-path.
    pub fn covers(&self, p: &[BranchId]) -> bool {
        if p.len() > self.max_len {
            return false;
        }
        self.paths
            .iter()
            .filter(|known| known.len() >= p.len())
            .any(|known| is_sub_path(p, known.branches()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> + '_ {
        self.paths.iter()
    }
}
