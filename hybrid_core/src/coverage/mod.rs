//! Coverage bookkeeping of one run.
//!
//! [`Coverage`] owns the coverage map and the path index of a run and is the
//! single source of truth for "have we seen this before". All mutation goes
//! through `&mut self`, callers that share it across threads serialize writers.

pub mod digest;
pub mod key;
pub mod map;
pub mod mode;
pub mod path_index;

pub use digest::{Sha1Digester, StorageDigester};
pub use key::{CoverageKey, KeyBuilder, KeyError};
pub use map::CoverageMap;
pub use mode::{CovMode, ModeError};
pub use path_index::{is_sub_path, PathIndex};

use crate::{branch::Trace, HashSet};

/// An unexplored branch worth handing to the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub tx_index: usize,
    /// Position of the flipped event among the branch events of its transaction.
    pub branch_index: usize,
    pub target: crate::branch::BranchId,
    pub key: CoverageKey,
}

#[derive(Debug)]
pub struct Coverage {
    builder: KeyBuilder,
    map: CoverageMap,
    index: PathIndex,
}

impl Coverage {
    pub fn new(mode: CovMode) -> Self {
        Self {
            builder: KeyBuilder::new(mode),
            map: CoverageMap::new(),
            index: PathIndex::new(),
        }
    }

    #[inline]
    pub fn mode(&self) -> CovMode {
        self.builder.mode()
    }

    #[inline]
    pub fn builder(&self) -> &KeyBuilder {
        &self.builder
    }

    /// Number of known coverage keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &CoverageKey) -> bool {
        self.map.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CoverageKey> + '_ {
        self.map.iter()
    }

    #[inline]
    pub fn paths(&self) -> &PathIndex {
        &self.index
    }

    /// Register everything `trace` discovered, returns the number of new keys.
    ///
    /// In relaxed path mode a path already covered by an accepted path is not new.
    pub fn register(&mut self, trace: &Trace) -> Result<usize, KeyError> {
        let keys = self.builder.trace_keys(trace)?;
        let mode = self.mode();
        if !mode.is_path() {
            return Ok(keys.into_iter().filter(|k| self.map.register(k.clone())).count());
        }

        let mut new = 0;
        for key in keys {
            let path = match &key {
                CoverageKey::Path(p) => p.clone(),
                _ => continue,
            };
            if mode == CovMode::PathRelaxed && self.index.covers(path.branches()) {
                continue;
            }
            if self.map.register(key) {
                self.index.insert(path);
                new += 1;
            }
        }
        Ok(new)
    }

    /// Whether a candidate path needs no solving although its exact key is
    /// unknown: in path mode some accepted path already walked it, in relaxed
    /// path mode some accepted path contains it.
    pub fn is_redundant(&self, key: &CoverageKey) -> bool {
        match (self.mode(), key) {
            (CovMode::Path, CoverageKey::Path(p)) => self.index.walked(p.branches()),
            (CovMode::PathRelaxed, CoverageKey::Path(p)) => self.index.covers(p.branches()),
            _ => false,
        }
    }

    /// Frontier branches of `trace` whose alternate key is still unknown.
    ///
    /// Keys repeated along the trace are kept once, at their earliest fork point.
    pub fn candidates(&self, trace: &Trace) -> Result<Vec<Candidate>, KeyError> {
        let mut seen = HashSet::new();
        let mut ret = Vec::new();
        for (tx_index, frontier) in trace.frontier.iter().enumerate() {
            for fb in frontier {
                let key = self.builder.alt_key(trace, fb)?;
                if self.map.contains(&key) || self.is_redundant(&key) || seen.contains(&key) {
                    continue;
                }
                seen.insert(key.clone());
                ret.push(Candidate {
                    tx_index,
                    branch_index: trace.events[fb.event].index,
                    target: fb.alt,
                    key,
                });
            }
        }
        Ok(ret)
    }
}
