//! Branch events, paths and replay traces.

use crate::tx::TxSequence;
use std::{fmt, sync::Arc};

/// A conditional program point together with the direction taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId {
    pub pc: u64,
    pub taken: bool,
}

impl BranchId {
    #[inline]
    pub fn new(pc: u64, taken: bool) -> Self {
        Self { pc, taken }
    }

    #[inline]
    pub fn flipped(self) -> Self {
        Self {
            pc: self.pc,
            taken: !self.taken,
        }
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{}", self.pc, if self.taken { 'T' } else { 'F' })
    }
}

pub type StorageDigest = [u8; 20];

/// One concrete execution of a branch during replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchEvent {
    pub branch: BranchId,
    /// Index of the transaction that executed the branch.
    pub tx_index: usize,
    /// Position of this event among the branch events of its transaction.
    pub index: usize,
    pub storage: Option<StorageDigest>,
}

/// Ordered branch outcomes of one full sequence replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(Arc<[BranchId]>);

impl Path {
    pub fn new(branches: Vec<BranchId>) -> Self {
        Self(Arc::from(branches))
    }

    #[inline]
    pub fn branches(&self) -> &[BranchId] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The path that follows `self` up to `at` and then goes to `alt`.
    pub fn forked(&self, at: usize, alt: BranchId) -> Self {
        let at = at.min(self.len());
        let mut branches = Vec::with_capacity(at + 1);
        branches.extend_from_slice(&self.0[..at]);
        branches.push(alt);
        Self::new(branches)
    }

    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, b) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", b)?;
        }
        write!(f, "]")
    }
}

/// Untaken direction of a branch event, a candidate target for the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrontierBranch {
    /// Index into `Trace::events`.
    pub event: usize,
    pub alt: BranchId,
}

/// Result of replaying one sequence.
#[derive(Debug, Clone)]
pub struct Trace {
    pub seq: TxSequence,
    pub events: Vec<BranchEvent>,
    pub path: Path,
    /// Frontier branches grouped by transaction index.
    pub frontier: Vec<Vec<FrontierBranch>>,
}

impl Trace {
    pub fn new(seq: TxSequence, events: Vec<BranchEvent>) -> Self {
        let path = Path::new(events.iter().map(|e| e.branch).collect());
        let mut frontier = vec![Vec::new(); seq.len()];
        for (i, e) in events.iter().enumerate() {
            if let Some(f) = frontier.get_mut(e.tx_index) {
                f.push(FrontierBranch {
                    event: i,
                    alt: e.branch.flipped(),
                });
            }
        }
        Self {
            seq,
            events,
            path,
            frontier,
        }
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.iter().map(|f| f.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::tests::call_f;

    #[test]
    fn fork_path() {
        let a = BranchId::new(1, true);
        let b = BranchId::new(2, false);
        let c = BranchId::new(3, true);
        let p = Path::new(vec![a, b, c]);
        let f = p.forked(1, b.flipped());
        assert_eq!(f.branches(), &[a, b.flipped()]);
        assert!(!p.starts_with(&f));
        assert!(p.starts_with(&p.forked(2, c)));
        assert_eq!(p.forked(10, a).len(), 4);
        assert_eq!(b.to_string(), "0x2:F");
    }

    #[test]
    fn trace_frontier_per_tx() {
        let seq = TxSequence::new(vec![call_f(0), call_f(1)]);
        let ev = |pc, tx_index, index| BranchEvent {
            branch: BranchId::new(pc, false),
            tx_index,
            index,
            storage: None,
        };
        let trace = Trace::new(seq, vec![ev(1, 0, 0), ev(2, 0, 1), ev(1, 1, 0)]);
        assert_eq!(trace.path.len(), 3);
        assert_eq!(trace.frontier.len(), 2);
        assert_eq!(trace.frontier[0].len(), 2);
        assert_eq!(trace.frontier[1][0].event, 2);
        assert_eq!(trace.frontier[1][0].alt, BranchId::new(1, true));
        assert_eq!(trace.frontier_len(), 3);
    }
}
