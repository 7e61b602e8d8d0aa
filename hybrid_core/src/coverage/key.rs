use super::{mode::CovMode, path_index::is_sub_path};
use crate::branch::{BranchId, FrontierBranch, Path, StorageDigest, Trace};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoverageKey {
    Inst(BranchId),
    InstTx(BranchId, usize),
    InstSg(BranchId, usize, StorageDigest),
    Path(Path),
}

impl CoverageKey {
    /// Branch the key was derived from, `None` for whole paths.
    pub fn branch(&self) -> Option<BranchId> {
        match self {
            CoverageKey::Inst(b) | CoverageKey::InstTx(b, _) | CoverageKey::InstSg(b, _, _) => {
                Some(*b)
            }
            CoverageKey::Path(_) => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("branch {branch} of tx {tx_index} carries no storage digest")]
    MissingDigest { branch: BranchId, tx_index: usize },
    #[error("mode '{0}' keys whole paths, not single branches")]
    WholePath(CovMode),
    #[error("trace has no branch event {0}")]
    NoEvent(usize),
}

type BranchKeyFn = fn(BranchId, usize, Option<StorageDigest>) -> Result<CoverageKey, KeyError>;

#[derive(Debug, Clone, Copy)]
enum Formula {
    Branch(BranchKeyFn),
    Path { relaxed: bool },
}

/// Maps branch events to coverage keys, the formula is picked once per mode.
#[derive(Debug, Clone, Copy)]
pub struct KeyBuilder {
    mode: CovMode,
    formula: Formula,
}

fn inst_key(b: BranchId, _: usize, _: Option<StorageDigest>) -> Result<CoverageKey, KeyError> {
    Ok(CoverageKey::Inst(b))
}

fn inst_tx_key(
    b: BranchId,
    tx_index: usize,
    _: Option<StorageDigest>,
) -> Result<CoverageKey, KeyError> {
    Ok(CoverageKey::InstTx(b, tx_index))
}

fn inst_sg_key(
    b: BranchId,
    tx_index: usize,
    digest: Option<StorageDigest>,
) -> Result<CoverageKey, KeyError> {
    let digest = digest.ok_or(KeyError::MissingDigest {
        branch: b,
        tx_index,
    })?;
    Ok(CoverageKey::InstSg(b, tx_index, digest))
}

impl KeyBuilder {
    pub fn new(mode: CovMode) -> Self {
        let formula = match mode {
            CovMode::Inst => Formula::Branch(inst_key),
            CovMode::InstTx => Formula::Branch(inst_tx_key),
            CovMode::InstSg => Formula::Branch(inst_sg_key),
            CovMode::Path => Formula::Path { relaxed: false },
            CovMode::PathRelaxed => Formula::Path { relaxed: true },
        };
        Self { mode, formula }
    }

    #[inline]
    pub fn mode(&self) -> CovMode {
        self.mode
    }

    /// Key of a single branch outcome, only defined for per-branch modes.
    pub fn key(
        &self,
        branch: BranchId,
        tx_index: usize,
        digest: Option<StorageDigest>,
    ) -> Result<CoverageKey, KeyError> {
        match self.formula {
            Formula::Branch(f) => f(branch, tx_index, digest),
            Formula::Path { .. } => Err(KeyError::WholePath(self.mode)),
        }
    }

    /// All keys discovered by a trace.
    pub fn trace_keys(&self, trace: &Trace) -> Result<Vec<CoverageKey>, KeyError> {
        match self.formula {
            Formula::Branch(f) => trace
                .events
                .iter()
                .map(|e| f(e.branch, e.tx_index, e.storage))
                .collect(),
            Formula::Path { .. } => Ok(vec![CoverageKey::Path(trace.path.clone())]),
        }
    }

    /// Key that flipping the frontier branch `fb` of `trace` would discover.
    pub fn alt_key(&self, trace: &Trace, fb: &FrontierBranch) -> Result<CoverageKey, KeyError> {
        let event = trace.events.get(fb.event).ok_or(KeyError::NoEvent(fb.event))?;
        match self.formula {
            // storage at the fork point is the same for both directions
            Formula::Branch(f) => f(fb.alt, event.tx_index, event.storage),
            Formula::Path { .. } => Ok(CoverageKey::Path(trace.path.forked(fb.event, fb.alt))),
        }
    }

    /// Whether `trace` covers `key`, used to accept a solver answer.
    pub fn reaches(&self, trace: &Trace, key: &CoverageKey) -> Result<bool, KeyError> {
        match (self.formula, key) {
            (Formula::Branch(f), _) => {
                for e in trace.events.iter() {
                    if Some(e.branch) != key.branch() {
                        continue;
                    }
                    if &f(e.branch, e.tx_index, e.storage)? == key {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Formula::Path { relaxed: false }, CoverageKey::Path(p)) => {
                Ok(trace.path.starts_with(p))
            }
            (Formula::Path { relaxed: true }, CoverageKey::Path(p)) => {
                Ok(is_sub_path(p.branches(), trace.path.branches()))
            }
            (Formula::Path { .. }, _) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        branch::BranchEvent,
        tx::{tests::call_f, TxSequence},
    };

    fn trace(events: &[(u64, bool, usize)], digest: Option<StorageDigest>) -> Trace {
        let n = events.iter().map(|e| e.2 + 1).max().unwrap_or(0);
        let seq = TxSequence::new((0..n).map(|i| call_f(i as u64)).collect());
        let mut index = vec![0; n];
        let events = events
            .iter()
            .map(|&(pc, taken, tx_index)| {
                let e = BranchEvent {
                    branch: BranchId::new(pc, taken),
                    tx_index,
                    index: index[tx_index],
                    storage: digest,
                };
                index[tx_index] += 1;
                e
            })
            .collect();
        Trace::new(seq, events)
    }

    #[test]
    fn per_mode_keys() {
        let b = BranchId::new(0x10, false);
        let t = trace(&[(0x10, false, 0)], Some([7; 20]));
        let keys = |m| KeyBuilder::new(m).trace_keys(&t).unwrap();
        assert_eq!(keys(CovMode::Inst), vec![CoverageKey::Inst(b)]);
        assert_eq!(keys(CovMode::InstTx), vec![CoverageKey::InstTx(b, 0)]);
        assert_eq!(keys(CovMode::InstSg), vec![CoverageKey::InstSg(b, 0, [7; 20])]);
        assert_eq!(keys(CovMode::Path), vec![CoverageKey::Path(t.path.clone())]);
        assert_eq!(
            KeyBuilder::new(CovMode::Path).key(b, 0, None),
            Err(KeyError::WholePath(CovMode::Path))
        );
    }

    #[test]
    fn inst_sg_requires_digest() {
        let t = trace(&[(0x10, false, 0)], None);
        assert!(matches!(
            KeyBuilder::new(CovMode::InstSg).trace_keys(&t),
            Err(KeyError::MissingDigest { tx_index: 0, .. })
        ));
    }

    #[test]
    fn inst_tx_distinguishes_tx_index() {
        let builder = KeyBuilder::new(CovMode::InstTx);
        let t = trace(&[(0x10, false, 0), (0x10, false, 1)], None);
        let alt0 = builder.alt_key(&t, &t.frontier[0][0]).unwrap();
        let alt1 = builder.alt_key(&t, &t.frontier[1][0]).unwrap();
        assert_ne!(alt0, alt1);

        let solved = trace(&[(0x10, true, 0), (0x10, false, 1)], None);
        assert!(builder.reaches(&solved, &alt0).unwrap());
        assert!(!builder.reaches(&solved, &alt1).unwrap());
        // inst does not care about the index
        let inst = KeyBuilder::new(CovMode::Inst);
        let alt1 = inst.alt_key(&t, &t.frontier[1][0]).unwrap();
        assert!(inst.reaches(&solved, &alt1).unwrap());
    }

    #[test]
    fn path_alt_keys() {
        let t = trace(&[(1, true, 0), (2, false, 0), (3, true, 0)], None);
        let strict = KeyBuilder::new(CovMode::Path);
        let alt = strict.alt_key(&t, &t.frontier[0][1]).unwrap();
        let expected = Path::new(vec![BranchId::new(1, true), BranchId::new(2, true)]);
        assert_eq!(alt, CoverageKey::Path(expected));

        let hit = trace(&[(1, true, 0), (2, true, 0), (5, false, 0)], None);
        let loose = trace(&[(1, true, 0), (4, true, 0), (2, true, 0)], None);
        assert!(strict.reaches(&hit, &alt).unwrap());
        assert!(!strict.reaches(&loose, &alt).unwrap());
        let relaxed = KeyBuilder::new(CovMode::PathRelaxed);
        assert!(relaxed.reaches(&loose, &alt).unwrap());
        assert!(!relaxed.reaches(&t, &alt).unwrap());
    }

    #[test]
    fn deterministic() {
        let t = trace(&[(1, true, 0), (2, false, 1), (1, false, 1)], Some([1; 20]));
        for m in CovMode::ALL.iter() {
            let b = KeyBuilder::new(*m);
            assert_eq!(b.trace_keys(&t).unwrap(), b.trace_keys(&t.clone()).unwrap());
        }
    }
}
