//! In-process stand-ins for the symbolic engine and echidna.

use ethnum::U256;
use hybrid_core::{
    branch::BranchId,
    engine::{
        EngineError, RawBranch, ReplayReport, ReplayRequest, SolveReply, SolveRequest,
        SymbolicEngine, TxReplay,
    },
    tx::{AbiValue, Call, Delay, Transaction, TxSequence},
};
use hybrid_wrapper::echidna::{
    format::encode_sequence, Campaign, CampaignReport, FuzzerError, COVERAGE_DIR,
};
use std::{
    fs::{create_dir_all, remove_dir_all, remove_file, write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

pub const BRANCH_PC: u64 = 0x10;

pub fn f(x: u64) -> Transaction {
    Transaction {
        sender: "10000".parse().unwrap(),
        target: "00a329c0648769a73afac7f9381e08fb43dbea72".parse().unwrap(),
        value: U256::ZERO,
        gas: U256::new(0xffff_ffff),
        gas_price: U256::ZERO,
        call: Some(Call::new(
            "f",
            vec![AbiValue::Uint {
                bits: 256,
                value: U256::from(x),
            }],
        )),
        delay: Delay::default(),
    }
}

pub fn seq(xs: &[u64]) -> TxSequence {
    TxSequence::new(xs.iter().map(|x| f(*x)).collect())
}

fn arg_of(tx: &Transaction) -> Option<U256> {
    match tx.call.as_ref()?.args.first()? {
        AbiValue::Uint { value, .. } => Some(*value),
        _ => None,
    }
}

/// Contract `f(uint256 x) { if (x > 100) { .. } last = x; }`, one branch at
/// `BRANCH_PC`, `last` in slot 0.
#[derive(Debug, Default)]
pub struct MockEngine {
    pub always_timeout: bool,
    pub solve_calls: AtomicUsize,
    pub replay_calls: AtomicUsize,
}

impl MockEngine {
    pub fn timing_out() -> Self {
        Self {
            always_timeout: true,
            ..Default::default()
        }
    }

    pub fn solve_calls(&self) -> usize {
        self.solve_calls.load(Ordering::SeqCst)
    }
}

impl SymbolicEngine for MockEngine {
    fn replay(&self, req: &ReplayRequest<'_>) -> Result<ReplayReport, EngineError> {
        self.replay_calls.fetch_add(1, Ordering::SeqCst);
        let mut last = U256::ZERO;
        let txs = req
            .seq
            .txs()
            .iter()
            .map(|tx| {
                let branches = arg_of(tx)
                    .map(|x| {
                        let storage = if req.with_storage {
                            vec![(U256::ZERO, last)]
                        } else {
                            Vec::new()
                        };
                        last = x;
                        vec![RawBranch {
                            pc: BRANCH_PC,
                            taken: x > U256::new(100),
                            storage,
                        }]
                    })
                    .unwrap_or_default();
                TxReplay { branches }
            })
            .collect();
        Ok(ReplayReport { txs })
    }

    fn solve(&self, req: &SolveRequest<'_>) -> Result<SolveReply, EngineError> {
        self.solve_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_timeout {
            return Err(EngineError::Timeout);
        }
        if req.target.pc != BRANCH_PC || req.branch_index != 0 {
            return Ok(SolveReply::Unsat);
        }
        let x = if req.target == BranchId::new(BRANCH_PC, true) {
            101
        } else {
            0
        };
        let mut tx = req.template.clone();
        tx.call = Some(Call::new(
            "f",
            vec![AbiValue::Uint {
                bits: 256,
                value: U256::from(x as u64),
            }],
        ));
        Ok(SolveReply::Sat(tx))
    }
}

/// Writes prepared sequences into the corpus on every run.
pub struct MockCampaign {
    dir: PathBuf,
    inputs: Vec<Vec<TxSequence>>,
    fail_at: Option<usize>,
    broken: Vec<usize>,
    run: usize,
    seq_lens: Arc<Mutex<Vec<usize>>>,
}

impl MockCampaign {
    pub fn new(corpus_dir: &Path) -> Self {
        Self {
            dir: corpus_dir.to_path_buf(),
            inputs: Vec::new(),
            fail_at: None,
            broken: Vec::new(),
            run: 0,
            seq_lens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sequences found by each run, in run order.
    pub fn with_inputs(mut self, inputs: Vec<Vec<TxSequence>>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn fail_at(mut self, run: usize) -> Self {
        self.fail_at = Some(run);
        self
    }

    /// Leave the coverage dir unreadable after these runs.
    pub fn broken_at(mut self, runs: &[usize]) -> Self {
        self.broken = runs.to_vec();
        self
    }

    pub fn seq_lens(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.seq_lens)
    }
}

impl Campaign for MockCampaign {
    fn run(&mut self, seq_len: usize) -> Result<CampaignReport, FuzzerError> {
        let run = self.run;
        self.run += 1;
        self.seq_lens.lock().unwrap().push(seq_len);
        if self.fail_at == Some(run) {
            return Err(FuzzerError::Other("campaign crashed".to_string()));
        }

        let cov = self.dir.join(COVERAGE_DIR);
        if self.broken.contains(&run) {
            if cov.is_dir() {
                remove_dir_all(&cov)?;
            }
            write(&cov, b"")?;
            return Ok(CampaignReport::default());
        }
        if cov.is_file() {
            remove_file(&cov)?;
        }
        create_dir_all(&cov)?;
        for (i, s) in self.inputs.get(run).into_iter().flatten().enumerate() {
            let data = encode_sequence(s).map_err(|e| FuzzerError::Other(e.to_string()))?;
            write(cov.join(format!("fuzz-{}-{}.txt", run, i)), data)?;
        }
        Ok(CampaignReport {
            unique_instructions: Some(run as u64 + 1),
            ..Default::default()
        })
    }
}
