//! Boundary to the symbolic execution engine.

use crate::{
    branch::BranchId,
    tx::{Transaction, TxSequence},
};
use ethnum::U256;
use std::time::Duration;
use thiserror::Error;

/// One branch executed during a concrete replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBranch {
    pub pc: u64,
    pub taken: bool,
    /// Storage slots of the target contract read or written so far, only
    /// filled when requested.
    pub storage: Vec<(U256, U256)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxReplay {
    pub branches: Vec<RawBranch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub txs: Vec<TxReplay>,
}

#[derive(Debug, Clone)]
pub struct ReplayRequest<'a> {
    pub seq: &'a TxSequence,
    pub with_storage: bool,
    pub timeout: Duration,
}

/// Ask for a transaction that, sent after `prefix`, follows the first
/// `branch_index` branches `template` took and then goes to `target`.
#[derive(Debug, Clone)]
pub struct SolveRequest<'a> {
    pub prefix: &'a TxSequence,
    pub template: &'a Transaction,
    pub branch_index: usize,
    pub target: BranchId,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveReply {
    Sat(Transaction),
    Unsat,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine timed out")]
    Timeout,
    #[error("non-deterministic replay: {0}")]
    Nondeterministic(String),
    #[error("engine crashed: {0}")]
    Crash(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub trait SymbolicEngine: Send + Sync {
    fn replay(&self, req: &ReplayRequest<'_>) -> Result<ReplayReport, EngineError>;

    fn solve(&self, req: &SolveRequest<'_>) -> Result<SolveReply, EngineError>;
}
