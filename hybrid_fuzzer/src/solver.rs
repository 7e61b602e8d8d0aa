//! Work items in, candidate transactions out.

use hybrid_core::{
    engine::{EngineError, SolveReply, SolveRequest, SymbolicEngine},
    queue::{Completion, WorkItem},
    tx::Transaction,
};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    /// Appended to the item's prefix this should reach the target, unverified.
    Solved(Transaction),
    Unsat,
    Timeout,
    Error(String),
}

impl SolveOutcome {
    pub fn completion(&self) -> Completion {
        match self {
            SolveOutcome::Solved(_) => Completion::Solved,
            SolveOutcome::Unsat => Completion::Unsat,
            SolveOutcome::Timeout => Completion::Timeout,
            SolveOutcome::Error(_) => Completion::Error,
        }
    }
}

#[derive(Clone)]
pub struct SolverAdapter {
    engine: Arc<dyn SymbolicEngine>,
}

impl SolverAdapter {
    pub fn new(engine: Arc<dyn SymbolicEngine>) -> Self {
        Self { engine }
    }

    pub fn solve(&self, item: &WorkItem, timeout: Duration) -> SolveOutcome {
        let template = match item.seed.get(item.tx_index) {
            Some(t) => t,
            None => {
                return SolveOutcome::Error(format!(
                    "no tx {} in a seed of {} txs",
                    item.tx_index,
                    item.seed.len()
                ))
            }
        };
        let prefix = item.prefix();
        let req = SolveRequest {
            prefix: &prefix,
            template,
            branch_index: item.branch_index,
            target: item.target,
            timeout,
        };
        match self.engine.solve(&req) {
            Ok(SolveReply::Sat(tx)) => SolveOutcome::Solved(tx),
            Ok(SolveReply::Unsat) => SolveOutcome::Unsat,
            Err(EngineError::Timeout) => SolveOutcome::Timeout,
            Err(e) => SolveOutcome::Error(e.to_string()),
        }
    }
}
