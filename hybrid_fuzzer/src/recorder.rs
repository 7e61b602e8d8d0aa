//! Replays sequences through the symbolic engine and turns the reported
//! branches into traces.

use hybrid_core::{
    branch::{BranchEvent, BranchId, Trace},
    coverage::StorageDigester,
    engine::{EngineError, ReplayRequest, SymbolicEngine},
    tx::TxSequence,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("replay of {len} txs reported {got} txs")]
    TxCount { len: usize, got: usize },
    #[error("non-deterministic replay: {0}")]
    Nondeterministic(String),
    #[error("replay timed out")]
    Timeout,
    #[error("engine: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for RecordError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Nondeterministic(r) => RecordError::Nondeterministic(r),
            EngineError::Timeout => RecordError::Timeout,
            e => RecordError::Engine(e),
        }
    }
}

#[derive(Clone)]
pub struct TraceRecorder {
    engine: Arc<dyn SymbolicEngine>,
    digester: Option<Arc<dyn StorageDigester>>,
    timeout: Duration,
}

impl TraceRecorder {
    pub fn new(engine: Arc<dyn SymbolicEngine>, timeout: Duration) -> Self {
        Self {
            engine,
            digester: None,
            timeout,
        }
    }

    /// Attach a storage digest to every branch event.
    pub fn with_digester(mut self, digester: Arc<dyn StorageDigester>) -> Self {
        self.digester = Some(digester);
        self
    }

    pub fn record(&self, seq: &TxSequence) -> Result<Trace, RecordError> {
        let report = self.engine.replay(&ReplayRequest {
            seq,
            with_storage: self.digester.is_some(),
            timeout: self.timeout,
        })?;
        if report.txs.len() != seq.len() {
            return Err(RecordError::TxCount {
                len: seq.len(),
                got: report.txs.len(),
            });
        }

        let mut events = Vec::new();
        for (tx_index, tx) in report.txs.iter().enumerate() {
            for (index, b) in tx.branches.iter().enumerate() {
                events.push(BranchEvent {
                    branch: BranchId::new(b.pc, b.taken),
                    tx_index,
                    index,
                    storage: self.digester.as_ref().map(|d| d.digest(&b.storage)),
                });
            }
        }
        Ok(Trace::new(seq.clone(), events))
    }
}
