use crate::util::Stop;
use serde_derive::Serialize;
use std::{
    fs::write,
    io,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    thread::sleep,
    time::Duration,
};

#[derive(Debug, Default)]
pub struct Stats {
    iterations: AtomicU64,
    seq_len: AtomicU64,
    corpus_size: AtomicU64,
    fuzzer_inputs: AtomicU64,
    seeds: AtomicU64,
    coverage: AtomicU64,
    solved: AtomicU64,
    unsat: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
    queue_len: AtomicU64,
    unique_instructions: AtomicU64,
    covered_lines: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub iterations: u64,
    pub seq_len: u64,
    pub corpus_size: u64,
    pub fuzzer_inputs: u64,
    pub seeds: u64,
    pub coverage: u64,
    pub solved: u64,
    pub unsat: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub queue_len: u64,
    pub unique_instructions: u64,
    pub covered_lines: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_iterations(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_seq_len(&self, n: u64) {
        self.seq_len.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_corpus_size(&self, n: u64) {
        self.corpus_size.store(n, Ordering::Relaxed);
    }

    pub(crate) fn add_fuzzer_inputs(&self, n: u64) {
        self.fuzzer_inputs.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_seeds(&self, n: u64) {
        self.seeds.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set_coverage(&self, n: u64) {
        self.coverage.store(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_solved(&self) {
        self.solved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_unsat(&self) {
        self.unsat.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_queue_len(&self, n: u64) {
        self.queue_len.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_unique_instructions(&self, n: u64) {
        self.unique_instructions.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_covered_lines(&self, n: u64) {
        self.covered_lines.store(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            seq_len: self.seq_len.load(Ordering::Relaxed),
            corpus_size: self.corpus_size.load(Ordering::Relaxed),
            fuzzer_inputs: self.fuzzer_inputs.load(Ordering::Relaxed),
            seeds: self.seeds.load(Ordering::Relaxed),
            coverage: self.coverage.load(Ordering::Relaxed),
            solved: self.solved.load(Ordering::Relaxed),
            unsat: self.unsat.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
            unique_instructions: self.unique_instructions.load(Ordering::Relaxed),
            covered_lines: self.covered_lines.load(Ordering::Relaxed),
        }
    }

    /// Write the current counters as json.
    pub fn dump(&self, path: &Path) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(&self.snapshot())?;
        write(path, data)
    }

    pub fn report(&self, duration: Duration, stop: &Stop) {
        while !stop.stop_soon() {
            sleep(duration);

            let s = self.snapshot();
            log::info!(
                "iter: {}, seq-len: {}, cover: {}, corpus: {}, solved/unsat/timeout/err {}/{}/{}/{}, queue: {}, insts: {}, lines: {}",
                s.iterations,
                s.seq_len,
                s.coverage,
                s.corpus_size,
                s.solved,
                s.unsat,
                s.timeouts,
                s.errors,
                s.queue_len,
                s.unique_instructions,
                s.covered_lines
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_snapshot() {
        let stats = Stats::new();
        stats.inc_iterations();
        stats.inc_solved();
        stats.inc_solved();
        stats.set_coverage(7);
        let s = stats.snapshot();
        assert_eq!((s.iterations, s.solved, s.coverage), (1, 2, 7));

        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("stats.json");
        stats.dump(&f).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&f).unwrap()).unwrap();
        assert_eq!(v["solved"], 2);
        assert_eq!(v["coverage"], 7);
    }
}
