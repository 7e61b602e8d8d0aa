//! The seed, fuzz, replay/solve, merge loop.
//!
//! The controller thread is the only writer of the coverage state. Replays and
//! solver calls run on a bounded pool of scoped worker threads that receive
//! tasks over a channel and send their results back; the controller registers
//! results one at a time.

use crate::{
    config::Config,
    corpus::{CorpusError, CorpusSync, Provenance},
    recorder::{RecordError, TraceRecorder},
    seeding::IncrementalSeeder,
    solver::{SolveOutcome, SolverAdapter},
    stats::Stats,
    util::Stop,
    worker_log::set_worker_id,
};
use hybrid_core::{
    branch::Trace,
    coverage::{Coverage, KeyBuilder, KeyError, Sha1Digester},
    engine::SymbolicEngine,
    queue::{Completion, Disposition, Origin, QueuePolicy, SeedQueue, WorkItem},
    tx::TxSequence,
};
use hybrid_wrapper::echidna::{Campaign, FuzzerError};
use std::{
    fmt,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};
use thiserror::Error;

/// Consecutive inaccessible corpus pulls tolerated before giving up.
pub const MAX_CORPUS_FAILURES: usize = 3;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("fuzzer failed: {0}")]
    FuzzerProcess(#[from] FuzzerError),
    #[error("corpus: {0}")]
    Corpus(#[from] CorpusError),
    #[error("coverage key: {0}")]
    Key(#[from] KeyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    IncrementalSeed,
    Fuzz,
    ReplaySolve,
    Merge,
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Init => "INIT",
            State::IncrementalSeed => "INCREMENTAL_SEED",
            State::Fuzz => "FUZZ",
            State::ReplaySolve => "REPLAY_SOLVE",
            State::Merge => "MERGE",
            State::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    FixedPoint,
    MaxIters,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub reason: StopReason,
    pub iterations: u64,
    /// Coverage size after every iteration.
    pub coverage_history: Vec<usize>,
    pub solved: u64,
}

/// Sequence length of each fuzzing campaign.
///
/// With incremental seeding it grows by one up to the threshold, then doubles
/// up to the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    seq_len: usize,
    max: usize,
    threshold: usize,
    incremental: bool,
}

impl Schedule {
    pub fn new(max: usize, threshold: usize, incremental: bool) -> Self {
        let max = max.max(1);
        Self {
            seq_len: if incremental { 1 } else { max },
            max,
            threshold: threshold.clamp(1, max),
            incremental,
        }
    }

    #[inline]
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Whether this iteration still gets dataflow seeds.
    pub fn seeding(&self) -> bool {
        self.incremental && self.seq_len <= self.threshold
    }

    pub fn finished(&self) -> bool {
        self.seq_len >= self.max
    }

    pub fn advance(&mut self) {
        if self.seq_len < self.threshold {
            self.seq_len += 1;
        } else {
            self.seq_len = (self.seq_len * 2).min(self.max);
        }
    }
}

enum Task {
    Replay(usize, TxSequence),
    Solve(WorkItem),
}

enum Done {
    Replayed(usize, Result<Trace, RecordError>),
    Solved(WorkItem, Verdict),
}

enum Verdict {
    /// The solution was replayed and reaches the item's key.
    Verified(Trace),
    Rejected(String),
    Unsat,
    Timeout,
    Error(String),
}

impl Verdict {
    fn completion(&self) -> Completion {
        match self {
            Verdict::Verified(_) => Completion::Solved,
            Verdict::Unsat => Completion::Unsat,
            Verdict::Timeout => Completion::Timeout,
            Verdict::Rejected(_) | Verdict::Error(_) => Completion::Error,
        }
    }
}

/// Read-only pieces a worker needs.
#[derive(Clone)]
struct WorkerCtx {
    recorder: TraceRecorder,
    solver: SolverAdapter,
    builder: KeyBuilder,
    solver_timeout: Duration,
}

impl WorkerCtx {
    fn handle(&self, task: Task) -> Done {
        match task {
            Task::Replay(i, seq) => Done::Replayed(i, self.recorder.record(&seq)),
            Task::Solve(item) => {
                let verdict = self.solve(&item);
                Done::Solved(item, verdict)
            }
        }
    }

    fn solve(&self, item: &WorkItem) -> Verdict {
        let timeout = match item.origin {
            Origin::DataflowSeed => self.solver_timeout * 2,
            Origin::CoverageGap => self.solver_timeout,
        };
        worker_debug!("solving {} for {} ({})", item.target, item.seed, item.origin);
        let tx = match self.solver.solve(item, timeout) {
            SolveOutcome::Solved(tx) => tx,
            SolveOutcome::Unsat => return Verdict::Unsat,
            SolveOutcome::Timeout => return Verdict::Timeout,
            SolveOutcome::Error(e) => return Verdict::Error(e),
        };
        let seq = item.prefix().extended(tx);
        let trace = match self.recorder.record(&seq) {
            Ok(t) => t,
            Err(e) => {
                worker_warn!("solution for {} does not replay: {}", item.target, e);
                return Verdict::Rejected(format!("replay of solution failed: {}", e));
            }
        };
        match self.builder.reaches(&trace, &item.key) {
            Ok(true) => {
                worker_info!("verified solution for {}", item.target);
                Verdict::Verified(trace)
            }
            Ok(false) => Verdict::Rejected(format!("solution misses {}", item.target)),
            Err(e) => Verdict::Rejected(e.to_string()),
        }
    }
}

pub struct Controller {
    config: Config,
    coverage: Coverage,
    queue: SeedQueue,
    corpus: CorpusSync,
    campaign: Box<dyn Campaign>,
    ctx: WorkerCtx,
    seeder: Option<IncrementalSeeder>,
    stats: Arc<Stats>,
    stop: Stop,
    state: State,
    solved: u64,
}

impl Controller {
    pub fn new(
        config: Config,
        campaign: Box<dyn Campaign>,
        engine: Arc<dyn SymbolicEngine>,
        corpus: CorpusSync,
        stats: Arc<Stats>,
        stop: Stop,
    ) -> Self {
        let coverage = Coverage::new(config.cov_mode);
        let mut recorder = TraceRecorder::new(Arc::clone(&engine), config.replay_timeout);
        if config.cov_mode.needs_storage() {
            recorder = recorder.with_digester(Arc::new(Sha1Digester));
        }
        let ctx = WorkerCtx {
            recorder,
            solver: SolverAdapter::new(engine),
            builder: *coverage.builder(),
            solver_timeout: config.solver_timeout,
        };
        Self {
            queue: SeedQueue::new(config.queue_config()),
            config,
            coverage,
            corpus,
            campaign,
            ctx,
            seeder: None,
            stats,
            stop,
            state: State::Init,
            solved: 0,
        }
    }

    pub fn with_seeder(mut self, seeder: IncrementalSeeder) -> Self {
        self.seeder = Some(seeder);
        self
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    pub fn queue(&self) -> &SeedQueue {
        &self.queue
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn enter(&mut self, state: State) {
        log::debug!("{} -> {}", self.state, state);
        self.state = state;
    }

    pub fn run(&mut self) -> Result<Summary, RunError> {
        self.init()?;

        let mut schedule = Schedule::new(
            self.config.seq_len,
            self.config.incremental_threshold,
            self.config.incremental && self.seeder.is_some(),
        );
        let mut iterations = 0;
        let mut history = Vec::new();
        let mut corpus_failures = 0;

        let reason = loop {
            if self.stop.stop_soon() {
                break StopReason::Cancelled;
            }
            if let Some(max) = self.config.max_iters {
                if iterations >= max {
                    break StopReason::MaxIters;
                }
            }
            iterations += 1;
            self.stats.inc_iterations();
            self.stats.set_seq_len(schedule.seq_len() as u64);
            let before = self.coverage.len();

            let mut seeds = 0;
            if schedule.seeding() {
                self.enter(State::IncrementalSeed);
                self.queue.set_policy(QueuePolicy::Incremental);
                seeds = self.incremental_seed(schedule.seq_len())?;
            } else {
                self.queue.set_policy(QueuePolicy::Fifo);
            }

            if self.stop.stop_soon() {
                break StopReason::Cancelled;
            }
            self.enter(State::Fuzz);
            log::info!("iteration {}: fuzzing with seq-len {}", iterations, schedule.seq_len());
            let report = self.campaign.run(schedule.seq_len())?;
            if let Some(n) = report.unique_instructions {
                self.stats.set_unique_instructions(n);
            }
            if let Some(n) = report.covered_lines {
                self.stats.set_covered_lines(n);
            }
            log::info!(
                "campaign done in {}s, unique instructions: {}",
                report.duration.as_secs(),
                report.unique_instructions.map_or_else(|| "-".to_string(), |n| n.to_string())
            );

            self.enter(State::ReplaySolve);
            let entries = match self.corpus.pull() {
                Ok(e) => {
                    corpus_failures = 0;
                    e
                }
                Err(e) => {
                    corpus_failures += 1;
                    log::warn!("corpus corruption, skipping replay/solve: {}", e);
                    if corpus_failures >= MAX_CORPUS_FAILURES {
                        return Err(e.into());
                    }
                    history.push(self.coverage.len());
                    schedule.advance();
                    continue;
                }
            };
            let new_inputs = entries.len();
            self.stats.add_fuzzer_inputs(new_inputs as u64);
            let seqs = entries.into_iter().map(|e| e.seq).collect::<Vec<_>>();
            let (_, new_from_inputs) = self.replay_and_register(seqs, Origin::CoverageGap)?;
            let solved = self.drain()?;

            self.enter(State::Merge);
            let pushed = self.corpus.push(&solved, Provenance::Solved)?;
            self.stats.set_corpus_size(self.corpus.len() as u64);

            let new_keys = self.coverage.len() - before;
            history.push(self.coverage.len());
            log::info!(
                "iteration {}: {} new inputs ({} new keys), {} solved, {} pushed, {} keys in total, {} queued",
                iterations,
                new_inputs,
                new_from_inputs,
                solved.len(),
                pushed,
                self.coverage.len(),
                self.queue.len()
            );

            if new_keys == 0 && seeds == 0 && schedule.finished() {
                break StopReason::FixedPoint;
            }
            schedule.advance();
        };

        self.enter(State::Done);
        log::info!(
            "done ({:?}) after {} iterations, {} keys, {} solved",
            reason,
            iterations,
            self.coverage.len(),
            self.solved
        );
        Ok(Summary {
            reason,
            iterations,
            coverage_history: history,
            solved: self.solved,
        })
    }

    /// Replay the existing corpus.
    fn init(&mut self) -> Result<(), RunError> {
        self.enter(State::Init);
        let entries = self.corpus.pull()?;
        log::info!("{} sequences in corpus, mode {}", entries.len(), self.coverage.mode());
        let seqs = entries.into_iter().map(|e| e.seq).collect::<Vec<_>>();
        let (_, new) = self.replay_and_register(seqs, Origin::CoverageGap)?;
        log::info!("initial coverage: {} keys ({} new)", self.coverage.len(), new);
        self.stats.set_corpus_size(self.corpus.len() as u64);
        Ok(())
    }

    /// Replay the next dataflow seeds and queue their frontier, returns the
    /// number of seeds written to the corpus.
    fn incremental_seed(&mut self, depth: usize) -> Result<usize, RunError> {
        let seqs = match self.seeder.as_mut() {
            Some(s) => s.advance_to(depth),
            None => return Ok(0),
        };
        if seqs.is_empty() {
            return Ok(0);
        }
        let (replayed, new) = self.replay_and_register(seqs, Origin::DataflowSeed)?;
        let pushed = self.corpus.push(&replayed, Provenance::Seeded)?;
        self.stats.add_seeds(pushed as u64);
        log::info!(
            "seeded {} sequences at depth {}, {} new keys",
            pushed,
            depth,
            new
        );
        Ok(pushed)
    }

    /// Replay `seqs` on the pool, register in input order and queue the
    /// frontier. Returns the sequences that replayed and the new key count.
    fn replay_and_register(
        &mut self,
        seqs: Vec<TxSequence>,
        origin: Origin,
    ) -> Result<(Vec<TxSequence>, usize), RunError> {
        if seqs.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let n = seqs.len();
        let mut traces = Vec::with_capacity(n);
        traces.resize_with(n, || None);
        let tasks = seqs
            .into_iter()
            .enumerate()
            .map(|(i, s)| Task::Replay(i, s))
            .collect::<Vec<_>>();
        run_pool(&self.ctx, self.config.jobs, tasks, |done| {
            if let Done::Replayed(i, r) = done {
                traces[i] = Some(r);
            }
            Ok(true)
        })?;

        let mut replayed = Vec::with_capacity(n);
        let mut new = 0;
        for r in traces.into_iter().flatten() {
            match r {
                Ok(trace) => {
                    new += self.accept(&trace, origin)?;
                    replayed.push(trace.seq);
                }
                Err(e) => log::warn!("replay failed, sequence skipped: {}", e),
            }
        }
        Ok((replayed, new))
    }

    /// Register a trace and queue its unexplored branches.
    fn accept(&mut self, trace: &Trace, origin: Origin) -> Result<usize, RunError> {
        let new = self.coverage.register(trace)?;
        for c in self.coverage.candidates(trace)? {
            self.queue.push(WorkItem::new(&trace.seq, c, origin));
        }
        if let Some(s) = self.seeder.as_mut() {
            s.learn(&trace.seq);
        }
        self.stats.set_coverage(self.coverage.len() as u64);
        self.stats.set_queue_len(self.queue.len() as u64);
        Ok(new)
    }

    /// Hand queued items to the solver workers up to the work budget, returns
    /// verified solutions that added coverage.
    fn drain(&mut self) -> Result<Vec<TxSequence>, RunError> {
        let Self {
            config,
            coverage,
            queue,
            ctx,
            seeder,
            stats,
            stop,
            solved: solved_total,
            ..
        } = self;
        let jobs = config.jobs.max(1);
        let budget = config.work_budget.unwrap_or(usize::MAX);
        let mut solved = Vec::new();
        let mut dispatched = 0;
        let mut error = None;

        thread::scope(|s| {
            let (task_tx, task_rx) = mpsc::channel::<Task>();
            let task_rx = Arc::new(Mutex::new(task_rx));
            let (done_tx, done_rx) = mpsc::channel::<Done>();
            for id in 0..jobs {
                let rx = Arc::clone(&task_rx);
                let done = done_tx.clone();
                let ctx = ctx.clone();
                s.spawn(move || worker_loop(id, &ctx, &rx, &done));
            }
            drop(done_tx);

            let mut in_flight = 0;
            loop {
                while error.is_none() && in_flight < jobs && dispatched < budget && !stop.stop_soon() {
                    let item = match queue.pop() {
                        Some(i) => i,
                        None => break,
                    };
                    if coverage.contains(&item.key) || coverage.is_redundant(&item.key) {
                        queue.discard(item);
                        continue;
                    }
                    if task_tx.send(Task::Solve(item)).is_err() {
                        break;
                    }
                    in_flight += 1;
                    dispatched += 1;
                }
                if in_flight == 0 {
                    break;
                }
                let done = match done_rx.recv() {
                    Ok(d) => d,
                    Err(_) => break,
                };
                in_flight -= 1;
                let (item, verdict) = match done {
                    Done::Solved(item, v) => (item, v),
                    Done::Replayed(..) => continue,
                };
                let completion = verdict.completion();
                match verdict {
                    Verdict::Verified(trace) => {
                        stats.inc_solved();
                        *solved_total += 1;
                        let r = coverage.register(&trace).and_then(|new| {
                            for c in coverage.candidates(&trace)? {
                                queue.push(WorkItem::new(&trace.seq, c, Origin::CoverageGap));
                            }
                            Ok(new)
                        });
                        match r {
                            Ok(new) => {
                                log::info!("solved {}: {} ({} new keys)", item.target, trace.seq, new);
                                if let Some(s) = seeder.as_mut() {
                                    s.learn(&trace.seq);
                                }
                                if new != 0 {
                                    solved.push(trace.seq);
                                }
                            }
                            Err(e) => error = Some(e),
                        }
                    }
                    Verdict::Unsat => {
                        stats.inc_unsat();
                        log::debug!("unsat: {} after {}", item.target, item.prefix());
                    }
                    Verdict::Timeout => stats.inc_timeouts(),
                    Verdict::Rejected(ref e) | Verdict::Error(ref e) => {
                        stats.inc_errors();
                        log::warn!("solver error on {}: {}", item.target, e);
                    }
                }
                let target = item.target;
                if queue.complete(item, completion) == Disposition::Retired
                    && completion == Completion::Timeout
                {
                    log::info!("dropping {} after repeated timeouts", target);
                }
                stats.set_coverage(coverage.len() as u64);
                stats.set_queue_len(queue.len() as u64);
            }
            drop(task_tx);
        });

        if let Some(e) = error {
            return Err(e.into());
        }
        if stop.stop_soon() {
            log::info!("stop requested, {} items left in queue", queue.len());
        }
        Ok(solved)
    }
}

fn worker_loop(id: usize, ctx: &WorkerCtx, rx: &Mutex<mpsc::Receiver<Task>>, done: &mpsc::Sender<Done>) {
    set_worker_id(id);
    loop {
        let task = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let task = match task {
            Ok(t) => t,
            Err(_) => return,
        };
        if done.send(ctx.handle(task)).is_err() {
            return;
        }
    }
}

/// Run `tasks` on `jobs` workers, feeding every result to `f` on the calling
/// thread. `f` returning false stops handing out tasks.
fn run_pool<F>(ctx: &WorkerCtx, jobs: usize, tasks: Vec<Task>, mut f: F) -> Result<(), RunError>
where
    F: FnMut(Done) -> Result<bool, RunError>,
{
    let jobs = jobs.max(1).min(tasks.len().max(1));
    thread::scope(|s| {
        let (task_tx, task_rx) = mpsc::channel::<Task>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (done_tx, done_rx) = mpsc::channel::<Done>();
        for id in 0..jobs {
            let rx = Arc::clone(&task_rx);
            let done = done_tx.clone();
            let ctx = ctx.clone();
            s.spawn(move || worker_loop(id, &ctx, &rx, &done));
        }
        drop(done_tx);

        let n = tasks.len();
        for t in tasks {
            if task_tx.send(t).is_err() {
                break;
            }
        }
        drop(task_tx);
        for _ in 0..n {
            let done = match done_rx.recv() {
                Ok(d) => d,
                Err(_) => break,
            };
            if !f(done)? {
                break;
            }
        }
        Ok(())
    })
}
