//! Backlog of branches waiting for the solver.

use crate::{
    branch::BranchId,
    coverage::{Candidate, CoverageKey},
    tx::TxSequence,
    HashSet,
};
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt,
    sync::Mutex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    DataflowSeed,
    CoverageGap,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::DataflowSeed => write!(f, "seed"),
            Origin::CoverageGap => write!(f, "gap"),
        }
    }
}

pub const DEFAULT_PRIORITY: u32 = 16;

#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Replayed sequence the target was found in, truncated after `tx_index`.
    pub seed: TxSequence,
    pub tx_index: usize,
    pub branch_index: usize,
    pub target: BranchId,
    /// Coverage key reaching `target` would discover.
    pub key: CoverageKey,
    pub origin: Origin,
    pub priority: u32,
    pub timeouts: u32,
    pub errors: u32,
}

impl WorkItem {
    pub fn new(seed: &TxSequence, c: Candidate, origin: Origin) -> Self {
        Self {
            seed: seed.prefix(c.tx_index + 1),
            tx_index: c.tx_index,
            branch_index: c.branch_index,
            target: c.target,
            key: c.key,
            origin,
            priority: DEFAULT_PRIORITY,
            timeouts: 0,
            errors: 0,
        }
    }

    /// Transactions kept as is, the solver appends one new transaction.
    pub fn prefix(&self) -> TxSequence {
        self.seed.prefix(self.tx_index)
    }

    fn work_key(&self) -> WorkKey {
        (self.prefix(), self.key.clone())
    }
}

type WorkKey = (TxSequence, CoverageKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Seeds first, then higher priority, then shorter prefix.
    Incremental,
    /// Discovery order.
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Solved,
    Unsat,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Will never be queued again.
    Retired,
    /// Back in the queue with decayed priority.
    Requeued,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub timeout_retries: u32,
    pub error_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            timeout_retries: 2,
            error_retries: 1,
        }
    }
}

type Rank = (bool, u32, Reverse<usize>, Reverse<u64>);

#[derive(Debug)]
struct Queued {
    rank: Rank,
    item: WorkItem,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

#[derive(Debug)]
struct Inner {
    heap: BinaryHeap<Queued>,
    /// Queued or in flight.
    pending: HashSet<WorkKey>,
    in_flight: usize,
    retired: HashSet<WorkKey>,
    policy: QueuePolicy,
    next_seq: u64,
    config: QueueConfig,
}

impl Inner {
    fn rank(&self, item: &WorkItem, seq: u64) -> Rank {
        match self.policy {
            QueuePolicy::Incremental => (
                item.origin == Origin::DataflowSeed,
                item.priority,
                Reverse(item.tx_index),
                Reverse(seq),
            ),
            QueuePolicy::Fifo => (false, 0, Reverse(0), Reverse(seq)),
        }
    }

    fn enqueue(&mut self, item: WorkItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let rank = self.rank(&item, seq);
        self.heap.push(Queued { rank, item });
    }
}

/// Prioritized, deduplicated work items, safe to pop from many threads.
#[derive(Debug)]
pub struct SeedQueue {
    inner: Mutex<Inner>,
}

impl SeedQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                pending: HashSet::new(),
                in_flight: 0,
                retired: HashSet::new(),
                policy: QueuePolicy::Fifo,
                next_seq: 0,
                config,
            }),
        }
    }

    /// Returns false if an identical item is queued, in flight or retired.
    pub fn push(&self, item: WorkItem) -> bool {
        let key = item.work_key();
        let mut inner = self.inner.lock().unwrap();
        if inner.retired.contains(&key) || !inner.pending.insert(key) {
            return false;
        }
        inner.enqueue(item);
        true
    }

    /// The popped item stays reserved until it's completed.
    pub fn pop(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock().unwrap();
        let q = inner.heap.pop()?;
        inner.in_flight += 1;
        Some(q.item)
    }

    pub fn complete(&self, mut item: WorkItem, c: Completion) -> Disposition {
        let key = item.work_key();
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        let retry = match c {
            Completion::Solved | Completion::Unsat => false,
            Completion::Timeout => {
                item.timeouts += 1;
                item.timeouts <= inner.config.timeout_retries
            }
            Completion::Error => {
                item.errors += 1;
                item.errors <= inner.config.error_retries
            }
        };
        if retry {
            item.priority /= 2;
            inner.enqueue(item);
            Disposition::Requeued
        } else {
            inner.pending.remove(&key);
            inner.retired.insert(key);
            Disposition::Retired
        }
    }

    /// Retire an item without solving it, e.g. its key got covered meanwhile.
    pub fn discard(&self, item: WorkItem) {
        self.complete(item, Completion::Solved);
    }

    pub fn set_policy(&self, policy: QueuePolicy) {
        let mut inner = self.inner.lock().unwrap();
        if inner.policy == policy {
            return;
        }
        inner.policy = policy;
        let old = std::mem::take(&mut inner.heap).into_sorted_vec();
        // re-rank in the old order, highest first
        for q in old.into_iter().rev() {
            inner.enqueue(q.item);
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.inner.lock().unwrap().policy
    }

    /// Number of queued items, in-flight ones excluded.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().in_flight
    }

    pub fn retired(&self) -> usize {
        self.inner.lock().unwrap().retired.len()
    }
}

impl Default for SeedQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
