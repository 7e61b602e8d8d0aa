//! Dataflow between contract functions and seed sequences derived from it.

use crate::{HashMap, RngType};
use rand::seq::{index::sample, SliceRandom};

/// Functions of one contract, with an edge from every function that writes a
/// piece of state to every function that reads it.
#[derive(Debug, Clone, Default)]
pub struct DataflowGraph {
    funcs: Vec<String>,
    ids: HashMap<String, usize>,
    parents: Vec<Vec<usize>>,
}

impl DataflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function by signature, does nothing if it exists.
    pub fn add_function(&mut self, sig: &str) -> usize {
        if let Some(id) = self.ids.get(sig) {
            return *id;
        }
        let id = self.funcs.len();
        self.funcs.push(sig.to_string());
        self.ids.insert(sig.to_string(), id);
        self.parents.push(Vec::new());
        id
    }

    /// `writer` modifies data used by `reader`.
    pub fn add_dataflow(&mut self, writer: &str, reader: &str) {
        let w = self.add_function(writer);
        let r = self.add_function(reader);
        let ps = &mut self.parents[r];
        if let Err(i) = ps.binary_search(&w) {
            ps.insert(i, w);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub fn functions(&self) -> &[String] {
        &self.funcs
    }

    pub fn parents(&self, sig: &str) -> Vec<&str> {
        self.ids
            .get(sig)
            .map(|id| self.parents[*id].iter().map(|p| &self.funcs[*p][..]).collect())
            .unwrap_or_default()
    }
}

/// Grows function sequences by one dataflow step at a time.
///
/// Depth 1 calls every function once, each further step prefixes every
/// sequence with every non-empty combination of the parents of its first call.
#[derive(Debug)]
pub struct SeedGenerator {
    graph: DataflowGraph,
    current: Vec<Vec<usize>>,
    depth: usize,
    rng: RngType,
    max_parents: usize,
    max_sequences: usize,
}

impl SeedGenerator {
    pub const MAX_PARENTS: usize = 6;
    pub const MAX_SEQUENCES: usize = 256;

    pub fn new(graph: DataflowGraph, rng: RngType) -> Self {
        Self::with_limits(graph, rng, Self::MAX_PARENTS, Self::MAX_SEQUENCES)
    }

    pub fn with_limits(
        graph: DataflowGraph,
        rng: RngType,
        max_parents: usize,
        max_sequences: usize,
    ) -> Self {
        Self {
            graph,
            current: Vec::new(),
            depth: 0,
            rng,
            max_parents: max_parents.clamp(1, 16),
            max_sequences: max_sequences.max(1),
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn graph(&self) -> &DataflowGraph {
        &self.graph
    }

    /// Move to the next depth, returns the number of sequences produced.
    pub fn step(&mut self) -> usize {
        if self.depth == 0 {
            self.current = (0..self.graph.len()).map(|f| vec![f]).collect();
        } else {
            self.inc_depth();
        }
        self.depth += 1;
        if self.current.len() > self.max_sequences {
            self.current.shuffle(&mut self.rng);
            self.current.truncate(self.max_sequences);
        }
        log::debug!(
            "dataflow depth {}: {} sequences",
            self.depth,
            self.current.len()
        );
        self.current.len()
    }

    fn inc_depth(&mut self) {
        let mut next = Vec::new();
        for seq in self.current.iter() {
            let mut parents = self.graph.parents[seq[0]].clone();
            if parents.len() > self.max_parents {
                let picked = sample(&mut self.rng, parents.len(), self.max_parents);
                let mut p = picked.iter().map(|i| parents[i]).collect::<Vec<_>>();
                p.sort_unstable();
                parents = p;
            }
            for mask in 1_u32..(1 << parents.len()) {
                let mut s = parents
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, p)| *p)
                    .collect::<Vec<_>>();
                s.extend_from_slice(seq);
                next.push(s);
            }
        }
        self.current = next;
    }

    /// Sequences of the current depth, as function signatures.
    pub fn current(&self) -> Vec<Vec<&str>> {
        self.current
            .iter()
            .map(|s| s.iter().map(|f| &self.graph.funcs[*f][..]).collect())
            .collect()
    }
}
