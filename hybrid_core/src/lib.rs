//! Core algorithms and data structures of hybrid-echidna

use ahash::{AHashMap, AHashSet};

pub mod branch;
pub mod coverage;
pub mod dataflow;
pub mod engine;
pub mod queue;
pub mod tx;

pub type HashMap<K, V> = AHashMap<K, V>;
pub type HashSet<V> = AHashSet<V>;
pub type RngType = rand::rngs::SmallRng;
