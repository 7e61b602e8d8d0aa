//! Wrappers for the external components driven by hybrid-echidna.

pub mod echidna;
pub mod engine;
pub mod io;
pub mod slither;

pub use hybrid_core::{HashMap, HashSet};
