//! Concrete seed sequences from the dataflow generator.

use crate::HashMap;
use ethnum::{I256, U256};
use hybrid_core::{
    dataflow::{DataflowGraph, SeedGenerator},
    tx::{AbiValue, Address, Call, Delay, Transaction, TxSequence},
    RngType,
};

/// Gas echidna gives a transaction by default.
const DEFAULT_GAS: u128 = 12_500_000;

fn default_arg(ty: &str) -> Option<AbiValue> {
    let bits = |s: &str| -> Option<u16> {
        if s.is_empty() {
            return Some(256);
        }
        let n = s.parse::<u16>().ok()?;
        if n == 0 || n > 256 || n % 8 != 0 {
            return None;
        }
        Some(n)
    };
    let v = match ty {
        "address" => AbiValue::Address(Address::default()),
        "bool" => AbiValue::Bool(false),
        "bytes" => AbiValue::Bytes(Vec::new()),
        "string" => AbiValue::String(String::new()),
        _ => {
            if let Some(n) = ty.strip_prefix("uint") {
                AbiValue::Uint {
                    bits: bits(n)?,
                    value: U256::ZERO,
                }
            } else if let Some(n) = ty.strip_prefix("int") {
                AbiValue::Int {
                    bits: bits(n)?,
                    value: I256::ZERO,
                }
            } else if let Some(n) = ty.strip_prefix("bytes") {
                let n = n.parse::<usize>().ok().filter(|n| (1..=32).contains(n))?;
                AbiValue::FixedBytes(vec![0; n])
            } else {
                return None;
            }
        }
    };
    Some(v)
}

/// Call with all-zero arguments for a signature like `f(uint256,bool)`.
///
/// Arrays and tuples are not supported.
pub fn default_call(sig: &str) -> Option<Call> {
    let open = sig.find('(')?;
    let name = &sig[..open];
    let args = sig[open + 1..].strip_suffix(')')?;
    if name.is_empty() || args.contains(|c| c == '(' || c == '[') {
        return None;
    }
    let args = if args.is_empty() {
        Vec::new()
    } else {
        args.split(',')
            .map(|t| default_arg(t.trim()))
            .collect::<Option<Vec<_>>>()?
    };
    Some(Call::new(name, args))
}

/// Turns generated function sequences into transactions, reusing calls seen
/// in the corpus as templates where possible.
#[derive(Debug)]
pub struct IncrementalSeeder {
    gen: SeedGenerator,
    templates: HashMap<String, Transaction>,
    base: Transaction,
}

impl IncrementalSeeder {
    pub fn new(graph: DataflowGraph, rng: RngType, sender: Address, target: Address) -> Self {
        Self {
            gen: SeedGenerator::new(graph, rng),
            templates: HashMap::new(),
            base: Transaction {
                sender,
                target,
                value: U256::ZERO,
                gas: U256::new(DEFAULT_GAS),
                gas_price: U256::ZERO,
                call: None,
                delay: Delay::default(),
            },
        }
    }

    /// Remember the first call of every function in `seq`.
    pub fn learn(&mut self, seq: &TxSequence) {
        for tx in seq.txs() {
            if let Some(sig) = tx.signature() {
                self.templates.entry(sig).or_insert_with(|| tx.clone());
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.gen.depth()
    }

    /// Step the generator up to `depth` and return the sequences of that depth.
    ///
    /// Empty once the generator is exhausted or already past `depth`.
    pub fn advance_to(&mut self, depth: usize) -> Vec<TxSequence> {
        if self.gen.depth() >= depth {
            return Vec::new();
        }
        while self.gen.depth() < depth {
            if self.gen.step() == 0 {
                return Vec::new();
            }
        }
        let seqs = self
            .gen
            .current()
            .iter()
            .filter_map(|sigs| self.concretize(sigs))
            .collect::<Vec<_>>();
        log::info!("dataflow depth {}: {} seed sequences", depth, seqs.len());
        seqs
    }

    fn template(&self, sig: &str) -> Option<Transaction> {
        if let Some(t) = self.templates.get(sig) {
            return Some(t.clone());
        }
        let call = default_call(sig)?;
        Some(Transaction {
            call: Some(call),
            ..self.base.clone()
        })
    }

    fn concretize(&self, sigs: &[&str]) -> Option<TxSequence> {
        let txs = sigs
            .iter()
            .map(|s| self.template(s))
            .collect::<Option<Vec<_>>>();
        if txs.is_none() {
            log::debug!("no template for seed {:?}", sigs);
        }
        txs.map(TxSequence::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::f;
    use rand::SeedableRng;

    #[test]
    fn default_calls() {
        let c = default_call("transfer(address,uint128)").unwrap();
        assert_eq!(c.signature(), "transfer(address,uint128)");
        assert_eq!(default_call("init()").unwrap().args.len(), 0);
        assert_eq!(
            default_call("g(bytes4,int)").unwrap().signature(),
            "g(bytes4,int256)"
        );
        assert!(default_call("h(uint256[])").is_none());
        assert!(default_call("h((uint256,bool))").is_none());
        assert!(default_call("h(uint7)").is_none());
        assert!(default_call("nope").is_none());
    }

    fn graph() -> DataflowGraph {
        let mut g = DataflowGraph::new();
        g.add_dataflow("set(uint256)", "f(uint256)");
        g.add_function("odd(uint256[])");
        g
    }

    #[test]
    fn seeds_per_depth() {
        let sender = "10000".parse().unwrap();
        let target = "00a329c0648769a73afac7f9381e08fb43dbea72".parse().unwrap();
        let mut s = IncrementalSeeder::new(graph(), RngType::seed_from_u64(0), sender, target);
        s.learn(&TxSequence::new(vec![f(42)]));

        let d1 = s.advance_to(1);
        // odd() has no template and no default
        assert_eq!(d1.len(), 2);
        assert!(d1.contains(&TxSequence::new(vec![f(42)])));

        let d2 = s.advance_to(2);
        assert_eq!(d2.len(), 1);
        let txs = d2[0].txs();
        assert_eq!(txs[0].signature().unwrap(), "set(uint256)");
        assert_eq!(txs[0].sender, sender);
        assert_eq!(txs[1], f(42));

        assert!(s.advance_to(2).is_empty());
        assert!(s.advance_to(3).is_empty());
    }
}
