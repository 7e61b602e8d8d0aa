//! Transactions and transaction sequences.

use ethnum::{I256, U256};
use std::{
    fmt::{self, Write},
    num::ParseIntError,
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;

/// Parse a 256 bits word, either `0x` prefixed hex or decimal.
pub fn parse_word(s: &str) -> Result<U256, ParseIntError> {
    let s = s.trim();
    if let Some(h) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        U256::from_str_radix(h, 16)
    } else {
        U256::from_str_radix(s, 10)
    }
}

/// Parse a signed 256 bits word in decimal, or `0x` prefixed two's complement hex.
pub fn parse_signed_word(s: &str) -> Result<I256, ParseIntError> {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        parse_word(s).map(|w| w.as_i256())
    } else {
        I256::from_str_radix(s, 10)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    #[error("address too long: {0} hex digits")]
    TooLong(usize),
    #[error("bad hex address: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Address {
    pub fn from_word(w: U256) -> Self {
        let bytes = w.to_be_bytes();
        let mut a = [0; 20];
        a.copy_from_slice(&bytes[12..]);
        Address(a)
    }

    pub fn to_word(self) -> U256 {
        let mut bytes = [0; 32];
        bytes[12..].copy_from_slice(&self.0);
        U256::from_be_bytes(bytes)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    /// Short forms like `30000` are left padded, `0x` prefix is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if s.len() > 40 {
            return Err(AddressError::TooLong(s.len()));
        }
        let padded = format!("{:0>40}", s);
        let mut a = [0; 20];
        hex::decode_to_slice(&padded, &mut a)?;
        Ok(Address(a))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Abi encoded argument of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbiValue {
    Uint { bits: u16, value: U256 },
    Int { bits: u16, value: I256 },
    Address(Address),
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
}

impl AbiValue {
    pub fn type_name(&self) -> String {
        match self {
            AbiValue::Uint { bits, .. } => format!("uint{}", bits),
            AbiValue::Int { bits, .. } => format!("int{}", bits),
            AbiValue::Address(_) => "address".to_string(),
            AbiValue::Bool(_) => "bool".to_string(),
            AbiValue::FixedBytes(b) => format!("bytes{}", b.len()),
            AbiValue::Bytes(_) => "bytes".to_string(),
            AbiValue::String(_) => "string".to_string(),
        }
    }
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Uint { value, .. } => write!(f, "{}", value),
            AbiValue::Int { value, .. } => write!(f, "{}", value),
            AbiValue::Address(a) => write!(f, "{}", a),
            AbiValue::Bool(b) => write!(f, "{}", b),
            AbiValue::FixedBytes(b) | AbiValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            AbiValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub function: String,
    pub args: Vec<AbiValue>,
}

impl Call {
    pub fn new(function: impl Into<String>, args: Vec<AbiValue>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }

    /// Solidity signature, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let mut sig = String::with_capacity(self.function.len() + 16);
        sig.push_str(&self.function);
        sig.push('(');
        for (i, arg) in self.args.iter().enumerate() {
            if i != 0 {
                sig.push(',');
            }
            sig.push_str(&arg.type_name());
        }
        sig.push(')');
        sig
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = String::new();
        for (i, arg) in self.args.iter().enumerate() {
            if i != 0 {
                args.push_str(", ");
            }
            write!(args, "{}", arg)?;
        }
        write!(f, "{}({})", self.function, args)
    }
}

/// Time and block number elapsed before the transaction is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Delay {
    pub time: U256,
    pub blocks: U256,
}

impl Delay {
    pub fn is_zero(&self) -> bool {
        self.time == U256::ZERO && self.blocks == U256::ZERO
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub sender: Address,
    pub target: Address,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    /// `None` only lets time pass.
    pub call: Option<Call>,
    pub delay: Delay,
}

impl Transaction {
    pub fn signature(&self) -> Option<String> {
        self.call.as_ref().map(|c| c.signature())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.call.as_ref() {
            Some(c) => write!(f, "{} from {}", c, self.sender)?,
            None => write!(f, "*wait* from {}", self.sender)?,
        }
        if self.value != U256::ZERO {
            write!(f, " value {}", self.value)?;
        }
        if !self.delay.is_zero() {
            write!(f, " delay ({}s, {} blocks)", self.delay.time, self.delay.blocks)?;
        }
        Ok(())
    }
}

/// Immutable sequence of transactions, compared by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxSequence(Arc<[Transaction]>);

impl TxSequence {
    pub fn new(txs: Vec<Transaction>) -> Self {
        Self(Arc::from(txs))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn txs(&self) -> &[Transaction] {
        &self.0
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&Transaction> {
        self.0.get(i)
    }

    /// First `n` transactions of this sequence.
    pub fn prefix(&self, n: usize) -> Self {
        if n >= self.len() {
            return self.clone();
        }
        Self::new(self.0[..n].to_vec())
    }

    /// A new sequence with `tx` appended.
    pub fn extended(&self, tx: Transaction) -> Self {
        let mut txs = Vec::with_capacity(self.len() + 1);
        txs.extend_from_slice(&self.0);
        txs.push(tx);
        Self::new(txs)
    }
}

impl From<Vec<Transaction>> for TxSequence {
    fn from(txs: Vec<Transaction>) -> Self {
        Self::new(txs)
    }
}

impl fmt::Display for TxSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tx) in self.0.iter().enumerate() {
            writeln!(f, "{}: {}", i, tx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn call_f(x: u64) -> Transaction {
        Transaction {
            sender: "10000".parse().unwrap(),
            target: "00a329c0648769a73afac7f9381e08fb43dbea72".parse().unwrap(),
            value: U256::ZERO,
            gas: U256::new(0xffff_ffff),
            gas_price: U256::ZERO,
            call: Some(Call::new(
                "f",
                vec![AbiValue::Uint {
                    bits: 256,
                    value: U256::from(x),
                }],
            )),
            delay: Delay::default(),
        }
    }

    #[test]
    fn address_short_form() {
        let a: Address = "30000".parse().unwrap();
        assert_eq!(a.to_string(), "0x0000000000000000000000000000000000030000");
        let b: Address = "0x0000000000000000000000000000000000030000".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(Address::from_word(a.to_word()), a);
        assert!("0x".repeat(30).parse::<Address>().is_err());
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn address_errors() {
        assert_eq!(
            "0x".repeat(30).parse::<Address>(),
            Err(AddressError::TooLong(58))
        );
        assert_eq!(
            "zz".parse::<Address>(),
            Err(AddressError::Hex(hex::FromHexError::InvalidHexCharacter {
                c: 'z',
                index: 38
            }))
        );
    }

    #[test]
    fn words() {
        assert_eq!(parse_word("0x10").unwrap(), U256::new(16));
        assert_eq!(parse_word("10").unwrap(), U256::new(10));
        assert_eq!(parse_signed_word("-5").unwrap(), I256::new(-5));
        assert_eq!(parse_signed_word(&format!("0x{}", "f".repeat(64))).unwrap(), I256::new(-1));
        assert!(parse_word("0xg").is_err());
    }

    #[test]
    fn signature() {
        let c = Call::new(
            "g",
            vec![
                AbiValue::Address(Address::default()),
                AbiValue::Int {
                    bits: 8,
                    value: I256::new(-1),
                },
                AbiValue::FixedBytes(vec![0; 4]),
            ],
        );
        assert_eq!(c.signature(), "g(address,int8,bytes4)");
        assert_eq!(call_f(1).signature().unwrap(), "f(uint256)");
    }

    #[test]
    fn sequence_structural_eq() {
        let a = TxSequence::new(vec![call_f(1), call_f(2)]);
        let b = TxSequence::new(vec![call_f(1)]).extended(call_f(2));
        assert_eq!(a, b);
        assert_eq!(a.prefix(1), TxSequence::new(vec![call_f(1)]));
        assert_eq!(a.prefix(5), a);
        assert_ne!(a, a.prefix(0));
        assert!(a.prefix(0).is_empty());
    }
}
