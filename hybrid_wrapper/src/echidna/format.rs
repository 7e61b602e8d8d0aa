//! Echidna corpus entry format.
//!
//! A corpus file is a json array of transactions:
//! `{"_call":{"tag":"SolCall","contents":["f",[{"tag":"AbiUInt","contents":[256,"5"]}]]},
//! "_src":"0x..","_dst":"0x..","_gas'":"0x..","_gasprice'":"0x..","_value":"0x..","_delay":["0x..","0x.."]}`

use ethnum::{I256, U256};
use hybrid_core::tx::{
    parse_signed_word, parse_word, AbiValue, Address, Call, Delay, Transaction, TxSequence,
};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad value: {0}")]
    Value(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumRepr {
    Str(String),
    Unsigned(u64),
    Signed(i64),
}

impl NumRepr {
    fn word(self) -> Result<U256, String> {
        match self {
            NumRepr::Str(s) => parse_word(&s).map_err(|e| format!("{}: {}", s, e)),
            NumRepr::Unsigned(n) => Ok(U256::from(n)),
            NumRepr::Signed(n) => Err(format!("negative word: {}", n)),
        }
    }

    fn signed(self) -> Result<I256, String> {
        match self {
            NumRepr::Str(s) => parse_signed_word(&s).map_err(|e| format!("{}: {}", s, e)),
            NumRepr::Unsigned(n) => Ok(I256::from(n)),
            NumRepr::Signed(n) => Ok(I256::from(n)),
        }
    }
}

/// Word written as zero padded hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexWord(pub U256);

impl serde::Serialize for HexWord {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{:064x}", self.0))
    }
}

impl<'de> serde::Deserialize<'de> for HexWord {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = <NumRepr as serde::Deserialize>::deserialize(d)?;
        n.word().map(HexWord).map_err(serde::de::Error::custom)
    }
}

/// Abi integer written in decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecWord(pub U256);

impl serde::Serialize for DecWord {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DecWord {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = <NumRepr as serde::Deserialize>::deserialize(d)?;
        n.word().map(DecWord).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecSigned(pub I256);

impl serde::Serialize for DecSigned {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DecSigned {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = <NumRepr as serde::Deserialize>::deserialize(d)?;
        n.signed().map(DecSigned).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexAddr(pub Address);

impl serde::Serialize for HexAddr {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for HexAddr {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        s.parse().map(HexAddr).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl serde::Serialize for HexBytes {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> serde::Deserialize<'de> for HexBytes {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(d)?;
        let h = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(h).map(HexBytes).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "contents")]
pub enum EchidnaArg {
    AbiUInt(u16, DecWord),
    AbiInt(u16, DecSigned),
    AbiAddress(HexAddr),
    AbiBool(bool),
    AbiBytes(usize, HexBytes),
    AbiBytesDynamic(HexBytes),
    AbiString(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "contents")]
pub enum EchidnaCall {
    SolCall(String, Vec<EchidnaArg>),
    NoCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchidnaTx {
    #[serde(rename = "_call")]
    pub call: EchidnaCall,
    #[serde(rename = "_src")]
    pub src: HexAddr,
    #[serde(rename = "_dst")]
    pub dst: HexAddr,
    #[serde(rename = "_gas'")]
    pub gas: HexWord,
    #[serde(rename = "_gasprice'")]
    pub gas_price: HexWord,
    #[serde(rename = "_value")]
    pub value: HexWord,
    #[serde(rename = "_delay")]
    pub delay: (HexWord, HexWord),
}

impl From<&AbiValue> for EchidnaArg {
    fn from(v: &AbiValue) -> Self {
        match v {
            AbiValue::Uint { bits, value } => EchidnaArg::AbiUInt(*bits, DecWord(*value)),
            AbiValue::Int { bits, value } => EchidnaArg::AbiInt(*bits, DecSigned(*value)),
            AbiValue::Address(a) => EchidnaArg::AbiAddress(HexAddr(*a)),
            AbiValue::Bool(b) => EchidnaArg::AbiBool(*b),
            AbiValue::FixedBytes(b) => EchidnaArg::AbiBytes(b.len(), HexBytes(b.clone())),
            AbiValue::Bytes(b) => EchidnaArg::AbiBytesDynamic(HexBytes(b.clone())),
            AbiValue::String(s) => EchidnaArg::AbiString(s.clone()),
        }
    }
}

impl TryFrom<EchidnaArg> for AbiValue {
    type Error = FormatError;

    fn try_from(a: EchidnaArg) -> Result<Self, Self::Error> {
        let v = match a {
            EchidnaArg::AbiUInt(bits, value) => AbiValue::Uint {
                bits,
                value: value.0,
            },
            EchidnaArg::AbiInt(bits, value) => AbiValue::Int {
                bits,
                value: value.0,
            },
            EchidnaArg::AbiAddress(a) => AbiValue::Address(a.0),
            EchidnaArg::AbiBool(b) => AbiValue::Bool(b),
            EchidnaArg::AbiBytes(n, b) => {
                if b.0.len() != n {
                    return Err(FormatError::Value(format!(
                        "bytes{} holds {} bytes",
                        n,
                        b.0.len()
                    )));
                }
                AbiValue::FixedBytes(b.0)
            }
            EchidnaArg::AbiBytesDynamic(b) => AbiValue::Bytes(b.0),
            EchidnaArg::AbiString(s) => AbiValue::String(s),
        };
        Ok(v)
    }
}

impl From<&Transaction> for EchidnaTx {
    fn from(tx: &Transaction) -> Self {
        let call = match tx.call.as_ref() {
            Some(c) => EchidnaCall::SolCall(
                c.function.clone(),
                c.args.iter().map(EchidnaArg::from).collect(),
            ),
            None => EchidnaCall::NoCall,
        };
        EchidnaTx {
            call,
            src: HexAddr(tx.sender),
            dst: HexAddr(tx.target),
            gas: HexWord(tx.gas),
            gas_price: HexWord(tx.gas_price),
            value: HexWord(tx.value),
            delay: (HexWord(tx.delay.time), HexWord(tx.delay.blocks)),
        }
    }
}

impl TryFrom<EchidnaTx> for Transaction {
    type Error = FormatError;

    fn try_from(tx: EchidnaTx) -> Result<Self, Self::Error> {
        let call = match tx.call {
            EchidnaCall::SolCall(function, args) => Some(Call {
                function,
                args: args
                    .into_iter()
                    .map(AbiValue::try_from)
                    .collect::<Result<_, _>>()?,
            }),
            EchidnaCall::NoCall => None,
        };
        Ok(Transaction {
            sender: tx.src.0,
            target: tx.dst.0,
            value: tx.value.0,
            gas: tx.gas.0,
            gas_price: tx.gas_price.0,
            call,
            delay: Delay {
                time: tx.delay.0 .0,
                blocks: tx.delay.1 .0,
            },
        })
    }
}

pub fn encode_txs(seq: &TxSequence) -> Vec<EchidnaTx> {
    seq.txs().iter().map(EchidnaTx::from).collect()
}

pub fn decode_txs(txs: Vec<EchidnaTx>) -> Result<TxSequence, FormatError> {
    let txs = txs
        .into_iter()
        .map(Transaction::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TxSequence::new(txs))
}

/// Serialize a sequence as one corpus file.
pub fn encode_sequence(seq: &TxSequence) -> Result<Vec<u8>, FormatError> {
    Ok(serde_json::to_vec(&encode_txs(seq))?)
}

pub fn decode_sequence(data: &[u8]) -> Result<TxSequence, FormatError> {
    let txs: Vec<EchidnaTx> = serde_json::from_slice(data)?;
    decode_txs(txs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"[{"_gas'":"0xffffffff","_delay":["0x0000000000000000000000000000000000000000000000000000000000000000","0x0000000000000000000000000000000000000000000000000000000000000002"],"_src":"0x0000000000000000000000000000000000010000","_dst":"0x00a329c0648769a73afac7f9381e08fb43dbea72","_value":"0x0000000000000000000000000000000000000000000000000000000000000000","_call":{"tag":"SolCall","contents":["f",[{"tag":"AbiUInt","contents":[256,"115792089237316195423570985008687907853269984665640564039457584007913129639935"]},{"tag":"AbiBool","contents":true}]]},"_gasprice'":"0x0000000000000000000000000000000000000000000000000000000000000000"},
    {"_gas'":"0xffffffff","_delay":["0x10","0x1"],"_src":"0x0000000000000000000000000000000000010000","_dst":"0x00a329c0648769a73afac7f9381e08fb43dbea72","_value":"0x0","_call":{"tag":"NoCall"},"_gasprice'":"0x0"}]"#;

    #[test]
    fn decode_echidna_entry() {
        let seq = decode_sequence(ENTRY.as_bytes()).unwrap();
        assert_eq!(seq.len(), 2);
        let tx = &seq.txs()[0];
        assert_eq!(tx.sender, "10000".parse().unwrap());
        assert_eq!(tx.gas, U256::new(0xffff_ffff));
        assert_eq!(tx.delay.blocks, U256::new(2));
        let call = tx.call.as_ref().unwrap();
        assert_eq!(call.signature(), "f(uint256,bool)");
        assert_eq!(
            call.args[0],
            AbiValue::Uint {
                bits: 256,
                value: U256::MAX
            }
        );
        assert!(seq.txs()[1].call.is_none());
        assert_eq!(seq.txs()[1].delay.time, U256::new(16));
    }

    #[test]
    fn reencode_is_stable() {
        let seq = decode_sequence(ENTRY.as_bytes()).unwrap();
        let data = encode_sequence(&seq).unwrap();
        assert_eq!(decode_sequence(&data).unwrap(), seq);
        // canonical output doesn't change on a second pass
        assert_eq!(encode_sequence(&decode_sequence(&data).unwrap()).unwrap(), data);
    }

    #[test]
    fn numbers_and_signed_args() {
        let arg: EchidnaArg =
            serde_json::from_str(r#"{"tag":"AbiInt","contents":[8,"-3"]}"#).unwrap();
        assert_eq!(arg, EchidnaArg::AbiInt(8, DecSigned(I256::new(-3))));
        let arg: EchidnaArg = serde_json::from_str(r#"{"tag":"AbiUInt","contents":[8,7]}"#).unwrap();
        assert_eq!(arg, EchidnaArg::AbiUInt(8, DecWord(U256::new(7))));
        let json = serde_json::to_string(&EchidnaArg::AbiInt(8, DecSigned(I256::new(-3)))).unwrap();
        assert_eq!(json, r#"{"tag":"AbiInt","contents":[8,"-3"]}"#);
    }

    #[test]
    fn rejects_malformed() {
        assert!(decode_sequence(b"[{").is_err());
        assert!(decode_sequence(br#"[{"_call":{"tag":"SolCreate","contents":"0x"}}]"#).is_err());
        let bad_bytes = r#"{"tag":"AbiBytes","contents":[4,"0x0102"]}"#;
        let arg: EchidnaArg = serde_json::from_str(bad_bytes).unwrap();
        assert!(AbiValue::try_from(arg).is_err());
    }
}
