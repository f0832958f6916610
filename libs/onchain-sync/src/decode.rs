//! Descriptor-driven log decoding.
//!
//! A listener describes its event with an ordered list of
//! [`ParamDescriptor`]s. Indexed parameters are read from topics 1..n in
//! declaration order and the rest are decoded from the data payload as one
//! ABI tuple. Indexed parameters of dynamic type (`string`, `bytes`, arrays)
//! only exist on chain as their hash, so they are delivered as the raw
//! topic word.

use crate::error::DecodeError;
use crate::ledger::RawLog;
use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    pub ty: String,
    pub indexed: bool,
}

impl ParamDescriptor {
    pub fn new(name: &str, ty: &str, indexed: bool) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            indexed,
        }
    }
}

/// Bytes hashed to identify one log occurrence: the transaction hash followed
/// by the big-endian log index.
pub fn event_key_preimage(tx_hash: &B256, log_index: u64) -> [u8; 40] {
    let mut preimage = [0u8; 40];
    preimage[..32].copy_from_slice(tx_hash.as_slice());
    preimage[32..].copy_from_slice(&log_index.to_be_bytes());
    preimage
}

/// A log after decoding, as handed to event handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub signature: String,
    pub event_key: B256,
    pub contract_address: Address,
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub params: BTreeMap<String, DynSolValue>,
}

impl DecodedEvent {
    pub fn from_log(
        signature: &str,
        descriptors: &[ParamDescriptor],
        log: &RawLog,
        block_timestamp: DateTime<Utc>,
        event_key: B256,
    ) -> Result<Self, DecodeError> {
        Ok(Self {
            signature: signature.to_string(),
            event_key,
            contract_address: log.address,
            tx_hash: log.transaction_hash,
            block_number: log.block_number,
            block_timestamp,
            params: decode_params(descriptors, &log.topics, &log.data)?,
        })
    }

    /// e.g. `2018-03-01T12:00:00.000Z`
    pub fn block_timestamp_iso(&self) -> String {
        self.block_timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn param(&self, name: &str) -> Result<&DynSolValue, DecodeError> {
        self.params
            .get(name)
            .ok_or_else(|| DecodeError::MissingField(name.to_string()))
    }

    pub fn address(&self, name: &str) -> Result<Address, DecodeError> {
        match self.param(name)? {
            DynSolValue::Address(address) => Ok(*address),
            _ => Err(wrong_type(name, "address")),
        }
    }

    pub fn uint(&self, name: &str) -> Result<U256, DecodeError> {
        match self.param(name)? {
            DynSolValue::Uint(value, _) => Ok(*value),
            _ => Err(wrong_type(name, "uint")),
        }
    }

    pub fn fixed_bytes(&self, name: &str) -> Result<B256, DecodeError> {
        match self.param(name)? {
            DynSolValue::FixedBytes(word, _) => Ok(*word),
            _ => Err(wrong_type(name, "bytes32")),
        }
    }

    pub fn string(&self, name: &str) -> Result<String, DecodeError> {
        match self.param(name)? {
            DynSolValue::String(value) => Ok(value.clone()),
            _ => Err(wrong_type(name, "string")),
        }
    }
}

fn wrong_type(field: &str, expected: &'static str) -> DecodeError {
    DecodeError::WrongType {
        field: field.to_string(),
        expected,
    }
}

pub fn decode_params(
    descriptors: &[ParamDescriptor],
    topics: &[B256],
    data: &[u8],
) -> Result<BTreeMap<String, DynSolValue>, DecodeError> {
    let mut parsed = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let ty = DynSolType::parse(&descriptor.ty).map_err(|e| DecodeError::InvalidType {
            name: descriptor.name.clone(),
            ty: descriptor.ty.clone(),
            reason: e.to_string(),
        })?;
        parsed.push((descriptor, ty));
    }

    let indexed_count = parsed.iter().filter(|(d, _)| d.indexed).count();
    if topics.len() != indexed_count + 1 {
        return Err(DecodeError::TopicCount {
            expected: indexed_count + 1,
            actual: topics.len(),
        });
    }

    let mut params = BTreeMap::new();

    let mut indexed_topics = topics.iter().skip(1);
    for (descriptor, ty) in parsed.iter().filter(|(d, _)| d.indexed) {
        let Some(topic) = indexed_topics.next() else {
            break;
        };
        let value = if ty.is_dynamic() {
            DynSolValue::FixedBytes(*topic, 32)
        } else {
            ty.abi_decode(topic.as_slice())
                .map_err(|e| DecodeError::Data(format!("{}: {}", descriptor.name, e)))?
        };
        params.insert(descriptor.name.clone(), value);
    }

    let (names, types): (Vec<_>, Vec<_>) = parsed
        .into_iter()
        .filter(|(d, _)| !d.indexed)
        .map(|(d, ty)| (d.name.clone(), ty))
        .unzip();

    if !types.is_empty() {
        let decoded = DynSolType::Tuple(types)
            .abi_decode_sequence(data)
            .map_err(|e| DecodeError::Data(e.to_string()))?;

        let DynSolValue::Tuple(values) = decoded else {
            return Err(DecodeError::Data("expected a tuple".to_string()));
        };
        params.extend(names.into_iter().zip(values));
    }

    Ok(params)
}
