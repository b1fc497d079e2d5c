//! Minimal contract ABI codec: selectors, static argument encoding, and
//! decoding of return data and emitted logs.
//!
//! Only statically-sized types are understood. Dynamic parameters found in
//! logs are surfaced as their raw 32-byte head word.

use std::collections::BTreeMap;

use primitive_types::U256;
use sha3::{Digest, Keccak256};

use super::error::AppError;
use super::types::{AbiValue, Address, DecodedEvent, EventSpec, FunctionSpec, InterfaceDescriptor, RawLog};

const WORD: usize = 32;

#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The 4-byte function selector for a canonical signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// `topic0` of an event, as `0x`-prefixed hex.
#[must_use]
pub fn event_topic(event: &EventSpec) -> String {
    format!("0x{}", hex::encode(keccak256(event.signature().as_bytes())))
}

/// Encodes a call to `function` as `0x`-prefixed calldata.
pub fn encode_call(function: &FunctionSpec, args: &[AbiValue]) -> Result<String, AppError> {
    if function.inputs.len() != args.len() {
        return Err(AppError::Mapping(format!(
            "{} expects {} arguments, got {}",
            function.signature(),
            function.inputs.len(),
            args.len()
        )));
    }
    let mut data = Vec::with_capacity(4 + WORD * args.len());
    data.extend_from_slice(&selector(&function.signature()));
    for (param, arg) in function.inputs.iter().zip(args) {
        data.extend_from_slice(&encode_word(&param.kind, arg).map_err(|reason| {
            AppError::Mapping(format!(
                "argument '{}' of {}: {}",
                param.name,
                function.signature(),
                reason
            ))
        })?);
    }
    Ok(format!("0x{}", hex::encode(data)))
}

fn encode_word(kind: &str, value: &AbiValue) -> Result<[u8; WORD], String> {
    let mut word = [0u8; WORD];
    match (kind, value) {
        ("address", AbiValue::Address(a)) => word[12..].copy_from_slice(&a.to_bytes()),
        (k, AbiValue::Uint(n)) if is_integer(k) => word = n.to_big_endian(),
        ("bool", AbiValue::Bool(b)) => word[31] = u8::from(*b),
        ("bytes32", AbiValue::Bytes32(b)) => word.copy_from_slice(b),
        (k, v) => return Err(format!("cannot encode {v:?} as {k}")),
    }
    Ok(word)
}

fn is_integer(kind: &str) -> bool {
    kind.starts_with("uint") || kind.starts_with("int")
}

fn decode_word(kind: &str, word: &[u8]) -> AbiValue {
    match kind {
        "address" => {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&word[12..WORD]);
            AbiValue::Address(Address::from_bytes(&bytes))
        }
        k if is_integer(k) => AbiValue::Uint(U256::from_big_endian(word)),
        "bool" => AbiValue::Bool(word[31] != 0),
        _ => {
            let mut raw = [0u8; WORD];
            raw.copy_from_slice(word);
            AbiValue::Bytes32(raw)
        }
    }
}

fn strip_hex(input: &str) -> Result<Vec<u8>, AppError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(digits).map_err(|e| AppError::Serialization(format!("invalid hex '{input}': {e}")))
}

/// Decodes `eth_call` return data against the function's outputs.
pub fn decode_output(function: &FunctionSpec, data: &str) -> Result<Vec<AbiValue>, AppError> {
    let bytes = strip_hex(data)?;
    if bytes.len() < function.outputs.len() * WORD {
        return Err(AppError::Serialization(format!(
            "{} returned {} bytes, expected at least {}",
            function.signature(),
            bytes.len(),
            function.outputs.len() * WORD
        )));
    }
    Ok(function
        .outputs
        .iter()
        .enumerate()
        .map(|(i, p)| decode_word(&p.kind, &bytes[i * WORD..(i + 1) * WORD]))
        .collect())
}

/// Decodes a log emitted by a contract with the given interface.
///
/// Returns `None` for logs whose topic does not match any known event.
#[must_use]
pub fn decode_log(interface: &InterfaceDescriptor, log: &RawLog) -> Option<DecodedEvent> {
    let topic0 = log.topics.first()?.to_ascii_lowercase();
    let event = interface.events.iter().find(|e| event_topic(e) == topic0)?;
    let data = strip_hex(&log.data).ok()?;

    let mut params = BTreeMap::new();
    let mut topics = log.topics.iter().skip(1);
    let mut offset = 0;
    for param in &event.inputs {
        let value = if param.indexed {
            let word = strip_hex(topics.next()?).ok()?;
            if word.len() != WORD {
                return None;
            }
            decode_word(&param.kind, &word)
        } else {
            let word = data.get(offset..offset + WORD)?;
            offset += WORD;
            decode_word(&param.kind, word)
        };
        params.insert(param.name.clone(), value.to_json());
    }

    Some(DecodedEvent {
        name: event.name.clone(),
        address: log.address.to_ascii_lowercase(),
        params,
    })
}
