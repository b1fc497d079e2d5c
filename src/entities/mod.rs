//! DAO entities built on the live query engine and the transaction tracker.
//!
//! Each entity only supplies query text, variables and a mapping function;
//! refresh, deduplication and lifecycle tracking come from the context.

pub mod reputation;
pub mod reward;
pub mod token;

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde_json::Value;

use crate::domain::{Address, AppError};

pub use reputation::{Reputation, ReputationFilter, ReputationState};
pub use reward::{Reward, RewardFilter, RewardState};
pub use token::{Allowance, AllowanceFilter, Token, TokenApproval, TokenState};

fn field<'a>(item: &'a Value, name: &str) -> Result<&'a Value, AppError> {
    match item.get(name) {
        Some(Value::Null) | None => Err(AppError::Mapping(format!("missing field '{name}' in {item}"))),
        Some(value) => Ok(value),
    }
}

/// Reads a big integer sent either as a decimal string or as a JSON number.
pub(crate) fn parse_u256(item: &Value, name: &str) -> Result<U256, AppError> {
    match field(item, name)? {
        Value::String(raw) => U256::from_dec_str(raw)
            .map_err(|e| AppError::Mapping(format!("field '{name}' is not a decimal integer ({raw}): {e:?}"))),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| AppError::Mapping(format!("field '{name}' is not a non-negative integer: {n}"))),
        other => Err(AppError::Mapping(format!("field '{name}' has unexpected type: {other}"))),
    }
}

pub(crate) fn parse_string(item: &Value, name: &str) -> Result<String, AppError> {
    field(item, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Mapping(format!("field '{name}' is not a string")))
}

pub(crate) fn parse_address(item: &Value, name: &str) -> Result<Address, AppError> {
    let raw = parse_string(item, name)?;
    Address::parse(&raw).map_err(|_| AppError::Mapping(format!("field '{name}' is not an address: {raw}")))
}

/// `{ "<name>": { "id": "0x.." } }` relations.
pub(crate) fn parse_relation_id(item: &Value, name: &str) -> Result<String, AppError> {
    parse_string(field(item, name)?, "id")
}

/// Unix timestamps in seconds, as a decimal string or number.
pub(crate) fn parse_timestamp(item: &Value, name: &str) -> Result<DateTime<Utc>, AppError> {
    let seconds = parse_u256(item, name)?;
    let out_of_range = || AppError::Mapping(format!("field '{name}' is out of range"));
    if seconds > U256::from(i64::MAX.unsigned_abs()) {
        return Err(out_of_range());
    }
    DateTime::from_timestamp(seconds.low_u64() as i64, 0).ok_or_else(out_of_range)
}

/// Balance of the first matching holder row; an empty result means zero.
pub(crate) fn first_balance(root: Value) -> Result<U256, AppError> {
    match root {
        Value::Array(items) => match items.first() {
            Some(item) => parse_u256(item, "balance"),
            None => Ok(U256::zero()),
        },
        Value::Null => Ok(U256::zero()),
        other => Err(AppError::Mapping(format!("expected a list of holders, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_u256_accepts_strings_and_numbers() {
        let item = json!({"a": "1000000000000000000000", "b": 42, "c": -1, "d": "x", "e": null});
        assert_eq!(parse_u256(&item, "a").unwrap(), U256::exp10(21));
        assert_eq!(parse_u256(&item, "b").unwrap(), U256::from(42u64));
        assert!(matches!(parse_u256(&item, "c"), Err(AppError::Mapping(_))));
        assert!(matches!(parse_u256(&item, "d"), Err(AppError::Mapping(_))));
        assert!(matches!(parse_u256(&item, "e"), Err(AppError::Mapping(ref m)) if m.contains("'e'")));
        assert!(parse_u256(&item, "missing").is_err());
    }

    #[test]
    fn test_first_balance() {
        assert_eq!(first_balance(json!([])).unwrap(), U256::zero());
        assert_eq!(first_balance(json!([{"balance": "5"}, {"balance": "9"}])).unwrap(), U256::from(5u64));
        assert!(first_balance(json!({"balance": "5"})).is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        let item = json!({"createdAt": "1546300800"});
        assert_eq!(parse_timestamp(&item, "createdAt").unwrap().to_rfc3339(), "2019-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_relation_id() {
        let item = json!({"dao": {"id": "0xdao"}});
        assert_eq!(parse_relation_id(&item, "dao").unwrap(), "0xdao");
        assert!(parse_relation_id(&json!({"dao": null}), "dao").is_err());
    }
}
