use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{AppError, SubmissionError};
use super::traits::ChainClient;

/// A transaction hash as returned by the chain endpoint (`0x`-prefixed hex).
pub type TxHash = String;

/// A normalized (lower-case, `0x`-prefixed) 20-byte account or contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Validates and normalizes an address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidAddress` naming the offending input when it is
    /// not `0x` followed by 40 hex digits.
    pub fn parse(input: &str) -> Result<Self, AppError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AppError::InvalidAddress(input.to_string()))?;
        if digits.len() != 40 || hex::decode(digits).is_err() {
            return Err(AppError::InvalidAddress(input.to_string()));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Whether `input` looks like an address rather than a logical contract name.
    #[must_use]
    pub fn looks_like_address(input: &str) -> bool {
        input.starts_with("0x") || input.starts_with("0X")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20 raw address bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated on construction.
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Whether a query yields one record or an ordered list of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    List,
}

/// The signal that makes a live stream re-issue its query.
///
/// Every stream also refreshes on `Context::invalidate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed polling interval.
    Interval(Duration),
    /// Every time the chain head advances.
    NewBlock,
    /// Only on explicit invalidation.
    Invalidation,
}

/// Maps one raw JSON record into a domain value.
pub type Mapper<T> = Arc<dyn Fn(Value) -> Result<T, AppError> + Send + Sync>;

/// An immutable, parametrized read-model query plus its result mapping.
pub struct QueryDescriptor<T> {
    query: String,
    variables: Value,
    mapper: Mapper<T>,
    cardinality: Cardinality,
    trigger: Option<Trigger>,
}

impl<T> Clone for QueryDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            variables: self.variables.clone(),
            mapper: Arc::clone(&self.mapper),
            cardinality: self.cardinality,
            trigger: self.trigger,
        }
    }
}

impl<T> fmt::Debug for QueryDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDescriptor")
            .field("query", &self.query)
            .field("variables", &self.variables)
            .field("cardinality", &self.cardinality)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl<T> QueryDescriptor<T> {
    /// A query whose root field is a single record (or `null`).
    ///
    /// The mapper receives `Value::Null` when nothing matched and is expected
    /// to return `AppError::NotFound` in that case.
    pub fn single<F>(query: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(Value) -> Result<T, AppError> + Send + Sync + 'static,
    {
        Self::build(query.into(), Arc::new(mapper), Cardinality::Single)
    }

    /// A query whose root field is a list; the mapper is applied per item.
    pub fn list<F>(query: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(Value) -> Result<T, AppError> + Send + Sync + 'static,
    {
        Self::build(query.into(), Arc::new(mapper), Cardinality::List)
    }

    fn build(query: String, mapper: Mapper<T>, cardinality: Cardinality) -> Self {
        Self {
            query,
            variables: Value::Object(serde_json::Map::new()),
            mapper,
            cardinality,
            trigger: None,
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Overrides the context's default polling interval.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn trigger(&self) -> Option<Trigger> {
        self.trigger
    }

    pub fn map(&self, raw: Value) -> Result<T, AppError> {
        (self.mapper)(raw)
    }
}

/// One typed parameter of a function or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiParam>,
    pub read_only: bool,
}

impl FunctionSpec {
    /// Canonical signature such as `mint(address,uint256)`.
    #[must_use]
    pub fn signature(&self) -> String {
        signature_of(&self.name, &self.inputs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub name: String,
    pub inputs: Vec<AbiParam>,
}

impl EventSpec {
    #[must_use]
    pub fn signature(&self) -> String {
        signature_of(&self.name, &self.inputs)
    }
}

fn signature_of(name: &str, inputs: &[AbiParam]) -> String {
    let kinds: Vec<&str> = inputs.iter().map(|p| p.kind.as_str()).collect();
    format!("{}({})", name, kinds.join(","))
}

#[derive(Debug, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<AbiParam>,
    #[serde(default)]
    outputs: Vec<AbiParam>,
    #[serde(rename = "stateMutability", default)]
    state_mutability: Option<String>,
    #[serde(default)]
    constant: Option<bool>,
}

/// The callable surface of a contract: its functions and emitted events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub functions: Vec<FunctionSpec>,
    pub events: Vec<EventSpec>,
}

impl InterfaceDescriptor {
    /// Builds a descriptor from a standard JSON ABI array.
    ///
    /// Accepts either the bare array or a truffle-style artifact with an `abi` field.
    pub fn from_abi_json(name: impl Into<String>, abi: &Value) -> Result<Self, AppError> {
        let entries = abi.get("abi").unwrap_or(abi);
        let entries: Vec<AbiEntry> = serde_json::from_value(entries.clone())?;
        let mut functions = Vec::new();
        let mut events = Vec::new();
        for entry in entries {
            match entry.kind.as_str() {
                "function" | "" => {
                    let read_only = entry.constant.unwrap_or(false)
                        || matches!(entry.state_mutability.as_deref(), Some("view" | "pure"));
                    functions.push(FunctionSpec {
                        name: entry.name,
                        inputs: entry.inputs,
                        outputs: entry.outputs,
                        read_only,
                    });
                }
                "event" => events.push(EventSpec {
                    name: entry.name,
                    inputs: entry.inputs,
                }),
                _ => {}
            }
        }
        Ok(Self {
            name: name.into(),
            functions,
            events,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn event(&self, name: &str) -> Option<&EventSpec> {
        self.events.iter().find(|e| e.name == name)
    }
}

/// A resolved, callable reference to a deployed contract.
///
/// Handles are created by the contract cache only and never mutated.
pub struct ContractHandle {
    address: Address,
    interface: Arc<InterfaceDescriptor>,
    chain: Arc<dyn ChainClient>,
}

impl ContractHandle {
    pub(crate) fn new(
        address: Address,
        interface: Arc<InterfaceDescriptor>,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            address,
            interface,
            chain,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }
}

impl fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.address)
            .field("interface", &self.interface.name)
            .finish()
    }
}

/// A statically-sized argument or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes32([u8; 32]),
}

impl AbiValue {
    /// JSON rendering used in decoded events: addresses as strings,
    /// integers as decimal strings.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            AbiValue::Address(a) => Value::String(a.to_string()),
            AbiValue::Uint(n) => Value::String(n.to_string()),
            AbiValue::Bool(b) => Value::Bool(*b),
            AbiValue::Bytes32(b) => Value::String(format!("0x{}", hex::encode(b))),
        }
    }
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Address(a) => write!(f, "{a}"),
            AbiValue::Uint(n) => write!(f, "{n}"),
            AbiValue::Bool(b) => write!(f, "{b}"),
            AbiValue::Bytes32(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// A raw call as sent to the chain endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    /// `0x`-prefixed calldata.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

/// A receipt as retrieved from the chain endpoint, before event decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub name: String,
    pub address: String,
    pub params: BTreeMap<String, Value>,
}

/// A mined transaction's receipt with emitted events decoded against the
/// contract's interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub events: Vec<DecodedEvent>,
}

impl Receipt {
    pub fn event(&self, name: &str) -> Option<&DecodedEvent> {
        self.events.iter().find(|e| e.name == name)
    }
}

/// Ordered lifecycle states; `Ord` follows the only permitted direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Mined,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Failed)
    }
}

/// What a `confirmed` event is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// The read model was observed reflecting the write.
    ReadModel,
    /// Chain receipt only; the read model was not observed converging.
    ReceiptOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRequest {
    pub contract: Address,
    pub method: String,
    pub args: Vec<String>,
    pub sender: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    /// Locally generated correlation id.
    pub id: Uuid,
    pub request: TransactionRequest,
    pub submitted_at: DateTime<Utc>,
    pub hash: Option<TxHash>,
    pub status: TransactionStatus,
    pub receipt: Option<Receipt>,
    pub confirmation: Option<Confirmation>,
    #[serde(skip)]
    pub error: Option<SubmissionError>,
}

impl TransactionRecord {
    pub fn new(request: TransactionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            submitted_at: Utc::now(),
            hash: None,
            status: TransactionStatus::Pending,
            receipt: None,
            confirmation: None,
            error: None,
        }
    }

    /// Moves the record forward.
    ///
    /// # Errors
    ///
    /// Refuses any transition that would regress or leave a terminal state.
    pub fn advance(&mut self, next: TransactionStatus) -> Result<(), AppError> {
        if self.status.is_terminal() || next <= self.status {
            return Err(AppError::Internal(format!(
                "transaction {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Immutable snapshot of a record taken at a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub status: TransactionStatus,
    pub record: TransactionRecord,
}

impl LifecycleEvent {
    pub fn snapshot(record: &TransactionRecord) -> Self {
        Self {
            status: record.status,
            record: record.clone(),
        }
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        self.record.receipt.as_ref()
    }

    pub fn error(&self) -> Option<&SubmissionError> {
        self.record.error.as_ref()
    }
}

/// Side-channel reports that do not terminate any stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The read model did not reflect a mined transaction in time.
    ConsistencyTimeout {
        transaction_id: Uuid,
        tx_hash: TxHash,
        contract: Address,
        method: String,
        waited: Duration,
    },
    /// The confirmation probe ended with an error before the read model converged.
    ProbeFailed {
        transaction_id: Uuid,
        tx_hash: TxHash,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub read_model: HealthStatus,
    pub chain: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    pub fn new(read_model: HealthStatus, chain: HealthStatus) -> Self {
        let status = match (&read_model, &chain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            read_model,
            chain,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_is_normalized() {
        let addr = Address::parse("0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1").unwrap();
        assert_eq!(addr.as_str(), "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1");
    }

    #[test]
    fn test_invalid_address_names_input() {
        let err = Address::parse("0xinvalid").unwrap_err();
        assert_eq!(err.to_string(), "Not a valid address: 0xinvalid");
        assert!(Address::parse("90f8bf6a479f320ead074411a4b0e7944ea8c9c1").is_err());
        assert!(Address::parse("0x90f8bf6a479f320ead074411a4b0e7944ea8c9").is_err());
    }

    #[test]
    fn test_address_bytes() {
        let addr = Address::parse("0x00000000000000000000000000000000000000ff").unwrap();
        let bytes = addr.to_bytes();
        assert_eq!(bytes[19], 0xff);
        assert_eq!(Address::from_bytes(&bytes), addr);
    }

    #[test]
    fn test_address_deserialize_rejects_garbage() {
        let ok: Result<Address, _> =
            serde_json::from_value(json!("0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1"));
        assert!(ok.is_ok());
        let bad: Result<Address, _> = serde_json::from_value(json!("nope"));
        assert!(bad.is_err());
    }

    #[test]
    fn test_interface_from_abi() {
        let abi = json!([
            {"type": "function", "name": "mint", "stateMutability": "nonpayable",
             "inputs": [{"name": "_to", "type": "address"}, {"name": "_amount", "type": "uint256"}],
             "outputs": [{"name": "", "type": "bool"}]},
            {"type": "function", "name": "owner", "constant": true, "inputs": [],
             "outputs": [{"name": "", "type": "address"}]},
            {"type": "event", "name": "Mint", "inputs": [
                {"name": "_to", "type": "address", "indexed": true},
                {"name": "_amount", "type": "uint256", "indexed": false}]},
            {"type": "constructor", "inputs": []}
        ]);
        let iface = InterfaceDescriptor::from_abi_json("Reputation", &abi).unwrap();
        assert_eq!(iface.functions.len(), 2);
        assert_eq!(iface.function("mint").unwrap().signature(), "mint(address,uint256)");
        assert!(iface.function("owner").unwrap().read_only);
        assert!(!iface.function("mint").unwrap().read_only);
        assert_eq!(iface.event("Mint").unwrap().signature(), "Mint(address,uint256)");
    }

    #[test]
    fn test_interface_from_truffle_artifact() {
        let artifact = json!({"contractName": "DAOToken", "abi": [
            {"type": "function", "name": "approve", "inputs": [], "outputs": []}
        ]});
        let iface = InterfaceDescriptor::from_abi_json("DAOToken", &artifact).unwrap();
        assert!(iface.function("approve").is_some());
    }

    #[test]
    fn test_status_order() {
        assert!(TransactionStatus::Pending < TransactionStatus::Mined);
        assert!(TransactionStatus::Mined < TransactionStatus::Confirmed);
        assert!(TransactionStatus::Confirmed.is_terminal());
        assert!(!TransactionStatus::Mined.is_terminal());
    }

    fn record() -> TransactionRecord {
        let addr = Address::parse("0x0000000000000000000000000000000000000001").unwrap();
        TransactionRecord::new(TransactionRequest {
            contract: addr.clone(),
            method: "mint".to_string(),
            args: vec![],
            sender: addr,
        })
    }

    #[test]
    fn test_record_never_regresses() {
        let mut rec = record();
        assert_eq!(rec.status, TransactionStatus::Pending);
        rec.advance(TransactionStatus::Mined).unwrap();
        assert!(rec.advance(TransactionStatus::Pending).is_err());
        assert!(rec.advance(TransactionStatus::Mined).is_err());
        rec.advance(TransactionStatus::Confirmed).unwrap();
        assert!(rec.advance(TransactionStatus::Failed).is_err());
    }

    #[test]
    fn test_record_can_fail_from_pending() {
        let mut rec = record();
        rec.advance(TransactionStatus::Failed).unwrap();
        assert!(rec.status.is_terminal());
    }

    #[test]
    fn test_records_have_distinct_ids() {
        assert_ne!(record().id, record().id);
    }

    #[test]
    fn test_health_response() {
        let all = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Healthy);
        assert_eq!(all.status, HealthStatus::Healthy);
        let half = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Healthy);
        assert_eq!(half.status, HealthStatus::Degraded);
        let none = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Unhealthy);
        assert_eq!(none.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_descriptor_variables_and_trigger() {
        let d: QueryDescriptor<u64> = QueryDescriptor::single("{ rep { id } }", |_| Ok(1))
            .with_variables(json!({"id": "0xabc"}))
            .with_trigger(Trigger::NewBlock);
        assert_eq!(d.cardinality(), Cardinality::Single);
        assert_eq!(d.trigger(), Some(Trigger::NewBlock));
        assert_eq!(d.variables()["id"], "0xabc");
        assert_eq!(d.clone().map(Value::Null).unwrap(), 1);
    }
}
