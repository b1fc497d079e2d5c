//! Mock implementations for testing.
//!
//! These mocks provide in-memory implementations of the domain traits
//! that can be configured to simulate slow endpoints, transient failures,
//! reverted transactions and a read model that lags behind the chain.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::abi::{event_topic, selector};
use crate::domain::{
    AbiParam, Address, AppError, CallRequest, ChainClient, ChainError, EventSpec, FetchError, InterfaceDescriptor,
    InterfaceLoader, RawLog, RawReceipt, ReadModelClient, TxHash,
};

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Custom error message for failures.
    pub error_message: Option<String>,
    /// Simulated latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl MockConfig {
    /// Creates a config that always succeeds.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a config that always fails.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
            latency_ms: None,
        }
    }

    /// Adds simulated latency.
    #[must_use]
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
}

/// Mock read model answering queries from an in-memory table.
///
/// Responses are keyed by query text; a query without a response yields an
/// empty `data` object, which the live query engine maps as "no record".
///
/// # Example
///
/// ```
/// use dao_reactive::test_utils::MockReadModel;
/// use serde_json::json;
///
/// let read_model = MockReadModel::new();
/// read_model.respond("{ reps { id } }", json!({"reps": []}));
/// read_model.fail_next(2);
/// ```
pub struct MockReadModel {
    responses: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<(String, Value)>>,
    config: MockConfig,
    latency: Mutex<Option<Duration>>,
    failures_left: AtomicU64,
    query_count: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    is_healthy: AtomicBool,
}

impl MockReadModel {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        let latency = config.latency_ms.map(Duration::from_millis);
        Self {
            responses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            config,
            latency: Mutex::new(latency),
            failures_left: AtomicU64::new(0),
            query_count: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Sets the `data` object returned for `query` from now on.
    pub fn respond(&self, query: &str, data: Value) {
        self.responses.lock().unwrap().insert(query.to_string(), data);
    }

    /// Makes the next `n` queries fail with a transport error.
    pub fn fail_next(&self, n: u64) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Number of queries received, failed ones included.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Highest number of queries observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every `(query, variables)` pair received so far.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockReadModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a query as in flight until dropped, cancellation included.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    now: usize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, now }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReadModelClient for MockReadModel {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(FetchError::Transport("Mock read model unhealthy".to_string()).into());
        }
        Ok(())
    }

    async fn query(&self, query: &str, variables: &Value) -> Result<Value, FetchError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), variables.clone()));

        let in_flight = InFlight::enter(&self.in_flight);
        self.max_in_flight.fetch_max(in_flight.now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        drop(in_flight);

        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock read model error".to_string());
            return Err(FetchError::Transport(msg));
        }
        if self.take_failure() {
            return Err(FetchError::Transport("connection reset by peer".to_string()));
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

type SendHook = Box<dyn Fn(&CallRequest) + Send + Sync>;

/// Mock chain endpoint that mines every accepted call instantly.
///
/// Calls to `mint(address,uint256)` produce a receipt carrying the matching
/// `Mint` log, so receipts decode the way a real token or reputation
/// contract's would.
///
/// # Example
///
/// ```
/// use dao_reactive::domain::ChainError;
/// use dao_reactive::test_utils::MockChainClient;
///
/// let chain = MockChainClient::new();
/// chain.set_block_number(42);
/// chain.fail_submissions(ChainError::InsufficientFunds);
/// ```
pub struct MockChainClient {
    config: MockConfig,
    call_count: AtomicU64,
    is_healthy: AtomicBool,
    block_number: AtomicU64,
    nonce: AtomicU64,
    latency: Mutex<Option<Duration>>,
    sent: Mutex<Vec<CallRequest>>,
    receipts: Mutex<HashMap<TxHash, RawReceipt>>,
    submission_error: Mutex<Option<ChainError>>,
    revert_next: AtomicBool,
    withhold_receipts: AtomicBool,
    calls_failing: AtomicBool,
    owner: Mutex<Option<Address>>,
    on_send: Mutex<Option<SendHook>>,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        let latency = config.latency_ms.map(Duration::from_millis);
        Self {
            config,
            call_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            block_number: AtomicU64::new(1),
            nonce: AtomicU64::new(0),
            latency: Mutex::new(latency),
            sent: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            submission_error: Mutex::new(None),
            revert_next: AtomicBool::new(false),
            withhold_receipts: AtomicBool::new(false),
            calls_failing: AtomicBool::new(false),
            owner: Mutex::new(None),
            on_send: Mutex::new(None),
        }
    }

    /// Gets the number of times any method was called.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_block_number(&self, number: u64) {
        self.block_number.store(number, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Rejects every later submission with `error`.
    pub fn fail_submissions(&self, error: ChainError) {
        *self.submission_error.lock().unwrap() = Some(error);
    }

    /// Mines the next submission with a failed status.
    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    /// Keeps accepted transactions unmined.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.withhold_receipts.store(withhold, Ordering::SeqCst);
    }

    /// Makes read-only calls fail.
    pub fn set_calls_failing(&self, failing: bool) {
        self.calls_failing.store(failing, Ordering::SeqCst);
    }

    /// The address returned by `owner()`.
    pub fn set_owner(&self, owner: Address) {
        *self.owner.lock().unwrap() = Some(owner);
    }

    /// Runs `hook` for every accepted submission, e.g. to update a mock
    /// read model the way an indexer would.
    pub fn on_send(&self, hook: impl Fn(&CallRequest) + Send + Sync + 'static) {
        *self.on_send.lock().unwrap() = Some(Box::new(hook));
    }

    /// Every accepted submission, in order.
    pub fn sent(&self) -> Vec<CallRequest> {
        self.sent.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock chain error".to_string());
            return Err(ChainError::Connection(msg).into());
        }
        Ok(())
    }

    fn mint_logs(request: &CallRequest) -> Vec<RawLog> {
        let mint_selector = format!("0x{}", hex::encode(selector("mint(address,uint256)")));
        let Some(args) = request.data.strip_prefix(&mint_selector) else {
            return Vec::new();
        };
        if args.len() < 128 {
            return Vec::new();
        }
        let mint = EventSpec {
            name: "Mint".to_string(),
            inputs: vec![
                AbiParam {
                    name: "_to".to_string(),
                    kind: "address".to_string(),
                    indexed: true,
                },
                AbiParam {
                    name: "_amount".to_string(),
                    kind: "uint256".to_string(),
                    indexed: false,
                },
            ],
        };
        vec![RawLog {
            address: request.to.to_string(),
            topics: vec![event_topic(&mint), format!("0x{}", &args[..64])],
            data: format!("0x{}", &args[64..128]),
        }]
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn health_check(&self) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(ChainError::Connection("Mock chain unhealthy".to_string()).into());
        }
        Ok(())
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.enter().await?;
        Ok(self.block_number.load(Ordering::SeqCst))
    }

    async fn send_transaction(&self, request: &CallRequest) -> Result<TxHash, AppError> {
        self.enter().await?;
        if let Some(error) = self.submission_error.lock().unwrap().clone() {
            return Err(error.into());
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let hash = format!("0x{nonce:064x}");
        let success = !self.revert_next.swap(false, Ordering::SeqCst);
        let block_number = self.block_number.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = RawReceipt {
            transaction_hash: hash.clone(),
            block_number,
            success,
            gas_used: 21_000,
            logs: if success { Self::mint_logs(request) } else { Vec::new() },
        };

        self.sent.lock().unwrap().push(request.clone());
        self.receipts.lock().unwrap().insert(hash.clone(), receipt);
        if let Some(hook) = self.on_send.lock().unwrap().as_ref() {
            hook(request);
        }
        Ok(hash)
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, AppError> {
        self.enter().await?;
        if self.withhold_receipts.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.receipts.lock().unwrap().get(hash).cloned())
    }

    async fn call(&self, request: &CallRequest) -> Result<String, AppError> {
        self.enter().await?;
        if self.calls_failing.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            }
            .into());
        }

        let owner_selector = format!("0x{}", hex::encode(selector("owner()")));
        if request.data.starts_with(&owner_selector) {
            if let Some(owner) = self.owner.lock().unwrap().as_ref() {
                return Ok(format!("0x{}{}", "0".repeat(24), hex::encode(owner.to_bytes())));
            }
        }
        Err(ChainError::Rpc {
            code: -32000,
            message: "execution reverted".to_string(),
        }
        .into())
    }
}

/// ABI of the reputation contract used by the mocks.
#[must_use]
pub fn reputation_abi() -> Value {
    json!([
        {"type": "function", "name": "mint", "stateMutability": "nonpayable",
         "inputs": [{"name": "_user", "type": "address"}, {"name": "_amount", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "function", "name": "burn", "stateMutability": "nonpayable",
         "inputs": [{"name": "_user", "type": "address"}, {"name": "_amount", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "function", "name": "balanceOf", "stateMutability": "view",
         "inputs": [{"name": "_owner", "type": "address"}],
         "outputs": [{"name": "", "type": "uint256"}]},
        {"type": "function", "name": "totalSupply", "stateMutability": "view",
         "inputs": [], "outputs": [{"name": "", "type": "uint256"}]},
        {"type": "function", "name": "owner", "stateMutability": "view",
         "inputs": [], "outputs": [{"name": "", "type": "address"}]},
        {"type": "event", "name": "Mint",
         "inputs": [{"name": "_to", "type": "address", "indexed": true},
                    {"name": "_amount", "type": "uint256", "indexed": false}]},
        {"type": "event", "name": "Burn",
         "inputs": [{"name": "_from", "type": "address", "indexed": true},
                    {"name": "_amount", "type": "uint256", "indexed": false}]}
    ])
}

/// ABI of the DAO token contract used by the mocks.
#[must_use]
pub fn dao_token_abi() -> Value {
    json!([
        {"type": "function", "name": "mint", "stateMutability": "nonpayable",
         "inputs": [{"name": "_to", "type": "address"}, {"name": "_amount", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "function", "name": "approve", "stateMutability": "nonpayable",
         "inputs": [{"name": "_spender", "type": "address"}, {"name": "_value", "type": "uint256"}],
         "outputs": [{"name": "", "type": "bool"}]},
        {"type": "function", "name": "balanceOf", "stateMutability": "view",
         "inputs": [{"name": "_owner", "type": "address"}],
         "outputs": [{"name": "", "type": "uint256"}]},
        {"type": "function", "name": "owner", "stateMutability": "view",
         "inputs": [], "outputs": [{"name": "", "type": "address"}]},
        {"type": "event", "name": "Mint",
         "inputs": [{"name": "to", "type": "address", "indexed": true},
                    {"name": "amount", "type": "uint256", "indexed": false}]},
        {"type": "event", "name": "Approval",
         "inputs": [{"name": "owner", "type": "address", "indexed": true},
                    {"name": "spender", "type": "address", "indexed": true},
                    {"name": "value", "type": "uint256", "indexed": false}]}
    ])
}

/// Mock interface loader serving the `Reputation` and `DAOToken` ABIs.
pub struct MockInterfaceLoader {
    config: MockConfig,
    failing: AtomicBool,
    load_count: AtomicU64,
}

impl MockInterfaceLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            failing: AtomicBool::new(config.should_fail),
            config,
            load_count: AtomicU64::new(0),
        }
    }

    /// Number of interface loads started.
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for MockInterfaceLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterfaceLoader for MockInterfaceLoader {
    async fn load(&self, interface: &str, _address: &Address) -> Result<InterfaceDescriptor, AppError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = self.config.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock interface load error".to_string());
            return Err(AppError::Internal(msg));
        }

        let abi = match interface {
            "Reputation" => reputation_abi(),
            "DAOToken" => dao_token_abi(),
            other => return Err(AppError::UnknownContract(format!("no ABI named '{other}'"))),
        };
        InterfaceDescriptor::from_abi_json(interface, &abi)
    }
}
