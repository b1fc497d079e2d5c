//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use serde_json::Value;

use super::error::{AppError, FetchError, SubmissionError};
use super::types::{Address, CallRequest, ContractHandle, InterfaceDescriptor, RawReceipt, Receipt, TxHash};

/// Read-model (graph query service) client.
#[async_trait]
pub trait ReadModelClient: Send + Sync {
    /// Check read-model connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Execute a query and return the response's `data` object
    async fn query(&self, query: &str, variables: &Value) -> Result<Value, FetchError>;
}

/// Chain RPC client for reading state and submitting calls.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Check chain RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Get current block number
    async fn block_number(&self) -> Result<u64, AppError>;

    /// Submit a state-changing call signed by `request.from`
    async fn send_transaction(&self, request: &CallRequest) -> Result<TxHash, AppError>;

    /// Get a receipt by hash; `None` while the transaction is not yet mined
    async fn get_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, AppError>;

    /// Execute a read-only call and return the raw return data
    async fn call(&self, request: &CallRequest) -> Result<String, AppError>;
}

/// Loads contract interface descriptors.
#[async_trait]
pub trait InterfaceLoader: Send + Sync {
    /// Load the descriptor named `interface` for the contract at `address`
    async fn load(&self, interface: &str, address: &Address) -> Result<InterfaceDescriptor, AppError>;
}

/// What a classifier knows about the call that failed.
#[derive(Debug, Clone, Copy)]
pub struct FailedCall<'a> {
    pub contract: &'a ContractHandle,
    pub method: &'a str,
    pub sender: &'a Address,
}

/// Upgrades an opaque submission failure into a domain-meaningful one.
///
/// Implementations may issue read-only diagnostic calls through
/// `call.contract`; when those fail they must hand back `error` unchanged.
#[async_trait]
pub trait ErrorClassifier: Send + Sync {
    async fn classify(&self, error: SubmissionError, call: FailedCall<'_>) -> SubmissionError;
}

/// Observes the read model for the downstream effect of a mined transaction.
#[async_trait]
pub trait ConfirmationProbe: Send + Sync {
    /// Started alongside the submission so a baseline can be captured.
    /// The call is sent without waiting for this to finish.
    async fn arm(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    /// Resolves once the read model reflects `receipt`.
    async fn settled(&mut self, receipt: &Receipt) -> Result<(), AppError>;
}
