//! Domain layer containing core types, traits, the ABI codec, and error definitions.

pub mod abi;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, ChainError, ConfigError, FetchError, SubmissionError};
pub use traits::{ChainClient, ConfirmationProbe, ErrorClassifier, FailedCall, InterfaceLoader, ReadModelClient};
pub use types::{
    AbiParam, AbiValue, Address, CallRequest, Cardinality, Confirmation, ContractHandle, DecodedEvent,
    Diagnostic, EventSpec, FunctionSpec, HealthResponse, HealthStatus, InterfaceDescriptor, LifecycleEvent,
    Mapper, QueryDescriptor, RawLog, RawReceipt, Receipt, TransactionRecord, TransactionRequest,
    TransactionStatus, Trigger, TxHash,
};
