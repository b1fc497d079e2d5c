//! Infrastructure layer implementations.

pub mod chain;
pub mod observability;
pub mod read_model;
pub mod registry;

pub use chain::{RpcChainClient, RpcClientConfig};
pub use observability::{init_metrics, init_tracing, log_diagnostics};
pub use read_model::{HttpReadModelClient, ReadModelClientConfig};
pub use registry::{AbiDirectoryLoader, load_registry};
