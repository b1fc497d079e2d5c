//! Application layer: the connection context, live queries, the contract
//! cache and the transaction lifecycle tracker.

pub mod block_watcher;
pub mod classifier;
pub mod config;
pub mod context;
pub mod contracts;
pub mod live_query;
pub mod probe;
pub mod transactions;

pub use block_watcher::{BlockSubscription, BlockWatcher};
pub use classifier::{OwnerCheckClassifier, PassThrough};
pub use config::Config;
pub use context::Context;
pub use contracts::{ContractCache, ContractEntry, ContractRegistry};
pub use live_query::{LiveQuery, LiveStream};
pub use probe::ObservedState;
pub use transactions::{TransactionBuilder, TransactionStream};
