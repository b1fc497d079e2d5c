//! Test utilities and mock implementations.
//!
//! This module provides reusable mock implementations of domain traits
//! and a context builder with timings short enough for tests.

pub mod mocks;

use std::sync::Arc;
use std::time::Duration;

use crate::app::{Config, Context, ContractRegistry};
use crate::domain::{Address, ChainClient, InterfaceLoader, ReadModelClient};

pub use mocks::{MockChainClient, MockConfig, MockInterfaceLoader, MockReadModel};

/// Configuration with short polling intervals and timeouts.
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::new("http://localhost:8000/subgraphs/name/daostack", "http://localhost:8545");
    config.poll_interval = Duration::from_millis(100);
    config.block_poll_interval = Duration::from_millis(100);
    config.confirmation_timeout = Duration::from_secs(2);
    config.receipt_timeout = Duration::from_secs(5);
    config.receipt_poll_interval = Duration::from_millis(50);
    config
}

/// A context over the given clients with an empty address book.
pub fn test_context(
    read_model: Arc<dyn ReadModelClient>,
    chain: Arc<dyn ChainClient>,
    loader: Arc<dyn InterfaceLoader>,
    account: Option<Address>,
) -> Context {
    test_context_with_registry(read_model, chain, loader, account, ContractRegistry::new())
}

pub fn test_context_with_registry(
    read_model: Arc<dyn ReadModelClient>,
    chain: Arc<dyn ChainClient>,
    loader: Arc<dyn InterfaceLoader>,
    account: Option<Address>,
    registry: ContractRegistry,
) -> Context {
    let mut config = test_config();
    config.account = account;
    Context::new(config, read_model, chain, loader, registry)
}
