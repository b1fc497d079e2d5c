//! Contract handle cache with single-flight construction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::domain::{Address, AppError, ChainClient, ContractHandle, InterfaceLoader};

use super::context::Context;

/// Where a named contract lives and which interface it speaks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContractEntry {
    pub address: Address,
    pub interface: String,
}

/// Address book mapping logical contract names to deployed contracts.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    by_name: HashMap<String, ContractEntry>,
}

impl ContractRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, address: Address, interface: impl Into<String>) -> Self {
        self.by_name.insert(
            name.into(),
            ContractEntry {
                address,
                interface: interface.into(),
            },
        );
        self
    }

    /// Parses `{ "<Name>": { "address": "0x..", "interface": "<Abi>" } }`.
    pub fn from_json(value: &Value) -> Result<Self, AppError> {
        let by_name: HashMap<String, ContractEntry> = serde_json::from_value(value.clone())?;
        Ok(Self { by_name })
    }

    pub fn get(&self, name: &str) -> Option<&ContractEntry> {
        self.by_name.get(name)
    }

    pub fn find_by_address(&self, address: &Address) -> Option<&ContractEntry> {
        self.by_name.values().find(|entry| &entry.address == address)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

type Slot = Arc<OnceCell<Arc<ContractHandle>>>;

/// Memoizes contract handles by normalized address.
///
/// Concurrent resolutions of the same unresolved address share one interface
/// load; every caller receives the same `Arc`.
pub struct ContractCache {
    registry: ContractRegistry,
    loader: Arc<dyn InterfaceLoader>,
    chain: Arc<dyn ChainClient>,
    slots: Mutex<HashMap<Address, Slot>>,
}

impl ContractCache {
    pub fn new(registry: ContractRegistry, loader: Arc<dyn InterfaceLoader>, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            registry,
            loader,
            chain,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Resolves a logical name or a registered address.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` for malformed addresses, `UnknownContract` when the
    /// name (or address) is not in the address book.
    pub async fn resolve(&self, name_or_address: &str) -> Result<Arc<ContractHandle>, AppError> {
        let entry = if Address::looks_like_address(name_or_address) {
            let address = Address::parse(name_or_address)?;
            self.registry.find_by_address(&address).ok_or_else(|| {
                AppError::UnknownContract(format!("no interface registered for address {address}"))
            })?
        } else {
            self.registry.get(name_or_address).ok_or_else(|| {
                AppError::UnknownContract(format!("no contract named '{name_or_address}'"))
            })?
        };
        let (address, interface) = (entry.address.clone(), entry.interface.clone());
        self.resolve_as(&address, &interface).await
    }

    /// Resolves the contract at `address`, loading `interface` on first use.
    ///
    /// The first resolution of an address fixes its interface for the
    /// lifetime of the cache.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn resolve_as(&self, address: &Address, interface: &str) -> Result<Arc<ContractHandle>, AppError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(address.clone()).or_default())
        };

        let handle = slot
            .get_or_try_init(|| async {
                debug!(interface = %interface, "Loading contract interface");
                let descriptor = self.loader.load(interface, address).await?;
                metrics::counter!("contract_interfaces_loaded_total").increment(1);
                info!(interface = %descriptor.name, "Contract handle created");
                Ok::<_, AppError>(Arc::new(ContractHandle::new(
                    address.clone(),
                    Arc::new(descriptor),
                    Arc::clone(&self.chain),
                )))
            })
            .await?;

        if handle.interface().name != interface {
            debug!(
                cached = %handle.interface().name,
                requested = %interface,
                "Address already resolved with a different interface"
            );
        }
        Ok(Arc::clone(handle))
    }

    /// Number of addresses with a constructed handle.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Context {
    /// Resolves a contract by logical name or registered address.
    pub async fn resolve(&self, name_or_address: &str) -> Result<Arc<ContractHandle>, AppError> {
        self.ensure_connected()?;
        self.contracts().resolve(name_or_address).await
    }

    /// Resolves the contract at `address` with an explicit interface.
    pub async fn resolve_as(&self, address: &Address, interface: &str) -> Result<Arc<ContractHandle>, AppError> {
        self.ensure_connected()?;
        self.contracts().resolve_as(address, interface).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::MockConfig;
    use crate::test_utils::{MockChainClient, MockInterfaceLoader};
    use serde_json::json;

    const REP: &str = "0x0000000000000000000000000000000000000abc";

    fn cache(loader: Arc<MockInterfaceLoader>) -> ContractCache {
        let registry = ContractRegistry::new().with("Reputation", Address::parse(REP).unwrap(), "Reputation");
        ContractCache::new(registry, loader, Arc::new(MockChainClient::new()))
    }

    #[test]
    fn test_registry_from_json() {
        let registry = ContractRegistry::from_json(&json!({
            "GEN": {"address": "0x543Ff227F64Aa17eA132Bf9886cAb5DB55DCAddf", "interface": "DAOToken"}
        }))
        .unwrap();
        let gen_token = registry.get("GEN").unwrap();
        assert_eq!(gen_token.address.as_str(), "0x543ff227f64aa17ea132bf9886cab5db55dcaddf");
        assert_eq!(gen_token.interface, "DAOToken");
        assert!(registry.find_by_address(&gen_token.address).is_some());
    }

    #[test]
    fn test_registry_rejects_bad_address() {
        let result = ContractRegistry::from_json(&json!({"GEN": {"address": "0x12", "interface": "DAOToken"}}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_resolve_is_memoized() {
        let loader = Arc::new(MockInterfaceLoader::new());
        let cache = cache(Arc::clone(&loader));

        let first = cache.resolve("Reputation").await.unwrap();
        let second = cache.resolve(REP).await.unwrap();
        let third = cache.resolve(&REP.to_uppercase().replace("0X", "0x")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(loader.load_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_name_and_invalid_address() {
        let cache = cache(Arc::new(MockInterfaceLoader::new()));

        let err = cache.resolve("GenesisProtocol").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownContract(ref m) if m.contains("GenesisProtocol")));

        let err = cache.resolve("0xinvalid").await.unwrap_err();
        assert_eq!(err, AppError::InvalidAddress("0xinvalid".to_string()));

        let err = cache
            .resolve("0x0000000000000000000000000000000000000def")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownContract(_)));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let loader = Arc::new(MockInterfaceLoader::with_config(MockConfig::failure("abi missing")));
        let cache = cache(Arc::clone(&loader));

        assert!(cache.resolve("Reputation").await.is_err());
        assert!(cache.is_empty());

        loader.set_failing(false);
        assert!(cache.resolve("Reputation").await.is_ok());
        assert_eq!(loader.load_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_single_flight() {
        let loader = Arc::new(MockInterfaceLoader::with_config(MockConfig::success().with_latency(50)));
        let cache = Arc::new(cache(Arc::clone(&loader)));

        let (a, b) = tokio::join!(cache.resolve("Reputation"), cache.resolve(REP));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_as_arbitrary_address() {
        let loader = Arc::new(MockInterfaceLoader::new());
        let cache = cache(Arc::clone(&loader));
        let token = Address::parse("0x0000000000000000000000000000000000000123").unwrap();

        let handle = cache.resolve_as(&token, "DAOToken").await.unwrap();
        assert_eq!(handle.address(), &token);
        assert_eq!(handle.interface().name, "DAOToken");
    }
}
