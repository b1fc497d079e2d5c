//! Connection context shared by every stream and transaction of a session.
//!
//! The context holds the read-model and chain clients, the contract cache and
//! the session-wide signals (shutdown, invalidation, new blocks, diagnostics).
//! It is cheap to clone; all clones refer to the same session.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};

use crate::domain::{
    Address, AppError, ChainClient, Diagnostic, HealthResponse, HealthStatus, InterfaceLoader, ReadModelClient,
};

use super::block_watcher::{BlockSubscription, BlockWatcher};
use super::config::Config;
use super::contracts::{ContractCache, ContractRegistry};

const DIAGNOSTICS_CAPACITY: usize = 64;

struct ContextInner {
    config: Config,
    read_model: Arc<dyn ReadModelClient>,
    chain: Arc<dyn ChainClient>,
    contracts: ContractCache,
    blocks: Arc<BlockWatcher>,
    shutdown: watch::Sender<bool>,
    invalidation: watch::Sender<u64>,
    diagnostics: broadcast::Sender<Diagnostic>,
}

/// A session's connection state.
///
/// # Example
///
/// ```ignore
/// let ctx = Context::create(read_model_url, chain_url, Some(account)).await?;
/// let mut supply = Reputation::new(address, &ctx)?.state()?.subscribe()?;
/// while let Some(state) = supply.next().await {
///     println!("{:?}", state?);
/// }
/// ctx.dispose();
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a context from already-constructed clients.
    #[must_use]
    pub fn new(
        config: Config,
        read_model: Arc<dyn ReadModelClient>,
        chain: Arc<dyn ChainClient>,
        loader: Arc<dyn InterfaceLoader>,
        registry: ContractRegistry,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (invalidation, _) = watch::channel(0);
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        let blocks = Arc::new(BlockWatcher::new(
            Arc::clone(&chain),
            config.block_poll_interval,
            shutdown_rx,
        ));
        let contracts = ContractCache::new(registry, loader, Arc::clone(&chain));

        info!(
            read_model = %config.read_model_url,
            chain = %config.chain_url,
            account = ?config.account.as_ref().map(Address::as_str),
            "Created connection context"
        );

        Self {
            inner: Arc::new(ContextInner {
                config,
                read_model,
                chain,
                contracts,
                blocks,
                shutdown,
                invalidation,
                diagnostics,
            }),
        }
    }

    /// Connects to the endpoints named in `config` over HTTP.
    ///
    /// The contract address book and ABI directory are loaded when configured.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        use crate::infra::{AbiDirectoryLoader, HttpReadModelClient, RpcChainClient, load_registry};

        let read_model = HttpReadModelClient::with_defaults(
            &config.read_model_url,
            config.read_model_api_key.clone(),
        )?;
        let chain = RpcChainClient::with_defaults(&config.chain_url)?;
        let registry = match &config.contracts_file {
            Some(path) => load_registry(path).await?,
            None => ContractRegistry::new(),
        };
        let loader = AbiDirectoryLoader::new(config.abi_dir.clone().unwrap_or_else(|| "abis".into()));

        Ok(Self::new(
            config,
            Arc::new(read_model),
            Arc::new(chain),
            Arc::new(loader),
            registry,
        ))
    }

    /// Creates a session for a read-model endpoint, a chain endpoint and an
    /// optional signing account, with default timings.
    pub async fn create(
        read_model_url: &str,
        chain_url: &str,
        account: Option<Address>,
    ) -> Result<Self, AppError> {
        let mut config = Config::new(read_model_url, chain_url);
        config.account = account;
        Self::connect(config).await
    }

    /// Tears the session down: live streams end, trackers stop, and every
    /// later operation fails with `NotConnected`.
    pub fn dispose(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        self.inner.blocks.stop();
        info!("Connection context disposed");
    }

    pub fn is_disposed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub fn ensure_connected(&self) -> Result<(), AppError> {
        if self.is_disposed() {
            return Err(AppError::NotConnected);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn account(&self) -> Option<&Address> {
        self.inner.config.account.as_ref()
    }

    pub fn read_model(&self) -> &Arc<dyn ReadModelClient> {
        &self.inner.read_model
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.inner.chain
    }

    pub fn contracts(&self) -> &ContractCache {
        &self.inner.contracts
    }

    pub fn blocks(&self) -> &Arc<BlockWatcher> {
        &self.inner.blocks
    }

    /// Forces every live subscription of this session to refresh.
    pub fn invalidate(&self) {
        self.inner.invalidation.send_modify(|epoch| *epoch += 1);
    }

    pub(crate) fn subscribe_invalidation(&self) -> watch::Receiver<u64> {
        self.inner.invalidation.subscribe()
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub(crate) fn subscribe_blocks(&self) -> BlockSubscription {
        self.inner.blocks.subscribe()
    }

    /// Side-channel diagnostics such as consistency timeouts.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        // No receivers is fine; the event is logged by the reporter.
        let _ = self.inner.diagnostics.send(diagnostic);
    }

    /// Probes both endpoints.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let read_model = match self.inner.read_model.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Read model health check failed");
                HealthStatus::Unhealthy
            }
        };

        let chain = match self.inner.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Chain health check failed");
                HealthStatus::Unhealthy
            }
        };

        HealthResponse::new(read_model, chain)
    }
}
