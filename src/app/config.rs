//! Session configuration loaded from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use validator::Validate;

use crate::domain::{Address, AppError, ConfigError};

/// Endpoint URLs, signing account and timing knobs for one session.
#[derive(Debug, Clone, Validate)]
pub struct Config {
    #[validate(url)]
    pub read_model_url: String,
    #[validate(url)]
    pub chain_url: String,
    /// Default signing account; writes fail with `NoSigner` without one.
    pub account: Option<Address>,
    /// Sent as a bearer token to the read model when present.
    pub read_model_api_key: Option<SecretString>,
    /// Default refresh interval for streams without an explicit trigger.
    pub poll_interval: Duration,
    /// How often the chain head is polled while any stream listens for new blocks.
    pub block_poll_interval: Duration,
    /// Bound on the read-after-write join.
    pub confirmation_timeout: Duration,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// JSON address book mapping contract names to addresses and interfaces.
    pub contracts_file: Option<PathBuf>,
    /// Directory holding `<Interface>.json` ABI files.
    pub abi_dir: Option<PathBuf>,
}

impl Config {
    /// A configuration with default timings for the two endpoints.
    pub fn new(read_model_url: impl Into<String>, chain_url: impl Into<String>) -> Self {
        Self {
            read_model_url: read_model_url.into(),
            chain_url: chain_url.into(),
            account: None,
            read_model_api_key: None,
            poll_interval: Duration::from_millis(2_000),
            block_poll_interval: Duration::from_millis(1_000),
            confirmation_timeout: Duration::from_millis(20_000),
            receipt_timeout: Duration::from_millis(60_000),
            receipt_poll_interval: Duration::from_millis(500),
            contracts_file: None,
            abi_dir: None,
        }
    }

    #[must_use]
    pub fn with_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` for absent required variables and
    /// `ConfigError::InvalidValue` for unparsable ones.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let millis = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
            }
        };

        let defaults = Self::new(required("READ_MODEL_URL")?, required("CHAIN_RPC_URL")?);

        let account = match lookup("DEFAULT_ACCOUNT").filter(|v| !v.is_empty()) {
            Some(raw) => Some(Address::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                key: "DEFAULT_ACCOUNT".to_string(),
                message: e.to_string(),
            })?),
            None => None,
        };

        let config = Self {
            account,
            read_model_api_key: lookup("READ_MODEL_API_KEY")
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
            poll_interval: millis("POLL_INTERVAL_MS", defaults.poll_interval)?,
            block_poll_interval: millis("BLOCK_POLL_INTERVAL_MS", defaults.block_poll_interval)?,
            confirmation_timeout: millis("CONFIRMATION_TIMEOUT_MS", defaults.confirmation_timeout)?,
            receipt_timeout: millis("RECEIPT_TIMEOUT_MS", defaults.receipt_timeout)?,
            receipt_poll_interval: millis("RECEIPT_POLL_INTERVAL_MS", defaults.receipt_poll_interval)?,
            contracts_file: lookup("CONTRACTS_FILE").map(PathBuf::from),
            abi_dir: lookup("ABI_DIR").map(PathBuf::from),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}
