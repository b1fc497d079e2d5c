//! File-backed contract address book and ABI directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::app::ContractRegistry;
use crate::domain::{Address, AppError, ConfigError, InterfaceDescriptor, InterfaceLoader};

/// Reads a JSON address book of the form
/// `{ "<Name>": { "address": "0x..", "interface": "<Abi>" } }`.
pub async fn load_registry(path: impl AsRef<Path>) -> Result<ContractRegistry, AppError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::InvalidValue {
            key: "CONTRACTS_FILE".to_string(),
            message: format!("{}: {e}", path.display()),
        })?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let registry = ContractRegistry::from_json(&value)?;
    info!(path = %path.display(), contracts = registry.len(), "Loaded contract address book");
    Ok(registry)
}

/// Loads `<dir>/<Interface>.json`, either a bare ABI array or a build
/// artifact with an `abi` field.
#[derive(Debug, Clone)]
pub struct AbiDirectoryLoader {
    dir: PathBuf,
}

impl AbiDirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl InterfaceLoader for AbiDirectoryLoader {
    #[instrument(skip(self), fields(address = %address))]
    async fn load(&self, interface: &str, address: &Address) -> Result<InterfaceDescriptor, AppError> {
        let path = self.dir.join(format!("{interface}.json"));
        debug!(path = %path.display(), "Reading ABI");
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::UnknownContract(format!(
                    "no ABI for interface '{interface}' in {}",
                    self.dir.display()
                )));
            }
            Err(e) => return Err(AppError::Internal(format!("{}: {e}", path.display()))),
        };
        let abi: serde_json::Value = serde_json::from_str(&raw)?;
        InterfaceDescriptor::from_abi_json(interface, &abi)
    }
}
