//! Error classifiers for failed submissions.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::abi::{decode_output, encode_call};
use crate::domain::{AbiValue, CallRequest, ErrorClassifier, FailedCall, SubmissionError};

/// Leaves every error as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl ErrorClassifier for PassThrough {
    async fn classify(&self, error: SubmissionError, _call: FailedCall<'_>) -> SubmissionError {
        error
    }
}

/// Explains failures of owner-only methods.
///
/// Reads `owner()` from the contract; when the sender is not the owner the
/// failure becomes `SubmissionError::NotAuthorized`. Funds and timeout
/// failures are already specific and are returned untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerCheckClassifier;

#[async_trait]
impl ErrorClassifier for OwnerCheckClassifier {
    async fn classify(&self, error: SubmissionError, call: FailedCall<'_>) -> SubmissionError {
        if matches!(
            error,
            SubmissionError::InsufficientFunds { .. } | SubmissionError::NetworkTimeout { .. }
        ) {
            return error;
        }

        let Some(owner_fn) = call.contract.interface().function("owner") else {
            debug!(contract = %call.contract.address(), "No owner() on interface, keeping raw error");
            return error;
        };
        let request = match encode_call(owner_fn, &[]) {
            Ok(data) => CallRequest {
                from: None,
                to: call.contract.address().clone(),
                data,
            },
            Err(_) => return error,
        };

        let owner = match call.contract.chain().call(&request).await {
            Ok(raw) => match decode_output(owner_fn, &raw) {
                Ok(values) => values.into_iter().next(),
                Err(e) => {
                    warn!(error = %e, "Could not decode owner() result");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, contract = %call.contract.address(), "Diagnostic owner() call failed");
                None
            }
        };

        match owner {
            Some(AbiValue::Address(owner)) if &owner != call.sender => SubmissionError::NotAuthorized {
                contract: call.contract.address().to_string(),
                method: call.method.to_string(),
                sender: call.sender.to_string(),
                reason: format!("the contract owner is {owner}"),
            },
            _ => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::contracts::{ContractCache, ContractRegistry};
    use crate::domain::{Address, ContractHandle};
    use crate::test_utils::{MockChainClient, MockInterfaceLoader};

    const CONTRACT: &str = "0x0000000000000000000000000000000000000abc";
    const OWNER: &str = "0x00000000000000000000000000000000000000aa";
    const OTHER: &str = "0x00000000000000000000000000000000000000bb";

    async fn handle(chain: Arc<MockChainClient>, interface: &str) -> Arc<ContractHandle> {
        let cache = ContractCache::new(ContractRegistry::new(), Arc::new(MockInterfaceLoader::new()), chain);
        cache
            .resolve_as(&Address::parse(CONTRACT).unwrap(), interface)
            .await
            .unwrap()
    }

    fn rejected() -> SubmissionError {
        SubmissionError::Rejected {
            contract: CONTRACT.to_string(),
            method: "mint".to_string(),
            reason: "VM Exception while processing transaction: revert".to_string(),
        }
    }

    #[tokio::test]
    async fn test_non_owner_becomes_not_authorized() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_owner(Address::parse(OWNER).unwrap());
        let handle = handle(Arc::clone(&chain), "Reputation").await;
        let sender = Address::parse(OTHER).unwrap();

        let classified = OwnerCheckClassifier
            .classify(
                rejected(),
                FailedCall {
                    contract: &handle,
                    method: "mint",
                    sender: &sender,
                },
            )
            .await;

        match classified {
            SubmissionError::NotAuthorized { sender, reason, .. } => {
                assert_eq!(sender, OTHER);
                assert!(reason.contains(OWNER));
            }
            other => panic!("expected NotAuthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_owner_keeps_raw_error() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_owner(Address::parse(OWNER).unwrap());
        let handle = handle(Arc::clone(&chain), "Reputation").await;
        let sender = Address::parse(OWNER).unwrap();

        let classified = OwnerCheckClassifier
            .classify(
                rejected(),
                FailedCall {
                    contract: &handle,
                    method: "mint",
                    sender: &sender,
                },
            )
            .await;
        assert_eq!(classified, rejected());
    }

    #[tokio::test]
    async fn test_failed_diagnostic_falls_back() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_calls_failing(true);
        let handle = handle(Arc::clone(&chain), "Reputation").await;
        let sender = Address::parse(OTHER).unwrap();

        let classified = OwnerCheckClassifier
            .classify(
                rejected(),
                FailedCall {
                    contract: &handle,
                    method: "mint",
                    sender: &sender,
                },
            )
            .await;
        assert_eq!(classified, rejected());
    }

    #[tokio::test]
    async fn test_pass_through() {
        let chain = Arc::new(MockChainClient::new());
        let handle = handle(chain, "DAOToken").await;
        let sender = Address::parse(OTHER).unwrap();
        let classified = PassThrough
            .classify(
                rejected(),
                FailedCall {
                    contract: &handle,
                    method: "mint",
                    sender: &sender,
                },
            )
            .await;
        assert_eq!(classified, rejected());
    }
}
