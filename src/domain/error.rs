//! Error types for the read and write paths, with proper error chaining.

use thiserror::Error;

/// Failures while fetching from the read model.
///
/// Every variant is recoverable on the read path: the live query engine logs
/// it and retries on the next trigger tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Read model unreachable: {0}")]
    Transport(String),
    #[error("Read model returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// An `errors` array in the response. Schema and validation errors land
    /// here too and are retried like any other fetch failure.
    #[error("Read model query failed: {0}")]
    GraphQl(String),
    #[error("Malformed read model response: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("RPC call failed ({code}): {message}")]
    Rpc { code: i64, message: String },
    #[error("Timeout calling chain endpoint: {0}")]
    Timeout(String),
    #[error("Insufficient funds for transaction")]
    InsufficientFunds,
    #[error("Could not decode chain response: {0}")]
    Decode(String),
}

/// Classified failure of a state-changing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("{method} on {contract} failed: sender {sender} is not authorized ({reason})")]
    NotAuthorized {
        contract: String,
        method: String,
        sender: String,
        reason: String,
    },
    #[error("{method} on {contract} failed: insufficient funds in {sender}")]
    InsufficientFunds {
        contract: String,
        method: String,
        sender: String,
    },
    #[error("{method} on {contract} failed: network timeout ({detail})")]
    NetworkTimeout {
        contract: String,
        method: String,
        detail: String,
    },
    #[error("{method} on {contract} reverted in transaction {tx_hash}")]
    Reverted {
        contract: String,
        method: String,
        tx_hash: String,
    },
    #[error("{method} on {contract} was rejected: {reason}")]
    Rejected {
        contract: String,
        method: String,
        reason: String,
    },
    #[error("{method} on {contract}: no receipt for {tx_hash} within {timeout_ms}ms")]
    ReceiptTimeout {
        contract: String,
        method: String,
        tx_hash: String,
        timeout_ms: u64,
    },
}

impl SubmissionError {
    /// Wraps a raw chain failure without any domain knowledge.
    pub fn from_chain(contract: &str, method: &str, sender: &str, err: &ChainError) -> Self {
        match err {
            ChainError::InsufficientFunds => SubmissionError::InsufficientFunds {
                contract: contract.to_string(),
                method: method.to_string(),
                sender: sender.to_string(),
            },
            ChainError::Timeout(detail) => SubmissionError::NetworkTimeout {
                contract: contract.to_string(),
                method: method.to_string(),
                detail: detail.clone(),
            },
            other => SubmissionError::Rejected {
                contract: contract.to_string(),
                method: method.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// The contract address the failed call targeted.
    pub fn contract(&self) -> &str {
        match self {
            SubmissionError::NotAuthorized { contract, .. }
            | SubmissionError::InsufficientFunds { contract, .. }
            | SubmissionError::NetworkTimeout { contract, .. }
            | SubmissionError::Reverted { contract, .. }
            | SubmissionError::Rejected { contract, .. }
            | SubmissionError::ReceiptTimeout { contract, .. } => contract,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::ParseError(s.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Not connected: the context was disposed")]
    NotConnected,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not a valid address: {0}")]
    InvalidAddress(String),
    #[error("Unknown contract: {0}")]
    UnknownContract(String),
    #[error("No signing account configured: {0}")]
    NoSigner(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Could not map query result: {0}")]
    Mapping(String),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the live query engine should retry instead of ending the stream.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Fetch(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Config(ConfigError::ParseError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_from_str() {
        let err: ConfigError = "parse failure".into();
        assert!(matches!(err, ConfigError::ParseError(msg) if msg == "parse failure"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let app_err = AppError::from(json_err);
        assert!(matches!(app_err, AppError::Serialization(_)));
    }

    #[test]
    fn test_only_fetch_errors_are_transient() {
        assert!(AppError::Fetch(FetchError::Transport("refused".to_string())).is_transient());
        assert!(!AppError::NotFound("0xabc".to_string()).is_transient());
        assert!(!AppError::Mapping("bad".to_string()).is_transient());
        assert!(!AppError::NotConnected.is_transient());
    }

    #[test]
    fn test_query_validation_errors_are_retried() {
        let err: AppError = FetchError::GraphQl("Cannot query field \"reps\" on type \"Query\"".to_string()).into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Status {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Read model returned HTTP 502: bad gateway");

        let err = FetchError::GraphQl("unknown field".to_string());
        assert_eq!(err.to_string(), "Read model query failed: unknown field");
    }

    #[test]
    fn test_chain_error_display() {
        let err = ChainError::Rpc {
            code: -32000,
            message: "nonce too low".to_string(),
        };
        assert_eq!(err.to_string(), "RPC call failed (-32000): nonce too low");

        let err = ChainError::InsufficientFunds;
        assert_eq!(err.to_string(), "Insufficient funds for transaction");
    }

    #[test]
    fn test_submission_error_names_contract_and_method() {
        let err = SubmissionError::NotAuthorized {
            contract: "0xrep".to_string(),
            method: "mint".to_string(),
            sender: "0xme".to_string(),
            reason: "owner is 0xdao".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0xrep"));
        assert!(msg.contains("mint"));
        assert!(msg.contains("0xme"));
        assert_eq!(err.contract(), "0xrep");
    }

    #[test]
    fn test_submission_error_from_chain() {
        let err = SubmissionError::from_chain("0xc", "mint", "0xs", &ChainError::InsufficientFunds);
        assert!(matches!(err, SubmissionError::InsufficientFunds { .. }));

        let err = SubmissionError::from_chain(
            "0xc",
            "mint",
            "0xs",
            &ChainError::Timeout("30s".to_string()),
        );
        assert!(matches!(err, SubmissionError::NetworkTimeout { .. }));
        assert!(err.to_string().contains("30s"));

        let err = SubmissionError::from_chain(
            "0xc",
            "mint",
            "0xs",
            &ChainError::Connection("refused".to_string()),
        );
        assert!(matches!(err, SubmissionError::Rejected { .. }));
    }

    #[test]
    fn test_app_error_display() {
        assert_eq!(
            AppError::InvalidAddress("0xinvalid".to_string()).to_string(),
            "Not a valid address: 0xinvalid"
        );
        assert_eq!(
            AppError::NotConnected.to_string(),
            "Not connected: the context was disposed"
        );
    }

    #[test]
    fn test_app_error_from_submission_error() {
        let err: AppError = SubmissionError::Rejected {
            contract: "0xc".to_string(),
            method: "approve".to_string(),
            reason: "paused".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Submission(SubmissionError::Rejected { .. })));
    }
}
