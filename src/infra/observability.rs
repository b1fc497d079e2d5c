//! Logging and Prometheus metrics setup.
//!
//! Covers live-query refreshes and fetch errors, subscriber counts,
//! transaction outcomes and consistency timeouts.

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::domain::Diagnostic;

/// Prometheus handle for on-demand scrape output.
pub type PrometheusHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. A subscriber that
/// is already installed is left in place.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Install the global metrics recorder and return a handle for rendering.
///
/// # Errors
/// Returns an error if a recorder is already installed or building fails.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new()
        .with_recommended_naming(true)
        .install_recorder()?;
    Ok(handle)
}

/// Logs every diagnostic until the context is dropped.
///
/// Reports missed because the receiver fell behind are counted and skipped.
/// Returns the number of diagnostics logged.
pub async fn log_diagnostics(mut rx: broadcast::Receiver<Diagnostic>) -> usize {
    let mut logged = 0;
    loop {
        match rx.recv().await {
            Ok(diagnostic) => {
                log_diagnostic(&diagnostic);
                logged += 1;
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Diagnostics receiver lagged, reports dropped");
            }
            Err(RecvError::Closed) => return logged,
        }
    }
}

fn log_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::ConsistencyTimeout {
            transaction_id,
            tx_hash,
            contract,
            method,
            waited,
        } => warn!(
            transaction_id = %transaction_id,
            tx_hash = %tx_hash,
            contract = %contract,
            method = %method,
            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            "Read model lagging behind chain"
        ),
        Diagnostic::ProbeFailed {
            transaction_id,
            tx_hash,
            reason,
        } => warn!(
            transaction_id = %transaction_id,
            tx_hash = %tx_hash,
            reason = %reason,
            "Read model confirmation failed"
        ),
    }
}
