//! Watches a reputation contract and logs every change of its state.
//!
//! Usage: `dao-reactive <reputation-address>` with `READ_MODEL_URL` and
//! `CHAIN_RPC_URL` set (a `.env` file is honoured). Set `LOG_FORMAT=json`
//! for JSON logs.

use std::env;

use anyhow::{Context as _, Result};
use futures::StreamExt;
use tracing::{error, info, warn};

use dao_reactive::app::{Config, Context};
use dao_reactive::domain::HealthStatus;
use dao_reactive::entities::Reputation;
use dao_reactive::infra::{init_metrics, init_tracing, log_diagnostics};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_tracing(env::var("LOG_FORMAT").is_ok_and(|f| f == "json"));
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics recorder not installed");
    }

    let address = env::args()
        .nth(1)
        .context("usage: dao-reactive <reputation-address>")?;

    let ctx = Context::connect(config).await?;
    let health = ctx.health_check().await;
    if health.status != HealthStatus::Healthy {
        warn!(read_model = ?health.read_model, chain = ?health.chain, "Endpoints not fully healthy");
    }

    tokio::spawn(log_diagnostics(ctx.diagnostics()));

    let reputation = Reputation::new(&address, &ctx)?;
    let mut states = reputation.state()?.subscribe()?;
    info!(address = %reputation.address(), "Watching reputation contract");

    loop {
        tokio::select! {
            item = states.next() => match item {
                Some(Ok(state)) => info!(dao = %state.dao, total_supply = %state.total_supply, "Reputation state"),
                Some(Err(e)) => {
                    error!(error = %e, "Stream ended");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    ctx.dispose();
    Ok(())
}
