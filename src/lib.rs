//! Reactive DAO state access
//!
//! Continuously refreshed views of DAO state served by a GraphQL read
//! model, plus tracked submission of state-changing contract calls to an
//! Ethereum-compatible chain.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Entities                   │
//! │   Reputation, Token, Reward (queries+calls)  │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  Context, live queries, contract cache,      │
//! │  transaction lifecycle tracking              │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │   Traits, types, errors, ABI codec           │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  GraphQL client, JSON-RPC client, ABI files  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dao_reactive::app::{Context, ObservedState};
//! use dao_reactive::entities::Reputation;
//! use futures::StreamExt;
//!
//! let ctx = Context::create(read_model_url, chain_url, Some(account.clone())).await?;
//! let rep = Reputation::new("0x...", &ctx)?;
//!
//! let mut supply = rep.state()?.subscribe()?;
//! while let Some(state) = supply.next().await {
//!     println!("total supply: {}", state?.total_supply);
//! }
//!
//! let mut events = rep
//!     .mint(&account, 1000.into())
//!     .await?
//!     .confirm_with(ObservedState::change(rep.reputation_of(&account)?))
//!     .submit()?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event.status);
//! }
//! ```

pub mod app;
pub mod domain;
pub mod entities;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
