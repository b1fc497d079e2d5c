//! Read-model client implementations.

pub mod graphql;

pub use graphql::{HttpReadModelClient, ReadModelClientConfig};
