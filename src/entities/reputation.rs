//! Reputation contracts.

use std::sync::Arc;

use primitive_types::U256;
use serde_json::{Map, Value, json};

use crate::app::{Context, LiveQuery, OwnerCheckClassifier, TransactionBuilder};
use crate::domain::{AbiValue, Address, AppError, QueryDescriptor};

use super::{first_balance, parse_relation_id, parse_string, parse_u256};

pub const INTERFACE: &str = "Reputation";

pub const STATE_QUERY: &str = "query($id: ID!) { rep(id: $id) { id totalSupply dao { id } } }";

pub const HOLDER_QUERY: &str = "query($address: String!, $contract: String!) { \
     reputationHolders(where: { address: $address, contract: $contract }) { id address balance contract } }";

pub const SEARCH_QUERY: &str = "query($where: Rep_filter) { reps(where: $where) { id } }";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationState {
    pub address: String,
    pub dao: String,
    pub total_supply: U256,
}

impl ReputationState {
    fn from_json(item: &Value) -> Result<Self, AppError> {
        Ok(Self {
            address: parse_string(item, "id")?,
            dao: parse_relation_id(item, "dao")?,
            total_supply: parse_u256(item, "totalSupply")?,
        })
    }
}

/// Criteria for [`Reputation::search`]; unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ReputationFilter {
    pub id: Option<Address>,
    pub dao: Option<Address>,
}

impl ReputationFilter {
    fn to_where(&self) -> Value {
        let mut clause = Map::new();
        if let Some(id) = &self.id {
            clause.insert("id".to_string(), json!(id));
        }
        if let Some(dao) = &self.dao {
            clause.insert("dao".to_string(), json!(dao));
        }
        Value::Object(clause)
    }
}

/// A reputation contract of some DAO.
#[derive(Clone)]
pub struct Reputation {
    address: Address,
    ctx: Context,
}

impl PartialEq for Reputation {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl std::fmt::Debug for Reputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reputation").field("address", &self.address).finish()
    }
}

impl Reputation {
    pub fn new(address: &str, ctx: &Context) -> Result<Self, AppError> {
        Ok(Self {
            address: Address::parse(address)?,
            ctx: ctx.clone(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Reputation contracts matching `filter`, in read-model order.
    pub fn search(ctx: &Context, filter: &ReputationFilter) -> Result<LiveQuery<Vec<Reputation>>, AppError> {
        let owner = ctx.clone();
        let descriptor = QueryDescriptor::list(SEARCH_QUERY, move |item: Value| {
            Reputation::new(&parse_string(&item, "id")?, &owner)
        })
        .with_variables(json!({ "where": filter.to_where() }));
        ctx.observe_list(descriptor)
    }

    /// Total supply and owning DAO; ends with `NotFound` when the read model
    /// has no such contract.
    pub fn state(&self) -> Result<LiveQuery<ReputationState>, AppError> {
        let address = self.address.clone();
        let descriptor = QueryDescriptor::single(STATE_QUERY, move |root: Value| {
            if root.is_null() {
                return Err(AppError::NotFound(format!("reputation contract at {address}")));
            }
            ReputationState::from_json(&root)
        })
        .with_variables(json!({ "id": self.address }));
        self.ctx.observe_object(descriptor)
    }

    /// Reputation held by `holder`; zero when the holder is unknown.
    pub fn reputation_of(&self, holder: &Address) -> Result<LiveQuery<U256>, AppError> {
        let descriptor = QueryDescriptor::single(HOLDER_QUERY, first_balance)
            .with_variables(json!({ "address": holder, "contract": self.address }));
        self.ctx.observe_object(descriptor)
    }

    /// Prepares `mint(beneficiary, amount)`.
    ///
    /// Failures are explained by comparing the sender with the contract
    /// owner. Add a probe with [`TransactionBuilder::confirm_with`] to wait
    /// for the read model before `confirmed`.
    pub async fn mint(&self, beneficiary: &Address, amount: U256) -> Result<TransactionBuilder, AppError> {
        let handle = self.ctx.resolve_as(&self.address, INTERFACE).await?;
        Ok(self
            .ctx
            .transaction(
                &handle,
                "mint",
                vec![AbiValue::Address(beneficiary.clone()), AbiValue::Uint(amount)],
            )
            .classifier(Arc::new(OwnerCheckClassifier)))
    }
}
