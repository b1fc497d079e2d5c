//! Genesis protocol rewards.

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde_json::{Map, Value, json};

use crate::app::{Context, LiveQuery};
use crate::domain::{Address, AppError, QueryDescriptor};

use super::{parse_address, parse_relation_id, parse_string, parse_timestamp, parse_u256};

pub const SEARCH_QUERY: &str = "query($where: GPReward_filter) { gprewards(where: $where) { \
     id createdAt dao { id } beneficiary proposal { id } \
     reputationForVoter tokensForStaker daoBountyForStaker reputationForProposer tokenAddress \
     redeemedReputationForVoter redeemedTokensForStaker redeemedReputationForProposer redeemedDaoBountyForStaker } }";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardState {
    pub id: String,
    pub dao: String,
    pub beneficiary: Address,
    pub created_at: DateTime<Utc>,
    pub proposal_id: String,
    pub reputation_for_voter: U256,
    pub tokens_for_staker: U256,
    pub dao_bounty_for_staker: U256,
    pub reputation_for_proposer: U256,
    pub token_address: Address,
    pub redeemed_reputation_for_voter: U256,
    pub redeemed_tokens_for_staker: U256,
    pub redeemed_reputation_for_proposer: U256,
    pub redeemed_dao_bounty_for_staker: U256,
}

impl RewardState {
    fn from_json(item: &Value) -> Result<Self, AppError> {
        Ok(Self {
            id: parse_string(item, "id")?,
            dao: parse_relation_id(item, "dao")?,
            beneficiary: parse_address(item, "beneficiary")?,
            created_at: parse_timestamp(item, "createdAt")?,
            proposal_id: parse_relation_id(item, "proposal")?,
            reputation_for_voter: parse_u256(item, "reputationForVoter")?,
            tokens_for_staker: parse_u256(item, "tokensForStaker")?,
            dao_bounty_for_staker: parse_u256(item, "daoBountyForStaker")?,
            reputation_for_proposer: parse_u256(item, "reputationForProposer")?,
            token_address: parse_address(item, "tokenAddress")?,
            redeemed_reputation_for_voter: parse_u256(item, "redeemedReputationForVoter")?,
            redeemed_tokens_for_staker: parse_u256(item, "redeemedTokensForStaker")?,
            redeemed_reputation_for_proposer: parse_u256(item, "redeemedReputationForProposer")?,
            redeemed_dao_bounty_for_staker: parse_u256(item, "redeemedDaoBountyForStaker")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewardFilter {
    pub id: Option<String>,
    pub proposal: Option<String>,
    pub beneficiary: Option<Address>,
    pub dao: Option<Address>,
}

impl RewardFilter {
    fn to_where(&self) -> Value {
        let mut clause = Map::new();
        if let Some(id) = &self.id {
            clause.insert("id".to_string(), json!(id));
        }
        if let Some(proposal) = &self.proposal {
            clause.insert("proposal".to_string(), json!(proposal));
        }
        if let Some(beneficiary) = &self.beneficiary {
            clause.insert("beneficiary".to_string(), json!(beneficiary));
        }
        if let Some(dao) = &self.dao {
            clause.insert("dao".to_string(), json!(dao));
        }
        Value::Object(clause)
    }
}

/// A single reward, addressed by its read-model id.
#[derive(Clone)]
pub struct Reward {
    id: String,
    ctx: Context,
}

impl Reward {
    pub fn new(id: impl Into<String>, ctx: &Context) -> Self {
        Self {
            id: id.into(),
            ctx: ctx.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rewards matching `filter`, as plain state values.
    pub fn search(ctx: &Context, filter: &RewardFilter) -> Result<LiveQuery<Vec<RewardState>>, AppError> {
        let descriptor = QueryDescriptor::list(SEARCH_QUERY, |item: Value| RewardState::from_json(&item))
            .with_variables(json!({ "where": filter.to_where() }));
        ctx.observe_list(descriptor)
    }

    /// This reward's state; ends with `NotFound` when no reward has the id.
    pub fn state(&self) -> Result<LiveQuery<RewardState>, AppError> {
        let id = self.id.clone();
        let filter = RewardFilter {
            id: Some(self.id.clone()),
            ..Default::default()
        };
        let descriptor = QueryDescriptor::single(SEARCH_QUERY, move |root: Value| {
            let items = match root {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => return Err(AppError::Mapping(format!("expected a list of rewards, got {other}"))),
            };
            match items.as_slice() {
                [] => Err(AppError::NotFound(format!("reward {id}"))),
                [item] => RewardState::from_json(item),
                _ => Err(AppError::Mapping(format!("{} rewards share the id {id}", items.len()))),
            }
        })
        .with_variables(json!({ "where": filter.to_where() }));
        self.ctx.observe_object(descriptor)
    }
}
