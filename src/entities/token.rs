//! ERC20-style DAO tokens.

use primitive_types::U256;
use serde_json::{Map, Value, json};

use crate::app::{Context, LiveQuery, TransactionBuilder};
use crate::domain::{AbiValue, Address, AppError, QueryDescriptor};

use super::{first_balance, parse_address, parse_string, parse_u256};

pub const INTERFACE: &str = "DAOToken";

/// Address-book name of the one token whose allowances are indexed.
pub const GEN_CONTRACT: &str = "GEN";

/// Address-book name of the contract that stakes on proposals.
pub const STAKING_CONTRACT: &str = "GenesisProtocol";

pub const STATE_QUERY: &str = "query($id: ID!) { token(id: $id) { id name symbol totalSupply } }";

pub const HOLDER_QUERY: &str = "query($address: String!, $contract: String!) { \
     tokenHolders(where: { address: $address, contract: $contract }) { id address balance contract } }";

pub const APPROVALS_QUERY: &str = "query($owner: String!, $contract: String!) { \
     tokenApprovals(where: { owner: $owner, contract: $contract }) { id contract owner spender txHash value } }";

pub const ALLOWANCES_QUERY: &str =
    "query($where: Allowance_filter) { allowances(where: $where) { id token owner spender amount } }";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub total_supply: U256,
}

impl TokenState {
    fn from_json(item: &Value) -> Result<Self, AppError> {
        Ok(Self {
            address: parse_string(item, "id")?,
            name: parse_string(item, "name")?,
            symbol: parse_string(item, "symbol")?,
            total_supply: parse_u256(item, "totalSupply")?,
        })
    }
}

/// One `approve` call recorded by the read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenApproval {
    pub id: String,
    pub contract: Address,
    pub owner: Address,
    pub spender: Address,
    pub tx_hash: String,
    pub value: U256,
}

impl TokenApproval {
    fn from_json(item: &Value) -> Result<Self, AppError> {
        Ok(Self {
            id: parse_string(item, "id")?,
            contract: parse_address(item, "contract")?,
            owner: parse_address(item, "owner")?,
            spender: parse_address(item, "spender")?,
            tx_hash: parse_string(item, "txHash")?,
            value: parse_u256(item, "value")?,
        })
    }
}

/// What `spender` may still move out of `owner`'s balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
}

impl Allowance {
    fn from_json(item: &Value) -> Result<Self, AppError> {
        Ok(Self {
            token: parse_address(item, "token")?,
            owner: parse_address(item, "owner")?,
            spender: parse_address(item, "spender")?,
            amount: parse_u256(item, "amount")?,
        })
    }
}

/// Criteria for [`Token::allowances`]; unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AllowanceFilter {
    pub owner: Option<Address>,
    pub spender: Option<Address>,
}

impl AllowanceFilter {
    fn to_where(&self, token: &Address) -> Value {
        let mut clause = Map::new();
        if let Some(owner) = &self.owner {
            clause.insert("owner".to_string(), json!(owner));
        }
        if let Some(spender) = &self.spender {
            clause.insert("spender".to_string(), json!(spender));
        }
        clause.insert("token".to_string(), json!(token));
        Value::Object(clause)
    }
}

#[derive(Clone)]
pub struct Token {
    address: Address,
    ctx: Context,
}

impl Token {
    pub fn new(address: &str, ctx: &Context) -> Result<Self, AppError> {
        Ok(Self {
            address: Address::parse(address)?,
            ctx: ctx.clone(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> Result<LiveQuery<TokenState>, AppError> {
        let address = self.address.clone();
        let descriptor = QueryDescriptor::single(STATE_QUERY, move |root: Value| {
            if root.is_null() {
                return Err(AppError::NotFound(format!("token contract at {address}")));
            }
            TokenState::from_json(&root)
        })
        .with_variables(json!({ "id": self.address }));
        self.ctx.observe_object(descriptor)
    }

    /// Balance of `holder`; zero when the holder is unknown.
    pub fn balance_of(&self, holder: &Address) -> Result<LiveQuery<U256>, AppError> {
        let descriptor = QueryDescriptor::single(HOLDER_QUERY, first_balance)
            .with_variables(json!({ "address": holder, "contract": self.address }));
        self.ctx.observe_object(descriptor)
    }

    /// Approvals granted by `owner` on this token, in read-model order.
    pub fn approvals(&self, owner: &Address) -> Result<LiveQuery<Vec<TokenApproval>>, AppError> {
        let descriptor = QueryDescriptor::list(APPROVALS_QUERY, |item: Value| TokenApproval::from_json(&item))
            .with_variables(json!({ "owner": owner, "contract": self.address }));
        self.ctx.observe_list(descriptor)
    }

    /// Current allowances matching `filter`.
    ///
    /// # Errors
    ///
    /// `UnknownContract` unless this is the address book's GEN token, the
    /// only token the read model tracks allowances for.
    pub fn allowances(&self, filter: &AllowanceFilter) -> Result<LiveQuery<Vec<Allowance>>, AppError> {
        let is_gen = self
            .ctx
            .contracts()
            .registry()
            .get(GEN_CONTRACT)
            .is_some_and(|entry| entry.address == self.address);
        if !is_gen {
            return Err(AppError::UnknownContract(format!(
                "allowances are only indexed for the {GEN_CONTRACT} token, not {}",
                self.address
            )));
        }
        let descriptor = QueryDescriptor::list(ALLOWANCES_QUERY, |item: Value| Allowance::from_json(&item))
            .with_variables(json!({ "where": filter.to_where(&self.address) }));
        self.ctx.observe_list(descriptor)
    }

    /// Prepares `mint(beneficiary, amount)`.
    pub async fn mint(&self, beneficiary: &Address, amount: U256) -> Result<TransactionBuilder, AppError> {
        self.call(
            "mint",
            vec![AbiValue::Address(beneficiary.clone()), AbiValue::Uint(amount)],
        )
        .await
    }

    /// Prepares `approve(spender, amount)`.
    pub async fn approve(&self, spender: &Address, amount: U256) -> Result<TransactionBuilder, AppError> {
        self.call("approve", vec![AbiValue::Address(spender.clone()), AbiValue::Uint(amount)])
            .await
    }

    /// Allows the staking contract from the address book to spend `amount`.
    pub async fn approve_for_staking(&self, amount: U256) -> Result<TransactionBuilder, AppError> {
        let staking = self.ctx.resolve(STAKING_CONTRACT).await?;
        self.approve(staking.address(), amount).await
    }

    async fn call(&self, method: &str, args: Vec<AbiValue>) -> Result<TransactionBuilder, AppError> {
        let handle = self.ctx.resolve_as(&self.address, INTERFACE).await?;
        Ok(self.ctx.transaction(&handle, method, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::ContractRegistry;
    use crate::domain::abi::selector;
    use crate::test_utils::{MockChainClient, MockInterfaceLoader, MockReadModel, test_context_with_registry};

    const GEN: &str = "0x543ff227f64aa17ea132bf9886cab5db55dcaddf";
    const STAKING: &str = "0x0000000000000000000000000000000000000def";
    const HOLDER: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";

    fn setup(registry: ContractRegistry) -> (Arc<MockReadModel>, Arc<MockChainClient>, Context) {
        let read_model = Arc::new(MockReadModel::new());
        let chain = Arc::new(MockChainClient::new());
        let ctx = test_context_with_registry(
            Arc::clone(&read_model) as _,
            Arc::clone(&chain) as _,
            Arc::new(MockInterfaceLoader::new()),
            Some(Address::parse(HOLDER).unwrap()),
            registry,
        );
        (read_model, chain, ctx)
    }

    #[tokio::test]
    async fn test_state_and_balance() {
        let (read_model, _, ctx) = setup(ContractRegistry::new());
        read_model.respond(
            STATE_QUERY,
            json!({"token": {"id": GEN, "name": "DAOstack", "symbol": "GEN", "totalSupply": "100000000000000000000"}}),
        );
        read_model.respond(HOLDER_QUERY, json!({"tokenHolders": [{"balance": 1234}]}));

        let token = Token::new(GEN, &ctx).unwrap();
        let state = token.state().unwrap().first().await.unwrap();
        assert_eq!(state.symbol, "GEN");
        assert_eq!(state.total_supply, U256::exp10(20));

        let holder = Address::parse(HOLDER).unwrap();
        assert_eq!(token.balance_of(&holder).unwrap().first().await.unwrap(), U256::from(1234u64));
    }

    #[tokio::test]
    async fn test_mint_emits_full_lifecycle() {
        let (_, chain, ctx) = setup(ContractRegistry::new());
        let token = Token::new(GEN, &ctx).unwrap();

        let confirmed = token
            .mint(&Address::parse(HOLDER).unwrap(), U256::from(7u64))
            .await
            .unwrap()
            .submit()
            .unwrap()
            .send()
            .await
            .unwrap();
        assert_eq!(confirmed.receipt().unwrap().event("Mint").unwrap().params["amount"], "7");
        assert_eq!(chain.sent()[0].to.as_str(), GEN);
    }

    #[tokio::test]
    async fn test_approve_for_staking_targets_address_book_entry() {
        let registry = ContractRegistry::new().with(STAKING_CONTRACT, Address::parse(STAKING).unwrap(), "DAOToken");
        let (_, chain, ctx) = setup(registry);
        let token = Token::new(GEN, &ctx).unwrap();

        token
            .approve_for_staking(U256::from(100u64))
            .await
            .unwrap()
            .submit()
            .unwrap()
            .send()
            .await
            .unwrap();

        let data = &chain.sent()[0].data;
        assert!(data.starts_with(&format!("0x{}", hex::encode(selector("approve(address,uint256)")))));
        assert!(data.contains(&STAKING[2..]));
    }

    #[tokio::test]
    async fn test_approvals_by_owner() {
        let (read_model, _, ctx) = setup(ContractRegistry::new());
        read_model.respond(
            APPROVALS_QUERY,
            json!({"tokenApprovals": [{
                "id": "0x01-0",
                "contract": GEN,
                "owner": HOLDER,
                "spender": STAKING,
                "txHash": "0x01",
                "value": "250",
            }]}),
        );

        let token = Token::new(GEN, &ctx).unwrap();
        let holder = Address::parse(HOLDER).unwrap();
        let approvals = token.approvals(&holder).unwrap().first().await.unwrap();

        assert_eq!(
            approvals,
            vec![TokenApproval {
                id: "0x01-0".to_string(),
                contract: Address::parse(GEN).unwrap(),
                owner: holder,
                spender: Address::parse(STAKING).unwrap(),
                tx_hash: "0x01".to_string(),
                value: U256::from(250u64),
            }]
        );
        assert_eq!(read_model.requests()[0].1, json!({"owner": HOLDER, "contract": GEN}));
    }

    #[tokio::test]
    async fn test_allowances_filter_always_names_the_token() {
        let registry = ContractRegistry::new().with(GEN_CONTRACT, Address::parse(GEN).unwrap(), INTERFACE);
        let (read_model, _, ctx) = setup(registry);
        read_model.respond(
            ALLOWANCES_QUERY,
            json!({"allowances": [{"id": "a", "token": GEN, "owner": HOLDER, "spender": STAKING, "amount": "9"}]}),
        );

        let token = Token::new(GEN, &ctx).unwrap();
        let filter = AllowanceFilter {
            spender: Some(Address::parse(STAKING).unwrap()),
            ..AllowanceFilter::default()
        };
        let allowances = token.allowances(&filter).unwrap().first().await.unwrap();

        assert_eq!(allowances.len(), 1);
        assert_eq!(allowances[0].amount, U256::from(9u64));
        assert_eq!(allowances[0].owner.as_str(), HOLDER);
        assert_eq!(
            read_model.requests()[0].1,
            json!({"where": {"spender": STAKING, "token": GEN}})
        );
    }

    #[tokio::test]
    async fn test_allowances_only_for_gen() {
        let registry = ContractRegistry::new().with(GEN_CONTRACT, Address::parse(GEN).unwrap(), INTERFACE);
        let (read_model, _, ctx) = setup(registry);
        let other = Token::new(STAKING, &ctx).unwrap();

        let err = other.allowances(&AllowanceFilter::default()).err().unwrap();
        assert!(matches!(err, AppError::UnknownContract(ref m) if m.contains(STAKING)));

        let (_, _, bare) = setup(ContractRegistry::new());
        let unlisted = Token::new(GEN, &bare).unwrap();
        assert!(matches!(
            unlisted.allowances(&AllowanceFilter::default()),
            Err(AppError::UnknownContract(_))
        ));
        assert_eq!(read_model.query_count(), 0);
    }

    #[tokio::test]
    async fn test_approve_for_staking_without_address_book_entry() {
        let (_, _, ctx) = setup(ContractRegistry::new());
        let token = Token::new(GEN, &ctx).unwrap();
        let err = token.approve_for_staking(U256::one()).await.err().unwrap();
        assert!(matches!(err, AppError::UnknownContract(ref m) if m.contains(STAKING_CONTRACT)));
    }
}
