//! Integration tests for submissions, confirmation and contract resolution.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use primitive_types::U256;
use serde_json::json;

use dao_reactive::app::{Context, ContractRegistry, ObservedState};
use dao_reactive::domain::{
    Address, AppError, ChainError, Confirmation, Diagnostic, SubmissionError, TransactionStatus,
};
use dao_reactive::entities::reputation::HOLDER_QUERY;
use dao_reactive::entities::{Reputation, Token};
use dao_reactive::test_utils::{
    MockChainClient, MockConfig, MockInterfaceLoader, MockReadModel, test_context_with_registry,
};

const REP: &str = "0x0000000000000000000000000000000000000abc";
const GEN: &str = "0x543ff227f64aa17ea132bf9886cab5db55dcaddf";
const HOLDER: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";

struct Harness {
    read_model: Arc<MockReadModel>,
    chain: Arc<MockChainClient>,
    loader: Arc<MockInterfaceLoader>,
    ctx: Context,
}

fn harness(account: Option<&str>, loader: MockInterfaceLoader) -> Harness {
    let read_model = Arc::new(MockReadModel::new());
    let chain = Arc::new(MockChainClient::new());
    let loader = Arc::new(loader);
    let registry = ContractRegistry::new()
        .with("Reputation", Address::parse(REP).unwrap(), "Reputation")
        .with("GEN", Address::parse(GEN).unwrap(), "DAOToken");
    let ctx = test_context_with_registry(
        Arc::clone(&read_model) as _,
        Arc::clone(&chain) as _,
        Arc::clone(&loader) as _,
        account.map(|a| Address::parse(a).unwrap()),
        registry,
    );
    Harness {
        read_model,
        chain,
        loader,
        ctx,
    }
}

fn holder() -> Address {
    Address::parse(HOLDER).unwrap()
}

fn balance(amount: u64) -> serde_json::Value {
    json!({"reputationHolders": [{"address": HOLDER, "balance": amount.to_string()}]})
}

#[tokio::test]
async fn test_submit_without_signer_emits_nothing() {
    let h = harness(None, MockInterfaceLoader::new());
    let rep = Reputation::new(REP, &h.ctx).unwrap();

    let err = rep
        .mint(&holder(), U256::from(500u64))
        .await
        .unwrap()
        .submit()
        .err()
        .unwrap();

    match err {
        AppError::NoSigner(message) => {
            assert!(message.contains("mint"));
            assert!(message.contains(REP));
        }
        other => panic!("expected NoSigner, got {other:?}"),
    }
    assert!(h.chain.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mint_confirmed_by_read_model() {
    let h = harness(Some(HOLDER), MockInterfaceLoader::new());
    h.read_model.respond(HOLDER_QUERY, balance(100));
    let indexer = Arc::clone(&h.read_model);
    h.chain.on_send(move |_| indexer.respond(HOLDER_QUERY, balance(600)));

    let rep = Reputation::new(REP, &h.ctx).unwrap();
    let probe = ObservedState::until(rep.reputation_of(&holder()).unwrap(), |balance, _| {
        *balance == U256::from(600u64)
    });
    let events: Vec<_> = rep
        .mint(&holder(), U256::from(500u64))
        .await
        .unwrap()
        .confirm_with(probe)
        .submit()
        .unwrap()
        .collect()
        .await;

    let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![TransactionStatus::Pending, TransactionStatus::Mined, TransactionStatus::Confirmed]
    );

    let mint = events[1].receipt().unwrap().event("Mint").unwrap();
    assert_eq!(mint.params["_to"], HOLDER);
    assert_eq!(mint.params["_amount"], "500");

    let confirmed = &events[2].record;
    assert_eq!(confirmed.confirmation, Some(Confirmation::ReadModel));
    assert_eq!(confirmed.hash, events[1].record.hash);
    assert!(events.iter().all(|e| e.record.id == confirmed.id));
}

#[tokio::test(start_paused = true)]
async fn test_lagging_read_model_confirms_on_receipt() {
    let h = harness(Some(HOLDER), MockInterfaceLoader::new());
    h.read_model.respond(HOLDER_QUERY, balance(100));
    let mut diagnostics = h.ctx.diagnostics();

    let rep = Reputation::new(REP, &h.ctx).unwrap();
    let confirmed = rep
        .mint(&holder(), U256::from(500u64))
        .await
        .unwrap()
        .confirm_with(ObservedState::change(rep.reputation_of(&holder()).unwrap()))
        .submit()
        .unwrap()
        .send()
        .await
        .unwrap();

    assert_eq!(confirmed.record.confirmation, Some(Confirmation::ReceiptOnly));
    match diagnostics.recv().await.unwrap() {
        Diagnostic::ConsistencyTimeout {
            transaction_id,
            contract,
            method,
            waited,
            ..
        } => {
            assert_eq!(transaction_id, confirmed.record.id);
            assert_eq!(contract.as_str(), REP);
            assert_eq!(method, "mint");
            assert_eq!(waited, Duration::from_secs(2));
        }
        other => panic!("expected ConsistencyTimeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_read_model_outage_does_not_delay_submission() {
    let h = harness(Some(HOLDER), MockInterfaceLoader::new());
    h.read_model.fail_next(u64::MAX);
    let mut diagnostics = h.ctx.diagnostics();
    let start = tokio::time::Instant::now();

    let rep = Reputation::new(REP, &h.ctx).unwrap();
    let mut events = rep
        .mint(&holder(), U256::from(500u64))
        .await
        .unwrap()
        .confirm_with(ObservedState::change(rep.reputation_of(&holder()).unwrap()))
        .submit()
        .unwrap();

    assert_eq!(events.next().await.unwrap().status, TransactionStatus::Pending);
    let mined = events.next().await.unwrap();
    assert_eq!(mined.status, TransactionStatus::Mined);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(h.chain.sent().len(), 1);

    let confirmed = events.next().await.unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
    assert_eq!(confirmed.record.confirmation, Some(Confirmation::ReceiptOnly));
    assert!(matches!(
        diagnostics.recv().await.unwrap(),
        Diagnostic::ConsistencyTimeout { transaction_id, waited, .. }
            if transaction_id == confirmed.record.id && waited == Duration::from_secs(2)
    ));
    assert!(h.read_model.query_count() > 1);
}

#[tokio::test]
async fn test_insufficient_funds_fails_after_pending() {
    let h = harness(Some(HOLDER), MockInterfaceLoader::new());
    h.chain.fail_submissions(ChainError::InsufficientFunds);

    let token = Token::new(GEN, &h.ctx).unwrap();
    let events: Vec<_> = token
        .mint(&holder(), U256::from(1u64))
        .await
        .unwrap()
        .submit()
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, TransactionStatus::Pending);
    assert_eq!(events[1].status, TransactionStatus::Failed);
    assert!(matches!(
        events[1].error(),
        Some(SubmissionError::InsufficientFunds { sender, method, .. }) if sender == HOLDER && method == "mint"
    ));
}

#[tokio::test]
async fn test_dispose_stops_tracking() {
    let h = harness(Some(HOLDER), MockInterfaceLoader::new());
    h.chain.set_latency(Duration::from_secs(3600));

    let token = Token::new(GEN, &h.ctx).unwrap();
    let mut events = token
        .approve(&holder(), U256::from(10u64))
        .await
        .unwrap()
        .submit()
        .unwrap();

    assert_eq!(events.next().await.unwrap().status, TransactionStatus::Pending);
    h.ctx.dispose();
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_concurrent_resolution_constructs_once() {
    let h = harness(None, MockInterfaceLoader::with_config(MockConfig::success().with_latency(50)));

    let (by_name, by_address) = tokio::join!(h.ctx.resolve("Reputation"), h.ctx.resolve(REP));
    let (by_name, by_address) = (by_name.unwrap(), by_address.unwrap());

    assert!(Arc::ptr_eq(&by_name, &by_address));
    assert_eq!(h.loader.load_count(), 1);
    assert_eq!(by_name.interface().name, "Reputation");

    let token = h.ctx.resolve("GEN").await.unwrap();
    assert_eq!(token.address().as_str(), GEN);
    assert_eq!(h.loader.load_count(), 2);
}

#[tokio::test]
async fn test_failed_construction_is_not_cached() {
    let h = harness(None, MockInterfaceLoader::new());
    h.loader.set_failing(true);
    assert!(h.ctx.resolve("Reputation").await.is_err());

    h.loader.set_failing(false);
    let handle = h.ctx.resolve("Reputation").await.unwrap();
    assert_eq!(handle.address().as_str(), REP);
}
