//! Integration tests for the PostgreSQL backends
//!
//! Skipped unless DATABASE_URL points at a database with migrations/
//! applied.

use std::sync::Arc;

use account_ledger::aggregate::OverdraftPolicy;
use account_ledger::domain::{AccountEvent, AccountStatus, Currency, OperationContext};
use account_ledger::event_store::{EventStore, EventStoreError, NewEvent, PgEventStore};
use account_ledger::Ledger;
use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

mod common;

fn created(account_id: Uuid) -> NewEvent {
    let event = AccountEvent::AccountCreated {
        account_id,
        balance: dec!(100),
        currency: Currency::new("USD").unwrap(),
        status: AccountStatus::Created,
        created_at: Utc::now(),
    };
    let context = OperationContext::new().with_correlation_id(Uuid::new_v4());
    NewEvent::new("Account", event.event_type(), &event, &context).unwrap()
}

#[tokio::test]
async fn test_event_store_append_and_load() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let event_store = PgEventStore::new(pool);
    let account_id = Uuid::new_v4();

    let outcome = event_store
        .append(account_id, 0, vec![created(account_id)])
        .await
        .unwrap();
    assert_eq!(outcome.new_version, 1);

    let events = event_store.load(account_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "AccountCreated");
    assert_eq!(events[0].sequence, 0);
    assert!(events[0].position > 0);
    assert_eq!(event_store.current_version(account_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_event_store_concurrency_conflict() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let event_store = PgEventStore::new(pool);
    let account_id = Uuid::new_v4();

    event_store
        .append(account_id, 0, vec![created(account_id)])
        .await
        .unwrap();

    // Wrong expected version
    let err = event_store
        .append(account_id, 0, vec![created(account_id)])
        .await
        .unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert_eq!(event_store.load(account_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_racing_appends_report_winner_version() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let event_store = PgEventStore::new(pool);
    let account_id = Uuid::new_v4();

    let (a, b) = tokio::join!(
        event_store.append(account_id, 0, vec![created(account_id)]),
        event_store.append(account_id, 0, vec![created(account_id)]),
    );

    let err = match (a, b) {
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    match err {
        EventStoreError::ConcurrencyConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected a concurrency conflict, got {}", other),
    }
    assert_eq!(event_store.current_version(account_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_postgres_ledger_scenario() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let ledger = Arc::new(Ledger::postgres(
        pool,
        common::test_config(OverdraftPolicy::Reject),
    ));

    let id = ledger.create_account(dec!(1000), "USD").await.unwrap();
    ledger.debit_account(id, dec!(200), "USD").await.unwrap();
    ledger.credit_account(id, dec!(50), "USD").await.unwrap();
    common::settle(&ledger, id).await;

    let account = ledger.get_account(id).await.unwrap();
    assert_eq!(account.balance, dec!(850));
    assert_eq!(account.status, AccountStatus::Activated);
    assert_eq!(ledger.get_account_operations(id).await.unwrap().len(), 2);
}
