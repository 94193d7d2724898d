//! Integration tests for the SeaORM-backed stores against an in-process
//! SQLite database. Ignored by default because they need the sqlx SQLite
//! driver available at runtime; run with: cargo test -- --ignored

use chrono::Utc;
use lotledger::db;
use lotledger::entities::{material_lot, LotStatus, ReferenceKind};
use lotledger::models::MutationReference;
use lotledger::services::{AuditLedger, LotStore, SqlAuditLedger, SqlLotStore};
use lotledger::ServiceError;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

async fn setup() -> Arc<db::DbPool> {
    let pool = db::establish_connection("sqlite::memory:")
        .await
        .expect("connect");
    db::create_schema(&pool).await.expect("schema");
    Arc::new(pool)
}

async fn seed_lot(pool: &db::DbPool, quantity: Decimal) -> material_lot::Model {
    let now = Utc::now();
    material_lot::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(Uuid::new_v4()),
        lot_number: Set("LOT-SQL".to_string()),
        total_quantity: Set(quantity),
        remaining_quantity: Set(quantity),
        unit_cost: Set(Decimal::from(2)),
        status: Set(LotStatus::Active.to_string()),
        received_date: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(pool)
    .await
    .expect("seed lot")
}

fn reference() -> MutationReference {
    MutationReference::new(Uuid::new_v4(), ReferenceKind::ProductionBatch, "sql-test")
}

#[tokio::test]
#[ignore]
async fn withdraw_decrements_and_audits_atomically() {
    let pool = setup().await;
    let lot = seed_lot(&pool, Decimal::from(100)).await;
    let store = SqlLotStore::new(pool.clone());
    let ledger = SqlAuditLedger::new(pool.clone());

    let reference = reference();
    let updated = store
        .withdraw(lot.id, Decimal::from(30), &reference)
        .await
        .expect("withdraw");
    assert_eq!(updated.remaining_quantity, Decimal::from(70));

    let entries = ledger.entries_for_lot(lot.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delta, Decimal::from(-30));
    assert_eq!(entries[0].reference_id, reference.reference_id);
}

#[tokio::test]
#[ignore]
async fn overdraw_is_refused_and_leaves_no_audit_entry() {
    let pool = setup().await;
    let lot = seed_lot(&pool, Decimal::from(10)).await;
    let store = SqlLotStore::new(pool.clone());
    let ledger = SqlAuditLedger::new(pool.clone());

    let err = store
        .withdraw(lot.id, Decimal::from(11), &reference())
        .await
        .expect_err("overdraw");
    match err {
        ServiceError::InsufficientQuantity {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, Decimal::from(11));
            assert_eq!(available, Decimal::from(10));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(
        store.get(lot.id).await.unwrap().remaining_quantity,
        Decimal::from(10)
    );
    assert!(ledger.entries_for_lot(lot.id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn exhaustion_and_restore_round_trip_status() {
    let pool = setup().await;
    let lot = seed_lot(&pool, Decimal::from(10)).await;
    let store = SqlLotStore::new(pool.clone());

    let reference = reference();
    let drained = store
        .withdraw(lot.id, Decimal::from(10), &reference)
        .await
        .expect("withdraw all");
    assert_eq!(drained.remaining_quantity, Decimal::ZERO);
    assert_eq!(drained.status, LotStatus::Exhausted.to_string());

    let restored = store
        .restore(lot.id, Decimal::from(4), &reference)
        .await
        .expect("restore");
    assert_eq!(restored.remaining_quantity, Decimal::from(4));
    assert_eq!(restored.status, LotStatus::Active.to_string());

    // The ceiling is the intake quantity, never more.
    let err = store
        .restore(lot.id, Decimal::from(7), &reference)
        .await
        .expect_err("over ceiling");
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}
