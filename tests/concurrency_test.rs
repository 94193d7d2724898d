use lotledger::entities::ReferenceKind;
use lotledger::events::{process_events, EventSender};
use lotledger::models::{BatchSpec, ConsumptionRequest, MutationReference};
use lotledger::services::{
    AuditLedger, BatchLifecycleManager, ConsumptionCoordinator, InMemoryBackend, LotStore,
};
use lotledger::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn coordinator(backend: &InMemoryBackend) -> ConsumptionCoordinator {
    let (tx, rx) = mpsc::channel(1000);
    tokio::spawn(process_events(rx));
    ConsumptionCoordinator::new(
        backend.lot_store(),
        backend.audit_ledger(),
        Arc::new(EventSender::new(tx)),
    )
}

fn reference() -> MutationReference {
    MutationReference::new(Uuid::new_v4(), ReferenceKind::SalesOrder, "tester")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conditional_decrement_admits_exactly_one_winner() {
    let backend = InMemoryBackend::new();
    let lot = backend.seed_lot(Uuid::new_v4(), "LOT-A", dec!(100), dec!(1));
    let svc = coordinator(&backend);

    // Both pass the advisory check against 100 remaining; only one
    // conditional decrement of 60 can land.
    let mut tasks = vec![];
    for _ in 0..2 {
        let svc = svc.clone();
        let lot_id = lot.id;
        tasks.push(tokio::spawn(async move {
            svc.consume(
                &[ConsumptionRequest {
                    lot_id,
                    quantity: dec!(60),
                }],
                &reference(),
            )
            .await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(_) => successes += 1,
            Err(e) => {
                // The loser failed either at the advisory pass or at the
                // decrement itself; both outcomes are retryable or carry
                // alternatives, never partial.
                assert!(matches!(
                    e,
                    ServiceError::RaceLost { .. } | ServiceError::InsufficientQuantity { .. }
                ));
            }
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(
        backend.lot_store().get(lot.id).await.unwrap().remaining_quantity,
        dec!(40)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversubscribed_lot_never_goes_negative() {
    let backend = InMemoryBackend::new();
    let lot = backend.seed_lot(Uuid::new_v4(), "LOT-A", dec!(10), dec!(1));
    let svc = coordinator(&backend);

    let mut tasks = vec![];
    for _ in 0..20 {
        let svc = svc.clone();
        let lot_id = lot.id;
        tasks.push(tokio::spawn(async move {
            svc.consume(
                &[ConsumptionRequest {
                    lot_id,
                    quantity: Decimal::ONE,
                }],
                &reference(),
            )
            .await
            .is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.expect("task") {
            successes += 1;
        }
    }

    assert_eq!(successes, 10, "exactly 10 single-unit consumptions fit in 10");
    assert_eq!(
        backend.lot_store().get(lot.id).await.unwrap().remaining_quantity,
        Decimal::ZERO
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_batch_creates_persist_exactly_one_batch() {
    let backend = InMemoryBackend::new();
    let lot = backend.seed_lot(Uuid::new_v4(), "LOT-A", dec!(10), dec!(1));
    let (tx, rx) = mpsc::channel(1000);
    tokio::spawn(process_events(rx));
    let sender = Arc::new(EventSender::new(tx));
    let coordinator = ConsumptionCoordinator::new(
        backend.lot_store(),
        backend.audit_ledger(),
        sender.clone(),
    );
    let svc = BatchLifecycleManager::new(
        backend.batch_repository(),
        coordinator,
        backend.audit_ledger(),
        sender,
    );

    // Both batches want the lot's full 10; only one consumption can land, so
    // only one batch row may ever exist.
    let mut tasks = vec![];
    for i in 0..2 {
        let svc = svc.clone();
        let lot_id = lot.id;
        tasks.push(tokio::spawn(async move {
            svc.create(
                BatchSpec {
                    batch_number: format!("BATCH-RACE-{}", i),
                    expected_output_quantity: None,
                    created_by: "operator".to_string(),
                },
                &[ConsumptionRequest {
                    lot_id,
                    quantity: dec!(10),
                }],
            )
            .await
        }));
    }

    let mut created = vec![];
    for task in tasks {
        if let Ok(batch) = task.await.expect("task") {
            created.push(batch);
        }
    }

    assert_eq!(created.len(), 1);
    assert_eq!(
        backend.lot_store().get(lot.id).await.unwrap().remaining_quantity,
        Decimal::ZERO
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_multi_lot_consumptions_stay_all_or_nothing() {
    let backend = InMemoryBackend::new();
    let material = Uuid::new_v4();
    let lot_a = backend.seed_lot(material, "LOT-A", dec!(100), dec!(2));
    let lot_b = backend.seed_lot(material, "LOT-B", dec!(50), dec!(3));
    let svc = coordinator(&backend);

    // Each run wants 80 of A and 40 of B; the material only covers one run.
    // The loser may get partway through and must compensate fully.
    let mut tasks = vec![];
    for _ in 0..2 {
        let svc = svc.clone();
        let (a, b) = (lot_a.id, lot_b.id);
        tasks.push(tokio::spawn(async move {
            svc.consume(
                &[
                    ConsumptionRequest {
                        lot_id: a,
                        quantity: dec!(80),
                    },
                    ConsumptionRequest {
                        lot_id: b,
                        quantity: dec!(40),
                    },
                ],
                &reference(),
            )
            .await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.expect("task").is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);

    let store = backend.lot_store();
    assert_eq!(store.get(lot_a.id).await.unwrap().remaining_quantity, dec!(20));
    assert_eq!(store.get(lot_b.id).await.unwrap().remaining_quantity, dec!(10));

    // However the race interleaved, the ledger nets out to exactly one run's
    // withdrawals per lot.
    let ledger = backend.audit_ledger();
    let a_net: Decimal = ledger
        .entries_for_lot(lot_a.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.delta)
        .sum();
    let b_net: Decimal = ledger
        .entries_for_lot(lot_b.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.delta)
        .sum();
    assert_eq!(a_net, dec!(-80));
    assert_eq!(b_net, dec!(-40));
}
