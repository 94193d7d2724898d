//! Property-based checks of the quantity invariants: a lot's remaining
//! quantity never leaves the `[0, total_quantity]` interval, the audit ledger
//! always nets out to the observable state, and consumption is all-or-nothing
//! for every shape of request.

use lotledger::entities::ReferenceKind;
use lotledger::events::EventSender;
use lotledger::models::{ConsumptionRequest, MutationReference};
use lotledger::services::{AuditLedger, ConsumptionCoordinator, InMemoryBackend, LotStore};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

fn coordinator(backend: &InMemoryBackend) -> ConsumptionCoordinator {
    // The receiver is dropped on purpose: event delivery degrades to a log
    // line and these cases assert on state, not events.
    let (tx, _rx) = mpsc::channel(64);
    ConsumptionCoordinator::new(
        backend.lot_store(),
        backend.audit_ledger(),
        Arc::new(EventSender::new(tx)),
    )
}

fn reference() -> MutationReference {
    MutationReference::new(Uuid::new_v4(), ReferenceKind::ProductionBatch, "prop")
}

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1u32..2_000).prop_map(Decimal::from)
}

#[derive(Debug, Clone)]
enum LotOp {
    Withdraw(Decimal),
    Restore(Decimal),
}

fn op_strategy() -> impl Strategy<Value = LotOp> {
    prop_oneof![
        quantity_strategy().prop_map(LotOp::Withdraw),
        quantity_strategy().prop_map(LotOp::Restore),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn remaining_quantity_stays_within_bounds(
        total in 1u32..2_000,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        block_on(async move {
            let backend = InMemoryBackend::new();
            let total = Decimal::from(total);
            let lot = backend.seed_lot(Uuid::new_v4(), "LOT-P", total, Decimal::ONE);
            let store = backend.lot_store();
            let reference = reference();

            for op in ops {
                // Individual ops may fail (insufficient, or over the intake
                // ceiling); the invariant must hold regardless.
                let _ = match op {
                    LotOp::Withdraw(q) => store.withdraw(lot.id, q, &reference).await,
                    LotOp::Restore(q) => store.restore(lot.id, q, &reference).await,
                };
                let current = store.get(lot.id).await.unwrap();
                prop_assert!(current.remaining_quantity >= Decimal::ZERO);
                prop_assert!(current.remaining_quantity <= total);
            }
            Ok(())
        })?;
    }

    #[test]
    fn ledger_nets_out_to_observable_state(
        total in 1u32..2_000,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        block_on(async move {
            let backend = InMemoryBackend::new();
            let total = Decimal::from(total);
            let lot = backend.seed_lot(Uuid::new_v4(), "LOT-P", total, Decimal::ONE);
            let store = backend.lot_store();
            let ledger = backend.audit_ledger();
            let reference = reference();

            for op in ops {
                let _ = match op {
                    LotOp::Withdraw(q) => store.withdraw(lot.id, q, &reference).await,
                    LotOp::Restore(q) => store.restore(lot.id, q, &reference).await,
                };
            }

            let current = store.get(lot.id).await.unwrap();
            let net: Decimal = ledger
                .entries_for_lot(lot.id)
                .await
                .unwrap()
                .iter()
                .map(|e| e.delta)
                .sum();
            // Every successful mutation appended exactly one entry, and every
            // failed one appended none.
            prop_assert_eq!(current.remaining_quantity, total + net);
            Ok(())
        })?;
    }

    #[test]
    fn consumption_is_all_or_nothing(
        totals in prop::collection::vec(1u32..2_000, 1..4),
        picks in prop::collection::vec((0usize..4, 1u32..2_500), 1..6),
    ) {
        block_on(async move {
            let backend = InMemoryBackend::new();
            let material = Uuid::new_v4();
            let lots: Vec<_> = totals
                .iter()
                .enumerate()
                .map(|(i, &t)| {
                    backend.seed_lot(
                        material,
                        &format!("LOT-{}", i),
                        Decimal::from(t),
                        Decimal::ONE,
                    )
                })
                .collect();
            let svc = coordinator(&backend);

            // Requests may repeat a lot or overdraw it; either the whole set
            // lands or nothing does.
            let requests: Vec<ConsumptionRequest> = picks
                .iter()
                .map(|&(idx, q)| ConsumptionRequest {
                    lot_id: lots[idx % lots.len()].id,
                    quantity: Decimal::from(q),
                })
                .collect();

            let before: Vec<Decimal> = lots.iter().map(|l| l.remaining_quantity).collect();
            let store = backend.lot_store();

            match svc.consume(&requests, &reference()).await {
                Ok(set) => {
                    prop_assert_eq!(set.withdrawals.len(), requests.len());
                    for (lot, before) in lots.iter().zip(&before) {
                        let consumed: Decimal = requests
                            .iter()
                            .filter(|r| r.lot_id == lot.id)
                            .map(|r| r.quantity)
                            .sum();
                        let after = store.get(lot.id).await.unwrap().remaining_quantity;
                        prop_assert_eq!(after, *before - consumed);
                    }
                }
                Err(_) => {
                    for (lot, before) in lots.iter().zip(&before) {
                        let after = store.get(lot.id).await.unwrap().remaining_quantity;
                        prop_assert_eq!(after, *before);
                    }
                }
            }
            Ok(())
        })?;
    }
}
