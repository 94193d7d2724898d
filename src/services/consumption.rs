use chrono::Utc;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::entities::rollback_record;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{AppliedWithdrawal, ConsumedSet, ConsumptionRequest, MutationReference};
use crate::services::audit_ledger::{AuditLedger, NewRollbackRecord};
use crate::services::availability::AvailabilityValidator;
use crate::services::lot_store::LotStore;

/// Rollback reason written when a mid-sequence withdrawal finds less material
/// than the advisory pass saw.
pub const ROLLBACK_REASON_INSUFFICIENT: &str = "insufficient quantity during multi-lot consumption";

/// Rollback reason written when a deadline expires between withdrawals.
pub const ROLLBACK_REASON_DEADLINE: &str = "consumption deadline exceeded";

/// Drives multi-lot consumption as an all-or-nothing sequence: advisory
/// availability pass, ordered withdrawals, and on any mid-sequence failure a
/// rollback record followed by compensating restores in reverse order. There
/// is no cross-lot transaction; atomicity is the coordinator's responsibility.
#[derive(Clone)]
pub struct ConsumptionCoordinator {
    lot_store: Arc<dyn LotStore>,
    ledger: Arc<dyn AuditLedger>,
    event_sender: Arc<EventSender>,
    validator: AvailabilityValidator,
}

impl ConsumptionCoordinator {
    pub fn new(
        lot_store: Arc<dyn LotStore>,
        ledger: Arc<dyn AuditLedger>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let validator = AvailabilityValidator::new(lot_store.clone());
        Self {
            lot_store,
            ledger,
            event_sender,
            validator,
        }
    }

    /// The advisory validator bound to this coordinator's lot store.
    pub fn validator(&self) -> &AvailabilityValidator {
        &self.validator
    }

    /// Consumes every requested quantity or none of them.
    pub async fn consume(
        &self,
        requests: &[ConsumptionRequest],
        reference: &MutationReference,
    ) -> Result<ConsumedSet, ServiceError> {
        self.consume_with_deadline(requests, reference, None).await
    }

    /// Like [`consume`](Self::consume), but abandons and compensates the
    /// sequence when `deadline` passes between withdrawals. A withdrawal
    /// already in flight is never interrupted, so the outcome is still
    /// all-or-nothing.
    #[instrument(skip(self, requests, reference), fields(reference_id = %reference.reference_id))]
    pub async fn consume_with_deadline(
        &self,
        requests: &[ConsumptionRequest],
        reference: &MutationReference,
        deadline: Option<Instant>,
    ) -> Result<ConsumedSet, ServiceError> {
        if requests.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Consumption requires at least one lot request".to_string(),
            ));
        }
        for request in requests {
            request.validate()?;
        }

        let report = self.validator.check_all(requests).await?;
        if let Some(item) = report.first_insufficient() {
            counter!("consumption_rejected_total", 1);
            return Err(ServiceError::InsufficientQuantity {
                lot_id: item.lot_id,
                requested: item.requested,
                available: item.available,
                alternatives: item.alternatives.clone(),
            });
        }

        let mut applied: Vec<AppliedWithdrawal> = Vec::with_capacity(requests.len());

        for request in requests {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.release(&applied, reference, ROLLBACK_REASON_DEADLINE)
                        .await?;
                    return Err(ServiceError::Timeout(format!(
                        "Consumption for {} exceeded its deadline after {} of {} withdrawals",
                        reference.reference_id,
                        applied.len(),
                        requests.len()
                    )));
                }
            }

            match self
                .lot_store
                .withdraw(request.lot_id, request.quantity, reference)
                .await
            {
                Ok(lot) => {
                    self.event_sender
                        .send_or_log(Event::LotWithdrawn {
                            lot_id: lot.id,
                            quantity: request.quantity,
                            reference_id: reference.reference_id,
                        })
                        .await;
                    applied.push(AppliedWithdrawal {
                        lot_id: lot.id,
                        quantity: request.quantity,
                        unit_cost: lot.unit_cost,
                        total_cost: lot.unit_cost * request.quantity,
                        withdrawn_at: Utc::now(),
                    });
                }
                Err(ServiceError::InsufficientQuantity {
                    lot_id,
                    requested,
                    available,
                    ..
                }) => {
                    // The advisory pass saw enough, so a concurrent consumer
                    // got there first. Compensate and report the race.
                    warn!(
                        "Withdrawal race lost on lot {} ({} applied so far)",
                        lot_id,
                        applied.len()
                    );
                    self.release(&applied, reference, ROLLBACK_REASON_INSUFFICIENT)
                        .await?;
                    return Err(ServiceError::RaceLost {
                        lot_id,
                        requested,
                        available,
                    });
                }
                Err(other) => {
                    self.release(
                        &applied,
                        reference,
                        &format!("withdrawal failed: {}", other),
                    )
                    .await?;
                    return Err(other);
                }
            }
        }

        let set = ConsumedSet {
            reference_id: reference.reference_id,
            withdrawals: applied,
        };

        counter!("consumptions_completed_total", 1);
        histogram!("consumption_lots_per_request", set.withdrawals.len() as f64);

        info!(
            "Consumed {} lots for {} (total cost {})",
            set.withdrawals.len(),
            reference.reference_id,
            set.total_cost()
        );
        self.event_sender
            .send_or_log(Event::ConsumptionCompleted {
                reference_id: reference.reference_id,
                lots_consumed: set.withdrawals.len(),
                total_cost: set.total_cost(),
            })
            .await;

        Ok(set)
    }

    /// Reverses already-applied withdrawals: writes the rollback record
    /// first, then restores lots in reverse order of withdrawal. Also used to
    /// hand material back when a committed consumption is superseded. With
    /// nothing applied there is nothing to reverse and no record is written.
    ///
    /// Any failure here is a [`ServiceError::CompensationFailure`]; the
    /// rollback record (when it was written) is what an operator reconciles
    /// against.
    pub async fn release(
        &self,
        applied: &[AppliedWithdrawal],
        reference: &MutationReference,
        reason: &str,
    ) -> Result<Option<rollback_record::Model>, ServiceError> {
        if applied.is_empty() {
            return Ok(None);
        }

        counter!("consumption_rollbacks_total", 1);

        let record = match self
            .ledger
            .record_rollback(NewRollbackRecord {
                reference: reference.clone(),
                reason: reason.to_string(),
                original_inputs: applied.to_vec(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                return Err(self
                    .compensation_failure(reference, format!("rollback record: {}", e))
                    .await);
            }
        };

        for withdrawal in applied.iter().rev() {
            if let Err(e) = self
                .lot_store
                .restore(withdrawal.lot_id, withdrawal.quantity, reference)
                .await
            {
                return Err(self
                    .compensation_failure(
                        reference,
                        format!("restore of lot {}: {}", withdrawal.lot_id, e),
                    )
                    .await);
            }
            self.event_sender
                .send_or_log(Event::LotRestored {
                    lot_id: withdrawal.lot_id,
                    quantity: withdrawal.quantity,
                    reference_id: reference.reference_id,
                })
                .await;
        }

        self.event_sender
            .send_or_log(Event::ConsumptionRolledBack {
                reference_id: reference.reference_id,
                reason: reason.to_string(),
                lots_restored: applied.len(),
            })
            .await;

        Ok(Some(record))
    }

    async fn compensation_failure(
        &self,
        reference: &MutationReference,
        detail: String,
    ) -> ServiceError {
        counter!("compensation_failures_total", 1);
        error!(
            reference_id = %reference.reference_id,
            detail, "Compensation failed; lot state needs manual reconciliation"
        );
        self.event_sender
            .send_or_log(Event::CompensationFailed {
                reference_id: reference.reference_id,
                detail: detail.clone(),
            })
            .await;
        ServiceError::CompensationFailure {
            reference_id: reference.reference_id,
            detail,
        }
    }
}
