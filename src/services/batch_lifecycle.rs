use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::production_batch::BatchStatus;
use crate::entities::{batch_input, production_batch, ReferenceKind};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{
    AppliedWithdrawal, BatchSpec, ConsumptionRequest, MutationReference, TrailEvent,
    TrailEventKind,
};
use crate::services::audit_ledger::AuditLedger;
use crate::services::batch_repository::BatchRepository;
use crate::services::consumption::ConsumptionCoordinator;
use validator::Validate;

/// Rollback reason written when a batch update hands back the material of the
/// input set it is replacing.
pub const ROLLBACK_REASON_SUPERSEDED: &str = "superseded by update";

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Owns the production-batch state machine and keeps batch rows consistent
/// with lot state: a batch is only persisted after its consumption committed,
/// and replacing or rejecting its inputs always goes through the
/// coordinator's compensation path.
#[derive(Clone)]
pub struct BatchLifecycleManager {
    repository: Arc<dyn BatchRepository>,
    coordinator: ConsumptionCoordinator,
    ledger: Arc<dyn AuditLedger>,
    event_sender: Arc<EventSender>,
}

fn build_input_rows(batch_id: Uuid, withdrawals: &[AppliedWithdrawal]) -> Vec<batch_input::Model> {
    withdrawals
        .iter()
        .map(|w| batch_input::Model {
            id: Uuid::new_v4(),
            batch_id,
            lot_id: w.lot_id,
            quantity_used: w.quantity,
            unit_cost_at_use: w.unit_cost,
            total_cost: w.total_cost,
            created_at: w.withdrawn_at,
        })
        .collect()
}

/// Rebuilds the compensation snapshot of a committed consumption from its
/// persisted input rows.
fn snapshot_from_inputs(inputs: &[batch_input::Model]) -> Vec<AppliedWithdrawal> {
    inputs
        .iter()
        .map(|input| AppliedWithdrawal {
            lot_id: input.lot_id,
            quantity: input.quantity_used,
            unit_cost: input.unit_cost_at_use,
            total_cost: input.total_cost,
            withdrawn_at: input.created_at,
        })
        .collect()
}

fn status_of(batch: &production_batch::Model) -> Result<BatchStatus, ServiceError> {
    BatchStatus::from_str(&batch.status).map_err(|_| {
        ServiceError::InternalError(format!(
            "Batch {} carries unknown status '{}'",
            batch.id, batch.status
        ))
    })
}

impl BatchLifecycleManager {
    pub fn new(
        repository: Arc<dyn BatchRepository>,
        coordinator: ConsumptionCoordinator,
        ledger: Arc<dyn AuditLedger>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            repository,
            coordinator,
            ledger,
            event_sender,
        }
    }

    /// Creates a batch, consuming its input lots first. With no requests the
    /// batch starts as a draft holding no material; otherwise it is persisted
    /// in progress only after every withdrawal committed. If persistence
    /// fails after a successful consumption, the consumed material is handed
    /// back before the error is returned.
    #[instrument(skip(self, spec, requests), fields(batch_number = %spec.batch_number))]
    pub async fn create(
        &self,
        spec: BatchSpec,
        requests: &[ConsumptionRequest],
    ) -> Result<production_batch::Model, ServiceError> {
        spec.validate()?;
        if let Some(expected) = spec.expected_output_quantity {
            if expected <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Expected output quantity must be positive, got: {}",
                    expected
                )));
            }
        }

        let batch_id = Uuid::new_v4();
        let reference = MutationReference::new(
            batch_id,
            ReferenceKind::ProductionBatch,
            spec.created_by.clone(),
        );

        let (status, inputs, total_input_cost) = if requests.is_empty() {
            (BatchStatus::Draft, Vec::new(), Decimal::ZERO)
        } else {
            let consumed = self.coordinator.consume(requests, &reference).await?;
            let total = consumed.total_cost();
            (
                BatchStatus::InProgress,
                build_input_rows(batch_id, &consumed.withdrawals),
                total,
            )
        };

        let now = Utc::now();
        let batch = production_batch::Model {
            id: batch_id,
            batch_number: spec.batch_number,
            status: status.to_string(),
            total_input_cost,
            expected_output_quantity: spec.expected_output_quantity,
            output_quantity: None,
            cost_per_unit: None,
            yield_percentage: None,
            created_by: spec.created_by,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let inserted = match self.repository.insert_batch(batch, inputs.clone()).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(
                    "Batch {} persistence failed after consumption; handing material back",
                    batch_id
                );
                self.coordinator
                    .release(
                        &snapshot_from_inputs(&inputs),
                        &reference,
                        &format!("batch persistence failed: {}", e),
                    )
                    .await?;
                return Err(e);
            }
        };

        counter!("batches_created_total", 1);
        info!(
            "Created batch {} ({}) with {} inputs",
            inserted.id,
            inserted.batch_number,
            inputs.len()
        );
        self.event_sender
            .send_or_log(Event::BatchCreated(inserted.id))
            .await;

        Ok(inserted)
    }

    /// Replaces a batch's input set. The committed inputs are handed back
    /// first (with a rollback record), then the new set is consumed. If the
    /// new consumption fails, the original inputs are re-applied; only when
    /// that re-application also fails is the batch marked rejected, because
    /// at that point its rows no longer describe any held material.
    #[instrument(skip(self, requests))]
    pub async fn update(
        &self,
        batch_id: Uuid,
        requests: &[ConsumptionRequest],
        actor: &str,
    ) -> Result<production_batch::Model, ServiceError> {
        if requests.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Batch update requires at least one lot request".to_string(),
            ));
        }

        let batch = self.find_required(batch_id).await?;
        let status = status_of(&batch)?;
        if !status.allows_input_changes() {
            return Err(ServiceError::InvalidOperation(format!(
                "Batch {} is {} and its inputs can no longer change",
                batch_id, batch.status
            )));
        }

        let reference = MutationReference::new(batch_id, ReferenceKind::ProductionBatch, actor);
        let original_inputs = self.repository.inputs_for(batch_id).await?;
        let original_snapshot = snapshot_from_inputs(&original_inputs);

        self.coordinator
            .release(&original_snapshot, &reference, ROLLBACK_REASON_SUPERSEDED)
            .await?;

        let consumed = match self.coordinator.consume(requests, &reference).await {
            Ok(consumed) => consumed,
            Err(e @ ServiceError::CompensationFailure { .. }) => {
                // The replacement consumption could not even clean up after
                // itself; re-applying the originals on top would double-count.
                self.mark_rejected(batch, &e.to_string()).await?;
                return Err(e);
            }
            Err(e) => {
                let reapply: Vec<ConsumptionRequest> = original_snapshot
                    .iter()
                    .map(|w| ConsumptionRequest {
                        lot_id: w.lot_id,
                        quantity: w.quantity,
                    })
                    .collect();
                match self.coordinator.consume(&reapply, &reference).await {
                    Ok(_) => {
                        // Original material is held again and the persisted
                        // rows still describe it; the update simply failed.
                        return Err(e);
                    }
                    Err(reapply_err) => {
                        error!(
                            "Batch {} lost its original inputs during a failed update: {}",
                            batch_id, reapply_err
                        );
                        self.mark_rejected(batch, &reapply_err.to_string()).await?;
                        return Err(ServiceError::CompensationFailure {
                            reference_id: batch_id,
                            detail: format!(
                                "update failed ({}) and original inputs could not be re-applied ({})",
                                e, reapply_err
                            ),
                        });
                    }
                }
            }
        };

        let rows = build_input_rows(batch_id, &consumed.withdrawals);
        let total_input_cost = consumed.total_cost();
        if let Err(e) = self
            .repository
            .replace_inputs(batch_id, rows, total_input_cost)
            .await
        {
            // Same shape as a create-time persistence failure: the new
            // withdrawals are held but no row describes them, so hand the
            // material back before surfacing the storage error.
            warn!(
                "Batch {} input persistence failed after consumption; handing material back",
                batch_id
            );
            self.coordinator
                .release(
                    &consumed.withdrawals,
                    &reference,
                    &format!("batch input persistence failed: {}", e),
                )
                .await?;
            return Err(e);
        }

        let mut updated = self.find_required(batch_id).await?;
        if status == BatchStatus::Completed {
            // Completed batches keep their recorded output; the unit cost and
            // yield are re-derived from the new input cost.
            if let Some(output) = updated.output_quantity {
                updated.cost_per_unit = Some(total_input_cost / output);
            }
            updated.updated_at = Utc::now();
            updated = self.repository.update_batch(updated).await?;
        } else if status == BatchStatus::Draft {
            updated.status = BatchStatus::InProgress.to_string();
            updated.updated_at = Utc::now();
            updated = self.repository.update_batch(updated).await?;
        }

        counter!("batches_updated_total", 1);
        self.event_sender
            .send_or_log(Event::BatchUpdated(batch_id))
            .await;

        Ok(updated)
    }

    /// Records the batch's actual output and derives its unit cost, plus the
    /// yield percentage when an expected output was declared.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        batch_id: Uuid,
        output_quantity: Decimal,
    ) -> Result<production_batch::Model, ServiceError> {
        if output_quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Output quantity must be positive, got: {}",
                output_quantity
            )));
        }

        let mut batch = self.find_required(batch_id).await?;
        if status_of(&batch)? != BatchStatus::InProgress {
            return Err(ServiceError::InvalidOperation(format!(
                "Batch {} is {} and cannot be completed",
                batch_id, batch.status
            )));
        }

        batch.status = BatchStatus::Completed.to_string();
        batch.output_quantity = Some(output_quantity);
        batch.cost_per_unit = Some(batch.total_input_cost / output_quantity);
        batch.yield_percentage = batch
            .expected_output_quantity
            .map(|expected| output_quantity / expected * HUNDRED);
        batch.completed_at = Some(Utc::now());
        batch.updated_at = Utc::now();

        let updated = self.repository.update_batch(batch).await?;

        counter!("batches_completed_total", 1);
        info!(
            "Completed batch {} with output {} (cost per unit {:?})",
            batch_id, output_quantity, updated.cost_per_unit
        );
        self.event_sender
            .send_or_log(Event::BatchCompleted {
                batch_id,
                output_quantity,
            })
            .await;

        Ok(updated)
    }

    /// Approves a completed batch. Approval is terminal: the inputs and the
    /// derived costs are frozen from here on.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        batch_id: Uuid,
        approver: &str,
    ) -> Result<production_batch::Model, ServiceError> {
        let mut batch = self.find_required(batch_id).await?;
        if status_of(&batch)? != BatchStatus::Completed {
            return Err(ServiceError::InvalidOperation(format!(
                "Batch {} is {} and cannot be approved",
                batch_id, batch.status
            )));
        }

        batch.status = BatchStatus::Approved.to_string();
        batch.updated_at = Utc::now();
        let updated = self.repository.update_batch(batch).await?;

        info!("Batch {} approved by {}", batch_id, approver);
        self.event_sender
            .send_or_log(Event::BatchApproved(batch_id))
            .await;

        Ok(updated)
    }

    /// Rejects a batch and hands back everything it consumed. Terminal; the
    /// batch keeps no input rows afterwards.
    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        batch_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<production_batch::Model, ServiceError> {
        let batch = self.find_required(batch_id).await?;
        let status = status_of(&batch)?;
        if !status.allows_input_changes() {
            return Err(ServiceError::InvalidOperation(format!(
                "Batch {} is {} and cannot be rejected",
                batch_id, batch.status
            )));
        }

        let reference = MutationReference::new(batch_id, ReferenceKind::ProductionBatch, actor);
        let inputs = self.repository.inputs_for(batch_id).await?;

        self.coordinator
            .release(&snapshot_from_inputs(&inputs), &reference, reason)
            .await?;

        // mark_rejected clears the input rows and zeroes the input cost.
        let updated = self.mark_rejected(batch, reason).await?;
        Ok(updated)
    }

    /// The operator-facing timeline of a batch: every quantity mutation on
    /// its behalf, every rollback, and its recorded status transitions, in
    /// time order.
    pub async fn audit_trail(&self, batch_id: Uuid) -> Result<Vec<TrailEvent>, ServiceError> {
        let batch = self.find_required(batch_id).await?;

        let mut trail: Vec<TrailEvent> = Vec::new();

        trail.push(TrailEvent {
            occurred_at: batch.created_at,
            kind: TrailEventKind::StatusChange,
            detail: format!("batch {} created by {}", batch.batch_number, batch.created_by),
        });
        if let Some(completed_at) = batch.completed_at {
            trail.push(TrailEvent {
                occurred_at: completed_at,
                kind: TrailEventKind::StatusChange,
                detail: format!("batch completed (status now {})", batch.status),
            });
        }

        for entry in self.ledger.entries_for_reference(batch_id).await? {
            let verb = if entry.delta < Decimal::ZERO {
                "withdrawn from"
            } else {
                "restored to"
            };
            trail.push(TrailEvent {
                occurred_at: entry.recorded_at,
                kind: TrailEventKind::QuantityMutation,
                detail: format!(
                    "{} {} lot {} by {}",
                    entry.delta.abs(),
                    verb,
                    entry.lot_id,
                    entry.actor
                ),
            });
        }

        for record in self.ledger.rollbacks_for(batch_id).await? {
            trail.push(TrailEvent {
                occurred_at: record.performed_at,
                kind: TrailEventKind::Rollback,
                detail: format!("{} (by {})", record.reason, record.performed_by),
            });
        }

        trail.sort_by_key(|event| event.occurred_at);
        Ok(trail)
    }

    async fn find_required(
        &self,
        batch_id: Uuid,
    ) -> Result<production_batch::Model, ServiceError> {
        self.repository
            .find_batch(batch_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production batch {} not found", batch_id))
            })
    }

    async fn mark_rejected(
        &self,
        mut batch: production_batch::Model,
        reason: &str,
    ) -> Result<production_batch::Model, ServiceError> {
        let batch_id = batch.id;
        // A rejected batch keeps no input rows and no input cost; the
        // rollback record is the surviving description of what it consumed.
        self.repository
            .replace_inputs(batch_id, Vec::new(), Decimal::ZERO)
            .await?;
        batch.status = BatchStatus::Rejected.to_string();
        batch.total_input_cost = Decimal::ZERO;
        batch.updated_at = Utc::now();
        let updated = self.repository.update_batch(batch).await?;

        counter!("batches_rejected_total", 1);
        self.event_sender
            .send_or_log(Event::BatchRejected {
                batch_id,
                reason: reason.to_string(),
            })
            .await;

        Ok(updated)
    }
}
