//! In-memory backend implementing the same store contracts as the SQL
//! implementations. This is not mock data: the conditional-decrement and
//! append-only-audit semantics are honored for real, so tests and demos
//! exercise the exact interface the engine runs against in production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::entities::{
    audit_entry, batch_input, material_lot, production_batch, rollback_record, LotStatus,
};
use crate::errors::ServiceError;
use crate::models::MutationReference;
use crate::services::audit_ledger::{AuditLedger, NewRollbackRecord};
use crate::services::batch_repository::BatchRepository;
use crate::services::lot_store::LotStore;

#[derive(Default)]
struct InMemoryState {
    lots: DashMap<Uuid, material_lot::Model>,
    batches: DashMap<Uuid, production_batch::Model>,
    inputs: DashMap<Uuid, Vec<batch_input::Model>>,
    audit: Mutex<Vec<audit_entry::Model>>,
    rollbacks: Mutex<Vec<rollback_record::Model>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means another test thread panicked mid-push; the
    // Vec itself is still structurally sound.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn audit_row(lot_id: Uuid, delta: Decimal, reference: &MutationReference) -> audit_entry::Model {
    audit_entry::Model {
        id: Uuid::new_v4(),
        lot_id,
        delta,
        reference_id: reference.reference_id,
        reference_kind: reference.reference_kind.to_string(),
        actor: reference.actor.clone(),
        recorded_at: Utc::now(),
    }
}

/// Shared handle producing store views over one set of in-memory tables.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<InMemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lot_store(&self) -> Arc<InMemoryLotStore> {
        Arc::new(InMemoryLotStore {
            state: self.state.clone(),
        })
    }

    pub fn audit_ledger(&self) -> Arc<InMemoryAuditLedger> {
        Arc::new(InMemoryAuditLedger {
            state: self.state.clone(),
        })
    }

    pub fn batch_repository(&self) -> Arc<InMemoryBatchRepository> {
        Arc::new(InMemoryBatchRepository {
            state: self.state.clone(),
        })
    }

    /// Seeds a fully available lot received now.
    pub fn seed_lot(
        &self,
        material_id: Uuid,
        lot_number: &str,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> material_lot::Model {
        self.seed_lot_received(material_id, lot_number, quantity, unit_cost, Utc::now())
    }

    /// Seeds a lot with an explicit intake date, for FIFO-ordering tests.
    pub fn seed_lot_received(
        &self,
        material_id: Uuid,
        lot_number: &str,
        quantity: Decimal,
        unit_cost: Decimal,
        received_date: DateTime<Utc>,
    ) -> material_lot::Model {
        let now = Utc::now();
        let lot = material_lot::Model {
            id: Uuid::new_v4(),
            material_id,
            lot_number: lot_number.to_string(),
            total_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost,
            status: LotStatus::Active.to_string(),
            received_date,
            created_at: now,
            updated_at: now,
        };
        self.state.lots.insert(lot.id, lot.clone());
        lot
    }
}

pub struct InMemoryLotStore {
    state: Arc<InMemoryState>,
}

#[async_trait]
impl LotStore for InMemoryLotStore {
    async fn get(&self, lot_id: Uuid) -> Result<material_lot::Model, ServiceError> {
        self.state
            .lots
            .get(&lot_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Material lot {} not found", lot_id)))
    }

    async fn list_available(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<material_lot::Model>, ServiceError> {
        let mut lots: Vec<material_lot::Model> = self
            .state
            .lots
            .iter()
            .filter(|entry| {
                entry.material_id == material_id && entry.remaining_quantity > Decimal::ZERO
            })
            .map(|entry| entry.clone())
            .collect();
        lots.sort_by(|a, b| {
            a.received_date
                .cmp(&b.received_date)
                .then_with(|| a.lot_number.cmp(&b.lot_number))
        });
        Ok(lots)
    }

    async fn withdraw(
        &self,
        lot_id: Uuid,
        quantity: Decimal,
        reference: &MutationReference,
    ) -> Result<material_lot::Model, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be positive, got: {}",
                quantity
            )));
        }

        // The exclusive map-entry guard is the in-memory equivalent of the
        // SQL conditional update: check and decrement happen while no other
        // caller can touch this lot.
        let mut entry = self
            .state
            .lots
            .get_mut(&lot_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Material lot {} not found", lot_id)))?;

        if quantity > entry.remaining_quantity {
            let available = entry.remaining_quantity;
            drop(entry);
            return Err(ServiceError::InsufficientQuantity {
                lot_id,
                requested: quantity,
                available,
                alternatives: Vec::new(),
            });
        }

        entry.remaining_quantity -= quantity;
        if entry.remaining_quantity == Decimal::ZERO {
            entry.status = LotStatus::Exhausted.to_string();
        }
        entry.updated_at = Utc::now();
        let snapshot = entry.clone();
        lock(&self.state.audit).push(audit_row(lot_id, -quantity, reference));
        drop(entry);

        Ok(snapshot)
    }

    async fn restore(
        &self,
        lot_id: Uuid,
        quantity: Decimal,
        reference: &MutationReference,
    ) -> Result<material_lot::Model, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be positive, got: {}",
                quantity
            )));
        }

        let mut entry = self
            .state
            .lots
            .get_mut(&lot_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Material lot {} not found", lot_id)))?;

        let new_remaining = entry.remaining_quantity + quantity;
        if new_remaining > entry.total_quantity {
            let total = entry.total_quantity;
            drop(entry);
            return Err(ServiceError::InvalidOperation(format!(
                "Restoring {} to lot {} would exceed its intake quantity ({} > {})",
                quantity, lot_id, new_remaining, total
            )));
        }

        entry.remaining_quantity = new_remaining;
        entry.status = LotStatus::Active.to_string();
        entry.updated_at = Utc::now();
        let snapshot = entry.clone();
        lock(&self.state.audit).push(audit_row(lot_id, quantity, reference));
        drop(entry);

        Ok(snapshot)
    }
}

pub struct InMemoryAuditLedger {
    state: Arc<InMemoryState>,
}

#[async_trait]
impl AuditLedger for InMemoryAuditLedger {
    async fn entries_for_lot(
        &self,
        lot_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, ServiceError> {
        Ok(lock(&self.state.audit)
            .iter()
            .filter(|entry| entry.lot_id == lot_id)
            .cloned()
            .collect())
    }

    async fn entries_for_reference(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, ServiceError> {
        Ok(lock(&self.state.audit)
            .iter()
            .filter(|entry| entry.reference_id == reference_id)
            .cloned()
            .collect())
    }

    async fn record_rollback(
        &self,
        record: NewRollbackRecord,
    ) -> Result<rollback_record::Model, ServiceError> {
        let snapshot = serde_json::to_value(&record.original_inputs).map_err(|e| {
            ServiceError::InternalError(format!("Failed to serialize rollback snapshot: {}", e))
        })?;

        let row = rollback_record::Model {
            id: Uuid::new_v4(),
            reference_id: record.reference.reference_id,
            reference_kind: record.reference.reference_kind.to_string(),
            reason: record.reason,
            original_inputs: snapshot,
            performed_at: Utc::now(),
            performed_by: record.reference.actor,
        };
        lock(&self.state.rollbacks).push(row.clone());
        Ok(row)
    }

    async fn rollbacks_for(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<rollback_record::Model>, ServiceError> {
        Ok(lock(&self.state.rollbacks)
            .iter()
            .filter(|record| record.reference_id == reference_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryBatchRepository {
    state: Arc<InMemoryState>,
}

#[async_trait]
impl BatchRepository for InMemoryBatchRepository {
    async fn insert_batch(
        &self,
        batch: production_batch::Model,
        inputs: Vec<batch_input::Model>,
    ) -> Result<production_batch::Model, ServiceError> {
        self.state.inputs.insert(batch.id, inputs);
        self.state.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn find_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Option<production_batch::Model>, ServiceError> {
        Ok(self.state.batches.get(&batch_id).map(|entry| entry.clone()))
    }

    async fn inputs_for(&self, batch_id: Uuid) -> Result<Vec<batch_input::Model>, ServiceError> {
        Ok(self
            .state
            .inputs
            .get(&batch_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn replace_inputs(
        &self,
        batch_id: Uuid,
        inputs: Vec<batch_input::Model>,
        total_input_cost: Decimal,
    ) -> Result<(), ServiceError> {
        let mut batch = self.state.batches.get_mut(&batch_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Production batch {} not found", batch_id))
        })?;
        batch.total_input_cost = total_input_cost;
        batch.updated_at = Utc::now();
        drop(batch);
        self.state.inputs.insert(batch_id, inputs);
        Ok(())
    }

    async fn update_batch(
        &self,
        batch: production_batch::Model,
    ) -> Result<production_batch::Model, ServiceError> {
        if !self.state.batches.contains_key(&batch.id) {
            return Err(ServiceError::NotFound(format!(
                "Production batch {} not found",
                batch.id
            )));
        }
        self.state.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }
}
