use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::entities::{audit_entry, rollback_record};
use crate::errors::ServiceError;
use crate::models::{AppliedWithdrawal, MutationReference};

/// A rollback record about to be written: which reference is being reversed,
/// why, and the snapshot of the applied withdrawals.
#[derive(Debug, Clone)]
pub struct NewRollbackRecord {
    pub reference: MutationReference,
    pub reason: String,
    pub original_inputs: Vec<AppliedWithdrawal>,
}

/// Read side of the append-only ledger, plus the one append the coordinator
/// performs directly (rollback records). Withdraw/restore audit entries are
/// appended by the `LotStore` implementations themselves, in the same storage
/// transaction as the quantity change.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    async fn entries_for_lot(&self, lot_id: Uuid)
        -> Result<Vec<audit_entry::Model>, ServiceError>;

    async fn entries_for_reference(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, ServiceError>;

    async fn record_rollback(
        &self,
        record: NewRollbackRecord,
    ) -> Result<rollback_record::Model, ServiceError>;

    async fn rollbacks_for(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<rollback_record::Model>, ServiceError>;
}

#[derive(Clone)]
pub struct SqlAuditLedger {
    db: Arc<DatabaseConnection>,
}

impl SqlAuditLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditLedger for SqlAuditLedger {
    async fn entries_for_lot(
        &self,
        lot_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, ServiceError> {
        audit_entry::Entity::find()
            .filter(audit_entry::Column::LotId.eq(lot_id))
            .order_by_asc(audit_entry::Column::RecordedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn entries_for_reference(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, ServiceError> {
        audit_entry::Entity::find()
            .filter(audit_entry::Column::ReferenceId.eq(reference_id))
            .order_by_asc(audit_entry::Column::RecordedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn record_rollback(
        &self,
        record: NewRollbackRecord,
    ) -> Result<rollback_record::Model, ServiceError> {
        let snapshot = serde_json::to_value(&record.original_inputs).map_err(|e| {
            ServiceError::InternalError(format!("Failed to serialize rollback snapshot: {}", e))
        })?;

        let row = rollback_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            reference_id: Set(record.reference.reference_id),
            reference_kind: Set(record.reference.reference_kind.to_string()),
            reason: Set(record.reason.clone()),
            original_inputs: Set(snapshot),
            performed_at: Set(Utc::now()),
            performed_by: Set(record.reference.actor.clone()),
        };

        let inserted = row
            .insert(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        info!(
            "Rollback recorded for {} ({}): {} inputs",
            record.reference.reference_id,
            record.reason,
            record.original_inputs.len()
        );

        Ok(inserted)
    }

    async fn rollbacks_for(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<rollback_record::Model>, ServiceError> {
        rollback_record::Entity::find()
            .filter(rollback_record::Column::ReferenceId.eq(reference_id))
            .order_by_asc(rollback_record::Column::PerformedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
