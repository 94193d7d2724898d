use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::audit_entry;
use crate::entities::material_lot::{self, Entity as MaterialLotEntity, LotStatus};
use crate::errors::ServiceError;
use crate::models::MutationReference;

/// How many times `restore` re-reads and retries its compare-and-set before
/// giving up under pathological contention.
const RESTORE_RETRY_LIMIT: usize = 5;

/// Persistence seam for material lots. `withdraw` and `restore` are the only
/// two quantity mutations in the system; both are atomic per lot and both
/// append exactly one audit entry on success.
#[async_trait]
pub trait LotStore: Send + Sync {
    async fn get(&self, lot_id: Uuid) -> Result<material_lot::Model, ServiceError>;

    /// Lots of a material with remaining quantity, oldest intake first (FIFO
    /// costing order).
    async fn list_available(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<material_lot::Model>, ServiceError>;

    /// Decrements `remaining_quantity` iff `quantity` is still available.
    /// Never partially decrements: under concurrency the guard condition
    /// decides a winner and every loser gets `InsufficientQuantity` with the
    /// quantity actually left. Returns the lot as of the mutation, so callers
    /// capture `unit_cost` at withdraw time.
    async fn withdraw(
        &self,
        lot_id: Uuid,
        quantity: Decimal,
        reference: &MutationReference,
    ) -> Result<material_lot::Model, ServiceError>;

    /// Puts `quantity` back, bounded by `total_quantity`. Used only for
    /// compensation; exceeding the intake quantity means a withdraw/restore
    /// pairing bug and is surfaced, never clamped.
    async fn restore(
        &self,
        lot_id: Uuid,
        quantity: Decimal,
        reference: &MutationReference,
    ) -> Result<material_lot::Model, ServiceError>;
}

fn ensure_positive(quantity: Decimal) -> Result<(), ServiceError> {
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be positive, got: {}",
            quantity
        )));
    }
    Ok(())
}

fn audit_row(
    lot_id: Uuid,
    delta: Decimal,
    reference: &MutationReference,
) -> audit_entry::ActiveModel {
    audit_entry::ActiveModel {
        id: Set(Uuid::new_v4()),
        lot_id: Set(lot_id),
        delta: Set(delta),
        reference_id: Set(reference.reference_id),
        reference_kind: Set(reference.reference_kind.to_string()),
        actor: Set(reference.actor.clone()),
        recorded_at: Set(Utc::now()),
    }
}

/// SeaORM-backed lot store. The withdraw guard is a single conditional
/// `UPDATE ... WHERE remaining_quantity >= ?` checked through
/// `rows_affected`; restore uses a bounded optimistic compare-and-set because
/// it must also enforce the intake ceiling.
#[derive(Clone)]
pub struct SqlLotStore {
    db: Arc<DatabaseConnection>,
}

impl SqlLotStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LotStore for SqlLotStore {
    async fn get(&self, lot_id: Uuid) -> Result<material_lot::Model, ServiceError> {
        MaterialLotEntity::find_by_id(lot_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Material lot {} not found", lot_id)))
    }

    async fn list_available(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<material_lot::Model>, ServiceError> {
        MaterialLotEntity::find()
            .filter(material_lot::Column::MaterialId.eq(material_id))
            .filter(material_lot::Column::RemainingQuantity.gt(Decimal::ZERO))
            .order_by_asc(material_lot::Column::ReceivedDate)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, reference))]
    async fn withdraw(
        &self,
        lot_id: Uuid,
        quantity: Decimal,
        reference: &MutationReference,
    ) -> Result<material_lot::Model, ServiceError> {
        ensure_positive(quantity)?;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let updated = MaterialLotEntity::update_many()
            .col_expr(
                material_lot::Column::RemainingQuantity,
                Expr::col(material_lot::Column::RemainingQuantity).sub(quantity),
            )
            .col_expr(material_lot::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(material_lot::Column::Id.eq(lot_id))
            .filter(material_lot::Column::RemainingQuantity.gte(quantity))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if updated.rows_affected == 0 {
            txn.rollback().await.map_err(ServiceError::db_error)?;
            // Either the lot is unknown or a concurrent consumer won the race.
            let lot = self.get(lot_id).await?;
            warn!(
                "Withdrawal of {} from lot {} refused; {} remaining",
                quantity, lot_id, lot.remaining_quantity
            );
            return Err(ServiceError::InsufficientQuantity {
                lot_id,
                requested: quantity,
                available: lot.remaining_quantity,
                alternatives: Vec::new(),
            });
        }

        // A fully drawn-down lot stays on file for costing history.
        MaterialLotEntity::update_many()
            .col_expr(
                material_lot::Column::Status,
                Expr::value(LotStatus::Exhausted.to_string()),
            )
            .filter(material_lot::Column::Id.eq(lot_id))
            .filter(material_lot::Column::RemainingQuantity.eq(Decimal::ZERO))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        audit_row(lot_id, -quantity, reference)
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let lot = MaterialLotEntity::find_by_id(lot_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Material lot {} not found", lot_id)))?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            "Withdrew {} from lot {} for {} ({} remaining)",
            quantity, lot_id, reference.reference_id, lot.remaining_quantity
        );

        Ok(lot)
    }

    #[instrument(skip(self, reference))]
    async fn restore(
        &self,
        lot_id: Uuid,
        quantity: Decimal,
        reference: &MutationReference,
    ) -> Result<material_lot::Model, ServiceError> {
        ensure_positive(quantity)?;

        for _ in 0..RESTORE_RETRY_LIMIT {
            let lot = self.get(lot_id).await?;
            let new_remaining = lot.remaining_quantity + quantity;
            if new_remaining > lot.total_quantity {
                return Err(ServiceError::InvalidOperation(format!(
                    "Restoring {} to lot {} would exceed its intake quantity ({} > {})",
                    quantity, lot_id, new_remaining, lot.total_quantity
                )));
            }

            let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

            let updated = MaterialLotEntity::update_many()
                .col_expr(
                    material_lot::Column::RemainingQuantity,
                    Expr::value(new_remaining),
                )
                .col_expr(
                    material_lot::Column::Status,
                    Expr::value(LotStatus::Active.to_string()),
                )
                .col_expr(material_lot::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(material_lot::Column::Id.eq(lot_id))
                .filter(material_lot::Column::RemainingQuantity.eq(lot.remaining_quantity))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;

            if updated.rows_affected == 0 {
                // Lost the compare-and-set to a concurrent mutation; re-read.
                txn.rollback().await.map_err(ServiceError::db_error)?;
                continue;
            }

            audit_row(lot_id, quantity, reference)
                .insert(&txn)
                .await
                .map_err(ServiceError::db_error)?;

            let refreshed = MaterialLotEntity::find_by_id(lot_id)
                .one(&txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Material lot {} not found", lot_id))
                })?;

            txn.commit().await.map_err(ServiceError::db_error)?;

            info!(
                "Restored {} to lot {} for {} ({} remaining)",
                quantity, lot_id, reference.reference_id, refreshed.remaining_quantity
            );

            return Ok(refreshed);
        }

        Err(ServiceError::InternalError(format!(
            "Restore of lot {} lost the optimistic update {} times",
            lot_id, RESTORE_RETRY_LIMIT
        )))
    }
}
