use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{batch_input, production_batch};
use crate::errors::ServiceError;

/// Persistence seam for production batches and their input rows. Batch rows
/// are owned exclusively by the lifecycle manager; nothing here touches lot
/// quantities.
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Persists a batch together with its input rows as one unit.
    async fn insert_batch(
        &self,
        batch: production_batch::Model,
        inputs: Vec<batch_input::Model>,
    ) -> Result<production_batch::Model, ServiceError>;

    async fn find_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Option<production_batch::Model>, ServiceError>;

    async fn inputs_for(&self, batch_id: Uuid) -> Result<Vec<batch_input::Model>, ServiceError>;

    /// Swaps a batch's input rows and its derived total cost in one unit.
    /// An empty `inputs` leaves the batch with no inputs (the rejected shape).
    async fn replace_inputs(
        &self,
        batch_id: Uuid,
        inputs: Vec<batch_input::Model>,
        total_input_cost: Decimal,
    ) -> Result<(), ServiceError>;

    async fn update_batch(
        &self,
        batch: production_batch::Model,
    ) -> Result<production_batch::Model, ServiceError>;
}

fn batch_active(batch: production_batch::Model) -> production_batch::ActiveModel {
    production_batch::ActiveModel {
        id: Set(batch.id),
        batch_number: Set(batch.batch_number),
        status: Set(batch.status),
        total_input_cost: Set(batch.total_input_cost),
        expected_output_quantity: Set(batch.expected_output_quantity),
        output_quantity: Set(batch.output_quantity),
        cost_per_unit: Set(batch.cost_per_unit),
        yield_percentage: Set(batch.yield_percentage),
        created_by: Set(batch.created_by),
        created_at: Set(batch.created_at),
        updated_at: Set(batch.updated_at),
        completed_at: Set(batch.completed_at),
    }
}

fn input_active(input: batch_input::Model) -> batch_input::ActiveModel {
    batch_input::ActiveModel {
        id: Set(input.id),
        batch_id: Set(input.batch_id),
        lot_id: Set(input.lot_id),
        quantity_used: Set(input.quantity_used),
        unit_cost_at_use: Set(input.unit_cost_at_use),
        total_cost: Set(input.total_cost),
        created_at: Set(input.created_at),
    }
}

#[derive(Clone)]
pub struct SqlBatchRepository {
    db: Arc<DatabaseConnection>,
}

impl SqlBatchRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BatchRepository for SqlBatchRepository {
    async fn insert_batch(
        &self,
        batch: production_batch::Model,
        inputs: Vec<batch_input::Model>,
    ) -> Result<production_batch::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let inserted = batch_active(batch)
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if !inputs.is_empty() {
            batch_input::Entity::insert_many(inputs.into_iter().map(input_active))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(inserted)
    }

    async fn find_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Option<production_batch::Model>, ServiceError> {
        production_batch::Entity::find_by_id(batch_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn inputs_for(&self, batch_id: Uuid) -> Result<Vec<batch_input::Model>, ServiceError> {
        batch_input::Entity::find()
            .filter(batch_input::Column::BatchId.eq(batch_id))
            .order_by_asc(batch_input::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn replace_inputs(
        &self,
        batch_id: Uuid,
        inputs: Vec<batch_input::Model>,
        total_input_cost: Decimal,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        batch_input::Entity::delete_many()
            .filter(batch_input::Column::BatchId.eq(batch_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if !inputs.is_empty() {
            batch_input::Entity::insert_many(inputs.into_iter().map(input_active))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        production_batch::Entity::update_many()
            .col_expr(
                production_batch::Column::TotalInputCost,
                Expr::value(total_input_cost),
            )
            .col_expr(production_batch::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(production_batch::Column::Id.eq(batch_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn update_batch(
        &self,
        batch: production_batch::Model,
    ) -> Result<production_batch::Model, ServiceError> {
        batch_active(batch)
            .update(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
