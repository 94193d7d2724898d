use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A production run that consumed one or more material lots. The batch row is
/// only ever persisted after its consumption succeeded; `total_input_cost`
/// equals the sum of its batch_input rows for every non-rejected batch.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub batch_number: String,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_input_cost: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub expected_output_quantity: Option<rust_decimal::Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub output_quantity: Option<rust_decimal::Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub cost_per_unit: Option<rust_decimal::Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub yield_percentage: Option<rust_decimal::Decimal>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::batch_input::Entity")]
    BatchInputs,
}

impl Related<super::batch_input::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BatchInputs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Draft,
    InProgress,
    Completed,
    Approved,
    Rejected,
}

impl BatchStatus {
    /// States in which the batch's inputs may still be replaced by `update`.
    pub fn allows_input_changes(&self) -> bool {
        matches!(self, Self::Draft | Self::InProgress | Self::Completed)
    }
}
