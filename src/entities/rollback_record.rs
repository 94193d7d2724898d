use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only compensation evidence. Written before or alongside the
/// compensating restores, so a crash mid-compensation still leaves a record
/// of what was being reversed. `original_inputs` is a JSON snapshot of the
/// applied withdrawals.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rollback_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub reference_id: Uuid,
    pub reference_kind: String,
    pub reason: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub original_inputs: Json,
    pub performed_at: DateTime<Utc>,
    pub performed_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
