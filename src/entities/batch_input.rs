use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One consumed lot within a production batch. `unit_cost_at_use` is captured
/// at consumption time and never changes, even if the lot is re-costed later.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_inputs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub batch_id: Uuid,
    pub lot_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_used: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost_at_use: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_cost: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::production_batch::Entity",
        from = "Column::BatchId",
        to = "super::production_batch::Column::Id"
    )]
    ProductionBatch,
    #[sea_orm(
        belongs_to = "super::material_lot::Entity",
        from = "Column::LotId",
        to = "super::material_lot::Column::Id"
    )]
    MaterialLot,
}

impl Related<super::production_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionBatch.def()
    }
}

impl Related<super::material_lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MaterialLot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
