use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One row per lot quantity mutation: negative delta for a withdrawal,
/// positive for a restore. Ordered by `recorded_at`, these reconstruct
/// `remaining_quantity` independently of the live lot row (reconciliation).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub lot_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub delta: rust_decimal::Decimal,
    pub reference_id: Uuid,
    pub reference_kind: String,
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::material_lot::Entity",
        from = "Column::LotId",
        to = "super::material_lot::Column::Id"
    )]
    MaterialLot,
}

impl Related<super::material_lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MaterialLot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// What kind of aggregate a mutation was performed on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    ProductionBatch,
    SalesOrder,
}
