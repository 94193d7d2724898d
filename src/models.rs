//! Request and result types shared across the services.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::{material_lot, ReferenceKind};

/// One requested withdrawal: take `quantity` from `lot_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ConsumptionRequest {
    pub lot_id: Uuid,
    #[validate(custom = "validate_positive_quantity")]
    pub quantity: Decimal,
}

fn validate_positive_quantity(quantity: &Decimal) -> Result<(), ValidationError> {
    if *quantity <= Decimal::ZERO {
        return Err(ValidationError::new("quantity_not_positive"));
    }
    Ok(())
}

/// Caller-supplied fields for a new production batch.
#[derive(Debug, Clone, Validate)]
pub struct BatchSpec {
    #[validate(length(min = 1, max = 64))]
    pub batch_number: String,
    /// Theoretical output for this batch; yield percentage is reported
    /// against it on completion when present.
    pub expected_output_quantity: Option<Decimal>,
    #[validate(length(min = 1))]
    pub created_by: String,
}

/// Identifies the aggregate a lot mutation is performed on behalf of, and who
/// asked for it. Stamped onto every audit entry and rollback record.
#[derive(Debug, Clone)]
pub struct MutationReference {
    pub reference_id: Uuid,
    pub reference_kind: ReferenceKind,
    pub actor: String,
}

impl MutationReference {
    pub fn new(reference_id: Uuid, reference_kind: ReferenceKind, actor: impl Into<String>) -> Self {
        Self {
            reference_id,
            reference_kind,
            actor: actor.into(),
        }
    }
}

/// A withdrawal that has been durably applied, with the unit cost captured at
/// withdraw time. Serialized into rollback records as the compensation
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedWithdrawal {
    pub lot_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub withdrawn_at: DateTime<Utc>,
}

/// The successful outcome of a multi-lot consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumedSet {
    pub reference_id: Uuid,
    pub withdrawals: Vec<AppliedWithdrawal>,
}

impl ConsumedSet {
    pub fn total_cost(&self) -> Decimal {
        self.withdrawals.iter().map(|w| w.total_cost).sum()
    }
}

/// A lot of the same material able to cover an insufficient request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeLot {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub remaining_quantity: Decimal,
    pub received_date: DateTime<Utc>,
}

impl From<&material_lot::Model> for AlternativeLot {
    fn from(lot: &material_lot::Model) -> Self {
        Self {
            lot_id: lot.id,
            lot_number: lot.lot_number.clone(),
            remaining_quantity: lot.remaining_quantity,
            received_date: lot.received_date,
        }
    }
}

/// Advisory availability result for a single requested withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAvailability {
    pub lot_id: Uuid,
    pub requested: Decimal,
    pub available: Decimal,
    pub sufficient: bool,
    pub message: String,
    pub alternatives: Vec<AlternativeLot>,
}

/// Advisory availability result for a whole consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub valid: bool,
    pub items: Vec<ItemAvailability>,
}

impl AvailabilityReport {
    pub fn first_insufficient(&self) -> Option<&ItemAvailability> {
        self.items.iter().find(|item| !item.sufficient)
    }
}

/// One entry in a batch's operator-facing timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailEvent {
    pub occurred_at: DateTime<Utc>,
    pub kind: TrailEventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailEventKind {
    QuantityMutation,
    Rollback,
    StatusChange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantity_request_fails_validation() {
        let request = ConsumptionRequest {
            lot_id: Uuid::new_v4(),
            quantity: Decimal::ZERO,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn consumed_set_sums_costs() {
        let set = ConsumedSet {
            reference_id: Uuid::new_v4(),
            withdrawals: vec![
                AppliedWithdrawal {
                    lot_id: Uuid::new_v4(),
                    quantity: Decimal::from(4),
                    unit_cost: Decimal::from(3),
                    total_cost: Decimal::from(12),
                    withdrawn_at: Utc::now(),
                },
                AppliedWithdrawal {
                    lot_id: Uuid::new_v4(),
                    quantity: Decimal::from(2),
                    unit_cost: Decimal::from(5),
                    total_cost: Decimal::from(10),
                    withdrawn_at: Utc::now(),
                },
            ],
        };
        assert_eq!(set.total_cost(), Decimal::from(22));
    }
}
