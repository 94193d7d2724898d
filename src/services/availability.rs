use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entities::material_lot;
use crate::errors::ServiceError;
use crate::models::{AlternativeLot, AvailabilityReport, ConsumptionRequest, ItemAvailability};
use crate::services::lot_store::LotStore;

/// Cap on the alternative lots suggested alongside an insufficiency, so a
/// material with hundreds of lots does not bloat the error payload.
pub const MAX_ALTERNATIVE_LOTS: usize = 5;

/// Advisory availability checks, run before any mutation. A passing report is
/// a snapshot, not a reservation: the binding decision is made again by the
/// conditional decrement at withdraw time.
#[derive(Clone)]
pub struct AvailabilityValidator {
    lot_store: Arc<dyn LotStore>,
}

impl AvailabilityValidator {
    pub fn new(lot_store: Arc<dyn LotStore>) -> Self {
        Self { lot_store }
    }

    /// Checks one requested withdrawal against the lot's current remaining
    /// quantity. Insufficient items come back with alternative lots of the
    /// same material attached.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        request: &ConsumptionRequest,
    ) -> Result<ItemAvailability, ServiceError> {
        let lot = self.lot_store.get(request.lot_id).await?;

        if request.quantity <= lot.remaining_quantity {
            return Ok(ItemAvailability {
                lot_id: lot.id,
                requested: request.quantity,
                available: lot.remaining_quantity,
                sufficient: true,
                message: format!(
                    "Lot {} can cover {} (remaining: {})",
                    lot.lot_number, request.quantity, lot.remaining_quantity
                ),
                alternatives: Vec::new(),
            });
        }

        let alternatives = self.alternatives_for(&lot, request.quantity).await?;
        debug!(
            "Lot {} short by {} ({} alternatives found)",
            lot.id,
            request.quantity - lot.remaining_quantity,
            alternatives.len()
        );

        Ok(ItemAvailability {
            lot_id: lot.id,
            requested: request.quantity,
            available: lot.remaining_quantity,
            sufficient: false,
            message: format!(
                "Lot {} holds {} but {} was requested",
                lot.lot_number, lot.remaining_quantity, request.quantity
            ),
            alternatives,
        })
    }

    /// Checks every requested withdrawal independently. Requests naming the
    /// same lot twice are each checked against the full remaining quantity;
    /// the withdraw-time guard is what catches their combined effect.
    pub async fn check_all(
        &self,
        requests: &[ConsumptionRequest],
    ) -> Result<AvailabilityReport, ServiceError> {
        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            items.push(self.check(request).await?);
        }

        Ok(AvailabilityReport {
            valid: items.iter().all(|item| item.sufficient),
            items,
        })
    }

    /// Other lots of the same material that could each cover `needed` on
    /// their own, fullest first, then oldest intake first among ties.
    pub async fn alternatives_for(
        &self,
        lot: &material_lot::Model,
        needed: Decimal,
    ) -> Result<Vec<AlternativeLot>, ServiceError> {
        let mut candidates: Vec<material_lot::Model> = self
            .lot_store
            .list_available(lot.material_id)
            .await?
            .into_iter()
            .filter(|candidate| candidate.id != lot.id && candidate.remaining_quantity >= needed)
            .collect();

        candidates.sort_by(|a, b| {
            b.remaining_quantity
                .cmp(&a.remaining_quantity)
                .then_with(|| a.received_date.cmp(&b.received_date))
        });
        candidates.truncate(MAX_ALTERNATIVE_LOTS);

        Ok(candidates.iter().map(AlternativeLot::from).collect())
    }
}
