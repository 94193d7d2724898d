use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use uuid::Uuid;

use crate::models::AlternativeLot;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// The advisory availability pass (or a direct withdrawal with no prior
    /// check) found less material than requested. Carries alternative lots of
    /// the same material so a caller can correct without a second round trip.
    #[error("Insufficient quantity in lot {lot_id}: requested {requested}, available {available}")]
    InsufficientQuantity {
        lot_id: Uuid,
        requested: Decimal,
        available: Decimal,
        alternatives: Vec<AlternativeLot>,
    },

    /// The advisory pass succeeded but the withdraw-time conditional
    /// decrement lost to a concurrent consumer. Already-applied withdrawals
    /// have been compensated; safe to retry once.
    #[error("Lost withdrawal race on lot {lot_id}: requested {requested}, available {available}")]
    RaceLost {
        lot_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    /// A compensating restore itself failed. Lot state may be inconsistent
    /// with the audit ledger; requires operator reconciliation, never retried.
    #[error("Compensation failed for reference {reference_id}: {detail}")]
    CompensationFailure { reference_id: Uuid, detail: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl ServiceError {
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        Self::DatabaseError(error.into_db_err())
    }

    /// Whether a caller may reasonably re-run the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RaceLost { .. } | Self::DatabaseError(_) | Self::Timeout(_)
        )
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_lost_is_retryable_but_compensation_failure_is_not() {
        let race = ServiceError::RaceLost {
            lot_id: Uuid::new_v4(),
            requested: Decimal::from(10),
            available: Decimal::from(3),
        };
        assert!(race.is_retryable());

        let comp = ServiceError::CompensationFailure {
            reference_id: Uuid::new_v4(),
            detail: "restore failed".into(),
        };
        assert!(!comp.is_retryable());
    }
}
