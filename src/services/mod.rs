pub mod audit_ledger;
pub mod availability;
pub mod batch_lifecycle;
pub mod batch_repository;
pub mod consumption;
pub mod lot_store;
pub mod memory;

pub use audit_ledger::{AuditLedger, NewRollbackRecord, SqlAuditLedger};
pub use availability::{AvailabilityValidator, MAX_ALTERNATIVE_LOTS};
pub use batch_lifecycle::{BatchLifecycleManager, ROLLBACK_REASON_SUPERSEDED};
pub use batch_repository::{BatchRepository, SqlBatchRepository};
pub use consumption::{
    ConsumptionCoordinator, ROLLBACK_REASON_DEADLINE, ROLLBACK_REASON_INSUFFICIENT,
};
pub use lot_store::{LotStore, SqlLotStore};
pub use memory::InMemoryBackend;
