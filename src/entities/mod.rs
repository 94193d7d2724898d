pub mod audit_entry;
pub mod batch_input;
pub mod material_lot;
pub mod production_batch;
pub mod rollback_record;

pub use audit_entry::ReferenceKind;
pub use material_lot::LotStatus;
pub use production_batch::BatchStatus;
