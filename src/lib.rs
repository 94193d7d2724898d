//! lotledger — atomic raw-material lot consumption for production batches.
//!
//! Tracks inventory held in discrete lots and consumes quantities from one or
//! more lots as a single logical unit. Because the backing store cannot always
//! guarantee a true multi-row commit, multi-lot consumptions are executed as a
//! saga: an ordered list of applied withdrawals, each with a defined inverse,
//! compensated in reverse order when a later step fails. Every quantity
//! mutation and every rollback lands in an append-only audit ledger.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod services;

pub use errors::ServiceError;
pub use models::{
    AppliedWithdrawal, AvailabilityReport, BatchSpec, ConsumedSet, ConsumptionRequest,
    ItemAvailability, MutationReference,
};
pub use services::{
    AvailabilityValidator, BatchLifecycleManager, ConsumptionCoordinator, InMemoryBackend,
};
