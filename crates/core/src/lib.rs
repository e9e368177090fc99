//! # Techsync Core
//!
//! Pure reconciliation logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - The event normalizer, day-splitter, and payload mapper
//! - The delta reconciliation engine
//! - The cleanup/reset engine
//! - Port/adapter interfaces (traits) for every external collaborator
//!
//! ## Architecture Principles
//! - Only depends on `techsync-domain`
//! - No HTTP, spreadsheet, or token code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod cleanup;
pub mod day_split;
pub mod normalize;
pub mod payload;
pub mod ports;
pub mod reconcile;

// Re-export the main entry points
pub use cleanup::{CleanupEngine, CleanupOptions, DedupeReport, ResetReport};
pub use day_split::{split_into_day_blocks, DayBlock};
pub use normalize::normalize;
pub use payload::build_payloads;
pub use ports::{
    Alerter, AppointmentSink, CalendarSource, ChangeBatch, MappingStore, NoopAlerter, SyncWindow,
};
pub use reconcile::{Reconciler, SyncMode, SyncSettings};
