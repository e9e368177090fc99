//! # Techsync Domain
//!
//! Business domain types for techsync.
//!
//! This crate contains:
//! - Calendar event types (raw and normalized forms)
//! - Persisted state row types (mappings, cursors, technician config)
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other techsync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
