//! # SISCON Core
//!
//! Records of a graduate-studies accounting office: administrative documents
//! ("expedientes"), teacher payments, and the reconciliation that links the
//! two.
//!
//! ## Features
//!
//! - **Expediente writes**: create, edit and delete documents with validation
//! - **Payment reconciliation**: a conformidad claims the pending payment with
//!   the same teacher, course, period and teaching dates; edits and deletions
//!   move or release that link atomically
//! - **Presentación updates**: assignment data flows onto the linked payment
//! - **Storage abstraction**: in-memory storage for tests, PostgreSQL behind
//!   the `postgres` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use siscon_core::utils::MemoryStorage;
//! use siscon_core::Office;
//!
//! // Seed semesters and programs on the storage, then:
//! let storage = MemoryStorage::new();
//! let office = Office::new(storage);
//! # let _ = office;
//! ```

pub mod config;
pub mod observability;
pub mod office;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::SisconConfig;
pub use office::*;
pub use reconciliation::matcher::{same_schedule, schedules_match, FechasEnsenanza};
pub use reconciliation::plan::{CommitOutcome, ExpedienteWrite, PagoWrite, WriteBatch};
pub use reconciliation::{
    Decision, ReconciliationEngine, ReconciliationOutcome, ReconciliationReport, SkipReason,
};
pub use traits::*;
pub use types::*;
