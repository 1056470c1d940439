//! Shared types and rules for the grain trade fulfillment engine
//!
//! Pure domain crate: trade lifecycle, quantity ledger, invoice schedule and
//! voucher selection rules. Contains no I/O so the same rules can back the
//! server and any preview tooling.

pub mod allocation;
pub mod error;
pub mod ledger;
pub mod models;
pub mod schedule;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
