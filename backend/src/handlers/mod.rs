//! HTTP handlers
//!
//! Thin adapters from requests onto engine services; all rules live in the
//! services and the shared crate.

pub mod deliveries;
pub mod health;
pub mod invoices;
pub mod trades;

pub use deliveries::*;
pub use health::*;
pub use invoices::*;
pub use trades::*;
