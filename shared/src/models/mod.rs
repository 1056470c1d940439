//! Domain models for the grain trade fulfillment engine

mod delivery;
mod event;
mod invoice;
mod trade;
mod voucher;

pub use delivery::*;
pub use event::*;
pub use invoice::*;
pub use trade::*;
pub use voucher::*;
