//! # shamba-store
//!
//! SQLite-backed durable log of outbound and inbound SMS, subscription state,
//! and delivery-status reconciliation.

pub mod reconcile;
pub mod store;

pub use reconcile::ReconcileOutcome;
pub use store::Store;
