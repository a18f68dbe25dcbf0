//! Offline-tolerant reconciliation and sync core for shared family finance.
//!
//! The crate is consumed as a library by UI code. All remote and local I/O
//! goes through the abstract [`persistence::PersistenceService`] trait; the
//! engines in here only constrain the logical schema and the replay/merge
//! semantics.

pub mod accounts;
pub mod balance;
pub mod cache;
pub mod documents;
pub mod errors;
pub mod loans;
pub mod money;
pub mod persistence;
pub mod store;
pub mod sync;
pub mod transactions;

pub use errors::{Error, Result};
pub use store::FinanceStore;
