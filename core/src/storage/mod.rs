//! # Storage Module
//!
//! Persistent storage for the marketplace.
//!
//! ## Architecture
//!
//! ```text
//! records.rs : Listing, Rating, Message and OutboxMail records
//! db.rs      : sled persistence, one tree per record kind
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Bincode for on-disk serialization.** Compact and deterministic.
//!    JSON is for the API; bincode is for storage. Determinism matters here:
//!    conditional commits compare encoded snapshots byte for byte.
//!
//! 2. **One tree per record kind.** Listings, transactions, ratings,
//!    messages and the notification outbox are independent keyspaces, and
//!    multi-tree sled transactions give atomic writes across them.

pub mod db;
pub mod records;

pub use db::{CommitError, DbError, DbResult, MarketDB};
pub use records::{Listing, Message, OutboxMail, Rating};
