//! # Wardrobe Transaction Engine
//!
//! The rules of the marketplace, on top of `wardrobe-core`'s records:
//!
//! - **Transaction Engine**: guarded lifecycle transitions from initiation
//!   to delivery, each gated by role and current state.
//! - **Rating Gate**: scores between users, at most one per transaction.
//! - **Authorization**: the explicit predicate evaluated before every
//!   mutation.
//!
//! ## Design Principles
//!
//! 1. Identity comes from the verified session only. Requests never claim a
//!    role.
//! 2. A scoped lookup that fails for any reason fails as `NotFound`.
//! 3. Every write is a conditional commit. Two racing requests cannot both
//!    advance the same transaction.
//! 4. Notification failures are logged, never returned.

pub mod authz;
pub mod engine;
pub mod error;
pub mod rating;

pub use authz::Authorization;
pub use engine::{RoleFilter, TransactionEngine, TransactionView};
pub use error::{EngineError, EngineResult};
pub use rating::{RatingGate, RatingSummary};
