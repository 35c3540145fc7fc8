//! # Transaction Module
//!
//! The purchase record and its state machine.
//!
//! ```text
//! types.rs    : Transaction, TransactionState, Role, id aliases
//! lifecycle.rs: TransactionEvent transition table and Transaction::apply
//! ```

pub mod lifecycle;
pub mod types;

pub use lifecycle::{LifecycleError, TransactionEvent};
pub use types::{ListingId, Role, Transaction, TransactionId, TransactionState, UserId};
