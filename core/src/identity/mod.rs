//! # Identity Module
//!
//! Session credentials: who is calling, and until when. Account management
//! (registration, passwords, email verification) lives outside this crate;
//! the marketplace only consumes the `verify(token) -> {user_id, expiry}`
//! contract.

pub mod session;

pub use session::{IdentityError, Session, SessionKey, SessionVerifier};
