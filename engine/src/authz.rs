//! Per-transition authorization predicates.
//!
//! Every mutation is preceded by an explicit decision. The caller's identity
//! comes only from a verified [`Session`]; nothing in a request body can
//! claim a role.

use chrono::{DateTime, Utc};
use wardrobe_core::identity::Session;
use wardrobe_core::transaction::{Role, Transaction, UserId};

use crate::error::{EngineError, EngineResult};

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// The caller may proceed, acting in the given role.
    Authorized(Role),
    /// The caller is known but not entitled to this action.
    Forbidden,
    /// The credential is no longer valid.
    Unauthenticated,
}

impl Authorization {
    /// Decides whether `session` may act as `required` on `tx`.
    ///
    /// `listing_owner` is the seller; it is resolved by the caller because
    /// transactions do not store it.
    pub fn for_transition(
        session: &Session,
        now: DateTime<Utc>,
        tx: &Transaction,
        listing_owner: UserId,
        required: Role,
    ) -> Self {
        if !session.is_live_at(now) {
            return Self::Unauthenticated;
        }
        match tx.role_of(session.user_id, listing_owner) {
            Some(role) if role == required => Self::Authorized(role),
            _ => Self::Forbidden,
        }
    }

    /// Decides whether `session` may start a purchase of a listing owned by
    /// `listing_owner`. Owners cannot buy their own listings.
    pub fn for_purchase(session: &Session, now: DateTime<Utc>, listing_owner: UserId) -> Self {
        if !session.is_live_at(now) {
            Self::Unauthenticated
        } else if session.user_id == listing_owner {
            Self::Forbidden
        } else {
            Self::Authorized(Role::Buyer)
        }
    }
}

/// Rejects sessions that expired since they were verified.
pub(crate) fn ensure_live(session: &Session, now: DateTime<Utc>) -> EngineResult<()> {
    if session.is_live_at(now) {
        Ok(())
    } else {
        Err(EngineError::Unauthenticated(format!(
            "session expired at {}",
            session.expires_at
        )))
    }
}
