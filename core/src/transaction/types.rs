//! Core type definitions for marketplace transactions.
//!
//! A [`Transaction`] links one buyer to one listing and carries the purchase
//! from initiation to delivery. The seller is deliberately absent from the
//! record: it is always resolved through the listing's owner so the two can
//! never diverge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifact::ArtifactRef;

/// Identifier of a registered user, as carried in the session credential.
pub type UserId = u64;

/// Store-assigned identifier of a listing.
pub type ListingId = u64;

/// Opaque, immutable identifier of a transaction.
pub type TransactionId = Uuid;

// ---------------------------------------------------------------------------
// TransactionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction.
///
/// States only move forward along
/// `PendingPayment → PaymentSent → PaymentConfirmed → Shipped → Delivered`.
/// `Cancelled` is reserved in the persisted layout; no operation enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    /// Created by the buyer, waiting for a payment proof.
    PendingPayment,
    /// The buyer submitted a payment proof.
    PaymentSent,
    /// The seller acknowledged the payment.
    PaymentConfirmed,
    /// The seller handed the item to a carrier.
    Shipped,
    /// The buyer confirmed reception. Terminal.
    Delivered,
    /// Terminal. Reserved.
    Cancelled,
}

impl TransactionState {
    /// The stable wire name, e.g. `PAYMENT_SENT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::PaymentSent => "PAYMENT_SENT",
            Self::PaymentConfirmed => "PAYMENT_CONFIRMED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The side a user plays in a given transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buyer => write!(f, "buyer"),
            Self::Seller => write!(f, "seller"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A purchase record.
///
/// Every optional timestamp is set exactly once, by the transition that
/// leads into the matching state. Fields are public for reads; mutation goes
/// through [`Transaction::apply`](super::lifecycle) so the state machine
/// stays the single writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for this transaction.
    pub id: TransactionId,
    /// The listing being purchased.
    pub listing_id: ListingId,
    /// The user who initiated the purchase.
    pub buyer_id: UserId,
    /// Current lifecycle state.
    pub state: TransactionState,
    pub initiated_at: DateTime<Utc>,
    pub payment_sent_at: Option<DateTime<Utc>>,
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Reference to the uploaded payment proof. Never cleared once set.
    pub payment_proof: Option<ArtifactRef>,
    /// Carrier tracking information supplied when shipping.
    pub tracking_info: Option<String>,
    /// Free text the buyer attached at initiation.
    pub initial_message: Option<String>,
    /// Whether a rating referencing this transaction has been recorded.
    pub rated: bool,
}

impl Transaction {
    /// Creates a new transaction in `PendingPayment`.
    ///
    /// Ownership checks (buyer ≠ seller) happen before this is called; the
    /// record itself knows nothing about the listing owner.
    pub fn initiate(
        listing_id: ListingId,
        buyer_id: UserId,
        initial_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            listing_id,
            buyer_id,
            state: TransactionState::PendingPayment,
            initiated_at: at,
            payment_sent_at: None,
            payment_confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            payment_proof: None,
            tracking_info: None,
            initial_message,
            rated: false,
        }
    }

    /// Resolves the role `user` plays, given the listing's current owner.
    ///
    /// Returns `None` for users unrelated to the transaction.
    pub fn role_of(&self, user: UserId, listing_owner: UserId) -> Option<Role> {
        if user == self.buyer_id {
            Some(Role::Buyer)
        } else if user == listing_owner {
            Some(Role::Seller)
        } else {
            None
        }
    }

    /// Flags the transaction as rated. Returns `false` if it already was.
    pub fn mark_rated(&mut self) -> bool {
        !std::mem::replace(&mut self.rated, true)
    }

    /// The timestamp stamped when the transaction entered `state`, if it did.
    pub fn entered_at(&self, state: TransactionState) -> Option<DateTime<Utc>> {
        match state {
            TransactionState::PendingPayment => Some(self.initiated_at),
            TransactionState::PaymentSent => self.payment_sent_at,
            TransactionState::PaymentConfirmed => self.payment_confirmed_at,
            TransactionState::Shipped => self.shipped_at,
            TransactionState::Delivered => self.delivered_at,
            TransactionState::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_starts_pending_and_unrated() {
        let now = Utc::now();
        let tx = Transaction::initiate(7, 42, Some("interested".into()), now);
        assert_eq!(tx.state, TransactionState::PendingPayment);
        assert_eq!(tx.initiated_at, now);
        assert!(tx.payment_sent_at.is_none());
        assert!(tx.payment_proof.is_none());
        assert!(!tx.rated);
        assert_eq!(tx.initial_message.as_deref(), Some("interested"));
    }

    #[test]
    fn role_resolution_uses_listing_owner() {
        let tx = Transaction::initiate(1, 10, None, Utc::now());
        assert_eq!(tx.role_of(10, 20), Some(Role::Buyer));
        assert_eq!(tx.role_of(20, 20), Some(Role::Seller));
        assert_eq!(tx.role_of(30, 20), None);
    }

    #[test]
    fn rated_flag_flips_once() {
        let mut tx = Transaction::initiate(1, 10, None, Utc::now());
        assert!(tx.mark_rated());
        assert!(!tx.mark_rated());
        assert!(tx.rated);
    }

    #[test]
    fn state_names_are_screaming_snake_case() {
        let json = serde_json::to_string(&TransactionState::PaymentConfirmed).unwrap();
        assert_eq!(json, "\"PAYMENT_CONFIRMED\"");
        assert_eq!(TransactionState::Shipped.to_string(), "SHIPPED");
    }
}
