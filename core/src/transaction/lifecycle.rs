//! # Transaction Lifecycle
//!
//! The transition table of the purchase state machine, expressed as data:
//! each [`TransactionEvent`] knows the single state it may fire from, the
//! state it leads to, and the role allowed to fire it.
//!
//! | From               | Event                  | To                 | Actor  |
//! |--------------------|------------------------|--------------------|--------|
//! | `PendingPayment`   | `SubmitPaymentProof`   | `PaymentSent`      | buyer  |
//! | `PaymentSent`      | `ConfirmPayment`       | `PaymentConfirmed` | seller |
//! | `PaymentConfirmed` | `MarkShipped`          | `Shipped`          | seller |
//! | `Shipped`          | `ConfirmDelivery`      | `Delivered`        | buyer  |
//!
//! This module is pure: no storage, no clocks. Callers pass the timestamp
//! and persist the result.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{Role, Transaction, TransactionState};
use crate::artifact::ArtifactRef;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when an event does not fit the transaction's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The transaction is not in the state this event fires from.
    #[error("invalid state transition: transaction is {current}, expected {expected}")]
    InvalidState {
        current: TransactionState,
        expected: TransactionState,
    },

    /// The event would move a timestamp backwards.
    #[error("non-monotonic timestamp: {at} precedes {previous}")]
    ClockSkew {
        at: DateTime<Utc>,
        previous: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A state-changing request against an existing transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    /// The buyer attaches proof of payment.
    SubmitPaymentProof { proof: ArtifactRef },
    /// The seller acknowledges the payment.
    ConfirmPayment,
    /// The seller ships the item, optionally with tracking details.
    MarkShipped { tracking_info: Option<String> },
    /// The buyer confirms reception.
    ConfirmDelivery,
}

impl TransactionEvent {
    /// Short name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitPaymentProof { .. } => "submit_payment_proof",
            Self::ConfirmPayment => "confirm_payment",
            Self::MarkShipped { .. } => "mark_shipped",
            Self::ConfirmDelivery => "confirm_delivery",
        }
    }

    /// The only state this event may fire from.
    pub fn from_state(&self) -> TransactionState {
        match self {
            Self::SubmitPaymentProof { .. } => TransactionState::PendingPayment,
            Self::ConfirmPayment => TransactionState::PaymentSent,
            Self::MarkShipped { .. } => TransactionState::PaymentConfirmed,
            Self::ConfirmDelivery => TransactionState::Shipped,
        }
    }

    /// The state the transaction is in after the event.
    pub fn to_state(&self) -> TransactionState {
        match self {
            Self::SubmitPaymentProof { .. } => TransactionState::PaymentSent,
            Self::ConfirmPayment => TransactionState::PaymentConfirmed,
            Self::MarkShipped { .. } => TransactionState::Shipped,
            Self::ConfirmDelivery => TransactionState::Delivered,
        }
    }

    /// The role entitled to fire this event.
    pub fn actor(&self) -> Role {
        match self {
            Self::SubmitPaymentProof { .. } | Self::ConfirmDelivery => Role::Buyer,
            Self::ConfirmPayment | Self::MarkShipped { .. } => Role::Seller,
        }
    }

    /// Whether committing this event takes the listing off the market.
    pub fn releases_listing(&self) -> bool {
        matches!(self, Self::ConfirmDelivery)
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

impl Transaction {
    /// Applies `event` at time `at`.
    ///
    /// Only checks the state machine. Role checks are the caller's job,
    /// because the seller is only known through the listing.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] if the transaction is not in
    /// [`TransactionEvent::from_state`], and [`LifecycleError::ClockSkew`] if
    /// `at` is earlier than the previous stamped transition.
    pub fn apply(&mut self, event: &TransactionEvent, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        let expected = event.from_state();
        if self.state != expected {
            return Err(LifecycleError::InvalidState {
                current: self.state,
                expected,
            });
        }

        if let Some(previous) = self.entered_at(self.state) {
            if at < previous {
                return Err(LifecycleError::ClockSkew { at, previous });
            }
        }

        match event {
            TransactionEvent::SubmitPaymentProof { proof } => {
                self.payment_proof = Some(proof.clone());
                self.payment_sent_at = Some(at);
            }
            TransactionEvent::ConfirmPayment => {
                self.payment_confirmed_at = Some(at);
            }
            TransactionEvent::MarkShipped { tracking_info } => {
                self.tracking_info = tracking_info.clone();
                self.shipped_at = Some(at);
            }
            TransactionEvent::ConfirmDelivery => {
                self.delivered_at = Some(at);
            }
        }

        self.state = event.to_state();
        Ok(())
    }
}
