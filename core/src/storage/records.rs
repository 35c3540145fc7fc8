//! Persisted records other than [`Transaction`](crate::transaction::Transaction).
//!
//! Listings, ratings, chat messages and queued notification mails. They are
//! thin data holders; the rules that govern them live in the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactRef;
use crate::transaction::{ListingId, TransactionId, UserId};

/// A published item offered for sale or exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: ListingId,
    /// The seller. Transactions derive their seller from this field.
    pub owner_id: UserId,
    pub title: String,
    /// Asking price in minor currency units.
    pub price: u64,
    /// Cleared once, when a transaction for this listing is delivered.
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

/// An immutable score one user gave another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub rating_id: Uuid,
    pub rater_id: UserId,
    pub ratee_id: UserId,
    pub score: u8,
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

/// A direct chat message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
}

/// A notification mail waiting in the outbox for a mailer to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMail {
    pub mail_id: Uuid,
    pub recipient_id: UserId,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<ArtifactRef>,
    pub queued_at: DateTime<Utc>,
}
