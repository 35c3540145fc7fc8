//! # Transaction Engine
//!
//! Carries a purchase from initiation to delivery:
//!
//! 1. **Initiate**: a buyer opens a transaction on an available listing.
//! 2. **Submit payment proof**: the buyer attaches proof of payment.
//! 3. **Confirm payment**: the seller acknowledges the payment.
//! 4. **Mark shipped**: the seller ships, optionally with tracking info.
//! 5. **Confirm delivery**: the buyer confirms reception; the listing goes
//!    off the market in the same commit.
//!
//! Every transition follows the same path: a scoped lookup (identity, role
//! and expected state checked together, any mismatch is `NotFound`), the
//! state machine applied to a copy, then a conditional commit that only
//! succeeds if the stored record is still the one that was read. Mail and
//! chat side effects run after the commit and never undo it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use wardrobe_core::artifact::{ArtifactError, ArtifactRef, ArtifactStore};
use wardrobe_core::config::{
    INITIAL_MESSAGE_PREFIX, MAX_INITIAL_MESSAGE_CHARS, MAX_TRACKING_INFO_CHARS,
};
use wardrobe_core::identity::Session;
use wardrobe_core::notify::{MessageSink, Notifier};
use wardrobe_core::storage::{Listing, MarketDB};
use wardrobe_core::transaction::{
    ListingId, Role, Transaction, TransactionEvent, TransactionId, TransactionState, UserId,
};

use crate::authz::{ensure_live, Authorization};
use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A transaction as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Resolved from the listing's owner at read time.
    pub seller_id: UserId,
    pub listing_title: String,
    /// The role the requesting user plays.
    pub viewer_role: Role,
    /// Where the participants fetch the payment proof, once there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_proof_url: Option<String>,
}

impl TransactionView {
    fn new(transaction: Transaction, listing: &Listing, viewer_role: Role) -> Self {
        let payment_proof_url = transaction
            .payment_proof
            .as_ref()
            .map(|_| format!("/transactions/{}/payment-proof", transaction.id));
        Self {
            transaction,
            seller_id: listing.owner_id,
            listing_title: listing.title.clone(),
            viewer_role,
            payment_proof_url,
        }
    }

    pub fn buyer_id(&self) -> UserId {
        self.transaction.buyer_id
    }

    /// Whether `user` is the buyer or the seller.
    pub fn involves(&self, user: UserId) -> bool {
        user == self.transaction.buyer_id || user == self.seller_id
    }
}

/// Which side of a user's transactions to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFilter {
    #[default]
    All,
    Buying,
    Selling,
}

impl RoleFilter {
    fn admits(&self, role: Role) -> bool {
        match self {
            Self::All => true,
            Self::Buying => role == Role::Buyer,
            Self::Selling => role == Role::Seller,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Applies guarded lifecycle transitions against the store.
pub struct TransactionEngine {
    db: Arc<MarketDB>,
    notifier: Arc<dyn Notifier>,
    messages: Arc<dyn MessageSink>,
}

impl TransactionEngine {
    pub fn new(
        db: Arc<MarketDB>,
        notifier: Arc<dyn Notifier>,
        messages: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            db,
            notifier,
            messages,
        }
    }

    /// Opens a purchase of `listing_id` by the session's user.
    ///
    /// A non-empty `message` is stored on the record and forwarded to the
    /// seller as a chat message, best-effort.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidArgument`] if the message is too long.
    /// - [`EngineError::NotFound`] if the listing does not exist or is no
    ///   longer available.
    /// - [`EngineError::Forbidden`] if the caller owns the listing. No
    ///   record is created.
    pub fn initiate(
        &self,
        session: &Session,
        listing_id: ListingId,
        message: Option<String>,
    ) -> EngineResult<TransactionView> {
        let now = Utc::now();
        ensure_live(session, now)?;
        let message = normalize_text(message, MAX_INITIAL_MESSAGE_CHARS, "message")?;

        let listing = self
            .db
            .get_listing(listing_id)?
            .filter(|l| l.is_available)
            .ok_or(EngineError::NotFound("listing"))?;

        match Authorization::for_purchase(session, now, listing.owner_id) {
            Authorization::Authorized(_) => {}
            Authorization::Forbidden => {
                return Err(EngineError::Forbidden(
                    "cannot purchase your own listing".into(),
                ))
            }
            Authorization::Unauthenticated => {
                return Err(EngineError::Unauthenticated("session expired".into()))
            }
        }

        let tx = Transaction::initiate(listing_id, session.user_id, message, now);
        self.db.insert_transaction(&tx)?;
        info!(
            transaction_id = %tx.id,
            listing_id,
            buyer_id = tx.buyer_id,
            "transaction initiated"
        );

        if let Some(text) = &tx.initial_message {
            let content = format!("{INITIAL_MESSAGE_PREFIX}{text}");
            if !self.messages.post(tx.buyer_id, listing.owner_id, &content) {
                warn!(transaction_id = %tx.id, "initial message was not delivered");
            }
        }

        Ok(TransactionView::new(tx, &listing, Role::Buyer))
    }

    /// Records a stored payment proof. Buyer only, from `PendingPayment`.
    pub fn submit_payment_proof(
        &self,
        session: &Session,
        id: TransactionId,
        proof: ArtifactRef,
    ) -> EngineResult<TransactionView> {
        self.transition(session, id, TransactionEvent::SubmitPaymentProof { proof })
    }

    /// Stores `bytes` in `store` and submits the result as payment proof.
    ///
    /// The scoped lookup runs before anything is written, so callers who
    /// could not advance the transaction leave no file behind.
    pub fn upload_payment_proof(
        &self,
        session: &Session,
        id: TransactionId,
        bytes: &[u8],
        file_name: &str,
        store: &dyn ArtifactStore,
    ) -> EngineResult<TransactionView> {
        let now = Utc::now();
        ensure_live(session, now)?;
        self.scoped_lookup(session, id, Role::Buyer, TransactionState::PendingPayment, now)?;

        let proof = store.store(bytes, file_name)?;
        self.submit_payment_proof(session, id, proof)
    }

    /// Acknowledges the payment. Seller only, from `PaymentSent`.
    pub fn confirm_payment(&self, session: &Session, id: TransactionId) -> EngineResult<TransactionView> {
        self.transition(session, id, TransactionEvent::ConfirmPayment)
    }

    /// Marks the item shipped. Seller only, from `PaymentConfirmed`.
    ///
    /// Blank tracking info is treated as absent.
    pub fn mark_shipped(
        &self,
        session: &Session,
        id: TransactionId,
        tracking_info: Option<String>,
    ) -> EngineResult<TransactionView> {
        let tracking_info = normalize_text(tracking_info, MAX_TRACKING_INFO_CHARS, "tracking_info")?;
        self.transition(session, id, TransactionEvent::MarkShipped { tracking_info })
    }

    /// Confirms reception. Buyer only, from `Shipped`.
    ///
    /// The listing becomes unavailable in the same commit.
    pub fn confirm_delivery(&self, session: &Session, id: TransactionId) -> EngineResult<TransactionView> {
        self.transition(session, id, TransactionEvent::ConfirmDelivery)
    }

    /// Reads a transaction. Visible to its buyer and the listing owner only.
    pub fn get_transaction(&self, session: &Session, id: TransactionId) -> EngineResult<TransactionView> {
        ensure_live(session, Utc::now())?;
        let tx = self
            .db
            .get_transaction(&id)?
            .ok_or_else(EngineError::transaction_not_found)?;
        let listing = self
            .db
            .get_listing(tx.listing_id)?
            .ok_or_else(EngineError::transaction_not_found)?;
        let role = tx
            .role_of(session.user_id, listing.owner_id)
            .ok_or_else(EngineError::transaction_not_found)?;
        Ok(TransactionView::new(tx, &listing, role))
    }

    /// Reads the payment proof of a transaction back out of `store`.
    ///
    /// Visible to the same two users as [`get_transaction`](Self::get_transaction).
    /// A transaction without a proof, or whose file is gone, is `NotFound`.
    pub fn payment_proof(
        &self,
        session: &Session,
        id: TransactionId,
        store: &dyn ArtifactStore,
    ) -> EngineResult<(ArtifactRef, Vec<u8>)> {
        let view = self.get_transaction(session, id)?;
        let proof = view
            .transaction
            .payment_proof
            .ok_or(EngineError::NotFound("payment proof"))?;
        match store.load(&proof) {
            Ok(bytes) => Ok((proof, bytes)),
            Err(ArtifactError::Missing(_)) => {
                warn!(transaction_id = %id, proof = %proof, "payment proof file is missing");
                Err(EngineError::NotFound("payment proof"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's transactions, newest first.
    pub fn list_transactions(
        &self,
        session: &Session,
        filter: RoleFilter,
    ) -> EngineResult<Vec<TransactionView>> {
        ensure_live(session, Utc::now())?;
        let mut listings: HashMap<ListingId, Option<Listing>> = HashMap::new();
        let mut views = Vec::new();

        for tx in self.db.transactions()? {
            let listing = match listings.get(&tx.listing_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.db.get_listing(tx.listing_id)?;
                    listings.insert(tx.listing_id, fetched.clone());
                    fetched
                }
            };
            let Some(listing) = listing else {
                continue;
            };
            if let Some(role) = tx.role_of(session.user_id, listing.owner_id) {
                if filter.admits(role) {
                    views.push(TransactionView::new(tx, &listing, role));
                }
            }
        }

        views.sort_by(|a, b| b.transaction.initiated_at.cmp(&a.transaction.initiated_at));
        Ok(views)
    }

    // -- Internals ----------------------------------------------------------

    /// Loads the transaction only if the caller plays `role` and it is in
    /// `state`. Every mismatch is the same `NotFound`.
    fn scoped_lookup(
        &self,
        session: &Session,
        id: TransactionId,
        role: Role,
        state: TransactionState,
        now: DateTime<Utc>,
    ) -> EngineResult<(Transaction, Listing)> {
        let tx = self
            .db
            .get_transaction(&id)?
            .ok_or_else(EngineError::transaction_not_found)?;
        let listing = self
            .db
            .get_listing(tx.listing_id)?
            .ok_or_else(EngineError::transaction_not_found)?;

        match Authorization::for_transition(session, now, &tx, listing.owner_id, role) {
            Authorization::Authorized(_) if tx.state == state => Ok((tx, listing)),
            Authorization::Unauthenticated => {
                Err(EngineError::Unauthenticated("session expired".into()))
            }
            _ => Err(EngineError::transaction_not_found()),
        }
    }

    fn transition(
        &self,
        session: &Session,
        id: TransactionId,
        event: TransactionEvent,
    ) -> EngineResult<TransactionView> {
        let now = Utc::now();
        ensure_live(session, now)?;
        let (before, listing) =
            self.scoped_lookup(session, id, event.actor(), event.from_state(), now)?;

        // A clock stepping backwards must not wedge the record.
        let at = before
            .entered_at(before.state)
            .map_or(now, |previous| previous.max(now));
        let mut after = before.clone();
        after.apply(&event, at)?;

        let released = self
            .db
            .commit_transition(&before, &after, event.releases_listing())?;
        info!(
            transaction_id = %after.id,
            event = event.name(),
            from = %before.state,
            to = %after.state,
            "transition applied"
        );
        if released {
            info!(listing_id = listing.listing_id, "listing no longer available");
        }

        self.notify_counterpart(&event, &after, &listing);
        Ok(TransactionView::new(after, &listing, event.actor()))
    }

    fn notify_counterpart(&self, event: &TransactionEvent, tx: &Transaction, listing: &Listing) {
        let title = &listing.title;
        let (recipient, subject, body, attachments) = match event {
            TransactionEvent::SubmitPaymentProof { proof } => (
                listing.owner_id,
                "Payment proof received".to_string(),
                format!("The buyer submitted a payment proof for \"{title}\". Please verify it and confirm the payment."),
                vec![proof.clone()],
            ),
            TransactionEvent::ConfirmPayment => (
                tx.buyer_id,
                "Payment confirmed".to_string(),
                format!("The seller confirmed your payment for \"{title}\"."),
                Vec::new(),
            ),
            TransactionEvent::MarkShipped { tracking_info } => (
                tx.buyer_id,
                "Your item has shipped".to_string(),
                match tracking_info {
                    Some(tracking) => format!("\"{title}\" is on its way. Tracking: {tracking}"),
                    None => format!("\"{title}\" is on its way."),
                },
                Vec::new(),
            ),
            TransactionEvent::ConfirmDelivery => (
                listing.owner_id,
                "Delivery confirmed".to_string(),
                format!("The buyer confirmed delivery of \"{title}\"."),
                Vec::new(),
            ),
        };

        if !self.notifier.notify(recipient, &subject, &body, &attachments) {
            warn!(
                transaction_id = %tx.id,
                event = event.name(),
                recipient,
                "notification was not delivered"
            );
        }
    }
}

/// Trims optional free text, drops it if blank, and enforces a length cap.
fn normalize_text(text: Option<String>, max_chars: usize, field: &str) -> EngineResult<Option<String>> {
    let Some(text) = text else {
        return Ok(None);
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(EngineError::InvalidArgument(format!(
            "{field} is {len} characters, limit is {max_chars}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_absent() {
        assert_eq!(normalize_text(None, 10, "f").unwrap(), None);
        assert_eq!(normalize_text(Some("   ".into()), 10, "f").unwrap(), None);
        assert_eq!(
            normalize_text(Some(" DHL-999 ".into()), 10, "f").unwrap().as_deref(),
            Some("DHL-999")
        );
    }

    #[test]
    fn text_limit_counts_characters() {
        let at_limit = "é".repeat(5);
        assert!(normalize_text(Some(at_limit), 5, "f").is_ok());
        let over = "é".repeat(6);
        assert!(matches!(
            normalize_text(Some(over), 5, "f"),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn role_filter_admits() {
        assert!(RoleFilter::All.admits(Role::Buyer));
        assert!(RoleFilter::All.admits(Role::Seller));
        assert!(RoleFilter::Buying.admits(Role::Buyer));
        assert!(!RoleFilter::Buying.admits(Role::Seller));
        assert!(RoleFilter::Selling.admits(Role::Seller));
    }

    #[test]
    fn view_serializes_flat() {
        let listing = Listing {
            listing_id: 1,
            owner_id: 20,
            title: "Wool coat".into(),
            price: 4000,
            is_available: true,
            created_at: Utc::now(),
        };
        let tx = Transaction::initiate(1, 10, None, Utc::now());
        let view = TransactionView::new(tx, &listing, Role::Buyer);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "PENDING_PAYMENT");
        assert_eq!(json["seller_id"], 20);
        assert_eq!(json["viewer_role"], "buyer");
        assert!(view.involves(10) && view.involves(20) && !view.involves(30));
    }
}
