//! Integration tests for the transaction engine.
//!
//! These tests drive the full purchase lifecycle through the public engine
//! API against a temporary database: the happy path, role and state
//! mismatches, listing availability, and best-effort side effects.

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use wardrobe_core::artifact::{ArtifactRef, FsArtifactStore};
use wardrobe_core::identity::Session;
use wardrobe_core::notify::Notifier;
use wardrobe_core::storage::{Listing, MarketDB};
use wardrobe_core::transaction::{Role, TransactionState, UserId};
use wardrobe_engine::{EngineError, RoleFilter, TransactionEngine};

const BUYER: UserId = 1;
const SELLER: UserId = 2;
const STRANGER: UserId = 3;

/// Notifier that remembers every mail it was handed.
struct RecordingNotifier {
    accept: bool,
    sent: Mutex<Vec<(UserId, String, Vec<ArtifactRef>)>>,
}

impl RecordingNotifier {
    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            sent: Mutex::new(Vec::new()),
        })
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient_id: UserId, subject: &str, _body: &str, attachments: &[ArtifactRef]) -> bool {
        self.sent
            .lock()
            .push((recipient_id, subject.to_string(), attachments.to_vec()));
        self.accept
    }
}

struct Market {
    db: Arc<MarketDB>,
    engine: TransactionEngine,
    notifier: Arc<RecordingNotifier>,
}

/// Helper: an engine over a fresh database with one listing owned by SELLER.
fn market_with(notifier: Arc<RecordingNotifier>) -> (Market, Listing) {
    let db = Arc::new(MarketDB::open_temporary().unwrap());
    let listing = db.create_listing(SELLER, "Vintage denim jacket".into(), 4500).unwrap();
    let engine = TransactionEngine::new(Arc::clone(&db), notifier.clone(), db.clone());
    (
        Market {
            db,
            engine,
            notifier,
        },
        listing,
    )
}

fn market() -> (Market, Listing) {
    market_with(RecordingNotifier::new(true))
}

fn session(user_id: UserId) -> Session {
    Session {
        user_id,
        expires_at: Utc::now() + Duration::hours(12),
    }
}

fn proof() -> ArtifactRef {
    ArtifactRef::new("proof123")
}

// ---------------------------------------------------------------------------
// Lifecycle Tests
// ---------------------------------------------------------------------------

#[test]
fn full_lifecycle_happy_path() {
    let (m, listing) = market();
    let (b, s) = (session(BUYER), session(SELLER));

    // 1. Initiate
    let view = m
        .engine
        .initiate(&b, listing.listing_id, Some("interested".into()))
        .unwrap();
    let id = view.transaction.id;
    assert_eq!(view.transaction.state, TransactionState::PendingPayment);
    assert_eq!(view.seller_id, SELLER);
    assert_eq!(view.viewer_role, Role::Buyer);

    let inbox = m.db.messages_for(SELLER).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, "Message about your listing: interested");
    assert_eq!(inbox[0].sender_id, BUYER);

    // 2. Payment proof
    let view = m.engine.submit_payment_proof(&b, id, proof()).unwrap();
    assert_eq!(view.transaction.state, TransactionState::PaymentSent);
    assert_eq!(view.transaction.payment_proof, Some(proof()));
    assert!(view.transaction.payment_sent_at.is_some());

    // 3. Confirm payment
    let view = m.engine.confirm_payment(&s, id).unwrap();
    assert_eq!(view.transaction.state, TransactionState::PaymentConfirmed);

    // 4. Ship
    let view = m
        .engine
        .mark_shipped(&s, id, Some("DHL-999".into()))
        .unwrap();
    assert_eq!(view.transaction.state, TransactionState::Shipped);
    assert_eq!(view.transaction.tracking_info.as_deref(), Some("DHL-999"));
    assert!(m.db.get_listing(listing.listing_id).unwrap().unwrap().is_available);

    // 5. Deliver
    let view = m.engine.confirm_delivery(&b, id).unwrap();
    assert_eq!(view.transaction.state, TransactionState::Delivered);
    assert!(!m.db.get_listing(listing.listing_id).unwrap().unwrap().is_available);

    let tx = view.transaction;
    assert!(tx.initiated_at <= tx.payment_sent_at.unwrap());
    assert!(tx.payment_sent_at <= tx.payment_confirmed_at);
    assert!(tx.payment_confirmed_at <= tx.shipped_at);
    assert!(tx.shipped_at <= tx.delivered_at);

    // Later attempts find nothing to advance.
    assert!(matches!(
        m.engine.mark_shipped(&s, id, Some("DHL-000".into())),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn each_transition_notifies_the_other_party() {
    let (m, listing) = market();
    let (b, s) = (session(BUYER), session(SELLER));
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    m.engine.submit_payment_proof(&b, id, proof()).unwrap();
    m.engine.confirm_payment(&s, id).unwrap();
    m.engine.mark_shipped(&s, id, None).unwrap();
    m.engine.confirm_delivery(&b, id).unwrap();

    let sent = m.notifier.sent.lock();
    let recipients: Vec<UserId> = sent.iter().map(|(to, _, _)| *to).collect();
    assert_eq!(recipients, vec![SELLER, BUYER, BUYER, SELLER]);
    assert_eq!(sent[0].2, vec![proof()]);
}

#[test]
fn failing_notifier_does_not_change_outcome() {
    let (m, listing) = market_with(RecordingNotifier::new(false));
    let b = session(BUYER);
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    let view = m.engine.submit_payment_proof(&b, id, proof()).unwrap();
    assert_eq!(view.transaction.state, TransactionState::PaymentSent);
    let stored = m.db.get_transaction(&id).unwrap().unwrap();
    assert_eq!(stored.state, TransactionState::PaymentSent);
    assert_eq!(m.notifier.sent.lock().len(), 1);
}

// ---------------------------------------------------------------------------
// Initiation Rules
// ---------------------------------------------------------------------------

#[test]
fn owner_cannot_initiate_and_no_record_is_created() {
    let (m, listing) = market();
    let result = m.engine.initiate(&session(SELLER), listing.listing_id, None);
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
    assert_eq!(m.db.transaction_count(), 0);
}

#[test]
fn unknown_listing_is_not_found() {
    let (m, _) = market();
    assert!(matches!(
        m.engine.initiate(&session(BUYER), 9_999, None),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn overlong_message_is_rejected() {
    let (m, listing) = market();
    let message = "x".repeat(1001);
    assert!(matches!(
        m.engine.initiate(&session(BUYER), listing.listing_id, Some(message)),
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(m.db.transaction_count(), 0);
}

#[test]
fn blank_message_is_not_forwarded() {
    let (m, listing) = market();
    let view = m
        .engine
        .initiate(&session(BUYER), listing.listing_id, Some("   ".into()))
        .unwrap();
    assert!(view.transaction.initial_message.is_none());
    assert!(m.db.messages_for(SELLER).unwrap().is_empty());
}

#[test]
fn expired_session_is_unauthenticated() {
    let (m, listing) = market();
    let expired = Session {
        user_id: BUYER,
        expires_at: Utc::now() - Duration::seconds(1),
    };
    assert!(matches!(
        m.engine.initiate(&expired, listing.listing_id, None),
        Err(EngineError::Unauthenticated(_))
    ));
}

// ---------------------------------------------------------------------------
// Scoped Lookups
// ---------------------------------------------------------------------------

#[test]
fn seller_cannot_confirm_delivery() {
    let (m, listing) = market();
    let (b, s) = (session(BUYER), session(SELLER));
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;
    m.engine.submit_payment_proof(&b, id, proof()).unwrap();
    m.engine.confirm_payment(&s, id).unwrap();
    m.engine.mark_shipped(&s, id, None).unwrap();

    assert!(matches!(
        m.engine.confirm_delivery(&s, id),
        Err(EngineError::NotFound(_))
    ));
    let stored = m.db.get_transaction(&id).unwrap().unwrap();
    assert_eq!(stored.state, TransactionState::Shipped);
    assert!(m.db.get_listing(listing.listing_id).unwrap().unwrap().is_available);
}

#[test]
fn role_state_and_identity_mismatches_look_the_same() {
    let (m, listing) = market();
    let b = session(BUYER);
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    let wrong_role = m.engine.confirm_payment(&b, id).unwrap_err();
    let wrong_state = m.engine.confirm_delivery(&b, id).unwrap_err();
    let stranger = m
        .engine
        .submit_payment_proof(&session(STRANGER), id, proof())
        .unwrap_err();
    let unknown = m
        .engine
        .confirm_payment(&session(SELLER), uuid::Uuid::new_v4())
        .unwrap_err();

    for err in [wrong_role, wrong_state, stranger, unknown] {
        assert_eq!(err.to_string(), "transaction not found");
    }
}

#[test]
fn skipping_a_step_is_not_found() {
    let (m, listing) = market();
    let (b, s) = (session(BUYER), session(SELLER));
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    assert!(m.engine.mark_shipped(&s, id, None).is_err());
    assert!(m.engine.confirm_delivery(&b, id).is_err());
    let stored = m.db.get_transaction(&id).unwrap().unwrap();
    assert_eq!(stored.state, TransactionState::PendingPayment);
}

#[test]
fn overlong_tracking_info_is_rejected() {
    let (m, listing) = market();
    let (b, s) = (session(BUYER), session(SELLER));
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;
    m.engine.submit_payment_proof(&b, id, proof()).unwrap();
    m.engine.confirm_payment(&s, id).unwrap();

    assert!(matches!(
        m.engine.mark_shipped(&s, id, Some("T".repeat(256))),
        Err(EngineError::InvalidArgument(_))
    ));
    let view = m.engine.mark_shipped(&s, id, Some("  ".into())).unwrap();
    assert!(view.transaction.tracking_info.is_none());
}

// ---------------------------------------------------------------------------
// Payment Proof Uploads
// ---------------------------------------------------------------------------

#[test]
fn upload_stores_artifact_and_advances() {
    let (m, listing) = market();
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).unwrap();
    let b = session(BUYER);
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    let view = m
        .engine
        .upload_payment_proof(&b, id, b"bank transfer receipt", "receipt.pdf", &store)
        .unwrap();
    assert_eq!(view.transaction.state, TransactionState::PaymentSent);
    let reference = view.transaction.payment_proof.unwrap();
    assert!(store.path_of(&reference).exists());
}

#[test]
fn upload_by_stranger_writes_no_file() {
    let (m, listing) = market();
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).unwrap();
    let id = m
        .engine
        .initiate(&session(BUYER), listing.listing_id, None)
        .unwrap()
        .transaction
        .id;

    let result =
        m.engine
            .upload_payment_proof(&session(STRANGER), id, b"forged", "receipt.png", &store);
    assert!(matches!(result, Err(EngineError::NotFound(_))));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn uploaded_proof_is_readable_by_both_parties_only() {
    let (m, listing) = market();
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).unwrap();
    let b = session(BUYER);
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    assert!(matches!(
        m.engine.payment_proof(&session(SELLER), id, &store),
        Err(EngineError::NotFound("payment proof"))
    ));

    m.engine
        .upload_payment_proof(&b, id, b"bank transfer receipt", "receipt.png", &store)
        .unwrap();

    for user in [BUYER, SELLER] {
        let (reference, bytes) = m.engine.payment_proof(&session(user), id, &store).unwrap();
        assert_eq!(bytes, b"bank transfer receipt");
        assert_eq!(reference.content_type(), "image/png");
    }
    assert!(matches!(
        m.engine.payment_proof(&session(STRANGER), id, &store),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn proof_with_missing_file_is_not_found() {
    let (m, listing) = market();
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).unwrap();
    let b = session(BUYER);
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;
    m.engine
        .submit_payment_proof(&b, id, ArtifactRef::new("/uploads/gone.pdf"))
        .unwrap();

    assert!(matches!(
        m.engine.payment_proof(&session(SELLER), id, &store),
        Err(EngineError::NotFound("payment proof"))
    ));
}

#[test]
fn rejected_upload_is_an_artifact_error() {
    let (m, listing) = market();
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path()).unwrap();
    let b = session(BUYER);
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;

    let err = m
        .engine
        .upload_payment_proof(&b, id, b"MZ", "payload.exe", &store)
        .unwrap_err();
    assert_eq!(err.code(), "artifact_error");
    let stored = m.db.get_transaction(&id).unwrap().unwrap();
    assert_eq!(stored.state, TransactionState::PendingPayment);
}

// ---------------------------------------------------------------------------
// Availability & Reads
// ---------------------------------------------------------------------------

#[test]
fn delivered_listing_rejects_new_purchases() {
    let (m, listing) = market();
    let (b, s) = (session(BUYER), session(SELLER));
    let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;
    m.engine.submit_payment_proof(&b, id, proof()).unwrap();
    m.engine.confirm_payment(&s, id).unwrap();
    m.engine.mark_shipped(&s, id, None).unwrap();
    m.engine.confirm_delivery(&b, id).unwrap();

    assert!(matches!(
        m.engine.initiate(&session(STRANGER), listing.listing_id, None),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn second_delivery_on_same_listing_keeps_it_unavailable() {
    let (m, listing) = market();
    let s = session(SELLER);
    let mut ids = Vec::new();
    for buyer in [BUYER, STRANGER] {
        let b = session(buyer);
        let id = m.engine.initiate(&b, listing.listing_id, None).unwrap().transaction.id;
        m.engine.submit_payment_proof(&b, id, proof()).unwrap();
        m.engine.confirm_payment(&s, id).unwrap();
        m.engine.mark_shipped(&s, id, None).unwrap();
        ids.push((b, id));
    }

    for (b, id) in &ids {
        m.engine.confirm_delivery(b, *id).unwrap();
        assert!(!m.db.get_listing(listing.listing_id).unwrap().unwrap().is_available);
    }
}

#[test]
fn get_transaction_is_private_to_participants() {
    let (m, listing) = market();
    let id = m
        .engine
        .initiate(&session(BUYER), listing.listing_id, None)
        .unwrap()
        .transaction
        .id;

    let as_seller = m.engine.get_transaction(&session(SELLER), id).unwrap();
    assert_eq!(as_seller.viewer_role, Role::Seller);
    assert_eq!(as_seller.listing_title, "Vintage denim jacket");
    assert!(matches!(
        m.engine.get_transaction(&session(STRANGER), id),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn list_transactions_filters_by_role_newest_first() {
    let (m, listing) = market();
    let other = m.db.create_listing(BUYER, "Linen shirt".into(), 1200).unwrap();

    let first = m
        .engine
        .initiate(&session(BUYER), listing.listing_id, None)
        .unwrap()
        .transaction
        .id;
    let second = m
        .engine
        .initiate(&session(SELLER), other.listing_id, None)
        .unwrap()
        .transaction
        .id;

    let b = session(BUYER);
    let all = m.engine.list_transactions(&b, RoleFilter::All).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].transaction.initiated_at >= all[1].transaction.initiated_at);

    let buying = m.engine.list_transactions(&b, RoleFilter::Buying).unwrap();
    assert_eq!(buying.len(), 1);
    assert_eq!(buying[0].transaction.id, first);

    let selling = m.engine.list_transactions(&b, RoleFilter::Selling).unwrap();
    assert_eq!(selling.len(), 1);
    assert_eq!(selling[0].transaction.id, second);

    assert!(m
        .engine
        .list_transactions(&session(STRANGER), RoleFilter::All)
        .unwrap()
        .is_empty());
}
