//! # MarketDB: Persistent Storage Engine
//!
//! The persistence layer for the marketplace, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                    | Value                  |
//! |----------------|------------------------|------------------------|
//! | `listings`     | `listing_id` (8B BE)   | `bincode(Listing)`     |
//! | `transactions` | `id` (16B UUID)        | `bincode(Transaction)` |
//! | `ratings`      | `rating_id` (16B UUID) | `bincode(Rating)`      |
//! | `messages`     | `message_id` (16B)     | `bincode(Message)`     |
//! | `outbox`       | `mail_id` (16B)        | `bincode(OutboxMail)`  |
//! | `metadata`     | key (UTF-8)            | value (bytes)          |
//!
//! ## Atomicity
//!
//! State transitions are conditional writes. The caller reads a snapshot of
//! the transaction, computes the successor, and hands both to
//! [`MarketDB::commit_transition`]. The commit runs in one sled transaction
//! spanning `transactions` and `listings`: it re-reads the record, aborts
//! with [`CommitError::Stale`] unless the stored bytes still equal the
//! snapshot, and writes the successor together with any listing change.
//! Two racing writers can therefore never both advance the same record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use uuid::Uuid;

use super::records::{Listing, Message, OutboxMail, Rating};
use crate::config::STORAGE_FORMAT_VERSION;
use crate::transaction::{ListingId, Transaction, TransactionId, UserId};

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("incompatible storage format: found v{found}, expected v{expected}")]
    IncompatibleFormat { found: u16, expected: u16 },
}

pub type DbResult<T> = Result<T, DbError>;

/// Outcome of a failed conditional commit.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The stored record no longer matches the snapshot the caller read.
    #[error("record changed since it was read")]
    Stale,

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Abort reasons raised from inside a sled transaction closure.
#[derive(Debug)]
enum CommitAbort {
    Stale,
    Missing(String),
    Codec(String),
}

impl From<TransactionError<CommitAbort>> for CommitError {
    fn from(err: TransactionError<CommitAbort>) -> Self {
        match err {
            TransactionError::Abort(CommitAbort::Stale) => CommitError::Stale,
            TransactionError::Abort(CommitAbort::Missing(what)) => {
                CommitError::Db(DbError::NotFound(what))
            }
            TransactionError::Abort(CommitAbort::Codec(msg)) => {
                CommitError::Db(DbError::Serialization(msg))
            }
            TransactionError::Storage(e) => CommitError::Db(DbError::Sled(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn abort_codec<T>(err: DbError) -> ConflictableTransactionResult<T, CommitAbort> {
    Err(ConflictableTransactionError::Abort(CommitAbort::Codec(err.to_string())))
}

fn listing_key(id: ListingId) -> [u8; 8] {
    id.to_be_bytes()
}

fn uuid_key(id: &Uuid) -> &[u8] {
    id.as_bytes()
}

/// Well-known key in the `metadata` tree for the record layout version.
const META_FORMAT_VERSION: &[u8] = b"format_version";

// ---------------------------------------------------------------------------
// MarketDB
// ---------------------------------------------------------------------------

/// Persistent storage engine for the marketplace.
///
/// Cheap to clone; sled handles are reference counted and thread-safe, so a
/// `MarketDB` can be shared through `Arc` without external locking.
#[derive(Debug, Clone)]
pub struct MarketDB {
    db: Db,
    listings: Tree,
    transactions: Tree,
    ratings: Tree,
    messages: Tree,
    outbox: Tree,
    metadata: Tree,
}

impl MarketDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    ///
    /// Intended for tests.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let store = Self {
            listings: db.open_tree("listings")?,
            transactions: db.open_tree("transactions")?,
            ratings: db.open_tree("ratings")?,
            messages: db.open_tree("messages")?,
            outbox: db.open_tree("outbox")?,
            metadata: db.open_tree("metadata")?,
            db,
        };
        store.check_format_version()?;
        Ok(store)
    }

    fn check_format_version(&self) -> DbResult<()> {
        match self.metadata.get(META_FORMAT_VERSION)? {
            Some(bytes) => {
                let found = u16::from_be_bytes(bytes.as_ref().try_into().map_err(|_| {
                    DbError::Serialization("invalid format version bytes".to_string())
                })?);
                if found != STORAGE_FORMAT_VERSION {
                    return Err(DbError::IncompatibleFormat {
                        found,
                        expected: STORAGE_FORMAT_VERSION,
                    });
                }
            }
            None => {
                self.metadata
                    .insert(META_FORMAT_VERSION, STORAGE_FORMAT_VERSION.to_be_bytes().to_vec())?;
            }
        }
        Ok(())
    }

    // -- Listing operations -------------------------------------------------

    /// Create a listing owned by `owner_id` with a store-assigned id.
    pub fn create_listing(&self, owner_id: UserId, title: String, price: u64) -> DbResult<Listing> {
        let listing = Listing {
            listing_id: self.db.generate_id()?,
            owner_id,
            title,
            price,
            is_available: true,
            created_at: chrono::Utc::now(),
        };
        self.put_listing(&listing)?;
        Ok(listing)
    }

    /// Persist a listing record as-is.
    pub fn put_listing(&self, listing: &Listing) -> DbResult<()> {
        self.listings
            .insert(listing_key(listing.listing_id), encode(listing)?)?;
        Ok(())
    }

    /// Retrieve a listing by id.
    pub fn get_listing(&self, id: ListingId) -> DbResult<Option<Listing>> {
        match self.listings.get(listing_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Clears a listing's availability inside an open sled transaction.
    ///
    /// The only writer of `is_available`. Returns `true` if the flag flipped,
    /// `false` if the listing was already unavailable.
    fn set_unavailable(
        listings: &TransactionalTree,
        id: ListingId,
    ) -> ConflictableTransactionResult<bool, CommitAbort> {
        let key = listing_key(id);
        let Some(bytes) = listings.get(key)? else {
            return Err(ConflictableTransactionError::Abort(CommitAbort::Missing(
                format!("listing {id}"),
            )));
        };
        let mut listing: Listing = match decode(&bytes) {
            Ok(l) => l,
            Err(e) => return abort_codec(e),
        };
        if !listing.is_available {
            return Ok(false);
        }
        listing.is_available = false;
        let encoded = match encode(&listing) {
            Ok(b) => b,
            Err(e) => return abort_codec(e),
        };
        listings.insert(&key[..], encoded)?;
        Ok(true)
    }

    // -- Transaction operations ---------------------------------------------

    /// Persist a newly initiated transaction.
    pub fn insert_transaction(&self, tx: &Transaction) -> DbResult<()> {
        self.transactions.insert(uuid_key(&tx.id), encode(tx)?)?;
        Ok(())
    }

    /// Retrieve a transaction by id.
    pub fn get_transaction(&self, id: &TransactionId) -> DbResult<Option<Transaction>> {
        match self.transactions.get(uuid_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored transactions, in key order.
    pub fn transactions(&self) -> DbResult<Vec<Transaction>> {
        self.transactions
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    /// Atomically replace `before` with `after`.
    ///
    /// When `release_listing` is set, the listing referenced by `after` is
    /// marked unavailable in the same unit of work. Returns whether the
    /// availability flag actually flipped.
    ///
    /// # Errors
    ///
    /// [`CommitError::Stale`] if the stored record differs from `before`.
    pub fn commit_transition(
        &self,
        before: &Transaction,
        after: &Transaction,
        release_listing: bool,
    ) -> Result<bool, CommitError> {
        let expected = encode(before)?;
        let replacement = encode(after)?;
        let key = uuid_key(&after.id).to_vec();
        let listing_id = after.listing_id;

        let flipped = (&self.transactions, &self.listings).transaction(|(txs, listings)| {
            match txs.get(&key[..])? {
                Some(current) if current.as_ref() == expected.as_slice() => {}
                _ => return Err(ConflictableTransactionError::Abort(CommitAbort::Stale)),
            }
            txs.insert(&key[..], replacement.clone())?;
            if release_listing {
                Self::set_unavailable(listings, listing_id)
            } else {
                Ok(false)
            }
        })?;
        Ok(flipped)
    }

    // -- Rating operations --------------------------------------------------

    /// Insert a rating, optionally flagging its transaction as rated.
    ///
    /// When `flag` carries `(before, after)`, the transaction write is
    /// conditional on the stored record still equalling `before`, and the
    /// rating is only inserted if that write happens.
    pub fn commit_rating(
        &self,
        rating: &Rating,
        flag: Option<(&Transaction, &Transaction)>,
    ) -> Result<(), CommitError> {
        let rating_bytes = encode(rating)?;
        let rating_key = uuid_key(&rating.rating_id).to_vec();
        let flag = match flag {
            Some((before, after)) => Some((
                uuid_key(&after.id).to_vec(),
                encode(before)?,
                encode(after)?,
            )),
            None => None,
        };

        (&self.transactions, &self.ratings).transaction(|(txs, ratings)| {
            if let Some((key, expected, replacement)) = &flag {
                match txs.get(&key[..])? {
                    Some(current) if current.as_ref() == expected.as_slice() => {}
                    _ => return Err(ConflictableTransactionError::Abort(CommitAbort::Stale)),
                }
                txs.insert(&key[..], replacement.clone())?;
            }
            ratings.insert(&rating_key[..], rating_bytes.clone())?;
            Ok(())
        })?;
        Ok(())
    }

    /// Ratings received by `ratee`, in key order.
    pub fn ratings_for(&self, ratee: UserId) -> DbResult<Vec<Rating>> {
        let mut out = Vec::new();
        for value in self.ratings.iter().values() {
            let rating: Rating = decode(&value?)?;
            if rating.ratee_id == ratee {
                out.push(rating);
            }
        }
        Ok(out)
    }

    // -- Message operations -------------------------------------------------

    /// Persist a chat message.
    pub fn put_message(&self, message: &Message) -> DbResult<()> {
        self.messages
            .insert(uuid_key(&message.message_id), encode(message)?)?;
        Ok(())
    }

    /// Messages addressed to `recipient`, in key order.
    pub fn messages_for(&self, recipient: UserId) -> DbResult<Vec<Message>> {
        let mut out = Vec::new();
        for value in self.messages.iter().values() {
            let message: Message = decode(&value?)?;
            if message.recipient_id == recipient {
                out.push(message);
            }
        }
        Ok(out)
    }

    // -- Outbox operations --------------------------------------------------

    /// Queue a notification mail for delivery.
    pub fn enqueue_mail(&self, mail: &OutboxMail) -> DbResult<()> {
        self.outbox.insert(uuid_key(&mail.mail_id), encode(mail)?)?;
        Ok(())
    }

    /// All mails waiting in the outbox.
    pub fn pending_mail(&self) -> DbResult<Vec<OutboxMail>> {
        self.outbox
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    /// Remove a delivered mail from the outbox. Returns whether it existed.
    pub fn ack_mail(&self, mail_id: &Uuid) -> DbResult<bool> {
        Ok(self.outbox.remove(uuid_key(mail_id))?.is_some())
    }

    // -- Utility operations -------------------------------------------------

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn rating_count(&self) -> usize {
        self.ratings.len()
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
