//! # Rating Gate
//!
//! Records scores users give each other. A rating may stand alone, or it may
//! reference a transaction; in the latter case the two parties must be that
//! transaction's buyer and seller, the purchase must be delivered, and each
//! transaction can be rated once. The rating and the transaction's `rated`
//! flag commit together.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use wardrobe_core::config::{MAX_RATING_SCORE, MIN_RATING_SCORE};
use wardrobe_core::identity::Session;
use wardrobe_core::storage::{MarketDB, Rating};
use wardrobe_core::transaction::{Role, TransactionId, TransactionState, UserId};

use crate::authz::ensure_live;
use crate::error::{EngineError, EngineResult};

/// Ratings a user has received, with their mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub user_id: UserId,
    pub ratings: Vec<Rating>,
    pub average: Option<f64>,
}

/// Guards rating creation.
#[derive(Debug, Clone)]
pub struct RatingGate {
    db: Arc<MarketDB>,
}

impl RatingGate {
    pub fn new(db: Arc<MarketDB>) -> Self {
        Self { db }
    }

    /// Records a rating from the session's user to `ratee_id`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidArgument`] if `score` is outside
    ///   `MIN_RATING_SCORE..=MAX_RATING_SCORE` or the caller rates
    ///   themselves. Nothing is persisted.
    /// - [`EngineError::NotFound`] if the referenced transaction is unknown
    ///   or not visible to the caller.
    /// - [`EngineError::Forbidden`] if the two parties are not that
    ///   transaction's buyer and seller, or it is not delivered yet.
    /// - [`EngineError::Conflict`] if the transaction was already rated.
    pub fn record_rating(
        &self,
        session: &Session,
        ratee_id: UserId,
        score: i64,
        transaction_id: Option<TransactionId>,
    ) -> EngineResult<Rating> {
        ensure_live(session, Utc::now())?;
        let score = u8::try_from(score)
            .ok()
            .filter(|s| (MIN_RATING_SCORE..=MAX_RATING_SCORE).contains(s))
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "score must be between {MIN_RATING_SCORE} and {MAX_RATING_SCORE}, got {score}"
                ))
            })?;
        let rater_id = session.user_id;
        if rater_id == ratee_id {
            return Err(EngineError::InvalidArgument("cannot rate yourself".into()));
        }

        let rating = Rating {
            rating_id: Uuid::new_v4(),
            rater_id,
            ratee_id,
            score,
            transaction_id,
            created_at: Utc::now(),
        };

        match transaction_id {
            None => self.db.commit_rating(&rating, None)?,
            Some(id) => {
                let tx = self
                    .db
                    .get_transaction(&id)?
                    .ok_or_else(EngineError::transaction_not_found)?;
                let listing = self
                    .db
                    .get_listing(tx.listing_id)?
                    .ok_or_else(EngineError::transaction_not_found)?;
                let role = tx
                    .role_of(rater_id, listing.owner_id)
                    .ok_or_else(EngineError::transaction_not_found)?;

                let counterpart = match role {
                    Role::Buyer => listing.owner_id,
                    Role::Seller => tx.buyer_id,
                };
                if ratee_id != counterpart {
                    return Err(EngineError::Forbidden(
                        "ratee is not the other party of this transaction".into(),
                    ));
                }
                if tx.state != TransactionState::Delivered {
                    return Err(EngineError::Forbidden(format!(
                        "transaction is {}, ratings open after delivery",
                        tx.state
                    )));
                }

                let mut flagged = tx.clone();
                if !flagged.mark_rated() {
                    return Err(EngineError::Conflict("transaction already rated".into()));
                }
                self.db.commit_rating(&rating, Some((&tx, &flagged)))?;
            }
        }

        info!(
            rating_id = %rating.rating_id,
            rater_id,
            ratee_id,
            score,
            "rating recorded"
        );
        Ok(rating)
    }

    /// Ratings received by `user`, newest first.
    pub fn ratings_for(&self, user: UserId) -> EngineResult<Vec<Rating>> {
        let mut ratings = self.db.ratings_for(user)?;
        ratings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ratings)
    }

    /// Mean score received by `user`, or `None` without ratings.
    pub fn average_score(&self, user: UserId) -> EngineResult<Option<f64>> {
        Ok(mean(&self.db.ratings_for(user)?))
    }

    /// Ratings and mean in one read.
    pub fn summary(&self, user: UserId) -> EngineResult<RatingSummary> {
        let ratings = self.ratings_for(user)?;
        Ok(RatingSummary {
            user_id: user,
            average: mean(&ratings),
            ratings,
        })
    }
}

fn mean(ratings: &[Rating]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let total: u32 = ratings.iter().map(|r| u32::from(r.score)).sum();
    Some(f64::from(total) / ratings.len() as f64)
}
