//! # Outbound Side Effects
//!
//! Best-effort collaborators the engine calls after a transition commits:
//! transactional mail ([`Notifier`]) and direct chat messages
//! ([`MessageSink`]). Both report success as a `bool`. A `false` is logged by
//! the caller and otherwise ignored; it never rolls back a transition.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::artifact::ArtifactRef;
use crate::storage::{DbResult, MarketDB, Message, OutboxMail};
use crate::transaction::UserId;

/// Delivers a transactional mail to a user.
pub trait Notifier: Send + Sync {
    /// Returns `true` if the mail was accepted for delivery.
    fn notify(
        &self,
        recipient_id: UserId,
        subject: &str,
        body: &str,
        attachments: &[ArtifactRef],
    ) -> bool;
}

/// Posts a chat message from one user to another.
pub trait MessageSink: Send + Sync {
    /// Returns `true` if the message was stored.
    fn post(&self, sender_id: UserId, recipient_id: UserId, content: &str) -> bool;
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Writes notifications to the log and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        recipient_id: UserId,
        subject: &str,
        _body: &str,
        attachments: &[ArtifactRef],
    ) -> bool {
        let attachments: Vec<&str> = attachments.iter().map(ArtifactRef::as_str).collect();
        tracing::info!(recipient_id, subject, ?attachments, "notification");
        true
    }
}

// ---------------------------------------------------------------------------
// OutboxNotifier
// ---------------------------------------------------------------------------

/// Queues notifications in the database outbox; [`OutboxNotifier::drain`]
/// hands them to the actual deliverer.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    db: Arc<MarketDB>,
}

impl OutboxNotifier {
    pub fn new(db: Arc<MarketDB>) -> Self {
        Self { db }
    }

    /// Hands queued mail to `deliverer`, oldest first, and removes each one
    /// it accepts. Refused mail stays queued for the next pass.
    ///
    /// Returns the number of mails delivered.
    pub fn drain(&self, deliverer: &dyn Notifier) -> DbResult<usize> {
        let mut pending = self.db.pending_mail()?;
        pending.sort_by_key(|mail| mail.queued_at);

        let mut delivered = 0;
        for mail in pending {
            if deliverer.notify(mail.recipient_id, &mail.subject, &mail.body, &mail.attachments) {
                self.db.ack_mail(&mail.mail_id)?;
                delivered += 1;
            } else {
                tracing::warn!(mail_id = %mail.mail_id, recipient_id = mail.recipient_id, "mail delivery refused, will retry");
            }
        }
        if delivered > 0 {
            tracing::debug!(delivered, "outbox drained");
        }
        Ok(delivered)
    }
}

impl Notifier for OutboxNotifier {
    fn notify(
        &self,
        recipient_id: UserId,
        subject: &str,
        body: &str,
        attachments: &[ArtifactRef],
    ) -> bool {
        let mail = OutboxMail {
            mail_id: Uuid::new_v4(),
            recipient_id,
            subject: subject.to_string(),
            body: body.to_string(),
            attachments: attachments.to_vec(),
            queued_at: Utc::now(),
        };
        match self.db.enqueue_mail(&mail) {
            Ok(()) => {
                tracing::debug!(mail_id = %mail.mail_id, recipient_id, "mail queued");
                true
            }
            Err(e) => {
                tracing::warn!(recipient_id, error = %e, "failed to queue mail");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

impl MessageSink for MarketDB {
    fn post(&self, sender_id: UserId, recipient_id: UserId, content: &str) -> bool {
        let message = Message {
            message_id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            content: content.to_string(),
            sent_at: Utc::now(),
            read: false,
        };
        match self.put_message(&message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(sender_id, recipient_id, error = %e, "failed to store message");
                false
            }
        }
    }
}
