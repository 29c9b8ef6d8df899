//! Compose and delivery methods for [`SendPipeline`].
//!
//! `compose` is synchronous: it validates the draft, appends the message as
//! `Queued` and only then spawns the delivery task. The task calls the
//! transport and records `Sent` or `Failed`.

use std::sync::Arc;
use std::time::Duration;

use haatchat_proto::message::{ConversationId, MessageId, MessageStatus, Payload};

use crate::transport::{Transport, TransportError};

use super::store::{MessageStore, NewMessage};
use super::{Draft, RejectionReason, SendPipeline};

impl<T: Transport> SendPipeline<T> {
    /// Validates `draft`, stores it as a `Queued` local message and starts
    /// delivery in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`RejectionReason`] when the draft is empty or too large, the
    /// attachment is invalid, or the conversation is unknown. Nothing is
    /// stored in that case.
    pub fn compose(
        &self,
        conversation: &ConversationId,
        draft: Draft,
    ) -> Result<MessageId, RejectionReason> {
        let payload = match self.validate(draft) {
            Ok(payload) => payload,
            Err(RejectionReason::EmptyDraft) => {
                tracing::debug!(conversation = %conversation, "ignoring empty draft");
                return Err(RejectionReason::EmptyDraft);
            }
            Err(err) => {
                tracing::info!(conversation = %conversation, error = %err, "draft rejected");
                return Err(err);
            }
        };

        let sequence = self.store.append(conversation, NewMessage::local(payload))?;
        let message_id = MessageId::from_sequence(sequence);
        tracing::info!(
            conversation = %conversation,
            message_id = %message_id,
            "message queued"
        );

        self.spawn_delivery(conversation.clone(), message_id, 0);
        Ok(message_id)
    }

    /// Text of the configured quick reply at `index` (zero-based).
    ///
    /// A view with an editable composer puts this into the draft and lets
    /// the user send it.
    ///
    /// # Errors
    ///
    /// [`RejectionReason::UnknownQuickReply`] for an out-of-range index.
    pub fn quick_reply(&self, index: usize) -> Result<&str, RejectionReason> {
        self.config
            .quick_replies
            .get(index)
            .map(String::as_str)
            .ok_or(RejectionReason::UnknownQuickReply { index })
    }

    /// Composes the quick reply at `index` straight away, skipping the
    /// draft step.
    ///
    /// # Errors
    ///
    /// [`RejectionReason::UnknownQuickReply`] for an out-of-range index, plus
    /// everything [`compose`](Self::compose) can return.
    pub fn compose_quick_reply(
        &self,
        conversation: &ConversationId,
        index: usize,
    ) -> Result<MessageId, RejectionReason> {
        let reply = self.quick_reply(index)?.to_owned();
        self.compose(conversation, Draft::Text(reply))
    }

    fn validate(&self, draft: Draft) -> Result<Payload, RejectionReason> {
        match draft {
            Draft::Text(text) => {
                if text.trim().is_empty() {
                    return Err(RejectionReason::EmptyDraft);
                }
                let max = self.config.max_message_size;
                if text.len() > max {
                    return Err(RejectionReason::TooLarge {
                        size: text.len(),
                        max,
                    });
                }
                Ok(Payload::Text(text))
            }
            Draft::Image(response) => Ok(Payload::Image(self.resolver.resolve(response)?)),
        }
    }

    /// Starts delivery attempt `attempt`, the message's `retry_count` at the
    /// time it was queued.
    pub(crate) fn spawn_delivery(
        &self,
        conversation: ConversationId,
        message_id: MessageId,
        attempt: u32,
    ) {
        let handle = tokio::spawn(deliver_once(
            self.store.clone(),
            Arc::clone(&self.transport),
            Attempt {
                conversation,
                message_id,
                number: attempt,
            },
            self.config.retry.delivery_timeout,
        ));
        self.track(handle);
    }
}

/// Identifies one delivery attempt of one message.
struct Attempt {
    conversation: ConversationId,
    message_id: MessageId,
    number: u32,
}

/// One delivery attempt for a stored message.
///
/// The outcome is recorded only while the message is still on this attempt;
/// a late result from a superseded attempt is dropped.
async fn deliver_once<T: Transport>(
    store: MessageStore,
    transport: Arc<T>,
    attempt: Attempt,
    timeout: Duration,
) {
    let Attempt {
        conversation,
        message_id,
        number,
    } = attempt;
    let message = match store.get(&conversation, message_id) {
        Ok(message) if message.retry_count == number => message,
        Ok(_) => {
            tracing::debug!(message_id = %message_id, attempt = number, "attempt superseded before delivery");
            return;
        }
        Err(e) => {
            tracing::warn!(message_id = %message_id, error = %e, "message vanished before delivery");
            return;
        }
    };

    let outcome = tokio::time::timeout(timeout, transport.deliver(&message))
        .await
        .unwrap_or_else(|_| Err(TransportError::Timeout));

    match outcome {
        Ok(()) => {
            // A receipt may already have moved the message past Queued.
            match store.update_attempt_status(
                &conversation,
                message_id,
                number,
                &[MessageStatus::Queued],
                MessageStatus::Sent,
            ) {
                Ok(true) => tracing::debug!(message_id = %message_id, "message sent"),
                Ok(false) => {
                    tracing::debug!(message_id = %message_id, attempt = number, "send outcome not applied");
                }
                Err(e) => tracing::warn!(message_id = %message_id, error = %e, "could not mark sent"),
            }
        }
        Err(err) => {
            tracing::warn!(
                message_id = %message_id,
                attempt = number,
                error = %err,
                "delivery failed"
            );
            if let Err(e) = store.update_attempt_status(
                &conversation,
                message_id,
                number,
                &[MessageStatus::Queued, MessageStatus::Sent],
                MessageStatus::Failed,
            ) {
                tracing::warn!(message_id = %message_id, error = %e, "could not mark failed");
            }
        }
    }
}
