//! Retry policy for [`SendPipeline`].
//!
//! A failed message is retried only on an explicit user action. Each retry
//! reuses the message id, moves `Failed -> Queued` (incrementing
//! `retry_count`) and starts a fresh delivery attempt. Once `max_retries`
//! retries have been spent the message stays `Failed` for good.

use std::time::Duration;

use haatchat_proto::message::{ConversationId, MessageId, MessageStatus};

use crate::transport::Transport;

use super::{RetryError, SendPipeline};

/// Configuration for the retry budget and delivery timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of explicit retries allowed per message.
    pub max_retries: u32,
    /// How long a single delivery attempt may take before it counts as failed.
    pub delivery_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

impl<T: Transport> SendPipeline<T> {
    /// Re-submits a failed message under its original id.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`RetryError::NotFailed`] unless the message is `Failed`.
    /// - [`RetryError::RetriesExhausted`] once `max_retries` retries were used.
    /// - [`RetryError::Store`] if the conversation or message is unknown.
    pub fn retry(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
    ) -> Result<(), RetryError> {
        let message = self.store.get(conversation, message_id)?;
        if message.status != MessageStatus::Failed {
            return Err(RetryError::NotFailed {
                status: message.status,
            });
        }

        let max_retries = self.config.retry.max_retries;
        if message.retry_count >= max_retries {
            tracing::warn!(
                conversation = %conversation,
                message_id = %message_id,
                attempts = message.retry_count,
                "retry refused, budget exhausted"
            );
            return Err(RetryError::RetriesExhausted {
                attempts: message.retry_count,
            });
        }

        let Some(attempt) = self.store.requeue_failed(conversation, message_id)? else {
            // Another retry got there first.
            let status = self.store.get(conversation, message_id)?.status;
            return Err(RetryError::NotFailed { status });
        };

        tracing::info!(
            conversation = %conversation,
            message_id = %message_id,
            attempt,
            max_retries,
            "retrying delivery"
        );
        self.spawn_delivery(conversation.clone(), message_id, attempt);
        Ok(())
    }

    /// Retries left for a message, or `None` if it is not currently failed.
    ///
    /// Views use this to decide whether to show the retry affordance.
    #[must_use]
    pub fn retries_left(&self, conversation: &ConversationId, message_id: MessageId) -> Option<u32> {
        let message = self.store.get(conversation, message_id).ok()?;
        (message.status == MessageStatus::Failed)
            .then(|| self.config.retry.max_retries.saturating_sub(message.retry_count))
    }
}
