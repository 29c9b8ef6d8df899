//! Inbound messages and read marking for [`SendPipeline`].
//!
//! Remote messages never pass through the delivery lifecycle: they are stored
//! as `Delivered` (not yet seen by the local user) or `Read`, and the only
//! move left to them is `Delivered -> Read` when the conversation is opened.

use haatchat_proto::message::{
    AttachmentPayload, ConversationId, MessageId, MessageStatus, Payload, Sender,
};

use crate::transport::Transport;

use super::SendPipeline;
use super::store::{NewMessage, StoreError};

/// A message arriving from the remote party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Content as received.
    pub payload: Payload,
    /// `Delivered` (unread) or `Read`.
    pub status: MessageStatus,
}

impl InboundMessage {
    /// An unread text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            status: MessageStatus::Delivered,
        }
    }

    /// An unread image message.
    pub fn image(uri: impl Into<String>) -> Self {
        Self {
            payload: Payload::Image(AttachmentPayload::new(uri)),
            status: MessageStatus::Delivered,
        }
    }

    /// Marks the message as already seen.
    #[must_use]
    pub const fn read(mut self) -> Self {
        self.status = MessageStatus::Read;
        self
    }
}

impl<T: Transport> SendPipeline<T> {
    /// Appends a remote message to `conversation`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`], [`StoreError::InvalidInitialStatus`]
    /// for a status other than `Delivered`/`Read`, or
    /// [`StoreError::Reentrant`].
    pub fn receive_inbound(
        &self,
        conversation: &ConversationId,
        inbound: InboundMessage,
    ) -> Result<MessageId, StoreError> {
        let sequence = self
            .store
            .append(conversation, NewMessage::remote(inbound.payload, inbound.status))?;
        let message_id = MessageId::from_sequence(sequence);
        tracing::info!(
            conversation = %conversation,
            message_id = %message_id,
            "inbound message stored"
        );
        Ok(message_id)
    }

    /// Marks every unread remote message in `conversation` as `Read`.
    ///
    /// Returns how many messages changed.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`] or [`StoreError::Reentrant`].
    pub fn mark_read(&self, conversation: &ConversationId) -> Result<usize, StoreError> {
        let unread: Vec<MessageId> = self
            .store
            .list(conversation)?
            .iter()
            .filter(|m| m.sender == Sender::Remote && m.status == MessageStatus::Delivered)
            .map(|m| m.id)
            .collect();

        let mut changed = 0;
        for id in unread {
            if self.store.update_status_if(
                conversation,
                id,
                &[MessageStatus::Delivered],
                MessageStatus::Read,
            )? {
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::debug!(conversation = %conversation, changed, "marked messages read");
        }
        Ok(changed)
    }
}
