//! Conversation messaging core.
//!
//! Contains the [`SendPipeline`], which turns drafts into messages
//! (validate -> resolve attachment -> append `Queued` -> deliver), applies
//! delivery receipts and drives the retry policy. Conversation state itself
//! lives in the [`store::MessageStore`].

pub mod attachment;
pub mod conversation;
pub mod inbound;
pub mod receipts;
pub mod retry;
pub mod send;
pub mod store;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use haatchat_proto::message::{
    ConversationId, MAX_MESSAGE_SIZE, Message, MessageId, MessageStatus,
};

use crate::transport::Transport;

use attachment::{AttachmentError, AttachmentResolver, PickerResponse};
use retry::RetryConfig;
use store::{MessageStore, StoreError};

/// Quick replies offered under the composer by default.
pub const DEFAULT_QUICK_REPLIES: [&str; 2] = ["Still available?", "Final price?"];

/// Why a draft was refused. No message is created for any of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    /// Text draft is empty after trimming. Silent for the user.
    #[error("draft is empty")]
    EmptyDraft,

    /// Text draft exceeds the configured size limit.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Size of the draft in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// The picked image could not be used.
    #[error("attachment invalid: {0}")]
    AttachmentInvalid(#[from] AttachmentError),

    /// No quick reply at this position.
    #[error("no quick reply at position {index}")]
    UnknownQuickReply {
        /// Requested zero-based index.
        index: usize,
    },

    /// The target conversation was never opened.
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// The store refused the append.
    #[error("store rejected draft: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RejectionReason {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownConversation(id) => Self::UnknownConversation(id),
            other => Self::Store(other),
        }
    }
}

/// Errors from [`SendPipeline::retry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The retry budget is spent; the message stays `Failed` for good.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Retries already performed.
        attempts: u32,
    },

    /// Only `Failed` messages can be retried.
    #[error("message is {status}, only failed messages can be retried")]
    NotFailed {
        /// The message's current status.
        status: MessageStatus,
    },

    /// Lookup or transition failed in the store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// User-composed content that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    /// A text message.
    Text(String),
    /// An image, as returned by the media picker.
    Image(PickerResponse),
}

impl Draft {
    /// Shorthand for a text draft.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Notifications emitted by the [`MessageStore`] to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was appended (local compose or inbound).
    MessageAppended {
        /// Owning conversation.
        conversation: ConversationId,
        /// The stored message.
        message: Message,
    },
    /// A message's delivery status changed.
    StatusChanged {
        /// Owning conversation.
        conversation: ConversationId,
        /// The message whose status changed.
        message_id: MessageId,
        /// Previous status.
        from: MessageStatus,
        /// New status.
        to: MessageStatus,
        /// Retry count after the change.
        retry_count: u32,
    },
    /// The remote typing indicator flipped.
    TypingChanged {
        /// Owning conversation.
        conversation: ConversationId,
        /// Whether the peer is now shown as typing.
        typing: bool,
        /// Typing version after the flip.
        version: u64,
    },
}

impl ChatEvent {
    /// The conversation this event belongs to.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationId {
        match self {
            Self::MessageAppended { conversation, .. }
            | Self::StatusChanged { conversation, .. }
            | Self::TypingChanged { conversation, .. } => conversation,
        }
    }
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Retry budget and delivery timeout.
    pub retry: RetryConfig,
    /// Maximum text size in bytes.
    pub max_message_size: usize,
    /// Canned replies available through
    /// [`compose_quick_reply`](SendPipeline::compose_quick_reply).
    pub quick_replies: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_message_size: MAX_MESSAGE_SIZE,
            quick_replies: DEFAULT_QUICK_REPLIES.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Composes drafts into messages and drives them through delivery.
///
/// Sequence numbers are assigned synchronously inside
/// [`compose`](Self::compose), before any delivery work starts, so display
/// order always matches composition order. Each delivery then runs as its own
/// Tokio task and may finish in any order.
pub struct SendPipeline<T: Transport> {
    /// Owner of all conversation state.
    store: MessageStore,
    /// Delivery backend, shared with spawned delivery tasks.
    transport: Arc<T>,
    /// Validates image drafts.
    resolver: AttachmentResolver,
    /// Retry, size and quick-reply settings.
    config: PipelineConfig,
    /// Delivery tasks that may still be running.
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> SendPipeline<T> {
    /// Creates a pipeline writing to `store` and delivering through
    /// `transport`.
    pub fn new(
        store: MessageStore,
        transport: T,
        resolver: AttachmentResolver,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            transport: Arc::new(transport),
            resolver,
            config,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// The store this pipeline writes to.
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// The transport this pipeline delivers through.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Waits until every delivery task started so far has finished,
    /// including ones started by retries while waiting.
    pub async fn flush(&self) {
        loop {
            let pending = std::mem::take(&mut *self.deliveries.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "delivery task panicked");
                }
            }
        }
    }

    /// Aborts every in-flight delivery. Affected messages keep their current
    /// status.
    pub fn shutdown(&self) {
        let pending = std::mem::take(&mut *self.deliveries.lock());
        let count = pending.len();
        for handle in pending {
            handle.abort();
        }
        if count > 0 {
            tracing::info!(count, "aborted in-flight deliveries");
        }
    }

    /// Number of delivery tasks that have not finished yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut deliveries = self.deliveries.lock();
        deliveries.retain(|h| !h.is_finished());
        deliveries.push(handle);
    }
}

impl<T: Transport> Drop for SendPipeline<T> {
    fn drop(&mut self) {
        for handle in self.deliveries.get_mut().drain(..) {
            handle.abort();
        }
    }
}
