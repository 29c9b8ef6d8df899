//! Conversation message types and the delivery status lifecycle.
//!
//! Every type here is plain data: the store and pipeline in the `haatchat`
//! crate own the mutation rules, while [`MessageStatus::can_transition_to`]
//! is the single source of truth for which status changes are legal.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed text payload size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Position of a message within its conversation.
///
/// Sequences start at 1 and grow by exactly one per appended message, so
/// they double as the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// The sequence assigned to the first message of a conversation.
    pub const FIRST: Self = Self(1);

    /// Creates a sequence from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the sequence that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message, unique within its conversation.
///
/// Assigned at enqueue time from the message's [`Sequence`] and rendered as
/// `m<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    /// Derives the identifier for the message stored at `sequence`.
    #[must_use]
    pub const fn from_sequence(sequence: Sequence) -> Self {
        Self(sequence.get())
    }

    /// Returns the sequence this identifier was derived from.
    #[must_use]
    pub const fn sequence(self) -> Sequence {
        Sequence(self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Error returned when a string is not a valid `m<n>` message identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message id {0:?} (expected m<number>)")]
pub struct ParseMessageIdError(String);

impl FromStr for MessageId {
    type Err = ParseMessageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('m').unwrap_or(s);
        match digits.parse::<u64>() {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(ParseMessageIdError(s.to_string())),
        }
    }
}

/// Identifies a conversation (one buyer/seller thread about a listing).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new conversation identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ConversationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of the signed-in user, handed over by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalUserId(String);

impl LocalUserId {
    /// Wraps an opaque session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns `self`, or one millisecond past `previous` when the wall clock
    /// has not moved beyond it.
    ///
    /// Used to keep `created_at` strictly increasing within a conversation
    /// even when two messages land in the same millisecond or the clock
    /// steps backwards.
    #[must_use]
    pub const fn monotonic_after(self, previous: Option<Self>) -> Self {
        match previous {
            Some(prev) if self.0 <= prev.0 => Self(prev.0.saturating_add(1)),
            _ => self,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Which side of the conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    /// The signed-in user of this device.
    Local,
    /// The counterparty (buyer or seller).
    Remote,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// The kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// A photo picked from the device's media library.
    Image,
}

/// A validated reference to a picked image.
///
/// Produced by the attachment resolver; the core never dereferences it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentPayload(String);

impl AttachmentPayload {
    /// Wraps an already validated media URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Returns the media URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.0
    }
}

/// Message content. Exactly one of text or attachment, by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Text content.
    Text(String),
    /// Image attachment.
    Image(AttachmentPayload),
}

impl Payload {
    /// Returns the kind of content this payload carries.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Image(_) => MessageKind::Image,
        }
    }

    /// Returns the text, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Image(_) => None,
        }
    }

    /// Returns the attachment, if this is an image payload.
    #[must_use]
    pub const fn as_attachment(&self) -> Option<&AttachmentPayload> {
        match self {
            Self::Text(_) => None,
            Self::Image(attachment) => Some(attachment),
        }
    }
}

/// Delivery lifecycle of a message.
///
/// ```text
/// Queued ──► Sent ──► Delivered ──► Read
///   │          │
///   └────┬─────┘
///        ▼
///      Failed ──(retry)──► Queued
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Accepted locally, delivery not yet confirmed by the transport.
    Queued,
    /// Handed to the transport.
    Sent,
    /// Acknowledged by the remote device.
    Delivered,
    /// Seen by the remote party.
    Read,
    /// Delivery failed; only an explicit retry moves it again.
    Failed,
}

impl MessageStatus {
    /// All five states, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Queued,
        Self::Sent,
        Self::Delivered,
        Self::Read,
        Self::Failed,
    ];

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// Same-state, backward and skipped-forward moves are all illegal.
    /// `Failed -> Queued` is the retry path and is legal here; callers that
    /// expose it must enforce their own retry budget.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Sent)
                | (Self::Sent, Self::Delivered)
                | (Self::Delivered, Self::Read)
                | (Self::Queued | Self::Sent, Self::Failed)
                | (Self::Failed, Self::Queued)
        )
    }

    /// The next state along the success path, if any.
    #[must_use]
    pub const fn next_forward(self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Sent),
            Self::Sent => Some(Self::Delivered),
            Self::Delivered => Some(Self::Read),
            Self::Read | Self::Failed => None,
        }
    }

    /// Position along the success path (`Failed` has none).
    #[must_use]
    pub const fn progress(self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Returns `true` for the statuses a remote message may be stored with.
    #[must_use]
    pub const fn is_remote_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Read)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A message stored in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the conversation.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author side.
    pub sender: Sender,
    /// Text or attachment content.
    pub payload: Payload,
    /// Logical creation time, strictly increasing within the conversation.
    pub created_at: Timestamp,
    /// Storage and display position.
    pub sequence: Sequence,
    /// Current delivery status.
    pub status: MessageStatus,
    /// Number of explicit retries performed so far.
    pub retry_count: u32,
}

impl Message {
    /// Returns the kind of content this message carries.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Returns `true` if the local user authored this message.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.sender == Sender::Local
    }
}

/// Acknowledgement reported by the transport for a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Conversation of the acknowledged message.
    pub conversation_id: ConversationId,
    /// The acknowledged message.
    pub message_id: MessageId,
    /// What the remote side reports.
    pub kind: ReceiptKind,
}

/// What a [`Receipt`] reports about a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    /// The remote device stored the message.
    Delivered,
    /// The remote party opened the conversation.
    Read,
    /// The remote side refused the message after accepting it for sending.
    Rejected(String),
}

impl ReceiptKind {
    /// The status this receipt asks the message to reach.
    #[must_use]
    pub const fn target_status(&self) -> MessageStatus {
        match self {
            Self::Delivered => MessageStatus::Delivered,
            Self::Read => MessageStatus::Read,
            Self::Rejected(_) => MessageStatus::Failed,
        }
    }
}

/// Top-level envelope for everything crossing the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// A message being delivered to the remote party.
    Message(Message),
    /// An acknowledgement travelling back.
    Receipt(Receipt),
}
