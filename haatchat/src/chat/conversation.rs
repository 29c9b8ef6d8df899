//! The per-conversation message log and presence flag.
//!
//! A [`Conversation`] is only ever mutated by the
//! [`MessageStore`](super::store::MessageStore) that owns it; everything
//! handed out to callers is a snapshot clone.

use haatchat_proto::message::{
    ConversationId, LocalUserId, Message, MessageId, MessageStatus, Payload, Sender, Sequence,
    Timestamp,
};

/// The counterparty's role relative to the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum PeerRole {
    /// The peer wants to buy the local user's listing.
    #[default]
    Buyer,
    /// The peer is selling the listing the local user asked about.
    Seller,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buyer => write!(f, "buyer"),
            Self::Seller => write!(f, "seller"),
        }
    }
}

/// Read-only initialization data supplied when a conversation is opened.
#[derive(Debug, Clone)]
pub struct ConversationParams {
    /// Counterparty display name (e.g. "John Doe").
    pub peer_label: String,
    /// Listing context (e.g. "Goat - Jamunapari").
    pub subject_label: String,
    /// Opaque avatar/listing photo reference.
    pub peer_avatar: Option<String>,
    /// Opaque identity of the signed-in user.
    pub local_user: LocalUserId,
    /// Whether the peer is buying or selling.
    pub peer_role: PeerRole,
}

impl ConversationParams {
    /// Creates open parameters with no avatar and the default role.
    pub fn new(
        peer_label: impl Into<String>,
        subject_label: impl Into<String>,
        local_user: LocalUserId,
    ) -> Self {
        Self {
            peer_label: peer_label.into(),
            subject_label: subject_label.into(),
            peer_avatar: None,
            local_user,
            peer_role: PeerRole::default(),
        }
    }

    /// Sets the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.peer_avatar = Some(avatar.into());
        self
    }

    /// Sets the peer's role.
    #[must_use]
    pub const fn with_role(mut self, role: PeerRole) -> Self {
        self.peer_role = role;
        self
    }
}

/// One buyer/seller thread: its ordered message log and typing flag.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: ConversationId,
    params: ConversationParams,
    /// Ordered by sequence; index `i` holds sequence `i + 1`.
    messages: Vec<Message>,
    typing: bool,
    typing_version: u64,
}

impl Conversation {
    pub(crate) const fn new(id: ConversationId, params: ConversationParams) -> Self {
        Self {
            id,
            params,
            messages: Vec::new(),
            typing: false,
            typing_version: 0,
        }
    }

    /// The conversation identifier.
    #[must_use]
    pub const fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Counterparty display name.
    #[must_use]
    pub fn peer_label(&self) -> &str {
        &self.params.peer_label
    }

    /// Listing context.
    #[must_use]
    pub fn subject_label(&self) -> &str {
        &self.params.subject_label
    }

    /// Avatar reference, if one was supplied.
    #[must_use]
    pub fn peer_avatar(&self) -> Option<&str> {
        self.params.peer_avatar.as_deref()
    }

    /// Identity of the signed-in user this conversation was opened for.
    #[must_use]
    pub const fn local_user(&self) -> &LocalUserId {
        &self.params.local_user
    }

    /// The peer's role.
    #[must_use]
    pub const fn peer_role(&self) -> PeerRole {
        self.params.peer_role
    }

    /// Messages in sequence order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no message has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the remote party is shown as typing.
    #[must_use]
    pub const fn typing(&self) -> bool {
        self.typing
    }

    /// Incremented on every typing toggle.
    #[must_use]
    pub const fn typing_version(&self) -> u64 {
        self.typing_version
    }

    /// The most recent message.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Remote messages the local user has not read yet.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender == Sender::Remote && m.status != MessageStatus::Read)
            .count()
    }

    /// Looks up a message by id.
    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.index_of(id).map(|i| &self.messages[i])
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.index_of(id).map(|i| &mut self.messages[i])
    }

    pub(crate) fn message_at(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Assigns the next sequence, id and logical timestamp, then appends.
    pub(crate) fn push(
        &mut self,
        sender: Sender,
        payload: Payload,
        status: MessageStatus,
        now: Timestamp,
    ) -> &Message {
        let sequence = self
            .messages
            .last()
            .map_or(Sequence::FIRST, |m| m.sequence.next());
        let created_at = now.monotonic_after(self.messages.last().map(|m| m.created_at));
        self.messages.push(Message {
            id: MessageId::from_sequence(sequence),
            conversation_id: self.id.clone(),
            sender,
            payload,
            created_at,
            sequence,
            status,
            retry_count: 0,
        });
        &self.messages[self.messages.len() - 1]
    }

    /// Flips `typing` if `expected_version` is still current.
    ///
    /// Returns the new `(typing, version)` pair, or `None` when the caller's
    /// view of the version is stale.
    pub(crate) fn toggle_typing(&mut self, expected_version: u64) -> Option<(bool, u64)> {
        if self.typing_version != expected_version {
            return None;
        }
        self.typing = !self.typing;
        self.typing_version += 1;
        Some((self.typing, self.typing_version))
    }

    fn index_of(&self, id: MessageId) -> Option<usize> {
        let index = usize::try_from(id.sequence().get().checked_sub(1)?).ok()?;
        self.messages
            .get(index)
            .filter(|m| m.id == id)
            .map(|_| index)
    }
}
