//! Chat-list summaries.
//!
//! The inbox is a read-only projection of the [`MessageStore`]: one
//! [`ConversationSummary`] per conversation, optionally filtered by peer role
//! or unread state and narrowed by a search string.

use std::str::FromStr;

use haatchat_proto::message::{ConversationId, Message, Payload, Sender, Timestamp};

use crate::chat::conversation::{Conversation, PeerRole};
use crate::chat::store::MessageStore;

/// Preview shown for image messages.
pub const PHOTO_PREVIEW: &str = "📷 Photo";

/// Prefix marking previews of messages the local user wrote.
pub const LOCAL_PREVIEW_PREFIX: &str = "You: ";

/// Which conversations the inbox shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboxFilter {
    /// Every conversation.
    #[default]
    All,
    /// Conversations where the peer is buying.
    Buyers,
    /// Conversations where the peer is selling.
    Sellers,
    /// Conversations with unread remote messages.
    Unread,
}

impl InboxFilter {
    const fn matches(self, conversation: &Conversation, unread: usize) -> bool {
        match self {
            Self::All => true,
            Self::Buyers => matches!(conversation.peer_role(), PeerRole::Buyer),
            Self::Sellers => matches!(conversation.peer_role(), PeerRole::Seller),
            Self::Unread => unread > 0,
        }
    }
}

/// Error for an unrecognised filter name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown inbox filter {0:?} (expected all, buyers, sellers or unread)")]
pub struct ParseInboxFilterError(String);

impl FromStr for InboxFilter {
    type Err = ParseInboxFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "buyers" | "buyer" => Ok(Self::Buyers),
            "sellers" | "seller" => Ok(Self::Sellers),
            "unread" => Ok(Self::Unread),
            _ => Err(ParseInboxFilterError(s.to_string())),
        }
    }
}

impl std::fmt::Display for InboxFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Buyers => write!(f, "buyers"),
            Self::Sellers => write!(f, "sellers"),
            Self::Unread => write!(f, "unread"),
        }
    }
}

/// Filter plus free-text search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxQuery {
    /// Role or unread filter.
    pub filter: InboxFilter,
    /// Case-insensitive substring matched against peer and subject labels.
    /// Blank matches everything.
    pub search: String,
}

impl InboxQuery {
    fn matches_search(&self, conversation: &Conversation) -> bool {
        let needle = self.search.trim().to_lowercase();
        needle.is_empty()
            || conversation.peer_label().to_lowercase().contains(&needle)
            || conversation.subject_label().to_lowercase().contains(&needle)
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConversationSummary {
    /// The conversation.
    pub conversation_id: ConversationId,
    /// Counterparty display name.
    pub peer_label: String,
    /// Listing context.
    pub subject_label: String,
    /// Avatar reference, if any.
    pub peer_avatar: Option<String>,
    /// Whether the peer is buying or selling.
    pub peer_role: PeerRole,
    /// Short preview of the newest message.
    pub last_message_preview: Option<String>,
    /// Creation time of the newest message.
    pub last_activity: Option<Timestamp>,
    /// Remote messages not yet read.
    pub unread_count: usize,
    /// Whether the peer is shown as typing.
    pub typing: bool,
}

impl ConversationSummary {
    fn from_conversation(conversation: &Conversation) -> Self {
        let last = conversation.last_message();
        Self {
            conversation_id: conversation.id().clone(),
            peer_label: conversation.peer_label().to_string(),
            subject_label: conversation.subject_label().to_string(),
            peer_avatar: conversation.peer_avatar().map(str::to_string),
            peer_role: conversation.peer_role(),
            last_message_preview: last.map(preview),
            last_activity: last.map(|m| m.created_at),
            unread_count: conversation.unread_count(),
            typing: conversation.typing(),
        }
    }
}

/// Renders the one-line preview of a message.
#[must_use]
pub fn preview(message: &Message) -> String {
    let body = match &message.payload {
        Payload::Text(text) => text.as_str(),
        Payload::Image(_) => PHOTO_PREVIEW,
    };
    match message.sender {
        Sender::Local => format!("{LOCAL_PREVIEW_PREFIX}{body}"),
        Sender::Remote => body.to_string(),
    }
}

/// Builds the chat list for `query`, most recently active first.
///
/// Conversations without messages sort last, by peer label.
#[must_use]
pub fn summarize(store: &MessageStore, query: &InboxQuery) -> Vec<ConversationSummary> {
    let mut rows: Vec<ConversationSummary> = store
        .conversations()
        .iter()
        .filter(|c| query.filter.matches(c, c.unread_count()) && query.matches_search(c))
        .map(ConversationSummary::from_conversation)
        .collect();

    rows.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.peer_label.cmp(&b.peer_label))
    });
    rows
}
