//! Presentation helpers and command parsing for the line-oriented client.
//!
//! Nothing here touches the store; views build [`DisplayMessage`]s from
//! snapshots and turn user input into [`Command`]s.

use std::fmt::Write as _;

use chrono::{DateTime, TimeZone, Utc};

use haatchat_proto::message::{Message, MessageId, MessageStatus, Payload, Sender, Timestamp};

use crate::chat::ChatEvent;
use crate::inbox::{ConversationSummary, InboxFilter, InboxQuery};

/// Default timestamp format, e.g. "09:41 AM".
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%I:%M %p";

/// Label used for the local user's messages.
pub const LOCAL_SENDER_LABEL: &str = "You";

/// Returns the delivery glyph for `status`.
#[must_use]
pub const fn status_symbol(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Queued => "\u{22ef}",
        MessageStatus::Sent => "\u{2713}",
        MessageStatus::Delivered => "\u{2713}\u{2713}",
        MessageStatus::Read => "\u{2714}\u{2714}",
        MessageStatus::Failed => "\u{2717}",
    }
}

/// Formats `ts` in `tz` with a chrono format string.
///
/// Falls back to [`DEFAULT_TIMESTAMP_FORMAT`] when `fmt` is not a valid
/// format, and to `"--:--"` when the timestamp is out of range.
#[must_use]
pub fn format_timestamp<Tz>(ts: Timestamp, fmt: &str, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let Some(utc) = i64::try_from(ts.as_millis())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
    else {
        return "--:--".to_string();
    };
    let local = utc.with_timezone(tz);

    let mut out = String::new();
    if write!(out, "{}", local.format(fmt)).is_ok() {
        return out;
    }
    tracing::debug!(format = fmt, "invalid timestamp format, using default");
    local.format(DEFAULT_TIMESTAMP_FORMAT).to_string()
}

/// A message prepared for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    /// Message id, shown so the user can `/retry` it.
    pub id: MessageId,
    /// "You" or the peer's name.
    pub sender: String,
    /// Text, or the image reference.
    pub content: String,
    /// Formatted creation time.
    pub timestamp: String,
    /// Delivery status.
    pub status: MessageStatus,
    /// Whether the local user wrote it.
    pub is_local: bool,
    /// Whether the message is an image.
    pub is_image: bool,
}

impl DisplayMessage {
    /// Builds the display form of `message`.
    #[must_use]
    pub fn from_message<Tz>(message: &Message, peer_label: &str, fmt: &str, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let (content, is_image) = match &message.payload {
            Payload::Text(text) => (text.clone(), false),
            Payload::Image(attachment) => (attachment.uri().to_string(), true),
        };
        let is_local = message.sender == Sender::Local;
        Self {
            id: message.id,
            sender: if is_local {
                LOCAL_SENDER_LABEL.to_string()
            } else {
                peer_label.to_string()
            },
            content,
            timestamp: format_timestamp(message.created_at, fmt, tz),
            status: message.status,
            is_local,
            is_image,
        }
    }

    /// One-line rendering. Only local messages carry a status glyph.
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = format!("[{}] {} {}: ", self.timestamp, self.id, self.sender);
        if self.is_image {
            line.push_str("\u{1f4f7} ");
        }
        line.push_str(&self.content);
        if self.is_local {
            line.push(' ');
            line.push_str(status_symbol(self.status));
            if self.status == MessageStatus::Failed {
                let _ = write!(line, " (/retry {})", self.id);
            }
        }
        line
    }
}

/// Describes a store notification for the event feed, if it is worth showing.
#[must_use]
pub fn describe_event(event: &ChatEvent, peer_label: &str) -> Option<String> {
    match event {
        ChatEvent::MessageAppended { .. } => None,
        ChatEvent::StatusChanged {
            message_id, to, ..
        } => Some(format!("{message_id} {} {to}", status_symbol(*to))),
        ChatEvent::TypingChanged { typing: true, .. } => Some(format!("{peer_label} is typing...")),
        ChatEvent::TypingChanged { typing: false, .. } => None,
    }
}

/// Renders one chat-list row.
#[must_use]
pub fn render_summary(summary: &ConversationSummary) -> String {
    let mut line = format!("{} ({})", summary.peer_label, summary.subject_label);
    if summary.unread_count > 0 {
        let _ = write!(line, " [{}]", summary.unread_count);
    }
    if summary.typing {
        line.push_str(" typing...");
    } else if let Some(preview) = &summary.last_message_preview {
        let _ = write!(line, ": {preview}");
    }
    line
}

/// A line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send plain text.
    Text(String),
    /// Send an image picked at this URI.
    Image(String),
    /// Simulate the user dismissing the picker.
    ImageCancel,
    /// Send the quick reply at this zero-based index.
    Quick(usize),
    /// Retry a failed message.
    Retry(MessageId),
    /// Mark the peer's messages as read.
    Read,
    /// Print the conversation.
    List,
    /// Print the chat list.
    Inbox(InboxQuery),
    /// Print the conversation as JSON.
    Dump,
    /// Print the command list.
    Help,
    /// Leave.
    Quit,
}

/// Errors from [`Command::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The slash command does not exist.
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),

    /// The command needs an argument.
    #[error("/{command} needs {what}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// What is missing.
        what: &'static str,
    },

    /// The argument could not be parsed.
    #[error("/{command}: invalid argument {value:?}")]
    InvalidArgument {
        /// Command name.
        command: &'static str,
        /// The offending value.
        value: String,
    },
}

impl Command {
    /// Parses one input line. Anything not starting with `/` is text.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] for unknown commands or bad arguments.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let Some(rest) = line.trim_start().strip_prefix('/') else {
            return Ok(Self::Text(line.to_string()));
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match name {
            "image" => {
                if arg.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "image",
                        what: "a URI",
                    });
                }
                Ok(Self::Image(arg.to_string()))
            }
            "image-cancel" => Ok(Self::ImageCancel),
            "quick" => {
                // Shown to the user as 1-based.
                let index = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .ok_or_else(|| CommandError::InvalidArgument {
                        command: "quick",
                        value: arg.to_string(),
                    })?;
                Ok(Self::Quick(index))
            }
            "retry" => {
                let id = arg.parse().map_err(|_| CommandError::InvalidArgument {
                    command: "retry",
                    value: arg.to_string(),
                })?;
                Ok(Self::Retry(id))
            }
            "read" => Ok(Self::Read),
            "list" => Ok(Self::List),
            "inbox" => Ok(Self::Inbox(parse_inbox_query(arg))),
            "dump" => Ok(Self::Dump),
            "help" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// `[filter] [search...]`; a first word that is not a filter name starts the
/// search.
fn parse_inbox_query(arg: &str) -> InboxQuery {
    let (first, rest) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
    match first.parse::<InboxFilter>() {
        Ok(filter) => InboxQuery {
            filter,
            search: rest.trim().to_string(),
        },
        Err(_) => InboxQuery {
            filter: InboxFilter::All,
            search: arg.to_string(),
        },
    }
}

/// Help text for the client.
pub const HELP: &str = "\
commands:
  <text>              send a message
  /image <uri>        send a picked image
  /image-cancel       open and dismiss the picker
  /quick <n>          send quick reply n
  /retry <id>         retry a failed message (e.g. /retry m3)
  /read               mark the peer's messages as read
  /list               show the conversation
  /inbox [filter] [q] show the chat list (all, buyers, sellers, unread)
  /dump               print the conversation as JSON
  /quit               leave";
