//! The single writer of conversation state.
//!
//! [`MessageStore`] owns every [`Conversation`] and is the only place their
//! message logs and typing flags change. Mutations are synchronous and atomic
//! per store; observers registered with [`MessageStore::subscribe`] are called
//! after the state lock is released.
//!
//! # Reentrancy
//!
//! An observer must not mutate the store from inside its callback. Such a
//! call is rejected with [`StoreError::Reentrant`] instead of being executed
//! synchronously, which rules out notification storms and self-deadlock.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use haatchat_proto::message::{
    ConversationId, Message, MessageId, MessageStatus, Payload, Sender, Sequence, Timestamp,
};

use super::ChatEvent;
use super::conversation::{Conversation, ConversationParams};

/// Errors returned by [`MessageStore`] operations. State is never modified
/// when an error is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No conversation with this id has been opened.
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// The conversation has no message with this id.
    #[error("unknown message {message_id} in conversation {conversation}")]
    UnknownMessage {
        /// Conversation that was searched.
        conversation: ConversationId,
        /// The missing message.
        message_id: MessageId,
    },

    /// The requested status change violates the delivery lifecycle.
    #[error("invalid transition for {message_id}: {from} -> {to}")]
    InvalidTransition {
        /// The message whose status was to change.
        message_id: MessageId,
        /// Its current status.
        from: MessageStatus,
        /// The requested status.
        to: MessageStatus,
    },

    /// A message was appended with a status its sender may not start in.
    #[error("{sender} message cannot be appended as {status}")]
    InvalidInitialStatus {
        /// Author side of the rejected message.
        sender: Sender,
        /// The rejected initial status.
        status: MessageStatus,
    },

    /// A mutation was attempted from inside an observer callback.
    #[error("store mutated from inside a notification callback")]
    Reentrant,
}

/// A message about to be appended; sequence, id and timestamp are assigned by
/// the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Author side.
    pub sender: Sender,
    /// Content.
    pub payload: Payload,
    /// Initial status: `Queued` for local, `Delivered`/`Read` for remote.
    pub status: MessageStatus,
}

impl NewMessage {
    /// A locally composed message, starting as `Queued`.
    #[must_use]
    pub const fn local(payload: Payload) -> Self {
        Self {
            sender: Sender::Local,
            payload,
            status: MessageStatus::Queued,
        }
    }

    /// A message received from the peer, already in a terminal status.
    #[must_use]
    pub const fn remote(payload: Payload, status: MessageStatus) -> Self {
        Self {
            sender: Sender::Remote,
            payload,
            status,
        }
    }

    const fn has_valid_initial_status(&self) -> bool {
        match self.sender {
            Sender::Local => matches!(self.status, MessageStatus::Queued),
            Sender::Remote => self.status.is_remote_terminal(),
        }
    }
}

/// Preconditions checked under the state lock before a status change.
#[derive(Clone, Copy, Default)]
struct Guard<'a> {
    /// Apply only from one of these statuses.
    expected: Option<&'a [MessageStatus]>,
    /// Apply only while `retry_count` equals this.
    attempt: Option<u32>,
    /// Permit `Failed -> Queued`.
    requeue: bool,
}

/// Callback invoked with every [`ChatEvent`] of a subscribed conversation.
pub type Observer = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

#[derive(Default)]
struct StoreState {
    conversations: HashMap<ConversationId, Conversation>,
    observers: HashMap<ConversationId, Vec<(u64, Observer)>>,
    next_observer_id: u64,
}

impl StoreState {
    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownConversation(id.clone()))
    }

    fn observers_of(&self, id: &ConversationId) -> Vec<Observer> {
        self.observers
            .get(id)
            .map(|list| list.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<StoreState>,
}

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running observer callbacks.
struct DispatchGuard {
    previous: bool,
}

impl DispatchGuard {
    fn enter() -> Self {
        Self {
            previous: DISPATCHING.with(|d| d.replace(true)),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(self.previous));
    }
}

/// Returns `true` while the current thread is inside an observer callback.
fn is_dispatching() -> bool {
    DISPATCHING.with(Cell::get)
}

fn ensure_not_dispatching() -> Result<(), StoreError> {
    if is_dispatching() {
        tracing::warn!("rejected store mutation from inside a notification callback");
        return Err(StoreError::Reentrant);
    }
    Ok(())
}

fn dispatch(observers: &[Observer], event: &ChatEvent) {
    if observers.is_empty() {
        return;
    }
    let _guard = DispatchGuard::enter();
    for observer in observers {
        observer(event);
    }
}

/// Owns every conversation and serializes all mutation of them.
///
/// Cloning is cheap and yields another handle to the same store.
#[derive(Clone, Default)]
pub struct MessageStore {
    shared: Arc<Shared>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new conversation and returns its id.
    pub fn open(&self, params: ConversationParams) -> ConversationId {
        let id = ConversationId::new();
        tracing::debug!(
            conversation = %id,
            peer = %params.peer_label,
            subject = %params.subject_label,
            "conversation opened"
        );
        self.shared
            .state
            .lock()
            .conversations
            .insert(id.clone(), Conversation::new(id.clone(), params));
        id
    }

    /// Appends a message, assigning the conversation's next sequence.
    ///
    /// Existing messages are never reordered. The message id is derived from
    /// the returned sequence ([`MessageId::from_sequence`]).
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`], [`StoreError::InvalidInitialStatus`]
    /// for a local message not `Queued` or a remote one not `Delivered`/`Read`,
    /// or [`StoreError::Reentrant`] from inside an observer.
    pub fn append(
        &self,
        conversation: &ConversationId,
        message: NewMessage,
    ) -> Result<Sequence, StoreError> {
        ensure_not_dispatching()?;
        if !message.has_valid_initial_status() {
            return Err(StoreError::InvalidInitialStatus {
                sender: message.sender,
                status: message.status,
            });
        }

        let (stored, observers) = {
            let mut state = self.shared.state.lock();
            let conv = state.conversation_mut(conversation)?;
            let stored = conv
                .push(message.sender, message.payload, message.status, Timestamp::now())
                .clone();
            (stored, state.observers_of(conversation))
        };

        tracing::debug!(
            conversation = %conversation,
            message_id = %stored.id,
            sequence = %stored.sequence,
            sender = %stored.sender,
            "message appended"
        );

        let sequence = stored.sequence;
        dispatch(
            &observers,
            &ChatEvent::MessageAppended {
                conversation: conversation.clone(),
                message: stored,
            },
        );
        Ok(sequence)
    }

    /// Moves a message to `status`.
    ///
    /// `Failed -> Queued` is refused here; only
    /// [`SendPipeline::retry`](super::SendPipeline::retry) re-queues a failed
    /// message, so the retry budget cannot be bypassed.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidTransition`] if the lifecycle forbids the move
    /// (logged as a caller bug), plus the lookup and reentrancy errors.
    pub fn update_status(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        self.transition(conversation, message_id, Guard::default(), status)
            .map(|_| ())
    }

    /// Moves a message to `status` only if its current status is one of
    /// `expected`.
    ///
    /// Returns `Ok(false)` without touching anything when the current status
    /// is not expected; used where receipts and delivery completions race.
    ///
    /// # Errors
    ///
    /// Same as [`update_status`](Self::update_status).
    pub fn update_status_if(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        expected: &[MessageStatus],
        status: MessageStatus,
    ) -> Result<bool, StoreError> {
        let guard = Guard {
            expected: Some(expected),
            ..Guard::default()
        };
        self.transition(conversation, message_id, guard, status)
    }

    /// Like [`update_status_if`](Self::update_status_if), but also a no-op
    /// unless the message is still on delivery attempt `attempt`
    /// (its `retry_count` when the attempt started).
    pub(crate) fn update_attempt_status(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        attempt: u32,
        expected: &[MessageStatus],
        status: MessageStatus,
    ) -> Result<bool, StoreError> {
        let guard = Guard {
            expected: Some(expected),
            attempt: Some(attempt),
            requeue: false,
        };
        self.transition(conversation, message_id, guard, status)
    }

    /// `Failed -> Queued`, incrementing `retry_count`.
    ///
    /// Returns the new `retry_count`, or `None` if the message is no longer
    /// `Failed`.
    pub(crate) fn requeue_failed(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
    ) -> Result<Option<u32>, StoreError> {
        let guard = Guard {
            expected: Some(&[MessageStatus::Failed]),
            attempt: None,
            requeue: true,
        };
        if !self.transition(conversation, message_id, guard, MessageStatus::Queued)? {
            return Ok(None);
        }
        Ok(Some(self.get(conversation, message_id)?.retry_count))
    }

    fn transition(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        guard: Guard<'_>,
        to: MessageStatus,
    ) -> Result<bool, StoreError> {
        ensure_not_dispatching()?;

        let (event, observers) = {
            let mut state = self.shared.state.lock();
            let conv = state.conversation_mut(conversation)?;
            let message =
                conv.message_mut(message_id)
                    .ok_or_else(|| StoreError::UnknownMessage {
                        conversation: conversation.clone(),
                        message_id,
                    })?;

            let from = message.status;
            if let Some(expected) = guard.expected
                && !expected.contains(&from)
            {
                return Ok(false);
            }
            if let Some(attempt) = guard.attempt
                && attempt != message.retry_count
            {
                return Ok(false);
            }
            let is_requeue = from == MessageStatus::Failed && to == MessageStatus::Queued;
            let legal = from.can_transition_to(to)
                && (message.sender == Sender::Local || to == MessageStatus::Read)
                && (guard.requeue || !is_requeue);
            if !legal {
                tracing::error!(
                    conversation = %conversation,
                    message_id = %message_id,
                    %from,
                    %to,
                    "invalid status transition rejected"
                );
                return Err(StoreError::InvalidTransition {
                    message_id,
                    from,
                    to,
                });
            }

            if is_requeue {
                message.retry_count += 1;
            }
            message.status = to;

            let event = ChatEvent::StatusChanged {
                conversation: conversation.clone(),
                message_id,
                from,
                to,
                retry_count: message.retry_count,
            };
            (event, state.observers_of(conversation))
        };

        tracing::debug!(
            conversation = %conversation,
            message_id = %message_id,
            status = %to,
            "status updated"
        );
        dispatch(&observers, &event);
        Ok(true)
    }

    /// Flips the conversation's typing flag if `expected_version` is current.
    ///
    /// Returns the new `(typing, version)` pair, or `None` if the version has
    /// moved on (a stale timer callback).
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`] or [`StoreError::Reentrant`].
    pub fn toggle_typing(
        &self,
        conversation: &ConversationId,
        expected_version: u64,
    ) -> Result<Option<(bool, u64)>, StoreError> {
        ensure_not_dispatching()?;

        let (toggled, observers) = {
            let mut state = self.shared.state.lock();
            let toggled = state
                .conversation_mut(conversation)?
                .toggle_typing(expected_version);
            (toggled, state.observers_of(conversation))
        };

        if let Some((typing, version)) = toggled {
            dispatch(
                &observers,
                &ChatEvent::TypingChanged {
                    conversation: conversation.clone(),
                    typing,
                    version,
                },
            );
        }
        Ok(toggled)
    }

    /// Returns a snapshot of one message.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`] or [`StoreError::UnknownMessage`].
    pub fn get(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
    ) -> Result<Message, StoreError> {
        let state = self.shared.state.lock();
        let conv = state
            .conversations
            .get(conversation)
            .ok_or_else(|| StoreError::UnknownConversation(conversation.clone()))?;
        conv.message(message_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMessage {
                conversation: conversation.clone(),
                message_id,
            })
    }

    /// Returns a snapshot of a whole conversation.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`].
    pub fn conversation(&self, conversation: &ConversationId) -> Result<Conversation, StoreError> {
        self.shared
            .state
            .lock()
            .conversations
            .get(conversation)
            .cloned()
            .ok_or_else(|| StoreError::UnknownConversation(conversation.clone()))
    }

    /// Returns snapshots of every open conversation, in no particular order.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared
            .state
            .lock()
            .conversations
            .values()
            .cloned()
            .collect()
    }

    /// Ids of every open conversation, in no particular order.
    #[must_use]
    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.shared
            .state
            .lock()
            .conversations
            .keys()
            .cloned()
            .collect()
    }

    /// Returns a lazy, restartable view of a conversation's messages.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`].
    pub fn list(&self, conversation: &ConversationId) -> Result<MessageLog, StoreError> {
        if !self
            .shared
            .state
            .lock()
            .conversations
            .contains_key(conversation)
        {
            return Err(StoreError::UnknownConversation(conversation.clone()));
        }
        Ok(MessageLog {
            store: self.clone(),
            conversation: conversation.clone(),
        })
    }

    /// Registers `observer` for every event of `conversation`.
    ///
    /// The observer runs on the thread that performed the mutation, after the
    /// store lock is released. Dropping the returned [`Subscription`]
    /// unsubscribes.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`].
    pub fn subscribe<F>(
        &self,
        conversation: &ConversationId,
        observer: F,
    ) -> Result<Subscription, StoreError>
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.conversations.contains_key(conversation) {
            return Err(StoreError::UnknownConversation(conversation.clone()));
        }
        let id = state.next_observer_id;
        state.next_observer_id += 1;
        state
            .observers
            .entry(conversation.clone())
            .or_default()
            .push((id, Arc::new(observer)));

        Ok(Subscription {
            shared: Arc::downgrade(&self.shared),
            conversation: conversation.clone(),
            id,
            active: AtomicBool::new(true),
        })
    }

    /// Subscribes through an unbounded channel, for async consumers.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`].
    pub fn subscribe_channel(
        &self,
        conversation: &ConversationId,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<ChatEvent>), StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(conversation, move |event| {
            // Receiver gone means the consumer stopped listening.
            let _ = tx.send(event.clone());
        })?;
        Ok((subscription, rx))
    }

    fn message_at(&self, conversation: &ConversationId, index: usize) -> Option<Message> {
        self.shared
            .state
            .lock()
            .conversations
            .get(conversation)?
            .message_at(index)
            .cloned()
    }

    fn message_count(&self, conversation: &ConversationId) -> usize {
        self.shared
            .state
            .lock()
            .conversations
            .get(conversation)
            .map_or(0, Conversation::len)
    }
}

/// Handle returned by [`MessageStore::subscribe`].
///
/// [`unsubscribe`](Self::unsubscribe) is idempotent and also runs on drop.
#[must_use = "dropping a Subscription unsubscribes its observer"]
pub struct Subscription {
    shared: Weak<Shared>,
    conversation: ConversationId,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Stops further notifications to this observer.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock();
        if let Some(list) = state.observers.get_mut(&self.conversation) {
            list.retain(|(id, _)| *id != self.id);
        }
    }

    /// Returns `true` until [`unsubscribe`](Self::unsubscribe) is called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("conversation", &self.conversation)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Lazy view of a conversation's messages, ordered by sequence ascending.
///
/// Every call to [`iter`](Self::iter) starts again from the first message and
/// reads entries from the store on demand, so messages appended while
/// iterating are picked up.
#[derive(Clone)]
pub struct MessageLog {
    store: MessageStore,
    conversation: ConversationId,
}

impl MessageLog {
    /// Iterates from the first message.
    #[must_use]
    pub const fn iter(&self) -> MessageIter<'_> {
        MessageIter {
            log: self,
            next_index: 0,
        }
    }

    /// Current number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.message_count(&self.conversation)
    }

    /// Returns `true` if the conversation has no messages yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The conversation this view reads.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = Message;
    type IntoIter = MessageIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`MessageLog`].
pub struct MessageIter<'a> {
    log: &'a MessageLog,
    next_index: usize,
}

impl Iterator for MessageIter<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        let message = self
            .log
            .store
            .message_at(&self.log.conversation, self.next_index)?;
        self.next_index += 1;
        Some(message)
    }
}
