//! Simulated remote typing indicator.
//!
//! [`PresenceSignaler::start`] spawns a Tokio task that flips a
//! conversation's `typing` flag on a fixed interval. Each flip is one
//! store update and one notification. The task is cancelled through the
//! returned [`PresenceHandle`]; once [`PresenceHandle::stop`] returns, no
//! further flip for that handle becomes visible.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use haatchat_proto::message::ConversationId;

use crate::chat::store::{MessageStore, StoreError};

/// Shortest interval accepted by [`PresenceSignaler::start`].
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Starts typing-indicator tasks against one store.
#[derive(Clone)]
pub struct PresenceSignaler {
    store: MessageStore,
}

impl PresenceSignaler {
    /// Creates a signaler writing to `store`.
    #[must_use]
    pub const fn new(store: MessageStore) -> Self {
        Self { store }
    }

    /// Starts toggling `typing` on `conversation` every `interval`.
    ///
    /// The first flip happens one interval after the call. Intervals below
    /// [`MIN_INTERVAL`] are raised to it. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownConversation`] if the conversation was never
    /// opened.
    pub fn start(
        &self,
        conversation: &ConversationId,
        interval: Duration,
    ) -> Result<PresenceHandle, StoreError> {
        let version = self.store.conversation(conversation)?.typing_version();
        let interval = interval.max(MIN_INTERVAL);

        let gate = Arc::new(ReentrantMutex::new(()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(
            self.store.clone(),
            conversation.clone(),
            interval,
            version,
            Arc::clone(&gate),
            Arc::clone(&cancelled),
        ));

        tracing::debug!(conversation = %conversation, ?interval, "presence signaler started");
        Ok(PresenceHandle {
            conversation: conversation.clone(),
            gate,
            cancelled,
            task,
        })
    }

    /// Stops the task behind `handle`. Equivalent to
    /// [`PresenceHandle::stop`].
    pub fn stop(&self, handle: &PresenceHandle) {
        handle.stop();
    }
}

/// Cancellation handle for one running typing indicator.
///
/// Dropping the handle stops the task.
#[must_use = "dropping a PresenceHandle stops the typing indicator"]
pub struct PresenceHandle {
    conversation: ConversationId,
    gate: Arc<ReentrantMutex<()>>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PresenceHandle {
    /// Stops the indicator. Idempotent and safe from any thread.
    ///
    /// After this returns no further flip is applied, even if a tick was
    /// already due. Called from an observer of this indicator's own flip,
    /// the flip being dispatched is the last one.
    pub fn stop(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wait out a flip in progress on another thread. The gate is
        // reentrant, so an observer of our own flip re-enters it at once.
        drop(self.gate.lock());
        self.task.abort();
        tracing::debug!(conversation = %self.conversation, "presence signaler stopped");
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The conversation this indicator animates.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PresenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceHandle")
            .field("conversation", &self.conversation)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

async fn run(
    store: MessageStore,
    conversation: ConversationId,
    interval: Duration,
    mut expected: u64,
    gate: Arc<ReentrantMutex<()>>,
    cancelled: Arc<AtomicBool>,
) {
    let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        let _held = gate.lock();
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        match store.toggle_typing(&conversation, expected) {
            Ok(Some((_, version))) => expected = version,
            Ok(None) => {
                // Someone else moved the version; follow it.
                match store.conversation(&conversation) {
                    Ok(conv) => expected = conv.typing_version(),
                    Err(e) => {
                        tracing::warn!(conversation = %conversation, error = %e, "presence stopped");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation, error = %e, "presence stopped");
                return;
            }
        }
    }
}
