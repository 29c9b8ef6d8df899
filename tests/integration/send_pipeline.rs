//! Integration tests for composing, delivering and retrying messages.
//!
//! Verifies:
//! 1. A composed text is `m1`/sequence 1/`Queued`, then `Sent`, then
//!    `Delivered` once the receipt arrives.
//! 2. A cancelled image pick is rejected and stores nothing.
//! 3. Display order follows compose order even when deliveries finish in
//!    reverse.
//! 4. Three failed retries exhaust the budget; the fourth is refused.
//! 5. Status regressions are refused and leave the message untouched.
//! 6. A superseded attempt finishing late cannot fail the retry that
//!    replaced it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use haatchat::chat::attachment::{AttachmentError, AttachmentResolver, PickerResponse};
use haatchat::chat::conversation::ConversationParams;
use haatchat::chat::store::{MessageStore, StoreError};
use haatchat::chat::{ChatEvent, Draft, PipelineConfig, RejectionReason, RetryError, SendPipeline};
use haatchat::transport::{Transport, TransportError};

use haatchat_proto::message::{
    ConversationId, LocalUserId, Message, MessageId, MessageStatus, Receipt, ReceiptKind, Sequence,
};

use parking_lot::Mutex;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Succeeds, recording the order in which deliveries complete. Texts
/// starting with "slow" take five seconds.
#[derive(Default)]
struct RecordingTransport {
    completed: Mutex<Vec<MessageId>>,
}

impl Transport for RecordingTransport {
    async fn deliver(&self, message: &Message) -> Result<(), TransportError> {
        if message
            .payload
            .as_text()
            .is_some_and(|t| t.starts_with("slow"))
        {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.completed.lock().push(message.id);
        Ok(())
    }
}

/// Fails every attempt.
#[derive(Default)]
struct DeadTransport {
    attempts: AtomicUsize,
}

impl Transport for DeadTransport {
    async fn deliver(&self, _message: &Message) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::ConnectionClosed)
    }
}

/// First attempt waits for `release`, then fails; later attempts succeed.
#[derive(Default)]
struct HeldTransport {
    attempts: AtomicUsize,
    release: Notify,
}

impl Transport for HeldTransport {
    async fn deliver(&self, _message: &Message) -> Result<(), TransportError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            self.release.notified().await;
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

fn open_pipeline<T: Transport>(transport: T) -> (SendPipeline<T>, ConversationId) {
    let store = MessageStore::new();
    let conv = store.open(ConversationParams::new(
        "John Doe",
        "Goat - Jamunapari",
        LocalUserId::new("seller-1"),
    ));
    let pipeline = SendPipeline::new(
        store,
        transport,
        AttachmentResolver::default(),
        PipelineConfig::default(),
    );
    (pipeline, conv)
}

fn status_of<T: Transport>(
    pipeline: &SendPipeline<T>,
    conv: &ConversationId,
    id: MessageId,
) -> MessageStatus {
    pipeline.store().get(conv, id).unwrap().status
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn text_goes_queued_sent_delivered() {
    let (pipeline, conv) = open_pipeline(RecordingTransport::default());
    let (_sub, mut events) = pipeline.store().subscribe_channel(&conv).unwrap();

    let id = pipeline
        .compose(&conv, Draft::text("Is it available?"))
        .unwrap();
    assert_eq!(id.to_string(), "m1");
    let stored = pipeline.store().get(&conv, id).unwrap();
    assert_eq!(stored.sequence, Sequence::FIRST);
    assert_eq!(stored.status, MessageStatus::Queued);

    pipeline.flush().await;
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Sent);

    pipeline
        .apply_receipt(&Receipt {
            conversation_id: conv.clone(),
            message_id: id,
            kind: ReceiptKind::Delivered,
        })
        .unwrap();
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Delivered);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::StatusChanged { to, .. } = event {
            statuses.push(to);
        }
    }
    assert_eq!(statuses, vec![MessageStatus::Sent, MessageStatus::Delivered]);
}

#[tokio::test]
async fn cancelled_image_is_rejected_and_nothing_is_stored() {
    let (pipeline, conv) = open_pipeline(RecordingTransport::default());
    pipeline.compose(&conv, Draft::text("first")).unwrap();
    let before = pipeline.store().list(&conv).unwrap().len();

    let result = pipeline.compose(&conv, Draft::Image(PickerResponse::Cancelled));
    assert_eq!(
        result,
        Err(RejectionReason::AttachmentInvalid(AttachmentError::Cancelled))
    );
    assert_eq!(pipeline.store().list(&conv).unwrap().len(), before);
}

#[tokio::test(start_paused = true)]
async fn display_order_follows_compose_order_not_completion_order() {
    let (pipeline, conv) = open_pipeline(RecordingTransport::default());

    let slow = pipeline.compose(&conv, Draft::text("slow: first")).unwrap();
    let fast = pipeline.compose(&conv, Draft::text("second")).unwrap();
    pipeline.flush().await;

    assert_eq!(*pipeline.transport().completed.lock(), vec![fast, slow]);

    let log = pipeline.store().list(&conv).unwrap();
    let order: Vec<(u64, MessageId)> = log.iter().map(|m| (m.sequence.get(), m.id)).collect();
    assert_eq!(order, vec![(1, slow), (2, fast)]);
    assert!(log.iter().all(|m| m.status == MessageStatus::Sent));
}

#[tokio::test]
async fn fourth_retry_is_refused_and_count_is_unchanged() {
    let (pipeline, conv) = open_pipeline(DeadTransport::default());
    let id = pipeline.compose(&conv, Draft::text("Final price?")).unwrap();
    pipeline.flush().await;
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Failed);

    for attempt in 1..=3 {
        pipeline.retry(&conv, id).unwrap();
        pipeline.flush().await;
        let msg = pipeline.store().get(&conv, id).unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.retry_count, attempt);
        assert_eq!(msg.id, id);
    }

    assert_eq!(
        pipeline.retry(&conv, id),
        Err(RetryError::RetriesExhausted { attempts: 3 })
    );
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Failed);
    assert_eq!(pipeline.store().list(&conv).unwrap().len(), 1);
    // One initial attempt plus three retries.
    assert_eq!(pipeline.transport().attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn backward_transitions_are_refused() {
    let (pipeline, conv) = open_pipeline(RecordingTransport::default());
    let id = pipeline.compose(&conv, Draft::text("hello")).unwrap();
    pipeline.flush().await;

    let store = pipeline.store();
    assert!(matches!(
        store.update_status(&conv, id, MessageStatus::Queued),
        Err(StoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.update_status(&conv, id, MessageStatus::Read),
        Err(StoreError::InvalidTransition { .. })
    ));
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Sent);
}

#[tokio::test]
async fn observer_cannot_mutate_the_store() {
    let (pipeline, conv) = open_pipeline(RecordingTransport::default());
    let store = pipeline.store().clone();
    let seen: std::sync::Arc<Mutex<Vec<StoreError>>> = std::sync::Arc::default();

    let sink = std::sync::Arc::clone(&seen);
    let inner = store.clone();
    let inner_conv = conv.clone();
    let _sub = store
        .subscribe(&conv, move |event| {
            if let ChatEvent::MessageAppended { message, .. } = event
                && let Err(e) = inner.update_status(&inner_conv, message.id, MessageStatus::Sent)
            {
                sink.lock().push(e);
            }
        })
        .unwrap();

    let id = pipeline.compose(&conv, Draft::text("hello")).unwrap();
    assert_eq!(*seen.lock(), vec![StoreError::Reentrant]);
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Queued);
}

#[tokio::test]
async fn late_failure_of_replaced_attempt_is_ignored() {
    let (pipeline, conv) = open_pipeline(HeldTransport::default());
    let id = pipeline.compose(&conv, Draft::text("Still available?")).unwrap();
    while pipeline.transport().attempts.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // The peer refuses while the first attempt is still open.
    pipeline
        .apply_receipt(&Receipt {
            conversation_id: conv.clone(),
            message_id: id,
            kind: ReceiptKind::Rejected("busy".into()),
        })
        .unwrap();
    assert_eq!(status_of(&pipeline, &conv, id), MessageStatus::Failed);
    pipeline.retry(&conv, id).unwrap();

    pipeline.transport().release.notify_one();
    pipeline.flush().await;

    let msg = pipeline.store().get(&conv, id).unwrap();
    assert_eq!(msg.status, MessageStatus::Sent);
    assert_eq!(msg.retry_count, 1);
    assert_eq!(pipeline.retries_left(&conv, id), None);
    assert_eq!(pipeline.transport().attempts.load(Ordering::SeqCst), 2);
}
