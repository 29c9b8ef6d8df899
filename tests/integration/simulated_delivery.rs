//! Integration tests for the full delivery loop over `SimulatedTransport`.
//!
//! Verifies:
//! 1. A message walks `Queued -> Sent -> Delivered -> Read` driven only by
//!    the transport and its receipts.
//! 2. A failed attempt followed by a retry reaches the peer exactly once.
//! 3. With read receipts disabled the message stops at `Delivered`.

use std::time::Duration;

use haatchat::chat::attachment::AttachmentResolver;
use haatchat::chat::conversation::ConversationParams;
use haatchat::chat::store::MessageStore;
use haatchat::chat::{ChatEvent, Draft, PipelineConfig, SendPipeline};
use haatchat::transport::simulated::{SimulatedConfig, SimulatedTransport};

use haatchat_proto::message::{ConversationId, LocalUserId, MessageStatus};

fn setup(
    config: SimulatedConfig,
) -> (
    SendPipeline<SimulatedTransport>,
    ConversationId,
    tokio::task::JoinHandle<()>,
) {
    let store = MessageStore::new();
    let conv = store.open(ConversationParams::new(
        "Jane Smith",
        "Cow - Holstein",
        LocalUserId::new("buyer-7"),
    ));
    let (transport, receipts) = SimulatedTransport::new(config);
    let pipeline = SendPipeline::new(
        store,
        transport,
        AttachmentResolver::default(),
        PipelineConfig::default(),
    );
    let pump = pipeline.spawn_receipt_pump(receipts);
    (pipeline, conv, pump)
}

#[tokio::test(start_paused = true)]
async fn message_reaches_read_through_receipts() {
    let (pipeline, conv, pump) = setup(SimulatedConfig::default());
    let (_sub, mut events) = pipeline.store().subscribe_channel(&conv).unwrap();

    let id = pipeline.compose(&conv, Draft::text("Still available?")).unwrap();
    pipeline.flush().await;
    assert_eq!(
        pipeline.store().get(&conv, id).unwrap().status,
        MessageStatus::Sent
    );

    // ack after 500ms, read 2s later
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        pipeline.store().get(&conv, id).unwrap().status,
        MessageStatus::Read
    );

    let mut path = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::StatusChanged { from, to, .. } = event {
            path.push((from, to));
        }
    }
    assert_eq!(
        path,
        vec![
            (MessageStatus::Queued, MessageStatus::Sent),
            (MessageStatus::Sent, MessageStatus::Delivered),
            (MessageStatus::Delivered, MessageStatus::Read),
        ]
    );
    pump.abort();
}

#[tokio::test(start_paused = true)]
async fn retry_after_failure_is_received_once() {
    let (pipeline, conv, pump) = setup(SimulatedConfig::default());
    pipeline.transport().fail_next(1);

    let id = pipeline.compose(&conv, Draft::text("Final price?")).unwrap();
    pipeline.flush().await;
    assert_eq!(
        pipeline.store().get(&conv, id).unwrap().status,
        MessageStatus::Failed
    );
    assert_eq!(pipeline.transport().received_count(), 0);

    pipeline.retry(&conv, id).unwrap();
    pipeline.flush().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let msg = pipeline.store().get(&conv, id).unwrap();
    assert_eq!(msg.status, MessageStatus::Read);
    assert_eq!(msg.retry_count, 1);
    assert_eq!(pipeline.transport().received_count(), 1);
    assert_eq!(pipeline.store().list(&conv).unwrap().len(), 1);
    pump.abort();
}

#[tokio::test(start_paused = true)]
async fn without_read_receipts_message_stops_at_delivered() {
    let config = SimulatedConfig {
        read_delay: None,
        ..SimulatedConfig::default()
    };
    let (pipeline, conv, pump) = setup(config);

    let id = pipeline.compose(&conv, Draft::text("hello")).unwrap();
    pipeline.flush().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        pipeline.store().get(&conv, id).unwrap().status,
        MessageStatus::Delivered
    );
    pump.abort();
}
