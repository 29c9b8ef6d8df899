//! Property-based tests for ordering and the status lifecycle in the store.
//!
//! Uses proptest to verify:
//! 1. Any number of composes yields gap-free sequences in call order, however
//!    long each delivery takes.
//! 2. Any series of status updates on one message behaves exactly like the
//!    lifecycle model: legal forward moves apply, everything else (including
//!    `Failed -> Queued`, which only `SendPipeline::retry` may do) is refused
//!    with `InvalidTransition` and changes nothing.

use std::time::Duration;

use proptest::prelude::*;

use haatchat::chat::attachment::AttachmentResolver;
use haatchat::chat::conversation::ConversationParams;
use haatchat::chat::store::{MessageStore, NewMessage, StoreError};
use haatchat::chat::{Draft, PipelineConfig, SendPipeline};
use haatchat::transport::{Transport, TransportError};

use haatchat_proto::message::{LocalUserId, Message, MessageId, MessageStatus, Payload};

/// Sleeps for the number of milliseconds written in the message text.
struct DelayTransport;

impl Transport for DelayTransport {
    async fn deliver(&self, message: &Message) -> Result<(), TransportError> {
        let millis = message
            .payload
            .as_text()
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }
}

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop::sample::select(MessageStatus::ALL.to_vec())
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn sequences_follow_compose_order(delays in prop::collection::vec(0u64..2_000, 1..24)) {
        let rt = paused_runtime();
        let (ids, log_order) = rt.block_on(async {
            let store = MessageStore::new();
            let conv = store.open(ConversationParams::new(
                "John Doe",
                "Goat - Jamunapari",
                LocalUserId::new("seller-1"),
            ));
            let pipeline = SendPipeline::new(
                store,
                DelayTransport,
                AttachmentResolver::default(),
                PipelineConfig::default(),
            );

            let ids: Vec<MessageId> = delays
                .iter()
                .map(|d| pipeline.compose(&conv, Draft::Text(d.to_string())).unwrap())
                .collect();
            pipeline.flush().await;

            let log_order: Vec<(u64, MessageId, MessageStatus)> = pipeline
                .store()
                .list(&conv)
                .unwrap()
                .iter()
                .map(|m| (m.sequence.get(), m.id, m.status))
                .collect();
            (ids, log_order)
        });

        prop_assert_eq!(log_order.len(), ids.len());
        for (index, (sequence, id, status)) in log_order.iter().enumerate() {
            prop_assert_eq!(*sequence, index as u64 + 1);
            prop_assert_eq!(*id, ids[index]);
            prop_assert_eq!(*status, MessageStatus::Sent);
        }
    }

    #[test]
    fn status_updates_match_the_lifecycle_model(targets in prop::collection::vec(arb_status(), 0..40)) {
        let store = MessageStore::new();
        let conv = store.open(ConversationParams::new(
            "Jane Smith",
            "Cow - Holstein",
            LocalUserId::new("buyer-7"),
        ));
        let seq = store
            .append(&conv, NewMessage::local(Payload::Text("hi".into())))
            .unwrap();
        let id = MessageId::from_sequence(seq);

        let mut model_status = MessageStatus::Queued;

        for to in targets {
            let result = store.update_status(&conv, id, to);
            let is_requeue = model_status == MessageStatus::Failed && to == MessageStatus::Queued;
            if model_status.can_transition_to(to) && !is_requeue {
                prop_assert!(result.is_ok());
                model_status = to;
            } else {
                let is_invalid_transition = matches!(result, Err(StoreError::InvalidTransition { .. }));
                prop_assert!(is_invalid_transition);
            }

            let stored = store.get(&conv, id).unwrap();
            prop_assert_eq!(stored.status, model_status);
            prop_assert_eq!(stored.retry_count, 0);
        }
        prop_assert_eq!(store.list(&conv).unwrap().len(), 1);
    }

    #[test]
    fn remote_messages_only_move_to_read(to in arb_status()) {
        let store = MessageStore::new();
        let conv = store.open(ConversationParams::new(
            "John Doe",
            "Goat",
            LocalUserId::new("seller-1"),
        ));
        let seq = store
            .append(
                &conv,
                NewMessage::remote(Payload::Text("hi".into()), MessageStatus::Delivered),
            )
            .unwrap();
        let id = MessageId::from_sequence(seq);

        let result = store.update_status(&conv, id, to);
        if to == MessageStatus::Read {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(store.get(&conv, id).unwrap().status, MessageStatus::Delivered);
        }
    }
}
