//! Property-based tests for the delivery lifecycle and the wire codec.
//!
//! Uses proptest to verify:
//! 1. The only legal backward move is `Failed -> Queued`.
//! 2. Forward moves never skip a state.
//! 3. `next_forward` agrees with `can_transition_to`.
//! 4. Random bytes never cause a panic in `decode`.
//! 5. Any message envelope survives the codec unchanged.

use proptest::prelude::*;
use haatchat_proto::codec;
use haatchat_proto::message::*;
use uuid::Uuid;

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop::sample::select(MessageStatus::ALL.to_vec())
}

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        "[^\x00]{1,256}".prop_map(Payload::Text),
        "(file|content|https)://[a-z0-9/]{1,64}"
            .prop_map(|uri| Payload::Image(AttachmentPayload::new(uri))),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        1u64..u64::MAX,
        any::<u128>(),
        any::<bool>(),
        arb_payload(),
        any::<u64>(),
        arb_status(),
        0u32..8,
    )
        .prop_map(|(seq, conv, local, payload, millis, status, retry_count)| {
            let sequence = Sequence::new(seq);
            Message {
                id: MessageId::from_sequence(sequence),
                conversation_id: ConversationId::from_uuid(Uuid::from_u128(conv)),
                sender: if local { Sender::Local } else { Sender::Remote },
                payload,
                created_at: Timestamp::from_millis(millis),
                sequence,
                status,
                retry_count,
            }
        })
}

proptest! {
    #[test]
    fn only_retry_moves_backwards(from in arb_status(), to in arb_status()) {
        if let (Some(a), Some(b)) = (from.progress(), to.progress())
            && b <= a
        {
            prop_assert!(!from.can_transition_to(to));
        }
        if from.can_transition_to(to) && to.progress().is_some() && from.progress().is_none() {
            prop_assert_eq!((from, to), (MessageStatus::Failed, MessageStatus::Queued));
        }
    }

    #[test]
    fn forward_moves_are_single_steps(from in arb_status(), to in arb_status()) {
        if let (Some(a), Some(b)) = (from.progress(), to.progress())
            && from.can_transition_to(to)
        {
            prop_assert_eq!(b, a + 1);
            prop_assert_eq!(from.next_forward(), Some(to));
        }
    }

    #[test]
    fn next_forward_is_always_legal(from in arb_status()) {
        if let Some(next) = from.next_forward() {
            prop_assert!(from.can_transition_to(next));
        }
    }

    #[test]
    fn decode_random_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn message_envelope_survives_codec(message in arb_message()) {
        let envelope = Envelope::Message(message);
        let bytes = codec::encode(&envelope).unwrap();
        prop_assert_eq!(codec::decode(&bytes).unwrap(), envelope);
    }
}
