//! In-process transport that plays the remote device.
//!
//! [`SimulatedTransport`] encodes each message with the wire codec, waits a
//! configurable latency, optionally fails, and hands the bytes to a simulated
//! peer. The peer decodes them, files each message id once, and sends
//! `Delivered` and `Read` receipts back over a channel after configurable
//! delays.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;

use haatchat_proto::codec;
use haatchat_proto::message::{
    ConversationId, Envelope, Message, MessageId, Receipt, ReceiptKind,
};

use super::{Transport, TransportError};

/// Tuning knobs for [`SimulatedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedConfig {
    /// Time each delivery attempt takes.
    pub latency: Duration,
    /// Probability in `[0, 1]` that an attempt fails with `ConnectionClosed`.
    pub failure_rate: f64,
    /// Delay between acceptance and the `Delivered` receipt.
    pub ack_delay: Duration,
    /// Delay between `Delivered` and `Read`; `None` never reads.
    pub read_delay: Option<Duration>,
    /// Capacity of the receipt channel.
    pub receipt_buffer: usize,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(300),
            failure_rate: 0.0,
            ack_delay: Duration::from_millis(500),
            read_delay: Some(Duration::from_secs(2)),
            receipt_buffer: 64,
        }
    }
}

/// The remote device: keeps one inbox entry per message id.
struct SimulatedPeer {
    received: Mutex<HashSet<(ConversationId, MessageId)>>,
    receipts: mpsc::Sender<Receipt>,
    ack_delay: Duration,
    read_delay: Option<Duration>,
}

impl SimulatedPeer {
    fn accept(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let message = match codec::decode(bytes)? {
            Envelope::Message(message) => message,
            Envelope::Receipt(_) => {
                return Err(TransportError::Rejected {
                    reason: "peer only accepts messages".into(),
                });
            }
        };

        let key = (message.conversation_id.clone(), message.id);
        let first_time = self.received.lock().insert(key);
        if first_time {
            tracing::debug!(message_id = %message.id, "simulated peer received message");
        } else {
            tracing::debug!(
                message_id = %message.id,
                retry_count = message.retry_count,
                "simulated peer saw redelivery, acknowledging again"
            );
        }

        self.schedule_receipts(message.conversation_id, message.id);
        Ok(())
    }

    fn schedule_receipts(&self, conversation_id: ConversationId, message_id: MessageId) {
        let tx = self.receipts.clone();
        let ack_delay = self.ack_delay;
        let read_delay = self.read_delay;
        tokio::spawn(async move {
            tokio::time::sleep(ack_delay).await;
            let delivered = Receipt {
                conversation_id: conversation_id.clone(),
                message_id,
                kind: ReceiptKind::Delivered,
            };
            if tx.send(delivered).await.is_err() {
                return;
            }
            if let Some(delay) = read_delay {
                tokio::time::sleep(delay).await;
                let read = Receipt {
                    conversation_id,
                    message_id,
                    kind: ReceiptKind::Read,
                };
                let _ = tx.send(read).await;
            }
        });
    }
}

/// Simulated backend for the delivery contract.
pub struct SimulatedTransport {
    config: SimulatedConfig,
    scripted_failures: AtomicU32,
    peer: SimulatedPeer,
}

impl SimulatedTransport {
    /// Creates the transport and the receiver its receipts arrive on.
    #[must_use]
    pub fn new(config: SimulatedConfig) -> (Self, mpsc::Receiver<Receipt>) {
        let (tx, rx) = mpsc::channel(config.receipt_buffer.max(1));
        let peer = SimulatedPeer {
            received: Mutex::new(HashSet::new()),
            receipts: tx,
            ack_delay: config.ack_delay,
            read_delay: config.read_delay,
        };
        let transport = Self {
            config,
            scripted_failures: AtomicU32::new(0),
            peer,
        };
        (transport, rx)
    }

    /// Makes the next `count` delivery attempts fail with `Rejected`.
    pub fn fail_next(&self, count: u32) {
        self.scripted_failures.store(count, Ordering::SeqCst);
    }

    /// Number of distinct messages the simulated peer has received.
    #[must_use]
    pub fn received_count(&self) -> usize {
        self.peer.received.lock().len()
    }

    fn take_scripted_failure(&self) -> bool {
        self.scripted_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn roll_random_failure(&self) -> bool {
        let rate = self.config.failure_rate.clamp(0.0, 1.0);
        rate > 0.0 && rand::rng().random_bool(rate)
    }
}

impl Transport for SimulatedTransport {
    async fn deliver(&self, message: &Message) -> Result<(), TransportError> {
        let bytes = codec::encode(&Envelope::Message(message.clone()))?;

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.take_scripted_failure() {
            tracing::debug!(message_id = %message.id, "scripted delivery failure");
            return Err(TransportError::Rejected {
                reason: "scripted failure".into(),
            });
        }
        if self.roll_random_failure() {
            tracing::debug!(message_id = %message.id, "simulated connection drop");
            return Err(TransportError::ConnectionClosed);
        }

        self.peer.accept(&bytes)
    }
}
