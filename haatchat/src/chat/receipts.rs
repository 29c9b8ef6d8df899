//! Delivery receipt handling for [`SendPipeline`].
//!
//! A receipt names the status the remote side has reached. Because a message
//! may only move one step along `Queued -> Sent -> Delivered -> Read`, the
//! message is walked forward step by step until it reaches the receipt's
//! target. Receipts that arrive late (the message is already there or past
//! it) are dropped silently.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use haatchat_proto::message::{MessageStatus, Receipt, ReceiptKind, Sender};

use crate::transport::Transport;

use super::SendPipeline;
use super::store::{MessageStore, StoreError};

impl<T: Transport> SendPipeline<T> {
    /// Applies one receipt to the store.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the conversation or message is unknown, or from
    /// inside an observer.
    pub fn apply_receipt(&self, receipt: &Receipt) -> Result<(), StoreError> {
        apply_receipt_to(&self.store, receipt)
    }

    /// Spawns a task applying every receipt from `receipts` until the channel
    /// closes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_receipt_pump(&self, mut receipts: mpsc::Receiver<Receipt>) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            while let Some(receipt) = receipts.recv().await {
                if let Err(e) = apply_receipt_to(&store, &receipt) {
                    tracing::warn!(
                        message_id = %receipt.message_id,
                        error = %e,
                        "dropping receipt"
                    );
                }
            }
            tracing::debug!("receipt channel closed");
        })
    }
}

/// Walks the target message forward to the receipt's status.
pub(crate) fn apply_receipt_to(store: &MessageStore, receipt: &Receipt) -> Result<(), StoreError> {
    let conversation = &receipt.conversation_id;
    let message_id = receipt.message_id;
    let message = store.get(conversation, message_id)?;

    if message.sender != Sender::Local {
        tracing::debug!(message_id = %message_id, "ignoring receipt for a remote message");
        return Ok(());
    }

    if let ReceiptKind::Rejected(reason) = &receipt.kind {
        let failed = store.update_status_if(
            conversation,
            message_id,
            &[MessageStatus::Queued, MessageStatus::Sent],
            MessageStatus::Failed,
        )?;
        if failed {
            tracing::warn!(message_id = %message_id, %reason, "remote rejected message");
        }
        return Ok(());
    }

    let target = receipt.kind.target_status();
    let Some(goal) = target.progress() else {
        return Ok(());
    };

    let mut current = message.status;
    // At most three forward steps exist.
    for _ in 0..MessageStatus::ALL.len() {
        let Some(progress) = current.progress() else {
            // Failed: the message has to be retried before receipts count.
            tracing::debug!(message_id = %message_id, "ignoring receipt for a failed message");
            return Ok(());
        };
        if progress >= goal {
            return Ok(());
        }
        let Some(next) = current.next_forward() else {
            return Ok(());
        };
        if store.update_status_if(conversation, message_id, &[current], next)? {
            current = next;
        } else {
            // Lost a race with the delivery task; pick up where it left off.
            current = store.get(conversation, message_id)?.status;
        }
    }

    tracing::debug!(message_id = %message_id, status = %current, "receipt applied");
    Ok(())
}
