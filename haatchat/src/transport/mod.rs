//! Transport contract for delivering messages to the remote party.
//!
//! The messaging core never talks to a network directly. Anything that can
//! satisfy [`Transport`] can back the pipeline; [`simulated::SimulatedTransport`]
//! is the in-process implementation used by the demo and the tests.
//!
//! # Contract
//!
//! - `deliver` may be called again with the same message id after a failure.
//!   A retried id is a status update on the remote side, never a second
//!   entry.
//! - `Ok(())` means the message left this device. Delivery and read
//!   confirmation arrive later as [`Receipt`](haatchat_proto::message::Receipt)s.
//! - Every error is treated as retryable by the pipeline.

pub mod simulated;

use haatchat_proto::codec::CodecError;
use haatchat_proto::message::Message;

/// Errors a transport reports for a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the remote side is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The attempt did not complete in time.
    #[error("delivery timed out")]
    Timeout,

    /// The remote side refused the message.
    #[error("delivery rejected: {reason}")]
    Rejected {
        /// Human-readable reason.
        reason: String,
    },

    /// The message could not be encoded for the wire.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Async delivery contract the pipeline depends on.
pub trait Transport: Send + Sync + 'static {
    /// Attempts to hand `message` to the remote party.
    ///
    /// Resolves once the message has left the device or the attempt failed.
    fn deliver(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}
