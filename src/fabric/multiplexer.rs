//! Response multiplexer: correlates replies with waiting originators
//!
//! Each `need_response` call registers a one-shot rendezvous slot keyed by a
//! freshly generated [`ResponseUuid`] before it sends its request; the slot
//! is consumed exactly once, either by the matching reply or by a bounded
//! timeout. This replaces the unbounded, globally-queued rendezvous used by
//! this subsystem's origin with an owned, per-request primitive (see the
//! response-rendezvous design note).

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;

use crate::domain_types::ResponseTimeoutMs;
use crate::domain_types::ResponseUuid;

/// Outcome delivered through a rendezvous slot.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// The remote execution succeeded with this JSON result.
    Success(Value),
    /// The remote execution raised an error.
    Failure {
        /// Name of the error kind raised remotely.
        kind: String,
        /// Human readable message.
        message: String,
        /// Best-effort remote stack trace text.
        trace: String,
    },
}

/// A request timed out waiting for its reply, or the multiplexer was
/// dropped before a reply arrived.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("response rendezvous for {0} timed out or was abandoned")]
pub struct ResponseTimedOut(pub ResponseUuid);

/// Table of in-flight requests awaiting a reply.
#[derive(Default)]
pub struct ResponseMultiplexer {
    slots: DashMap<ResponseUuid, oneshot::Sender<RemoteOutcome>>,
}

impl ResponseMultiplexer {
    /// Creates an empty multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh rendezvous slot, returning the receiver half the
    /// originator should await.
    pub fn register(&self, uuid: ResponseUuid) -> oneshot::Receiver<RemoteOutcome> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(uuid, tx);
        rx
    }

    /// Delivers an outcome to the slot for `uuid`, if one is still
    /// registered. A missing slot is benign — the originator may have
    /// restarted — and is logged rather than treated as an error.
    pub fn complete(&self, uuid: ResponseUuid, outcome: RemoteOutcome) {
        match self.slots.remove(&uuid) {
            Some((_, sender)) => {
                let _ = sender.send(outcome);
            }
            None => warn!(response_uuid = %uuid, "dropping reply for unknown or expired response_uuid"),
        }
    }

    /// Removes a slot without delivering anything, used when a bounded
    /// wait expires so a late reply cannot be delivered to a receiver no
    /// one is reading from.
    pub fn abandon(&self, uuid: &ResponseUuid) {
        self.slots.remove(uuid);
    }

    /// Awaits a reply on `receiver`, bounding the wait by `bound` and
    /// reclaiming `uuid`'s slot on expiry.
    ///
    /// # Errors
    /// Returns [`ResponseTimedOut`] if no reply arrives within `bound` or
    /// the sending half is dropped without a reply.
    pub async fn wait(
        &self,
        uuid: ResponseUuid,
        receiver: oneshot::Receiver<RemoteOutcome>,
        bound: ResponseTimeoutMs,
    ) -> Result<RemoteOutcome, ResponseTimedOut> {
        match timeout(bound.as_duration(), receiver).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) | Err(_) => {
                self.abandon(&uuid);
                Err(ResponseTimedOut(uuid))
            }
        }
    }
}
