use crate::error::WampError;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use wamp_proto::{Dict, List};

/// The operation a pending request id was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Call,
    Register,
    Unregister,
    Subscribe,
    Unsubscribe,
    Publish,
}

/// Typed success payload delivered back to a suspended caller.
#[derive(Debug)]
pub enum Reply {
    Result {
        details: Dict,
        args: List,
        kwargs: Dict,
    },
    Registered {
        registration_id: u64,
    },
    Unregistered,
    Subscribed {
        subscription_id: u64,
    },
    Unsubscribed,
    Published {
        publication_id: u64,
    },
    /// Fire-and-forget publish handed to the transport; no router
    /// acknowledgement was requested. Never stored in the registry.
    Accepted,
}

impl Reply {
    fn kind(&self) -> RequestKind {
        match self {
            Reply::Result { .. } => RequestKind::Call,
            Reply::Registered { .. } => RequestKind::Register,
            Reply::Unregistered => RequestKind::Unregister,
            Reply::Subscribed { .. } => RequestKind::Subscribe,
            Reply::Unsubscribed => RequestKind::Unsubscribe,
            Reply::Published { .. } | Reply::Accepted => RequestKind::Publish,
        }
    }
}

/// Completion slot for one pending request.
pub type Replier = oneshot::Sender<Result<Reply, WampError>>;

struct Pending {
    kind: RequestKind,
    created_at: Instant,
    replier: Replier,
}

/// Single source of truth for what the session is waiting on.
///
/// Request ids are client-generated, unique among pending requests and
/// allocated monotonically. Every entry is completed exactly once: by
/// `resolve`, by `reject`, or by `drain` at session teardown.
pub struct PendingRequests {
    next_id: u64,
    pending: HashMap<u64, Pending>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates a fresh request id and records its completion slot.
    /// Never blocks.
    pub fn allocate(&mut self, kind: RequestKind, replier: Replier) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            Pending {
                kind,
                created_at: Instant::now(),
                replier,
            },
        );
        id
    }

    /// Hands out a fresh request id without recording a slot, for
    /// operations the router never answers (fire-and-forget publish).
    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Completes the matching slot with a success payload.
    ///
    /// A response for an id with no pending entry, or whose payload does
    /// not fit the recorded request kind, means the router and client
    /// have desynchronized: surfaced as a protocol violation, never
    /// swallowed. A caller that has gone away (cancellation or timeout)
    /// is not a violation; the late reply is discarded.
    pub fn resolve(&mut self, id: u64, reply: Reply) -> Result<(), WampError> {
        let entry = self.take(id, reply.kind())?;
        if entry.replier.send(Ok(reply)).is_err() {
            debug!(
                "discarding late reply for abandoned request {} (pending {:?})",
                id,
                entry.created_at.elapsed()
            );
        }
        Ok(())
    }

    /// Completes the matching slot with an error.
    pub fn reject(&mut self, id: u64, kind: RequestKind, error: WampError) -> Result<(), WampError> {
        let entry = self.take(id, kind)?;
        if entry.replier.send(Err(error)).is_err() {
            debug!("discarding late error for abandoned request {}", id);
        }
        Ok(())
    }

    /// Fails every still-pending slot with `SessionClosed`, leaving the
    /// registry empty. Idempotent.
    pub fn drain(&mut self, reason: &str) {
        if !self.pending.is_empty() {
            warn!(
                "draining {} pending request(s): {}",
                self.pending.len(),
                reason
            );
        }
        for (id, entry) in self.pending.drain() {
            if entry.replier.send(Err(WampError::SessionClosed)).is_err() {
                debug!("pending request {} already abandoned at drain", id);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    fn take(&mut self, id: u64, kind: RequestKind) -> Result<Pending, WampError> {
        let entry = self.pending.remove(&id).ok_or_else(|| {
            WampError::ProtocolViolation(format!("response for unknown request id {}", id))
        })?;
        if entry.kind != kind {
            return Err(WampError::ProtocolViolation(format!(
                "response kind {:?} does not match pending {:?} for request {}",
                kind, entry.kind, id
            )));
        }
        Ok(entry)
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn slot() -> (Replier, oneshot::Receiver<Result<Reply, WampError>>) {
        oneshot::channel()
    }

    #[test]
    fn test_allocate_unique_monotonic_ids() {
        let mut registry = PendingRequests::new();
        let (tx1, _rx1) = slot();
        let (tx2, _rx2) = slot();
        let a = registry.allocate(RequestKind::Call, tx1);
        let b = registry.allocate(RequestKind::Subscribe, tx2);
        assert!(b > a);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_matching_slot() {
        let mut registry = PendingRequests::new();
        let (tx, rx) = slot();
        let id = registry.allocate(RequestKind::Register, tx);

        registry
            .resolve(
                id,
                Reply::Registered {
                    registration_id: 55,
                },
            )
            .unwrap();

        match rx.await.unwrap().unwrap() {
            Reply::Registered { registration_id } => assert_eq!(registration_id, 55),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_id_is_protocol_violation() {
        let mut registry = PendingRequests::new();
        let result = registry.resolve(
            999,
            Reply::Result {
                details: Default::default(),
                args: vec![],
                kwargs: Default::default(),
            },
        );
        assert!(matches!(result, Err(WampError::ProtocolViolation(_))));
    }

    #[test]
    fn test_kind_mismatch_is_protocol_violation() {
        let mut registry = PendingRequests::new();
        let (tx, _rx) = slot();
        let id = registry.allocate(RequestKind::Call, tx);

        let result = registry.resolve(
            id,
            Reply::Subscribed {
                subscription_id: 1,
            },
        );
        assert!(matches!(result, Err(WampError::ProtocolViolation(_))));
    }

    #[test]
    fn test_abandoned_slot_discards_late_reply() {
        let mut registry = PendingRequests::new();
        let (tx, rx) = slot();
        let id = registry.allocate(RequestKind::Call, tx);
        drop(rx); // caller cancelled

        // Discarded, not a violation.
        registry
            .resolve(
                id,
                Reply::Result {
                    details: Default::default(),
                    args: vec![],
                    kwargs: Default::default(),
                },
            )
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drain_fails_all_and_is_idempotent() {
        let mut registry = PendingRequests::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = slot();
            registry.allocate(RequestKind::Call, tx);
            receivers.push(rx);
        }

        registry.drain("session torn down");
        assert!(registry.is_empty());

        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(WampError::SessionClosed)));
        }

        // Second drain is a no-op.
        registry.drain("again");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reject_carries_application_error() {
        let mut registry = PendingRequests::new();
        let (tx, rx) = slot();
        let id = registry.allocate(RequestKind::Call, tx);

        registry
            .reject(
                id,
                RequestKind::Call,
                WampError::Application {
                    error: "wamp.error.no_such_procedure".to_string(),
                    args: vec![],
                    kwargs: Default::default(),
                },
            )
            .unwrap();

        match rx.await.unwrap() {
            Err(WampError::Application { error, .. }) => {
                assert_eq!(error, "wamp.error.no_such_procedure")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
