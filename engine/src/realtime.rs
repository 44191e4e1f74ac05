//! Merges realtime pushes into the same convergence path as pull.
//!
//! A websocket frame is just another delivery of server events. The bridge
//! applies whatever the envelope carries through the [`Applier`] and tells
//! the caller when the frame revealed a gap that only a pull can close.

use crate::apply::{self, Applier};
use crate::protocol::RealtimeEnvelope;
use crate::store::LocalStore;
use crate::Result;

/// What a handled frame did, and whether a catch-up pull is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeOutcome {
    /// Net record changes applied from this frame.
    pub applied: usize,
    /// True when the frame shows the station missed earlier events.
    pub needs_pull: bool,
}

/// Applies realtime envelopes to the local store.
#[derive(Debug, Clone)]
pub struct RealtimeBridge {
    store: LocalStore,
    applier: Applier,
}

impl RealtimeBridge {
    pub fn new(store: LocalStore) -> Self {
        Self {
            applier: Applier::new(store.clone()),
            store,
        }
    }

    pub async fn handle(&self, envelope: &RealtimeEnvelope) -> Result<RealtimeOutcome> {
        let scope = envelope.scope;
        let local_seq = self.store.last_server_seq(scope).await?;

        let mut delta = match &envelope.delta {
            Some(delta) => delta.clone(),
            None => {
                let server_seq = envelope
                    .server_seq
                    .or_else(|| envelope.events.iter().map(|e| e.server_seq).max())
                    .unwrap_or(local_seq);
                apply::infer_delta(scope, &envelope.events, server_seq)
            }
        };

        // A frame whose earliest event is more than one step ahead of the
        // local watermark means events were broadcast while this station
        // was not listening. Apply what we have anyway; the rows are
        // idempotent upserts and the pull will fill the hole.
        let earliest = envelope.events.iter().map(|e| e.server_seq).min();
        let needs_pull = match earliest {
            Some(seq) => local_seq > 0 && seq > local_seq + 1,
            None => delta.is_empty() && delta.server_seq > local_seq,
        };

        // With a gap in front of us the watermark must stay put, or the
        // catch-up pull would start past the missed events.
        if needs_pull {
            delta.server_seq = delta.server_seq.min(local_seq);
        }

        let applied = self.applier.apply_delta(&delta).await?;
        if needs_pull {
            tracing::debug!(scope = %scope, local_seq, "realtime frame ahead of watermark");
        }
        Ok(RealtimeOutcome { applied, needs_pull })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{Delta, Snapshot};
    use crate::event::ServerSyncEvent;
    use crate::Scope;
    use chrono::Utc;
    use serde_json::json;

    fn frame_event(seq: i64, id: &str) -> ServerSyncEvent {
        ServerSyncEvent {
            id: format!("srv-{seq}"),
            scope: Scope::Tickets,
            kind: "ticket.issue".into(),
            payload: json!({"ticket": {"id": id, "code": format!("GALA-{id}"), "status": "issued"}}),
            occurred_at: Utc::now(),
            server_seq: seq,
            client_id: "box-office".into(),
            dedupe_key: None,
        }
    }

    async fn seeded_bridge(server_seq: i64) -> (LocalStore, RealtimeBridge) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let applier = Applier::new(store.clone());
        applier
            .apply_snapshot(&Snapshot {
                scope: Scope::Tickets,
                records: vec![],
                server_seq,
                captured_at: Utc::now(),
            })
            .await
            .unwrap();
        (store.clone(), RealtimeBridge::new(store))
    }

    #[tokio::test]
    async fn contiguous_frame_applies_without_pull() {
        let (store, bridge) = seeded_bridge(4).await;
        let outcome = bridge
            .handle(&RealtimeEnvelope {
                scope: Scope::Tickets,
                server_seq: Some(5),
                events: vec![frame_event(5, "t-1")],
                delta: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome, RealtimeOutcome { applied: 1, needs_pull: false });
        assert_eq!(store.last_server_seq(Scope::Tickets).await.unwrap(), 5);
        assert!(store.record(Scope::Tickets, "t-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn gapped_frame_requests_a_pull_but_still_applies() {
        let (store, bridge) = seeded_bridge(4).await;
        let outcome = bridge
            .handle(&RealtimeEnvelope {
                scope: Scope::Tickets,
                server_seq: Some(9),
                events: vec![frame_event(9, "t-9")],
                delta: None,
            })
            .await
            .unwrap();

        assert!(outcome.needs_pull);
        assert_eq!(outcome.applied, 1);
        assert!(store.record(Scope::Tickets, "t-9").await.unwrap().is_some());
        // The watermark holds at 4 so the catch-up pull replays 5 through 9.
        assert_eq!(store.last_server_seq(Scope::Tickets).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn explicit_delta_is_applied_as_is() {
        let (store, bridge) = seeded_bridge(4).await;
        let outcome = bridge
            .handle(&RealtimeEnvelope {
                scope: Scope::Tickets,
                server_seq: None,
                events: vec![],
                delta: Some(Delta {
                    scope: Scope::Tickets,
                    server_seq: 5,
                    upserts: vec![json!({"id": "t-2", "code": "GALA-2", "status": "issued"})],
                    deletes: vec![],
                }),
            })
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(!outcome.needs_pull);
        assert_eq!(store.last_server_seq(Scope::Tickets).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn bare_seq_nudge_requests_a_pull() {
        let (store, bridge) = seeded_bridge(4).await;
        let outcome = bridge
            .handle(&RealtimeEnvelope {
                scope: Scope::Tickets,
                server_seq: Some(12),
                events: vec![],
                delta: None,
            })
            .await
            .unwrap();

        assert!(outcome.needs_pull);
        assert_eq!(outcome.applied, 0);
        // A nudge alone never moves the watermark past data we have not seen.
        assert_eq!(store.last_server_seq(Scope::Tickets).await.unwrap(), 4);
    }
}
