//! Wire-shape tests for the sync protocol as served by this server.
//!
//! The engine crate owns the request and response types; these tests pin
//! the JSON the server is expected to speak.

use chrono::Utc;
use greenroom_engine::{
    PendingEvent, PullRequest, PushRequest, PushResponse, PushStatus, RealtimeEnvelope, Scope,
    ServerSyncEvent,
};
use serde_json::json;

fn sample_event() -> PendingEvent {
    PendingEvent {
        id: "e-1".to_string(),
        event_type: greenroom_engine::EventType::InventoryUpsert,
        payload: json!({"id": "prop-1", "sku": "SKU-1", "quantity": 2}),
        created_at: Utc::now(),
        retry_count: 0,
        dedupe_key: "inventory:prop-1".to_string(),
    }
}

#[test]
fn push_request_uses_camel_case_wire_names() {
    let request = PushRequest {
        scope: Scope::Inventory,
        client_id: "foh-tablet".to_string(),
        client_mutation_id: "mut-1".to_string(),
        events: vec![sample_event()],
        last_known_server_seq: 12,
    };

    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["scope"], "inventory");
    assert_eq!(value["clientId"], "foh-tablet");
    assert_eq!(value["clientMutationId"], "mut-1");
    assert_eq!(value["lastKnownServerSeq"], 12);
    assert_eq!(value["events"][0]["type"], "inventory.upsert");
    assert_eq!(value["events"][0]["dedupeKey"], "inventory:prop-1");
}

#[test]
fn push_response_round_trips() {
    let body = json!({
        "status": "applied",
        "serverSeq": 7,
        "events": [],
        "skipped": ["e-9"],
    });

    let response: PushResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.status, PushStatus::Applied);
    assert_eq!(response.server_seq, 7);
    assert_eq!(response.skipped, vec!["e-9".to_string()]);
    assert!(response.mutation.is_none());
}

#[test]
fn pull_request_shape() {
    let value = serde_json::to_value(PullRequest {
        scope: Scope::Tickets,
        last_server_seq: 40,
    })
    .unwrap();
    assert_eq!(value, json!({"scope": "tickets", "lastServerSeq": 40}));
}

#[test]
fn realtime_frame_parses_into_an_envelope() {
    let frame = json!({
        "scope": "tickets",
        "serverSeq": 9,
        "events": [{
            "id": "e-5",
            "scope": "tickets",
            "type": "ticket.issue",
            "payload": {"ticket": {"id": "t-5", "code": "GALA-5", "status": "issued"}},
            "occurredAt": "2026-08-30T19:30:00.000000Z",
            "serverSeq": 9,
            "clientId": "box-office",
        }],
    });

    let envelope: RealtimeEnvelope = serde_json::from_value(frame).unwrap();
    assert_eq!(envelope.scope, Scope::Tickets);
    assert_eq!(envelope.server_seq, Some(9));
    assert!(envelope.delta.is_none());
    let event: &ServerSyncEvent = &envelope.events[0];
    assert_eq!(event.kind, "ticket.issue");
    assert_eq!(event.server_seq, 9);
}
