//! # Greenroom Engine
//!
//! An offline-first sync engine for the Greenroom member portal.
//!
//! This crate keeps a station (front-of-house tablet, box office laptop,
//! props workshop PC) fully usable without connectivity. Local changes go
//! onto a durable event queue, server state lives in local SQLite tables,
//! and a small protocol client reconciles the two whenever the network
//! allows.
//!
//! ## Design Principles
//!
//! - **Local first**: every read and write works against SQLite, online or not
//! - **One convergence path**: snapshots, flush acks, pulls and realtime
//!   frames all flow through the same [`Applier`]
//! - **Idempotent everywhere**: stable event ids, dedupe keys and a
//!   monotonic watermark make redundant delivery harmless
//! - **Swappable wire**: all server IO goes through the [`Transport`] trait,
//!   so tests run against scripted fakes
//!
//! ## Core Concepts
//!
//! ### Scopes
//!
//! Synchronization is partitioned into [`Scope`]s, one per domain the
//! portal syncs: `inventory` (props and costumes) and `tickets`
//! (admissions). Each scope has its own record table, watermark and queue
//! ordering.
//!
//! ### The event queue
//!
//! Local changes are [`PendingEvent`]s. Events with the same dedupe key
//! merge in place, so ten quick edits to one prop ship as one event.
//!
//! ### The watermark
//!
//! Per scope, `sync_state.last_server_seq` records the highest server
//! sequence number applied locally. It only moves forward.
//!
//! ## Quick Start
//!
//! ```no_run
//! use greenroom_engine::{
//!     EventInput, EventType, HttpTransport, LocalStore, Scope, SyncClient, Transport,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> greenroom_engine::Result<()> {
//! let store = LocalStore::open("sqlite://portal.db").await?;
//!
//! let transport = HttpTransport::new("https://sync.greenroom.example", Duration::from_secs(10))?;
//! transport.set_auth_token(Some("crew-token".into()));
//! let client = SyncClient::new(store, Arc::new(transport), "foh-tablet-1");
//!
//! // Record a local change; it is durable before this returns.
//! client
//!     .enqueue(EventInput {
//!         event_type: EventType::InventoryUpsert,
//!         payload: json!({"id": "prop-77", "sku": "SWORD-01", "quantity": 3}),
//!         dedupe_key: "inventory:prop-77".into(),
//!     })
//!     .await?;
//!
//! // Ship it and catch up with everyone else.
//! client.sync_cycle(Scope::Inventory).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Background Sync
//!
//! Wrap the client in a [`SyncScheduler`] and feed it [`SyncSignal`]s from
//! your platform's connectivity and background-sync hooks. Websocket frames
//! go through the [`RealtimeBridge`], which reuses the pull apply path.

pub mod apply;
pub mod backoff;
pub mod client;
pub mod error;
pub mod event;
pub mod protocol;
pub mod queue;
pub mod realtime;
pub mod record;
pub mod scheduler;
pub mod scope;
pub mod store;
pub mod transport;

pub use apply::{Applier, Delta, Snapshot};
pub use backoff::RetryPolicy;
pub use client::{BootstrapOutcome, CycleOutcome, FlushOutcome, PullOutcome, SyncClient, SyncPhase};
pub use error::{Result, SyncError};
pub use event::{AuditAction, AuditRecord, EventInput, EventType, PendingEvent, ServerSyncEvent};
pub use protocol::{
    BootstrapPage, MutationReceipt, PullRequest, PullResponse, PushRequest, PushResponse,
    PushStatus, RealtimeEnvelope,
};
pub use queue::EventQueue;
pub use realtime::{RealtimeBridge, RealtimeOutcome};
pub use record::{InventoryItemRecord, TicketRecord, TicketStatus};
pub use scheduler::{SchedulerHandle, SyncScheduler, SyncSignal, WakeSource};
pub use scope::Scope;
pub use store::{LocalStore, SyncState};
pub use transport::{HttpTransport, Transport};

/// Server-assigned, globally ordered event sequence number.
pub type ServerSeq = i64;
/// Stable identifier a station uses to sign its pushes.
pub type ClientId = String;
