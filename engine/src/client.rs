//! The sync protocol client: bootstrap, flush and pull.
//!
//! All three operations converge local state through the [`Applier`], and
//! flush never loses work: any failure puts the consumed batch back on the
//! queue before the error is surfaced.

use crate::apply::{self, Applier, Snapshot};
use crate::backoff::RetryPolicy;
use crate::event::{EventInput, PendingEvent};
use crate::protocol::{PullRequest, PushRequest, PushStatus};
use crate::queue::EventQueue;
use crate::store::LocalStore;
use crate::transport::Transport;
use crate::{Result, Scope, SyncError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Default number of queued events shipped per push.
pub const DEFAULT_BATCH_LIMIT: usize = 50;

/// Where a scope currently is in its sync lifecycle. Read by UI layers to
/// show per-scope activity; never consulted by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Bootstrapping,
    Flushing,
    Pulling,
}

/// Result of a bootstrap run for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub records: usize,
    pub server_seq: i64,
    pub pages: usize,
}

/// Result of flushing the queue for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub pushed: usize,
    pub status: Option<PushStatus>,
    pub server_seq: i64,
    pub changes: usize,
}

/// Result of pulling for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    pub events: usize,
    pub changes: usize,
    pub server_seq: i64,
}

/// Combined flush-then-pull result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub flush: FlushOutcome,
    pub pull: PullOutcome,
}

/// Client side of the sync protocol for one station.
#[derive(Clone)]
pub struct SyncClient {
    store: LocalStore,
    queue: EventQueue,
    applier: Applier,
    transport: Arc<dyn Transport>,
    client_id: String,
    policy: RetryPolicy,
    batch_limit: usize,
    phases: Arc<Mutex<HashMap<Scope, SyncPhase>>>,
}

impl SyncClient {
    pub fn new(store: LocalStore, transport: Arc<dyn Transport>, client_id: impl Into<String>) -> Self {
        Self {
            queue: EventQueue::new(store.clone()),
            applier: Applier::new(store.clone()),
            store,
            transport,
            client_id: client_id.into(),
            policy: RetryPolicy::default(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            phases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current lifecycle phase for a scope.
    pub fn phase(&self, scope: Scope) -> SyncPhase {
        match self.phases.lock() {
            Ok(phases) => phases.get(&scope).copied().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(&scope).copied().unwrap_or_default(),
        }
    }

    fn set_phase(&self, scope: Scope, phase: SyncPhase) {
        let mut phases = match self.phases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        phases.insert(scope, phase);
    }

    /// Record a local change. It lands on the durable queue immediately and
    /// ships on the next flush.
    pub async fn enqueue(&self, input: EventInput) -> Result<PendingEvent> {
        self.queue.enqueue(input).await
    }

    /// Fetch the full server state for a scope and replace the local table.
    ///
    /// Pages are accumulated in memory and applied as a single snapshot so a
    /// crash mid-bootstrap never leaves a half-written table behind.
    pub async fn bootstrap(&self, scope: Scope) -> Result<BootstrapOutcome> {
        self.set_phase(scope, SyncPhase::Bootstrapping);
        let result = self.bootstrap_inner(scope).await;
        self.set_phase(scope, SyncPhase::Idle);
        result
    }

    async fn bootstrap_inner(&self, scope: Scope) -> Result<BootstrapOutcome> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let mut server_seq = 0i64;
        let mut captured_at = chrono::Utc::now();

        loop {
            let page = self
                .with_retry(scope, || self.transport.bootstrap_page(scope, cursor.as_deref()))
                .await?;
            pages += 1;
            server_seq = server_seq.max(page.server_seq);
            captured_at = page.captured_at;
            records.extend(page.records);
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                return Err(SyncError::Corrupt(
                    "bootstrap page claims more data but carries no cursor".into(),
                ));
            }
        }

        let written = self
            .applier
            .apply_snapshot(&Snapshot {
                scope,
                records,
                server_seq,
                captured_at,
            })
            .await?;

        Ok(BootstrapOutcome {
            records: written,
            server_seq,
            pages,
        })
    }

    /// Ship queued events for a scope.
    ///
    /// The batch is consumed atomically up front. On any failure it is put
    /// back in order with `retry_count` bumped once, regardless of how many
    /// transport attempts the retry policy spent.
    pub async fn flush(&self, scope: Scope) -> Result<FlushOutcome> {
        self.set_phase(scope, SyncPhase::Flushing);
        let result = self.flush_inner(scope).await;
        self.set_phase(scope, SyncPhase::Idle);
        result
    }

    async fn flush_inner(&self, scope: Scope) -> Result<FlushOutcome> {
        let batch = self.queue.consume(scope, self.batch_limit as u32).await?;
        if batch.is_empty() {
            let server_seq = self.store.last_server_seq(scope).await?;
            return Ok(FlushOutcome {
                pushed: 0,
                status: None,
                server_seq,
                changes: 0,
            });
        }

        match self.push_batch(scope, &batch).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.queue.reenqueue(scope, &batch).await?;
                tracing::warn!(scope = %scope, error = %err, "flush failed, batch re-queued");
                Err(err)
            }
        }
    }

    async fn push_batch(&self, scope: Scope, batch: &[PendingEvent]) -> Result<FlushOutcome> {
        let mut attempt = 0u32;
        loop {
            // A fresh mutation id per attempt; the events keep their stable
            // ids and dedupe keys, so replays stay idempotent server-side.
            let request = PushRequest {
                scope,
                client_id: self.client_id.clone(),
                client_mutation_id: uuid::Uuid::new_v4().to_string(),
                events: batch.to_vec(),
                last_known_server_seq: self.store.last_server_seq(scope).await?,
            };

            match self.transport.push(&request).await {
                Ok(response) => {
                    match response.status {
                        PushStatus::Stale => return Err(SyncError::Stale { scope }),
                        // A duplicate means the server already holds this
                        // batch; the acknowledgement is as good as applied.
                        PushStatus::Applied | PushStatus::Duplicate => {}
                    }
                    let delta =
                        apply::infer_delta(scope, &response.events, response.server_seq);
                    let changes = self.applier.apply_delta(&delta).await?;
                    tracing::info!(
                        scope = %scope,
                        pushed = batch.len(),
                        server_seq = response.server_seq,
                        "flush acknowledged"
                    );
                    return Ok(FlushOutcome {
                        pushed: batch.len(),
                        status: Some(response.status),
                        server_seq: response.server_seq,
                        changes,
                    });
                }
                Err(err) if err.is_retryable() => match self.policy.delay_for(attempt) {
                    Some(delay) => {
                        tracing::debug!(scope = %scope, attempt, ?delay, "push retry");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Pull everything newer than the local watermark.
    ///
    /// Pages are requested and applied until the server reports no more,
    /// so the returned outcome always describes a fully drained scope;
    /// callers never need to loop on a has-more flag themselves.
    pub async fn pull(&self, scope: Scope) -> Result<PullOutcome> {
        self.set_phase(scope, SyncPhase::Pulling);
        let result = self.pull_inner(scope).await;
        self.set_phase(scope, SyncPhase::Idle);
        result
    }

    async fn pull_inner(&self, scope: Scope) -> Result<PullOutcome> {
        let mut events = 0usize;
        let mut changes = 0usize;
        let mut server_seq = self.store.last_server_seq(scope).await?;

        loop {
            let request = PullRequest {
                scope,
                last_server_seq: self.store.last_server_seq(scope).await?,
            };
            let response = self
                .with_retry(scope, || self.transport.pull(&request))
                .await?;

            events += response.events.len();
            server_seq = server_seq.max(response.server_seq);
            let delta = apply::infer_delta(scope, &response.events, response.server_seq);
            changes += self.applier.apply_delta(&delta).await?;

            if !response.has_more {
                break;
            }
        }

        tracing::debug!(scope = %scope, events, changes, server_seq, "pull complete");
        Ok(PullOutcome {
            events,
            changes,
            server_seq,
        })
    }

    /// Flush then pull. A stale flush triggers a pull and one more flush,
    /// which is the standard recovery for a station that fell behind.
    pub async fn sync_cycle(&self, scope: Scope) -> Result<CycleOutcome> {
        let flush = match self.flush(scope).await {
            Ok(outcome) => outcome,
            Err(SyncError::Stale { .. }) => {
                tracing::info!(scope = %scope, "stale flush, pulling before retry");
                self.pull(scope).await?;
                self.flush(scope).await?
            }
            Err(err) => return Err(err),
        };
        let pull = self.pull(scope).await?;
        Ok(CycleOutcome { flush, pull })
    }

    async fn with_retry<T, F, Fut>(&self, scope: Scope, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => match self.policy.delay_for(attempt) {
                    Some(delay) => {
                        tracing::debug!(scope = %scope, attempt, ?delay, "transient failure, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}
