//! Background sync driver.
//!
//! The scheduler owns a [`SyncClient`] and reacts to [`SyncSignal`]s sent
//! through its handle, with a periodic full cycle as a safety net. Platform
//! wake mechanisms (connectivity listeners, OS background-sync callbacks)
//! plug in as [`WakeSource`]s that feed the same channel.

use crate::client::SyncClient;
use crate::{Scope, SyncError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reasons to wake the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// A local event was queued for the scope; flush soon.
    Queued(Scope),
    /// Connectivity came back; run a full cycle for every scope.
    Online,
    /// Another component flushed the scope; every scope pulls, this one first.
    Flushed(Scope),
    /// A component hit an error worth surfacing in the logs.
    Error(String),
}

/// Anything that can produce wake signals, typically a platform listener.
#[async_trait]
pub trait WakeSource: Send + 'static {
    /// The next signal, or `None` once the source is exhausted.
    async fn wait(&mut self) -> Option<SyncSignal>;
}

/// Cloneable sender half used to wake the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SyncSignal>,
}

impl SchedulerHandle {
    pub fn notify(&self, signal: SyncSignal) {
        // A closed channel just means the scheduler already shut down.
        let _ = self.tx.send(signal);
    }

    /// Forward every signal from a wake source into the scheduler.
    pub fn attach<S: WakeSource>(&self, mut source: S) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = source.wait().await {
                handle.notify(signal);
            }
        })
    }
}

/// Drives flushes and pulls in the background.
pub struct SyncScheduler {
    client: SyncClient,
    rx: mpsc::UnboundedReceiver<SyncSignal>,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(client: SyncClient, interval: Duration) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                rx,
                interval,
            },
            SchedulerHandle { tx },
        )
    }

    /// Run until every handle is dropped.
    pub async fn run(self) {
        let Self {
            client,
            mut rx,
            interval,
        } = self;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The interval fires immediately once; skip that initial tick so
        // startup order stays with the caller's explicit bootstrap.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for scope in Scope::ALL {
                        cycle(&client, scope).await;
                    }
                }
                signal = rx.recv() => match signal {
                    Some(signal) => dispatch(&client, signal).await,
                    None => {
                        tracing::debug!("all scheduler handles dropped, stopping");
                        break;
                    }
                },
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn dispatch(client: &SyncClient, signal: SyncSignal) {
    match signal {
        SyncSignal::Queued(scope) => {
            if let Err(err) = client.flush(scope).await {
                log_failure(scope, "flush", &err);
                if err.is_stale() {
                    cycle(client, scope).await;
                }
            }
        }
        SyncSignal::Online => {
            for scope in Scope::ALL {
                cycle(client, scope).await;
            }
        }
        SyncSignal::Flushed(origin) => {
            // A flush elsewhere may have bumped any scope's head, so all of
            // them pull; the flushed scope goes first.
            let rest = Scope::ALL.into_iter().filter(|scope| *scope != origin);
            for scope in std::iter::once(origin).chain(rest) {
                if let Err(err) = client.pull(scope).await {
                    log_failure(scope, "pull", &err);
                }
            }
        }
        SyncSignal::Error(message) => {
            tracing::warn!(%message, "component reported a sync error");
        }
    }
}

async fn cycle(client: &SyncClient, scope: Scope) {
    if let Err(err) = client.sync_cycle(scope).await {
        log_failure(scope, "cycle", &err);
    }
}

fn log_failure(scope: Scope, operation: &str, err: &SyncError) {
    if err.is_auth() {
        tracing::error!(scope = %scope, operation, error = %err, "sync needs a fresh session");
    } else {
        tracing::warn!(scope = %scope, operation, error = %err, "background sync failed");
    }
}
