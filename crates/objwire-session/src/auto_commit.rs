//! Periodic background commit.
//!
//! A ticker task sends a commit request down a channel at every interval.
//! A consumer task receives requests and commits every session. The
//! consumer runs under a supervisor that starts a fresh consumer whenever
//! the previous one panics, so one bad commit never stops the schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::manager::SessionManager;

/// Handle to a running auto-commit schedule.
pub struct AutoCommitter {
    shutdown: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    restarts: Arc<AtomicU64>,
}

impl AutoCommitter {
    pub(crate) fn start(runtime: &Handle, manager: Weak<SessionManager>, period: Duration) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        // Capacity one: a request that arrives while a commit is still
        // running is dropped rather than queued.
        let (requests, request_rx) = mpsc::channel::<()>(1);
        let restarts = Arc::new(AtomicU64::new(0));

        let ticker = runtime.spawn(tick_loop(period, requests, shutdown_rx));
        let supervisor = runtime.spawn(supervise(
            runtime.clone(),
            Arc::new(AsyncMutex::new(request_rx)),
            manager,
            Arc::clone(&restarts),
        ));
        info!(interval_ms = period.as_millis() as u64, "auto-commit started");
        Self {
            shutdown,
            ticker,
            supervisor,
            restarts,
        }
    }

    /// How many times the commit loop has been restarted after a panic.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Stop ticking and wait for the commit loop to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.ticker.await {
            warn!(error = %e, "auto-commit ticker ended abnormally");
        }
        if let Err(e) = self.supervisor.await {
            warn!(error = %e, "auto-commit supervisor ended abnormally");
        }
        info!("auto-commit stopped");
    }
}

impl std::fmt::Debug for AutoCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoCommitter")
            .field("restarts", &self.restarts())
            .finish()
    }
}

async fn tick_loop(period: Duration, requests: mpsc::Sender<()>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if requests.try_send(()).is_err() && requests.is_closed() {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    // Dropping `requests` closes the channel and ends the commit loop.
}

async fn supervise(
    runtime: Handle,
    requests: Arc<AsyncMutex<mpsc::Receiver<()>>>,
    manager: Weak<SessionManager>,
    restarts: Arc<AtomicU64>,
) {
    loop {
        let consumer = runtime.spawn(commit_loop(Arc::clone(&requests), manager.clone()));
        match consumer.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                let count = restarts.fetch_add(1, Ordering::SeqCst) + 1;
                error!(restarts = count, "auto-commit loop panicked, restarting");
            }
            Err(e) => {
                warn!(error = %e, "auto-commit loop cancelled");
                break;
            }
        }
    }
}

async fn commit_loop(requests: Arc<AsyncMutex<mpsc::Receiver<()>>>, manager: Weak<SessionManager>) {
    let mut requests = requests.lock().await;
    while requests.recv().await.is_some() {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let report = manager.commit_all();
        if report.is_success() {
            if !report.is_noop() {
                debug!(
                    flushed = report.objects_flushed,
                    deleted = report.objects_deleted,
                    "auto-commit pass"
                );
            }
        } else {
            for (identity, failure) in &report.failures {
                warn!(
                    class_id = %identity.class_id,
                    object_id = identity.object_id,
                    error = %failure,
                    "auto-commit failed for object"
                );
            }
        }
    }
}
