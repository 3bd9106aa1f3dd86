//! Bounded notification queue drained by a fixed-size worker pool.
//!
//! The ingest path only enqueues; delivery runs on worker tasks that are not
//! tied to the caller. When every sender is dropped the dispatcher stops
//! accepting work, finishes queued and in-flight jobs, then returns.

use crate::errors::{Error, Result};
use crate::metrics::{DISPATCH_QUEUE_DEPTH, DISPATCH_QUEUE_FULL_TOTAL};
use crate::model::Alert;
use crate::notify::NotificationRouter;
use prometheus::Gauge;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Alert>,
    /// Counted up before the send so a fast worker never drives it negative.
    depth: Gauge,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub jobs: usize,
    pub delivered: usize,
    pub crashed: usize,
}

impl DispatchQueue {
    /// Hand an alert to the worker pool without waiting. When the queue is
    /// full the send is parked on its own task, so dropping the caller can
    /// never lose an alert that was already stored.
    pub fn enqueue(&self, alert: Alert) -> Result<()> {
        self.depth.inc();
        match self.tx.try_send(alert) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(alert)) => {
                DISPATCH_QUEUE_FULL_TOTAL.inc();
                debug!(alert_id = %alert.id, "Dispatch queue full, parking alert until a slot frees");
                let tx = self.tx.clone();
                let depth = self.depth.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(alert).await {
                        depth.dec();
                        error!(alert_id = %e.0.id, "Dispatch queue closed before parked alert was queued");
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.depth.dec();
                error!("Dispatch queue closed, cannot enqueue alert");
                Err(Error::DispatchQueueClosed)
            }
        }
    }
}

pub fn dispatch_queue(capacity: usize) -> (DispatchQueue, mpsc::Receiver<Alert>) {
    queue_with_gauge(capacity, DISPATCH_QUEUE_DEPTH.clone())
}

fn queue_with_gauge(capacity: usize, depth: Gauge) -> (DispatchQueue, mpsc::Receiver<Alert>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DispatchQueue { tx, depth }, rx)
}

pub fn spawn_dispatcher(
    router: NotificationRouter,
    capacity: usize,
    workers: usize,
) -> (DispatchQueue, JoinHandle<DispatchStats>) {
    let (queue, rx) = dispatch_queue(capacity);
    let handle = tokio::spawn(run_dispatcher(rx, router, workers));
    (queue, handle)
}

pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<Alert>,
    router: NotificationRouter,
    workers: usize,
) -> DispatchStats {
    let workers = workers.max(1);
    info!("Starting dispatcher with {} workers", workers);

    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks: JoinSet<usize> = JoinSet::new();
    let mut stats = DispatchStats::default();

    while let Some(alert) = rx.recv().await {
        DISPATCH_QUEUE_DEPTH.dec();
        stats.jobs += 1;

        // Holding the next job until a worker frees up keeps the queue
        // bounded all the way back to the producers.
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let router = router.clone();
        tasks.spawn(async move {
            let _permit = permit;
            router.dispatch_for_alert(&alert).await.delivered()
        });

        while let Some(done) = tasks.try_join_next() {
            record(&mut stats, done);
        }
    }

    info!("Dispatch queue closed, draining {} in-flight jobs", tasks.len());
    while let Some(done) = tasks.join_next().await {
        record(&mut stats, done);
    }

    info!(
        "Dispatcher stopped after {} jobs ({} deliveries)",
        stats.jobs, stats.delivered
    );
    stats
}

fn record(stats: &mut DispatchStats, done: std::result::Result<usize, tokio::task::JoinError>) {
    match done {
        Ok(delivered) => stats.delivered += delivered,
        Err(e) => {
            stats.crashed += 1;
            error!("Dispatch task failed: {}", e);
        }
    }
}
