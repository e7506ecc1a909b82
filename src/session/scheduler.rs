//! Periodic heartbeat and recovery tasks
//!
//! Each task runs on its own interval and is stopped through a watch
//! channel. [`PeriodicTask::stop`] returns only after the task has exited,
//! so no tick begins once a disconnect has completed. A tick already in
//! progress is allowed to finish.

use crate::queue::OfflineQueue;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period`, first run one period from now
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // First tick completes immediately, skip it

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!(task = name, "Periodic task stopped");
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                error!(task = self.name, "Periodic task ended with error: {}", e);
            }
        }
    }
}

/// Outcome of one recovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub delivered: usize,
    pub requeued: usize,
    pub lost: usize,
}

/// Take one batch off the queue and hand each record to `republish`
///
/// Records `republish` rejects go back onto the tail of the queue and the
/// pass continues with the rest of the batch.
pub async fn drain_once<F, Fut>(queue: &OfflineQueue, batch_size: usize, mut republish: F) -> RecoveryReport
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut report = RecoveryReport::default();

    match queue.exists().await {
        Ok(true) => {}
        Ok(false) => return report,
        Err(e) => {
            warn!(error = %e, "Offline queue unavailable, skipping recovery pass");
            return report;
        }
    }

    let records = match queue.dequeue_batch(batch_size).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "Failed to read recovery batch");
            return report;
        }
    };

    for record in records {
        if republish(record.message.clone()).await {
            report.delivered += 1;
            continue;
        }
        match queue.enqueue(&record.message).await {
            Ok(()) => report.requeued += 1,
            Err(e) => {
                error!(record_id = record.id, error = %e, "Dropping recovery record");
                report.lost += 1;
            }
        }
    }

    if report != RecoveryReport::default() {
        debug!(
            delivered = report.delivered,
            requeued = report.requeued,
            lost = report.lost,
            "Recovery pass finished"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = PeriodicTask::spawn("test", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        task.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        assert_eq!(after_stop, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_drain_once_on_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let queue = OfflineQueue::new(dir.path().join("_recover.sqlite"));

        let report = drain_once(&queue, 10, |_| async { true }).await;
        assert_eq!(report, RecoveryReport::default());
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn test_drain_once_requeues_failures_and_continues() {
        let dir = TempDir::new().unwrap();
        let queue = OfflineQueue::new(dir.path().join("_recover.sqlite"));
        for message in ["a", "b", "c", "d"] {
            queue.enqueue(message).await.unwrap();
        }

        let mut seen = Vec::new();
        let report = drain_once(&queue, 3, |message| {
            seen.push(message.clone());
            async move { message != "b" }
        })
        .await;

        assert_eq!(seen, ["a", "b", "c"]);
        assert_eq!(
            report,
            RecoveryReport {
                delivered: 2,
                requeued: 1,
                lost: 0
            }
        );

        let remaining = queue.dequeue_batch(10).await.unwrap();
        let messages: Vec<_> = remaining.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["d", "b"]);
    }
}
