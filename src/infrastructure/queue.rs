//! In-process job queue on tokio
//!
//! Delayed envelopes wait in a sleeping task and are then pushed onto an
//! unbounded channel drained by [`JobWorker`]. Jobs do not survive a restart.

use crate::application::jobs::JobRunner;
use crate::domain::jobs::{JobEnvelope, JobScheduler, Schedule};
use crate::domain::shared::{DomainError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct TokioJobScheduler {
    sender: mpsc::UnboundedSender<JobEnvelope>,
}

impl TokioJobScheduler {
    /// Scheduler and the receiving end for its worker
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobEnvelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn enqueue(&self, envelope: JobEnvelope, schedule: Schedule) -> Result<()> {
        let delay = schedule.delay_from(Utc::now());
        if delay.is_zero() {
            return self
                .sender
                .send(envelope)
                .map_err(|e| DomainError::Queue(format!("queue closed: {}", e.0.id)));
        }

        let sender = self.sender.clone();
        debug!("Delaying {} by {:?}", envelope.id, delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = sender.send(envelope) {
                warn!("Dropped delayed job {}: queue closed", e.0.id);
            }
        });
        Ok(())
    }
}

/// Drains the queue, one task per job
pub struct JobWorker {
    receiver: mpsc::UnboundedReceiver<JobEnvelope>,
    runner: Arc<JobRunner>,
    queue: String,
}

impl JobWorker {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<JobEnvelope>,
        runner: Arc<JobRunner>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            runner,
            queue: queue.into(),
        }
    }

    /// Run until `shutdown` resolves or every sender is gone
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Job worker listening on {}", self.queue);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Job worker stopping");
                    break;
                }
                next = self.receiver.recv() => {
                    let Some(envelope) = next else {
                        break;
                    };
                    if envelope.queue != self.queue {
                        warn!("Job {} addressed to queue {}, skipping", envelope.id, envelope.queue);
                        continue;
                    }
                    let runner = self.runner.clone();
                    tokio::spawn(async move {
                        runner.execute(envelope).await;
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::Job;
    use std::time::Duration;

    fn envelope(id: &str) -> JobEnvelope {
        JobEnvelope::new(id, "pd_queue", Job::ExpireCacheKey { key: "leg:CA1".into() })
    }

    #[tokio::test]
    async fn test_immediate_jobs_are_delivered_in_order() {
        let (scheduler, mut receiver) = TokioJobScheduler::channel();
        scheduler.enqueue(envelope("a"), Schedule::Now).await.unwrap();
        scheduler.enqueue(envelope("b"), Schedule::Now).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().id, "a");
        assert_eq!(receiver.recv().await.unwrap().id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_waits_for_its_delay() {
        let (scheduler, mut receiver) = TokioJobScheduler::channel();
        scheduler
            .enqueue(envelope("later"), Schedule::After(Duration::from_secs(8)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(receiver.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(receiver.recv().await.unwrap().id, "later");
    }
}
