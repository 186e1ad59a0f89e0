// Background document generation with retry
// Jobs are produced after a transition commits; failures only log.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, FibonacciBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, error, info, warn};

use super::{DocumentGenerator, RenderError};
use crate::petitions::{ActionType, PetitionId, StoredArtifact, UserId};

/// Request to regenerate a petition's document after a committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentJob {
    pub petition_id: PetitionId,
    pub requested_by: UserId,
    /// The action whose commit produced this job.
    pub trigger: ActionType,
}

/// Sending half handed to the engine.
#[derive(Debug, Clone)]
pub struct DocumentQueue {
    sender: Option<mpsc::Sender<DocumentJob>>,
}

impl DocumentQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DocumentJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A queue that drops every job; artifacts are only produced on demand.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Hands the job off without waiting. Returns false when it was dropped,
    /// in which case the petition's latest artifact is stale.
    pub fn enqueue(&self, job: DocumentJob) -> bool {
        let Some(sender) = &self.sender else {
            debug!(petition_id = %job.petition_id, "Document queue disabled, skipping job");
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(
                    petition_id = %job.petition_id,
                    trigger = %job.trigger,
                    "Document queue full; artifact left stale"
                );
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(
                    petition_id = %job.petition_id,
                    trigger = %job.trigger,
                    "Document worker stopped; artifact left stale"
                );
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX).max(1);
        let use_jitter = self.jitter;
        FibonacciBackoff::from_millis(base_ms)
            .max_delay(self.max_delay)
            .map(|delay| if use_jitter { jitter(delay) } else { delay })
            .take(self.max_attempts.saturating_sub(1) as usize)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub generated: u64,
    pub failed: u64,
}

pub struct DocumentWorker {
    receiver: mpsc::Receiver<DocumentJob>,
    generator: Arc<dyn DocumentGenerator>,
    retry: RetryPolicy,
}

impl DocumentWorker {
    pub fn new(
        receiver: mpsc::Receiver<DocumentJob>,
        generator: Arc<dyn DocumentGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            receiver,
            generator,
            retry,
        }
    }

    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }

    /// Processes jobs until every queue handle is dropped.
    pub async fn run(mut self) -> WorkerStats {
        info!("Document worker started");
        let mut stats = WorkerStats::default();

        while let Some(job) = self.receiver.recv().await {
            match self.process(job).await {
                Ok(artifact) => {
                    stats.generated += 1;
                    debug!(
                        petition_id = %job.petition_id,
                        version = artifact.version,
                        "Document job completed"
                    );
                }
                Err(err) => {
                    stats.failed += 1;
                    error!(
                        petition_id = %job.petition_id,
                        trigger = %job.trigger,
                        error = %err,
                        "Document generation failed; workflow state unchanged"
                    );
                }
            }
        }

        info!(
            generated = stats.generated,
            failed = stats.failed,
            "Document worker stopped"
        );
        stats
    }

    async fn process(&self, job: DocumentJob) -> Result<StoredArtifact, RenderError> {
        let generator = Arc::clone(&self.generator);
        RetryIf::spawn(
            self.retry.delays(),
            move || {
                let generator = Arc::clone(&generator);
                async move { generator.generate(job.petition_id, job.requested_by).await }
            },
            |err: &RenderError| {
                let retry = err.is_transient();
                if retry {
                    warn!(petition_id = %job.petition_id, error = %err, "Retrying document generation");
                }
                retry
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::MockDocumentGenerator;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn artifact(petition_id: PetitionId, version: u32) -> StoredArtifact {
        StoredArtifact {
            id: crate::petitions::ArtifactId(i64::from(version)),
            petition_id,
            version,
            file_name: format!("petition_{petition_id}_v{version}.txt"),
            artifact_ref: String::new(),
            size_bytes: 10,
            is_final: false,
            generation_method: "text".to_string(),
            generated_by: None,
            created_at: Utc::now(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn job(id: i64) -> DocumentJob {
        DocumentJob {
            petition_id: PetitionId(id),
            requested_by: UserId(1),
            trigger: ActionType::Approved,
        }
    }

    #[test]
    fn test_retry_delays_follow_attempt_budget() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(15),
            jitter: false,
        };
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_millis(15)
            ]
        );

        let single = RetryPolicy {
            max_attempts: 1,
            ..policy
        };
        assert!(single.delays().is_empty());
    }

    #[test]
    fn test_disabled_queue_drops_jobs() {
        assert!(!DocumentQueue::disabled().enqueue(job(1)));
    }

    #[test]
    fn test_full_queue_reports_drop() {
        let (queue, _receiver) = DocumentQueue::channel(1);
        assert!(queue.enqueue(job(1)));
        assert!(!queue.enqueue(job(2)));
    }

    #[tokio::test]
    async fn test_worker_retries_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut generator = MockDocumentGenerator::new();
        generator.expect_generate().returning(move |petition_id, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RenderError::Renderer("latex crashed".to_string()))
            } else {
                Ok(artifact(petition_id, 3))
            }
        });

        let (queue, receiver) = DocumentQueue::channel(4);
        let handle = DocumentWorker::new(receiver, Arc::new(generator), fast_retry()).spawn();
        assert!(queue.enqueue(job(9)));
        drop(queue);

        let stats = handle.await.unwrap();
        assert_eq!(stats, WorkerStats { generated: 1, failed: 0 });
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_worker_gives_up_on_missing_petition() {
        let mut generator = MockDocumentGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|petition_id, _| Err(RenderError::PetitionNotFound(petition_id)));

        let (queue, receiver) = DocumentQueue::channel(4);
        let handle = DocumentWorker::new(receiver, Arc::new(generator), fast_retry()).spawn();
        assert!(queue.enqueue(job(4)));
        drop(queue);

        let stats = handle.await.unwrap();
        assert_eq!(stats, WorkerStats { generated: 0, failed: 1 });
    }
}
