//! Claim / compute / commit loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fusion_core::{
    now_millis, Embedder, EmbeddingJob, EmbeddingOutput, EmbeddingStatus, FusionError, IndexStore,
    ObjectKey, Result, WorkerConfig,
};

use crate::retry::{backoff_for_attempt, sanitize_error, validate_vector};

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Vector stored; row is `indexed`.
    Indexed,
    /// Provider failed; row is `failed` until `retry_at`.
    Retrying { retry_at: u64 },
    /// Attempt ceiling reached; row is `dlq`.
    DeadLettered,
    /// Row changed or was reclaimed while the provider ran; result dropped.
    Superseded,
}

/// Totals from [`EmbeddingWorker::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub indexed: u64,
    pub retrying: u64,
    pub dead_lettered: u64,
    pub superseded: u64,
}

impl DrainReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Indexed => self.indexed += 1,
            JobOutcome::Retrying { .. } => self.retrying += 1,
            JobOutcome::DeadLettered => self.dead_lettered += 1,
            JobOutcome::Superseded => self.superseded += 1,
        }
    }
}

/// Embedding worker over an index store and a provider.
pub struct EmbeddingWorker<S: IndexStore> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    config: WorkerConfig,
}

impl<S: IndexStore> EmbeddingWorker<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>, config: WorkerConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Claim and process one job, if any is eligible.
    pub async fn run_once(&self) -> Result<Option<(ObjectKey, JobOutcome)>> {
        let now = now_millis();
        let stale_before = now.saturating_sub(self.config.stale_processing_secs * 1000);

        let Some(job) = self
            .store
            .claim_embedding_job(now, stale_before, self.config.max_attempts)
            .await?
        else {
            return Ok(None);
        };

        let outcome = self.process(&job).await?;
        Ok(Some((job.key, outcome)))
    }

    /// Process until nothing is claimable.
    ///
    /// Retries that come due are released between jobs. Rows still waiting
    /// out a backoff are not claimable, so this returns once every remaining
    /// row is indexed, backing off or dead-lettered.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        loop {
            self.release_due().await?;
            let Some((_, outcome)) = self.run_once().await? else {
                break;
            };
            report.record(outcome);
        }
        Ok(report)
    }

    /// Move failed rows whose backoff has elapsed back to pending.
    pub async fn release_due(&self) -> Result<u64> {
        let released = self.store.release_retries(now_millis()).await?;
        if released > 0 {
            info!("Released {} embedding jobs for retry", released);
        }
        Ok(released)
    }

    /// Release due retries and re-queue embeddings that no longer match
    /// their text.
    pub async fn maintain(&self) -> Result<()> {
        self.release_due().await?;

        let requeued = self.store.requeue_stale_embeddings(now_millis()).await?;
        if requeued > 0 {
            info!("Re-queued {} stale embeddings", requeued);
        }

        Ok(())
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let maintenance_every = Duration::from_secs(self.config.maintenance_interval_secs);
        let mut last_maintenance: Option<Instant> = None;

        info!("Embedding worker started ({})", self.embedder.model_name());

        loop {
            if *shutdown.borrow() {
                break;
            }

            if last_maintenance.map_or(true, |t| t.elapsed() >= maintenance_every) {
                if let Err(e) = self.maintain().await {
                    error!("Embedding queue maintenance failed: {}", e);
                }
                last_maintenance = Some(Instant::now());
            } else if let Err(e) = self.release_due().await {
                error!("Releasing embedding retries failed: {}", e);
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!("Embedding worker iteration failed: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Embedding worker stopped");
        Ok(())
    }

    async fn process(&self, job: &EmbeddingJob) -> Result<JobOutcome> {
        match self.compute(&job.search_text).await {
            Ok(vector) => {
                let output = EmbeddingOutput {
                    vector,
                    model: self.embedder.model_name().to_string(),
                    version: self.embedder.model_version().to_string(),
                };

                if self
                    .store
                    .complete_embedding_job(job, &output, now_millis())
                    .await?
                {
                    debug!("Indexed embedding for {}", job.key);
                    Ok(JobOutcome::Indexed)
                } else {
                    info!("Embedding for {} superseded, discarding", job.key);
                    Ok(JobOutcome::Superseded)
                }
            }
            Err(e) => {
                let now = now_millis();
                let attempt = job.attempts + 1;
                let retry_at = now
                    + backoff_for_attempt(
                        attempt,
                        self.config.base_backoff_ms,
                        self.config.max_backoff_ms,
                    );
                let message = sanitize_error(&e.to_string());

                let status = self
                    .store
                    .fail_embedding_job(job, &message, self.config.max_attempts, retry_at, now)
                    .await?;

                match status {
                    Some(EmbeddingStatus::Dlq) => {
                        error!(
                            "Embedding for {} dead-lettered after {} attempts: {}",
                            job.key, attempt, message
                        );
                        Ok(JobOutcome::DeadLettered)
                    }
                    Some(_) => {
                        warn!(
                            "Embedding for {} failed (attempt {}, transient: {}), retrying in {}ms: {}",
                            job.key,
                            attempt,
                            e.is_transient(),
                            retry_at - now,
                            message
                        );
                        Ok(JobOutcome::Retrying { retry_at })
                    }
                    None => {
                        info!("Failure for {} superseded, discarding", job.key);
                        Ok(JobOutcome::Superseded)
                    }
                }
            }
        }
    }

    async fn compute(&self, text: &str) -> Result<Vec<f32>> {
        let timeout_ms = self.config.provider_timeout_ms;

        let vector = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.embedder.embed_document(text),
        )
        .await
        .map_err(|_| FusionError::EmbeddingTimeout { timeout_ms })??;

        validate_vector(&vector, self.embedder.dimension())?;
        Ok(vector)
    }
}

/// Run `concurrency` workers until shutdown.
pub async fn run_pool<S: IndexStore + 'static>(
    worker: Arc<EmbeddingWorker<S>>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut set = JoinSet::new();

    for id in 0..concurrency.max(1) {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        set.spawn(async move {
            debug!("Starting embedding worker {}", id);
            worker.run(shutdown).await
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Embedding worker exited with error: {}", e),
            Err(e) => error!("Embedding worker task failed: {}", e),
        }
    }

    Ok(())
}
