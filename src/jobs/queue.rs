//! In-process job queue executed by a pool of blocking workers.

use super::context::JobContext;
use super::dispatcher::{DispatchError, JobDispatcher, JobHandle};
use super::job::{JobError, JobSet};
use super::retry_policy::RetryPolicy;
use crate::config::JobQueueSettings;
use crate::metrics;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

struct QueuedMessage {
    handle: JobHandle,
    args: JsonValue,
}

/// Jobs enqueued and not yet finished, with a wakeup when it drops to zero.
#[derive(Default)]
struct PendingJobs {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingJobs {
    fn add_one(&self) {
        let pending = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_jobs_pending(pending);
    }

    fn finish_one(&self) {
        let pending = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_jobs_pending(pending);
        if pending == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Submission side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    jobs: Arc<JobSet>,
    pending: Arc<PendingJobs>,
}

/// Execution side of the queue, driven by [`JobWorker::run`].
pub struct JobWorker {
    receiver: mpsc::UnboundedReceiver<QueuedMessage>,
    jobs: Arc<JobSet>,
    context: JobContext,
    retry_policy: RetryPolicy,
    workers: usize,
    pending: Arc<PendingJobs>,
}

impl JobQueue {
    /// Create a queue and the worker that executes its jobs.
    ///
    /// The worker stops when the context's cancellation token is cancelled.
    pub fn new(
        jobs: JobSet,
        context: JobContext,
        settings: &JobQueueSettings,
    ) -> (Self, JobWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let jobs = Arc::new(jobs);
        let pending = Arc::new(PendingJobs::default());

        let queue = Self {
            sender,
            jobs: Arc::clone(&jobs),
            pending: Arc::clone(&pending),
        };
        let worker = JobWorker {
            receiver,
            jobs,
            context,
            retry_policy: RetryPolicy::new(settings),
            workers: settings.workers.max(1),
            pending,
        };
        (queue, worker)
    }

    /// Jobs enqueued and not yet finished, retries included.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl JobDispatcher for JobQueue {
    fn enqueue(&self, job_name: &str, args: JsonValue) -> Result<JobHandle, DispatchError> {
        if !self.jobs.contains(job_name) {
            return Err(DispatchError::UnknownJob(job_name.to_string()));
        }
        let handle = JobHandle::new(job_name);

        self.pending.add_one();
        let message = QueuedMessage {
            handle: handle.clone(),
            args,
        };
        if self.sender.send(message).is_err() {
            self.pending.finish_one();
            return Err(DispatchError::QueueClosed);
        }
        debug!("Enqueued {} ({})", handle.job_name, handle.id);
        Ok(handle)
    }
}

impl JobWorker {
    /// Main worker loop.
    pub async fn run(mut self) {
        info!(
            "Starting job worker with {} workers and {} registered jobs",
            self.workers,
            self.jobs.names().len()
        );
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let shutdown = self.context.cancellation_token.clone();
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                message = self.receiver.recv() => {
                    let Some(message) = message else {
                        debug!("All queue senders dropped");
                        break;
                    };
                    running.spawn(run_with_retries(
                        message,
                        Arc::clone(&self.jobs),
                        self.context.clone(),
                        self.retry_policy.clone(),
                        Arc::clone(&semaphore),
                        Arc::clone(&self.pending),
                    ));
                }
                Some(result) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = result {
                        error!("Job task failed to complete: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Job worker received shutdown signal");
                    break;
                }
            }
        }

        // Jobs never started are dropped, the ones running see the cancelled token
        self.receiver.close();
        let mut dropped = 0;
        while let Ok(message) = self.receiver.try_recv() {
            debug!("Dropping {} ({})", message.handle.job_name, message.handle.id);
            self.pending.finish_one();
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Dropped {} queued jobs on shutdown", dropped);
        }

        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!("Job task failed to complete: {}", e);
            }
        }
        info!("Job worker stopped");
    }
}

async fn run_with_retries(
    message: QueuedMessage,
    jobs: Arc<JobSet>,
    ctx: JobContext,
    retry_policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    pending: Arc<PendingJobs>,
) {
    let job_name = message.handle.job_name.clone();
    let job_id = message.handle.id;
    let mut retry_count = 0;

    loop {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        if ctx.is_cancelled() {
            debug!("Skipping {} ({}): shutting down", job_name, job_id);
            break;
        }

        let start_time = Instant::now();
        let result = {
            let jobs = Arc::clone(&jobs);
            let ctx = ctx.clone();
            let args = message.args.clone();
            let name = job_name.clone();
            tokio::task::spawn_blocking(move || jobs.execute(&name, &ctx, &args)).await
        };
        drop(permit);
        let elapsed = start_time.elapsed();

        let error = match result {
            Ok(Ok(())) => {
                debug!("Job {} ({}) completed in {:?}", job_name, job_id, elapsed);
                metrics::record_job_execution(&job_name, "success", elapsed);
                break;
            }
            Ok(Err(JobError::Cancelled)) => {
                info!("Job {} ({}) was cancelled after {:?}", job_name, job_id, elapsed);
                metrics::record_job_execution(&job_name, "cancelled", elapsed);
                break;
            }
            Ok(Err(e)) => e,
            Err(e) => {
                error!("Job {} ({}) panicked after {:?}: {}", job_name, job_id, elapsed, e);
                metrics::record_job_execution(&job_name, "panic", elapsed);
                break;
            }
        };

        if !retry_policy.should_retry(&error, retry_count) {
            error!(
                "Job {} ({}) failed permanently after {} retries: {}",
                job_name, job_id, retry_count, error
            );
            metrics::record_job_execution(&job_name, "failed", elapsed);
            break;
        }

        let backoff = retry_policy.backoff(retry_count);
        warn!(
            "Job {} ({}) failed, retrying in {:?}: {}",
            job_name, job_id, backoff, error
        );
        metrics::record_job_execution(&job_name, "retry", elapsed);
        metrics::record_job_retry(&job_name);
        retry_count += 1;

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = ctx.cancellation_token.cancelled() => {
                info!("Abandoning retry of {} ({}): shutting down", job_name, job_id);
                break;
            }
        }
    }

    pending.finish_one();
}
