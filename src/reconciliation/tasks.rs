//! Asynchronous reconciliation task lifecycle
//!
//! `start` validates and snapshots the request, persists a queued task and
//! returns at once. A fixed pool of workers drains a bounded queue; every
//! status change goes through the task store's compare-and-set transition,
//! so a task is run by exactly one worker and a task cancelled while queued
//! never starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::reconciliation::config::ReconciliationConfig;
use crate::reconciliation::pipeline::{run, RunContext, RunPlan, RunStatus};
use crate::settings::EngineSettings;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_config_usable, validate_task_params};

/// Returned by [`TaskManager::start`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

struct Job {
    task_id: Uuid,
    params: TaskParams,
    plan: RunPlan,
}

/// State shared by the manager and its workers
struct Shared {
    records: Arc<dyn RecordStore>,
    embedder: Arc<dyn EmbeddingService>,
    tasks: Arc<dyn TaskStore>,
    settings: EngineSettings,
    /// Cancellation tokens of tasks a worker has picked up
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Bumped whenever a task reaches a terminal state
    finished: watch::Sender<u64>,
}

/// Starts, tracks and cancels reconciliation tasks
pub struct TaskManager {
    catalog: Arc<dyn ConfigCatalog>,
    shared: Arc<Shared>,
    job_tx: mpsc::Sender<Job>,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl TaskManager {
    /// Create a manager and spawn its workers on the current tokio runtime
    pub fn new(
        catalog: Arc<dyn ConfigCatalog>,
        records: Arc<dyn RecordStore>,
        embedder: Arc<dyn EmbeddingService>,
        tasks: Arc<dyn TaskStore>,
        settings: EngineSettings,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let shutdown_token = CancellationToken::new();
        let (finished, _) = watch::channel(0u64);

        let worker_count = settings.worker_count.max(1);
        let shared = Arc::new(Shared {
            records,
            embedder,
            tasks,
            settings,
            running: Mutex::new(HashMap::new()),
            finished,
        });

        tracing::info!(worker_count, "Starting reconciliation workers");
        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&job_rx),
                    Arc::clone(&shared),
                    shutdown_token.clone(),
                ))
            })
            .collect();

        Self {
            catalog,
            shared,
            job_tx,
            job_rx,
            workers: Mutex::new(workers),
            shutdown_token,
        }
    }

    /// Validate a request, persist it as a queued task and enqueue it
    pub async fn start(&self, params: TaskParams) -> ReconResult<TaskHandle> {
        if self.shutdown_token.is_cancelled() {
            return Err(ReconError::Validation(
                "Task manager is shutting down".to_string(),
            ));
        }
        validate_task_params(&params)?;
        let plan = self.plan_for(&params).await?;

        let permit = self.job_tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ReconError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                ReconError::Validation("Task manager is shutting down".to_string())
            }
        })?;

        let task = ReconciliationTask::new(params.clone());
        self.shared.tasks.insert(&task).await?;
        permit.send(Job {
            task_id: task.id,
            params,
            plan,
        });

        tracing::info!(
            task_id = %task.id,
            company_id = %task.params.company_id,
            "Reconciliation task queued"
        );
        Ok(TaskHandle {
            task_id: task.id,
            status: task.status,
        })
    }

    /// Current status of a task
    pub async fn status(&self, task_id: Uuid) -> ReconResult<TaskSnapshot> {
        Ok(self.load(task_id).await?.snapshot())
    }

    /// Request cancellation.
    ///
    /// A queued task is cancelled at once. A running task is asked to stop at
    /// its next stage or batch boundary. Terminal tasks are left untouched.
    pub async fn cancel(&self, task_id: Uuid) -> ReconResult<CancelAck> {
        let task = self.load(task_id).await?;

        if task.status == TaskStatus::Queued
            && self
                .shared
                .tasks
                .transition(task_id, TaskStatus::Queued, TaskStatus::Cancelled)
                .await?
        {
            tracing::info!(task_id = %task_id, "Queued task cancelled");
            self.shared.finished.send_modify(|n| *n += 1);
            return Ok(CancelAck {
                task_id,
                status: TaskStatus::Cancelled,
                accepted: true,
            });
        }

        // Either running, or a worker picked it up since we looked. The
        // worker drops the token before it settles the final status, so a
        // token found here is always honoured.
        let current = self.load(task_id).await?.status;
        if current == TaskStatus::Running {
            let signalled = match self.shared.running.lock().await.get(&task_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            };
            if signalled {
                tracing::info!(task_id = %task_id, "Cancellation requested for running task");
                let status = self.load(task_id).await?.status;
                return Ok(CancelAck {
                    task_id,
                    status,
                    accepted: true,
                });
            }
        }

        let status = self.load(task_id).await?.status;
        Ok(CancelAck {
            task_id,
            status,
            accepted: false,
        })
    }

    /// List tasks, newest first
    pub async fn list(&self, query: &TaskQuery) -> ReconResult<TaskPage> {
        self.shared.tasks.list(query).await
    }

    /// Suggestions produced by a task so far
    pub async fn suggestions(&self, task_id: Uuid) -> ReconResult<Vec<ReconciliationSuggestion>> {
        Ok(self.load(task_id).await?.suggestions)
    }

    /// Wait until the task is terminal or `timeout` elapses, then return its status
    pub async fn wait_for_completion(&self, task_id: Uuid, timeout: Duration) -> ReconResult<TaskSnapshot> {
        let mut finished = self.shared.finished.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let snapshot = self.status(task_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            match tokio::time::timeout_at(deadline, finished.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return self.status(task_id).await,
            }
        }
    }

    /// Stop the workers.
    ///
    /// Running tasks are cancelled cooperatively and awaited; tasks still in
    /// the queue are marked cancelled.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task manager shutdown");
        self.shutdown_token.cancel();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker terminated abnormally");
            }
        }

        let mut rx = self.job_rx.lock().await;
        rx.close();
        while let Ok(job) = rx.try_recv() {
            match self
                .shared
                .tasks
                .transition(job.task_id, TaskStatus::Queued, TaskStatus::Cancelled)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(task_id = %job.task_id, error = %e, "Could not cancel queued task")
                }
            }
        }
        self.shared.finished.send_modify(|n| *n += 1);
    }

    async fn load(&self, task_id: Uuid) -> ReconResult<ReconciliationTask> {
        self.shared
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("task {}", task_id)))
    }

    async fn config_for(&self, config_id: &str, company_id: &str) -> ReconResult<ReconciliationConfig> {
        let config = self
            .catalog
            .get_config(config_id)
            .await?
            .ok_or_else(|| ReconError::Validation(format!("Config '{}' not found", config_id)))?;
        validate_config_usable(&config, company_id)?;
        Ok(config)
    }

    /// Snapshot the configs and pipeline a request refers to
    async fn plan_for(&self, params: &TaskParams) -> ReconResult<RunPlan> {
        if let Some(config_id) = &params.config_id {
            let config = self.config_for(config_id, &params.company_id).await?;
            return Ok(RunPlan::single(config));
        }

        let pipeline_id = params.pipeline_id.as_deref().unwrap_or_default();
        let mut pipeline = self
            .catalog
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| ReconError::Validation(format!("Pipeline '{}' not found", pipeline_id)))?;
        if !pipeline.enabled {
            return Err(ReconError::Validation(format!(
                "Pipeline '{}' is disabled",
                pipeline_id
            )));
        }
        pipeline.validate_order()?;

        pipeline.stages.retain(|s| s.enabled);
        if pipeline.stages.is_empty() {
            return Err(ReconError::Validation(format!(
                "Pipeline '{}' has no enabled stages",
                pipeline_id
            )));
        }

        let mut configs = HashMap::new();
        for stage in &pipeline.stages {
            if !configs.contains_key(&stage.config_id) {
                let config = self.config_for(&stage.config_id, &params.company_id).await?;
                configs.insert(stage.config_id.clone(), config);
            }
        }
        RunPlan::from_pipeline(&pipeline, &configs)
    }
}

async fn worker_loop(
    worker_id: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            tracing::debug!(worker_id, "Worker exiting");
            break;
        };

        let task_id = job.task_id;
        if let Err(e) = process_job(worker_id, &shared, job, &shutdown).await {
            tracing::error!(worker_id, task_id = %task_id, error = %e, "Task bookkeeping failed");
            record_failure(&shared, task_id, &e).await;
        }
        shared.running.lock().await.remove(&task_id);
        shared.finished.send_modify(|n| *n += 1);
    }
}

async fn process_job(
    worker_id: usize,
    shared: &Shared,
    job: Job,
    shutdown: &CancellationToken,
) -> ReconResult<()> {
    // Register the token before the task becomes visible as running
    let cancel = shutdown.child_token();
    shared
        .running
        .lock()
        .await
        .insert(job.task_id, cancel.clone());

    if !shared
        .tasks
        .transition(job.task_id, TaskStatus::Queued, TaskStatus::Running)
        .await?
    {
        tracing::info!(worker_id, task_id = %job.task_id, "Task no longer queued, skipping");
        return Ok(());
    }

    tracing::info!(worker_id, task_id = %job.task_id, "Task started");
    let ctx = RunContext {
        task_id: job.task_id,
        params: job.params,
        records: Arc::clone(&shared.records),
        embedder: Arc::clone(&shared.embedder),
        settings: shared.settings.clone(),
        cancel,
    };
    let outcome = run(&ctx, &job.plan).await;

    // No cancel request can arrive once the token is gone
    shared.running.lock().await.remove(&job.task_id);
    let cancel_requested = ctx.cancel.is_cancelled();

    let mut task = shared
        .tasks
        .get(job.task_id)
        .await?
        .ok_or_else(|| ReconError::NotFound(format!("task {}", job.task_id)))?;
    task.result = Some(outcome.result);
    task.suggestions = outcome.suggestions;

    let terminal = terminal_status(&outcome.status, cancel_requested);
    if let RunStatus::Failed(message) = outcome.status {
        task.error_message = Some(message);
    }
    shared.tasks.save(&task).await?;
    if !shared
        .tasks
        .transition(job.task_id, TaskStatus::Running, terminal)
        .await?
    {
        tracing::warn!(worker_id, task_id = %job.task_id, "Task left running state unexpectedly");
    }

    tracing::info!(worker_id, task_id = %job.task_id, status = %terminal, "Task finished");
    Ok(())
}

/// Final status of a run. A cancellation that was acknowledged wins over a
/// run that completed before it noticed.
fn terminal_status(status: &RunStatus, cancel_requested: bool) -> TaskStatus {
    match status {
        RunStatus::Completed if cancel_requested => TaskStatus::Cancelled,
        RunStatus::Completed => TaskStatus::Completed,
        RunStatus::Cancelled => TaskStatus::Cancelled,
        RunStatus::Failed(_) => TaskStatus::Failed,
    }
}

/// Settle a task whose bookkeeping failed so it never stays queued or running
async fn record_failure(shared: &Shared, task_id: Uuid, error: &ReconError) {
    let mut task = match shared.tasks.get(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::warn!(task_id = %task_id, "Failed task vanished from the task store");
            return;
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Could not load failed task");
            return;
        }
    };

    let (from, to) = match task.status {
        TaskStatus::Running => {
            task.error_message = Some(error.to_string());
            if let Err(e) = shared.tasks.save(&task).await {
                tracing::error!(task_id = %task_id, error = %e, "Could not store task error");
            }
            (TaskStatus::Running, TaskStatus::Failed)
        }
        // Never started; a queued task can only be cancelled
        TaskStatus::Queued => (TaskStatus::Queued, TaskStatus::Cancelled),
        _ => return,
    };

    match shared.tasks.transition(task_id, from, to).await {
        Ok(true) => tracing::info!(task_id = %task_id, status = %to, "Task settled after failure"),
        Ok(false) => tracing::warn!(task_id = %task_id, "Task changed state while settling failure"),
        Err(e) => tracing::error!(task_id = %task_id, error = %e, "Could not settle failed task"),
    }
}
