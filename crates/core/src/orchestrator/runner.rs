//! Bulk orchestrator: batch admission, control and crash recovery.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch, RwLock};
use tracing::{error, info, warn};

use crate::control::{BatchEvent, ControlChannel, EventBus, ProgressSnapshot, RunState};
use crate::job::{Batch, BulkJobRequest, JobFilter, JobRecord, JobStatus, JobStore};
use crate::metrics::BATCHES_STARTED;
use crate::pool::WorkerPool;
use crate::target::{ListingAgent, TargetManager};

use super::config::OrchestratorConfig;
use super::stages::{BatchContext, JobPipeline};
use super::types::{BatchAccepted, OrchestratorError, OrchestratorStatus};

/// One batch worth of jobs to run.
struct Segment {
    batch: Batch,
    jobs: Vec<JobRecord>,
    progress: ProgressSnapshot,
    origin: &'static str,
}

/// The run currently holding the orchestrator.
///
/// A submitted batch is a run of one segment; recovery may queue several
/// batches into one run so that nothing else starts in between.
struct ActiveRun {
    control: Arc<ControlChannel>,
    current: Option<Arc<BatchContext>>,
    pool: Option<WorkerPool>,
    pending_batches: usize,
}

/// Drives batches of listing jobs through their stages.
///
/// At most one batch runs at a time. Jobs are admitted into a
/// [`WorkerPool`] strictly in submission order by a single dispatcher task;
/// each admitted job runs its stages sequentially in its own task.
#[derive(Clone)]
pub struct BulkOrchestrator {
    config: Arc<OrchestratorConfig>,
    store: Arc<dyn JobStore>,
    targets: Arc<TargetManager>,
    agent: Arc<dyn ListingAgent>,
    events: EventBus,
    active: Arc<RwLock<Option<ActiveRun>>>,
    busy: Arc<watch::Sender<bool>>,
}

impl BulkOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        targets: Arc<TargetManager>,
        agent: Arc<dyn ListingAgent>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        let (busy, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            store,
            targets,
            agent,
            events,
            active: Arc::new(RwLock::new(None)),
            busy: Arc::new(busy),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Accept a batch and start running it in the background.
    pub async fn start(
        &self,
        mut request: BulkJobRequest,
    ) -> Result<BatchAccepted, OrchestratorError> {
        request.validate()?;

        let requested = request.concurrency;
        request.concurrency = requested.min(self.config.max_concurrency).max(1);
        if request.concurrency != requested {
            info!(
                "Clamped batch concurrency from {} to {}",
                requested, request.concurrency
            );
        }

        let mut active = self.active.write().await;
        if let Some(run) = active.as_ref() {
            return Err(OrchestratorError::BatchInProgress(run.label()));
        }

        let (batch, jobs) = self.store.create_batch(&request)?;
        let accepted = BatchAccepted {
            batch_id: batch.id.clone(),
            job_count: jobs.len(),
            concurrency: request.concurrency,
        };
        info!(
            "Batch {} accepted: {} jobs, concurrency {}",
            batch.id, accepted.job_count, accepted.concurrency
        );

        let progress = ProgressSnapshot::new(&batch.id, jobs.len());
        self.launch(
            &mut active,
            vec![Segment {
                batch,
                jobs,
                progress,
                origin: "submitted",
            }],
        );
        Ok(accepted)
    }

    /// Re-admit every unfinished job found in the store.
    ///
    /// Jobs resume at their persisted stage, batch by batch in creation order
    /// and in submission order within a batch.
    pub async fn recover(&self) -> Result<Vec<BatchAccepted>, OrchestratorError> {
        let mut active = self.active.write().await;
        if let Some(run) = active.as_ref() {
            return Err(OrchestratorError::BatchInProgress(run.label()));
        }

        let jobs = self.store.recoverable_jobs()?;
        if jobs.is_empty() {
            info!("No unfinished jobs to recover");
            return Ok(Vec::new());
        }

        let mut groups: Vec<(String, Vec<JobRecord>)> = Vec::new();
        for job in jobs {
            match groups.last_mut() {
                Some((batch_id, group)) if *batch_id == job.batch_id => group.push(job),
                _ => groups.push((job.batch_id.clone(), vec![job])),
            }
        }

        let mut accepted = Vec::with_capacity(groups.len());
        let mut segments = Vec::with_capacity(groups.len());
        for (batch_id, jobs) in groups {
            let batch = self
                .store
                .get_batch(&batch_id)?
                .ok_or_else(|| OrchestratorError::BatchNotFound(batch_id.clone()))?;
            let progress = self.recovered_progress(&batch_id)?;

            info!(
                "Recovering {} unfinished jobs of batch {} ({} of {} already done)",
                jobs.len(),
                batch_id,
                progress.current,
                progress.total
            );
            accepted.push(BatchAccepted {
                batch_id: batch_id.clone(),
                job_count: jobs.len(),
                concurrency: batch.request.concurrency.min(self.config.max_concurrency).max(1),
            });
            segments.push(Segment {
                batch,
                jobs,
                progress,
                origin: "recovered",
            });
        }

        self.launch(&mut active, segments);
        Ok(accepted)
    }

    /// Hold running jobs at their next stage boundary and stop admitting.
    pub async fn pause(&self) -> Result<RunState, OrchestratorError> {
        let active = self.active.read().await;
        let run = active.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        if run.control.pause() {
            info!("Batch {} paused", run.label());
        }
        Ok(run.control.state())
    }

    pub async fn resume(&self) -> Result<RunState, OrchestratorError> {
        let active = self.active.read().await;
        let run = active.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        if run.control.resume() {
            info!("Batch {} resumed", run.label());
        }
        Ok(run.control.state())
    }

    /// Abandon remaining work. Jobs not yet admitted are terminated at once;
    /// running jobs stop at their next stage boundary.
    pub async fn terminate(&self) -> Result<RunState, OrchestratorError> {
        let active = self.active.read().await;
        let run = active.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        run.control.terminate();
        if let Some(pool) = &run.pool {
            pool.close();
        }
        warn!("Batch {} terminated", run.label());
        Ok(RunState::Terminated)
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let active = self.active.read().await;
        let Some(run) = active.as_ref() else {
            return OrchestratorStatus::default();
        };

        OrchestratorStatus {
            running: true,
            batch_id: run.current.as_ref().map(|ctx| ctx.batch.id.clone()),
            run_state: Some(run.control.state()),
            progress: run.current.as_ref().map(|ctx| ctx.progress()),
            pool: run.pool.as_ref().map(WorkerPool::status),
            pending_batches: run.pending_batches,
            jobs: run
                .current
                .as_ref()
                .map(|ctx| ctx.running_jobs())
                .unwrap_or_default(),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Subscribe to progress, result and completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Resolves once no batch is running.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    fn recovered_progress(&self, batch_id: &str) -> Result<ProgressSnapshot, OrchestratorError> {
        let in_batch = JobFilter::new().with_batch(batch_id);
        let count = |status: JobStatus| self.store.count_jobs(&in_batch.clone().with_status(status));

        let success_count = count(JobStatus::Success)? as usize;
        let fail_count = count(JobStatus::Failed)? as usize;
        let terminated = count(JobStatus::Terminated)? as usize;

        Ok(ProgressSnapshot {
            batch_id: batch_id.to_string(),
            current: success_count + fail_count + terminated,
            total: self.store.count_jobs(&in_batch)? as usize,
            success_count,
            fail_count,
        })
    }

    /// Install a new run and spawn its dispatcher. Caller holds the write lock.
    fn launch(&self, active: &mut Option<ActiveRun>, segments: Vec<Segment>) {
        let control = Arc::new(ControlChannel::new());
        *active = Some(ActiveRun {
            control: Arc::clone(&control),
            current: None,
            pool: None,
            pending_batches: segments.len(),
        });
        self.busy.send_replace(true);

        let this = self.clone();
        tokio::spawn(async move {
            let total = segments.len();
            for (i, segment) in segments.into_iter().enumerate() {
                this.run_segment(segment, &control, total - i - 1).await;
            }

            *this.active.write().await = None;
            this.busy.send_replace(false);
        });
    }

    /// Admit a batch's jobs in order and wait for all of them to report.
    async fn run_segment(&self, segment: Segment, control: &Arc<ControlChannel>, remaining: usize) {
        let Segment {
            batch,
            jobs,
            progress,
            origin,
        } = segment;

        let concurrency = batch.request.concurrency.min(self.config.max_concurrency).max(1);
        let pool = WorkerPool::new(concurrency);
        let batch_id = batch.id.clone();

        let ctx = Arc::new(BatchContext {
            batch,
            store: Arc::clone(&self.store),
            agent: Arc::clone(&self.agent),
            targets: Arc::clone(&self.targets),
            config: Arc::clone(&self.config),
            events: self.events.clone(),
            control: Arc::clone(control),
            progress: Mutex::new(progress),
            running: Mutex::new(BTreeMap::new()),
        });

        if let Some(run) = self.active.write().await.as_mut() {
            run.current = Some(Arc::clone(&ctx));
            run.pool = Some(pool.clone());
            run.pending_batches = remaining;
        }
        if control.state() == RunState::Terminated {
            pool.close();
        }

        BATCHES_STARTED.with_label_values(&[origin]).inc();
        info!("Running batch {} with concurrency {}", batch_id, concurrency);
        self.events.emit(BatchEvent::Progress(ctx.progress()));

        let mut handle = control.handle();
        let mut pipelines = Vec::with_capacity(jobs.len());

        for job in jobs {
            if handle.state() == RunState::Paused {
                handle.wait_until_runnable().await;
            }

            let slot = if handle.is_terminated() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = handle.terminated() => None,
                    slot = pool.acquire() => slot.ok(),
                }
            };

            match slot {
                Some(slot) => {
                    let task = tokio::spawn(JobPipeline::run(Arc::clone(&ctx), job.clone(), slot));
                    pipelines.push((job, task));
                }
                None => ctx.terminate_unadmitted(job),
            }
        }

        let (admitted, tasks): (Vec<_>, Vec<_>) = pipelines.into_iter().unzip();
        let outcomes = futures::future::join_all(tasks).await;
        for (job, outcome) in admitted.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                error!("Pipeline of job {} died: {}", job.id, e);
                ctx.fail_orphan(job, format!("pipeline task failed: {}", e));
            }
        }

        let progress = ctx.progress();
        info!(
            "Batch {} finished: {} succeeded, {} failed, {} of {} reported",
            batch_id, progress.success_count, progress.fail_count, progress.current, progress.total
        );
        self.events.emit(BatchEvent::Complete(progress));
    }
}

impl ActiveRun {
    fn label(&self) -> String {
        self.current
            .as_ref()
            .map(|ctx| ctx.batch.id.clone())
            .unwrap_or_else(|| "(starting)".to_string())
    }
}
