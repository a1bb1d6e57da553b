//! Per-job stage execution.
//!
//! A [`JobPipeline`] owns one job for as long as it holds a pool slot. It
//! runs the job's stages in order, writes a checkpoint at every transition
//! and produces exactly one result event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::control::{
    BatchEvent, ControlChannel, ControlHandle, EventBus, JobResult, ProgressSnapshot,
    ResultStatus, RunState,
};
use crate::job::{
    Batch, Checkpoint, JobError, JobRecord, JobStatus, JobStore, JobSummary, Stage, StoreError,
};
use crate::metrics::{
    CHECKPOINT_WRITES, JOBS_FINISHED, RECONCILE_WARNINGS, STAGE_DURATION, STAGE_FAILURES,
    STAGE_RETRIES, SUBMITS_DEDUPLICATED, VARIANTS_RECONCILED,
};
use crate::pool::PoolSlot;
use crate::reconcile::{
    ReconcileWarning, ReconciliationEngine, Reconciliation, SourceProduct, VariationPlan,
};
use crate::target::{ListingAgent, ListingBasics, TargetHandle, TargetManager};

use super::config::OrchestratorConfig;
use super::types::{FormSection, RunningJob, StageError, TargetFormState};

/// Everything the jobs of one batch share.
pub(crate) struct BatchContext {
    pub batch: Batch,
    pub store: Arc<dyn JobStore>,
    pub agent: Arc<dyn ListingAgent>,
    pub targets: Arc<TargetManager>,
    pub config: Arc<OrchestratorConfig>,
    pub events: EventBus,
    pub control: Arc<ControlChannel>,
    pub progress: Mutex<ProgressSnapshot>,
    pub running: Mutex<BTreeMap<usize, RunningJob>>,
}

impl BatchContext {
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn running_jobs(&self) -> Vec<RunningJob> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Count a finished job and emit its result followed by fresh progress.
    pub fn publish_result(
        &self,
        job: &JobRecord,
        status: ResultStatus,
        message: String,
        destination_url: Option<String>,
    ) {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        progress.record(status);

        self.events.emit(BatchEvent::Result(JobResult {
            batch_id: job.batch_id.clone(),
            job_id: job.id.clone(),
            index: job.index,
            link: job.link.clone(),
            status,
            message,
            destination_url,
        }));
        self.events.emit(BatchEvent::Progress(progress.clone()));
        JOBS_FINISHED.with_label_values(&[status.as_str()]).inc();
    }

    /// Mark a job that never got a pool slot as terminated.
    pub fn terminate_unadmitted(&self, mut job: JobRecord) {
        job.status = JobStatus::Terminated;
        if let Err(e) = self.store.update_job(&job) {
            error!("Failed to persist termination of job {}: {}", job.id, e);
        }
        info!("Job {} terminated before start", job.id);
        self.publish_result(
            &job,
            ResultStatus::Terminated,
            "terminated before start".to_string(),
            None,
        );
    }

    /// Fail a job whose pipeline task died without reporting.
    pub fn fail_orphan(&self, mut job: JobRecord, reason: String) {
        job.status = JobStatus::Failed;
        job.error = Some(JobError {
            stage: job.stage,
            message: reason.clone(),
        });
        if let Err(e) = self.store.update_job(&job) {
            error!("Failed to persist failure of job {}: {}", job.id, e);
        }
        self.publish_result(&job, ResultStatus::Error, reason, None);
    }
}

/// How a pipeline ended.
enum Outcome {
    Complete,
    Failed { stage: Stage, error: StageError },
    Terminated,
}

pub(crate) struct JobPipeline {
    ctx: Arc<BatchContext>,
    job: JobRecord,
    checkpoint: Checkpoint,
    form: TargetFormState,
    control: ControlHandle,
}

impl JobPipeline {
    /// Run a job to its terminal state. The slot is held until the result is out.
    pub async fn run(ctx: Arc<BatchContext>, job: JobRecord, slot: PoolSlot) {
        let _slot = slot;

        let loaded = ctx.store.load_checkpoint(&job.id);
        let control = ctx.control.handle();
        let mut pipeline = Self {
            checkpoint: Checkpoint::initial(&job.id, &job.link),
            ctx,
            job,
            form: TargetFormState::default(),
            control,
        };

        let outcome = match loaded {
            Ok(Some(checkpoint)) => {
                if checkpoint.stage != Stage::Queued {
                    info!(
                        "Resuming job {} at {} (attempt {})",
                        pipeline.job.id, checkpoint.stage, checkpoint.attempt
                    );
                }
                pipeline.checkpoint = checkpoint;
                pipeline.drive().await
            }
            Ok(None) => {
                warn!(
                    "No valid checkpoint for job {}, starting from the beginning",
                    pipeline.job.id
                );
                // The job may already have submitted; look before submitting again.
                if pipeline.job.stage >= Stage::Submitting {
                    warn!(
                        "Job {} had reached {}, checking for an existing listing before submitting",
                        pipeline.job.id, pipeline.job.stage
                    );
                    pipeline.checkpoint.stage_data.submit_attempted = true;
                }
                pipeline.drive().await
            }
            Err(e) => Outcome::Failed {
                stage: pipeline.job.stage,
                error: e.into(),
            },
        };

        pipeline.finish(outcome).await;
    }

    async fn drive(&mut self) -> Outcome {
        self.job.stage = self.checkpoint.stage;
        if let Err(e) = self.set_status(JobStatus::Running) {
            return Outcome::Failed {
                stage: self.checkpoint.stage,
                error: e.into(),
            };
        }

        loop {
            match self.await_runnable().await {
                Ok(true) => {}
                Ok(false) => return Outcome::Terminated,
                Err(error) => {
                    return Outcome::Failed {
                        stage: self.checkpoint.stage,
                        error,
                    }
                }
            }

            let stage = self.checkpoint.stage;
            let Some(next) = stage.next() else {
                return Outcome::Complete;
            };

            match self.run_with_retries(stage).await {
                Ok(()) => {}
                Err(StageError::Terminated) => return Outcome::Terminated,
                Err(error) => return Outcome::Failed { stage, error },
            }

            self.checkpoint.advance(next);
            if let Err(e) = self.ctx.store.save_checkpoint(&self.checkpoint) {
                return Outcome::Failed {
                    stage: next,
                    error: e.into(),
                };
            }
            CHECKPOINT_WRITES.inc();
            self.job.stage = next;
            self.track();
            debug!("Job {} advanced to {}", self.job.id, next);
        }
    }

    /// Stage boundary: honor pause and terminate. Returns false if terminated.
    async fn await_runnable(&mut self) -> Result<bool, StageError> {
        match self.control.state() {
            RunState::Running => Ok(true),
            RunState::Terminated => Ok(false),
            RunState::Paused => {
                info!("Job {} paused before {}", self.job.id, self.checkpoint.stage);
                self.set_status(JobStatus::Paused)?;
                if self.control.wait_until_runnable().await == RunState::Terminated {
                    return Ok(false);
                }
                self.set_status(JobStatus::Running)?;
                info!("Job {} resumed at {}", self.job.id, self.checkpoint.stage);
                Ok(true)
            }
        }
    }

    async fn run_with_retries(&mut self, stage: Stage) -> Result<(), StageError> {
        loop {
            let started = Instant::now();
            match self.run_stage(stage).await {
                Ok(()) => {
                    STAGE_DURATION
                        .with_label_values(&[stage.as_str()])
                        .observe(started.elapsed().as_secs_f64());
                    return Ok(());
                }
                Err(e)
                    if e.is_retryable()
                        && self.checkpoint.attempt < self.ctx.config.max_stage_retries =>
                {
                    self.checkpoint.attempt += 1;
                    self.ctx
                        .store
                        .record_attempt(&self.job.id, self.checkpoint.attempt)?;
                    STAGE_RETRIES
                        .with_label_values(&[stage.as_str(), e.kind()])
                        .inc();
                    warn!(
                        "Job {} {} failed ({}), retry {}/{}",
                        self.job.id,
                        stage,
                        e,
                        self.checkpoint.attempt,
                        self.ctx.config.max_stage_retries
                    );

                    if stage.needs_form() {
                        self.release_form().await;
                    }

                    tokio::select! {
                        _ = sleep(self.ctx.config.retry_backoff()) => {}
                        _ = self.control.terminated() => return Err(StageError::Terminated),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<(), StageError> {
        match stage {
            Stage::Queued | Stage::Complete => Ok(()),
            Stage::Scraping => self.scrape().await,
            Stage::Reconciling => self.reconcile(),
            Stage::TargetOpening => self.ensure_form(stage).await.map(|_| ()),
            Stage::FillingBasics | Stage::FillingVariations | Stage::FillingImages => {
                self.ensure_form(stage).await?;
                match FormSection::filled_by(stage) {
                    Some(section) => self.fill_section(section).await,
                    None => Ok(()),
                }
            }
            Stage::Submitting => self.submit().await,
        }
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    async fn scrape(&mut self) -> Result<(), StageError> {
        let handle = self
            .ctx
            .targets
            .open(&self.job.link, self.ctx.config.scrape_options())
            .await?;
        let scraped = self.ctx.agent.scrape(&handle).await;
        self.ctx.targets.close(&handle).await;

        let product = scraped?;
        validate_product(&product)?;
        info!(
            "Job {} scraped '{}' ({} SKUs)",
            self.job.id,
            product.title,
            product.skus.len()
        );

        self.checkpoint.stage_data.product = Some(product);
        self.checkpoint.stage_data.reconciliation = None;
        Ok(())
    }

    fn reconcile(&mut self) -> Result<(), StageError> {
        let request = &self.ctx.batch.request;
        let reconciliation = {
            let product = self.product()?;
            let price = product.effective_price();
            if !request.price_allowed(price) {
                return Err(StageError::Filtered(format!(
                    "price {:.2} is outside the range {}..{}",
                    price,
                    request
                        .min_price
                        .map_or_else(String::new, |p| format!("{:.2}", p)),
                    request
                        .max_price
                        .map_or_else(String::new, |p| format!("{:.2}", p)),
                )));
            }

            let engine =
                ReconciliationEngine::new(request.reconcile_options(self.ctx.config.default_quantity));
            engine.reconcile(product)?
        };

        VARIANTS_RECONCILED
            .with_label_values(&[])
            .observe(reconciliation.variants.len() as f64);
        for warning in &reconciliation.warnings {
            RECONCILE_WARNINGS
                .with_label_values(&[warning_kind(warning)])
                .inc();
            warn!("Job {}: {}", self.job.id, warning);
        }

        self.checkpoint.stage_data.reconciliation = Some(reconciliation);
        Ok(())
    }

    /// Open the destination form if needed and fill every section `stage`
    /// depends on that is not filled yet.
    async fn ensure_form(&mut self, stage: Stage) -> Result<TargetHandle, StageError> {
        if self.form.handle.is_none() {
            let request = &self.ctx.batch.request;
            let url = self
                .ctx
                .config
                .form_url(&request.marketplace, &request.listing_type);
            let handle = self
                .ctx
                .targets
                .open(&url, self.ctx.config.form_options())
                .await?;
            self.form.filled.clear();
            self.form.handle = Some(handle);
        }

        for &section in FormSection::required_before(stage) {
            if !self.form.is_filled(section) {
                debug!("Job {}: filling {:?} again before {}", self.job.id, section, stage);
                self.fill_section(section).await?;
            }
        }

        self.form_handle()
    }

    async fn fill_section(&mut self, section: FormSection) -> Result<(), StageError> {
        let handle = self.form_handle()?;
        match section {
            FormSection::Basics => {
                let basics = self.basics()?;
                self.ctx.agent.fill_basics(&handle, &basics).await?;
            }
            FormSection::Variations => self.fill_variations(&handle).await?,
            FormSection::Images => {
                let images = self.product()?.images.clone();
                self.ctx.agent.fill_images(&handle, &images).await?;
            }
        }
        self.form.filled.insert(section);
        Ok(())
    }

    async fn fill_variations(&mut self, handle: &TargetHandle) -> Result<(), StageError> {
        let variants = self.reconciliation()?.variants.clone();
        if variants.is_empty() {
            self.checkpoint.stage_data.fill_warnings.clear();
            return Ok(());
        }

        let rows = self.ctx.agent.variation_rows(handle).await?;
        let assignments = ReconciliationEngine::plan_rows(&rows, &variants);
        let mut warnings: Vec<String> = assignments
            .iter()
            .filter(|row| !row.is_matched())
            .map(|row| format!("row '{}' matched no variant, quantity set to 0", row.row_label))
            .collect();

        let plan = VariationPlan {
            variants,
            rows: assignments,
        };
        let report = self.ctx.agent.fill_variations(handle, &plan).await?;
        debug!(
            "Job {}: filled {} variation rows",
            self.job.id, report.filled_count
        );
        warnings.extend(report.warnings);

        self.checkpoint.stage_data.fill_warnings = warnings;
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), StageError> {
        if self.checkpoint.stage_data.submit_attempted {
            let title = self.product()?.title.clone();
            if let Some(url) = self.ctx.agent.find_listing(&self.job.link, &title).await? {
                info!(
                    "Job {}: listing already exists at {}, not submitting again",
                    self.job.id, url
                );
                SUBMITS_DEDUPLICATED.inc();
                self.checkpoint.stage_data.destination_url = Some(url);
                self.release_form().await;
                return Ok(());
            }
            info!(
                "Job {}: earlier submission left no listing, submitting again",
                self.job.id
            );
        }

        let handle = self.ensure_form(Stage::Submitting).await?;

        self.ctx.store.mark_submit_attempted(&self.job.id)?;
        self.checkpoint.stage_data.submit_attempted = true;

        let receipt = self.ctx.agent.submit(&handle).await?;
        info!("Job {} listed at {}", self.job.id, receipt.destination_url);
        self.checkpoint.stage_data.destination_url = Some(receipt.destination_url);
        self.release_form().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn product(&self) -> Result<&SourceProduct, StageError> {
        self.checkpoint
            .stage_data
            .product
            .as_ref()
            .ok_or_else(|| StageError::Reconcile("checkpoint has no scraped product".to_string()))
    }

    fn reconciliation(&self) -> Result<&Reconciliation, StageError> {
        self.checkpoint
            .stage_data
            .reconciliation
            .as_ref()
            .ok_or_else(|| StageError::Reconcile("checkpoint has no reconciliation".to_string()))
    }

    fn basics(&self) -> Result<ListingBasics, StageError> {
        let product = self.product()?;
        let reconciliation = self.reconciliation()?;
        let request = &self.ctx.batch.request;
        Ok(ListingBasics {
            title: product.title.clone(),
            price: reconciliation.base_price,
            quantity: reconciliation.base_quantity,
            currency: product.currency.clone(),
            marketplace: request.marketplace.clone(),
            listing_type: request.listing_type.clone(),
            source_link: self.job.link.clone(),
        })
    }

    fn form_handle(&self) -> Result<TargetHandle, StageError> {
        self.form
            .handle
            .clone()
            .ok_or_else(|| StageError::TransientTarget("destination form is not open".to_string()))
    }

    async fn release_form(&mut self) {
        if let Some(handle) = self.form.take() {
            self.ctx.targets.close(&handle).await;
        }
    }

    fn set_status(&mut self, status: JobStatus) -> Result<(), StoreError> {
        self.job.status = status;
        self.ctx.store.update_job(&self.job)?;
        self.track();
        Ok(())
    }

    fn track(&self) {
        let mut running = self.ctx.running.lock().unwrap_or_else(|e| e.into_inner());
        running.insert(
            self.job.index,
            RunningJob {
                job_id: self.job.id.clone(),
                index: self.job.index,
                link: self.job.link.clone(),
                stage: self.checkpoint.stage,
                status: self.job.status,
            },
        );
    }

    fn untrack(&self) {
        let mut running = self.ctx.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.job.index);
    }

    async fn finish(mut self, outcome: Outcome) {
        self.release_form().await;

        let data = &self.checkpoint.stage_data;
        let (result_status, message, destination_url) = match outcome {
            Outcome::Complete => {
                let mut warnings = self
                    .reconciliation()
                    .map(|r| r.warning_messages())
                    .unwrap_or_default();
                warnings.extend(data.fill_warnings.iter().cloned());
                let variant_count = self
                    .reconciliation()
                    .map(|r| r.variants.len())
                    .unwrap_or(0);

                let message = if warnings.is_empty() {
                    format!("listed with {} variants", variant_count)
                } else {
                    format!(
                        "listed with {} variants, {} warning(s): {}",
                        variant_count,
                        warnings.len(),
                        warnings.join("; ")
                    )
                };

                self.job.status = JobStatus::Success;
                self.job.summary = Some(JobSummary {
                    destination_url: data.destination_url.clone(),
                    variant_count,
                    warnings,
                });
                info!("Job {} complete", self.job.id);
                (ResultStatus::Success, message, data.destination_url.clone())
            }
            Outcome::Failed { stage, error } => {
                STAGE_FAILURES
                    .with_label_values(&[stage.as_str(), error.kind()])
                    .inc();
                if let StageError::FatalHost(_) = error {
                    error!(
                        "Job {} hit a store failure at {}: {}; terminating batch",
                        self.job.id, stage, error
                    );
                    self.ctx.control.terminate();
                } else {
                    warn!("Job {} failed at {}: {}", self.job.id, stage, error);
                }

                self.job.status = JobStatus::Failed;
                self.job.stage = stage;
                self.job.error = Some(JobError {
                    stage,
                    message: error.to_string(),
                });
                (ResultStatus::Error, error.to_string(), None)
            }
            Outcome::Terminated => {
                info!(
                    "Job {} terminated at {}",
                    self.job.id, self.checkpoint.stage
                );
                self.job.status = JobStatus::Terminated;
                (
                    ResultStatus::Terminated,
                    format!("terminated at {}", self.checkpoint.stage),
                    None,
                )
            }
        };

        if let Err(e) = self.ctx.store.update_job(&self.job) {
            error!(
                "Failed to persist final status of job {}: {}; terminating batch",
                self.job.id, e
            );
            self.ctx.control.terminate();
        }

        self.untrack();
        self.ctx
            .publish_result(&self.job, result_status, message, destination_url);
    }
}

/// Reject scrape output that cannot be reconciled.
fn validate_product(product: &SourceProduct) -> Result<(), StageError> {
    if product.title.trim().is_empty() {
        return Err(StageError::Scrape("product has no title".to_string()));
    }
    if !product.base_price.is_finite() || product.base_price < 0.0 {
        return Err(StageError::Scrape(format!(
            "invalid base price {}",
            product.base_price
        )));
    }
    if let Some(sku) = product
        .skus
        .iter()
        .find(|s| !s.price.is_finite() || s.price < 0.0)
    {
        return Err(StageError::Scrape(format!(
            "sku {} has invalid price {}",
            sku.id, sku.price
        )));
    }
    Ok(())
}

fn warning_kind(warning: &ReconcileWarning) -> &'static str {
    match warning {
        ReconcileWarning::UnmatchedValues { .. } => "unmatched_values",
        ReconcileWarning::ShapeMismatch { .. } => "shape_mismatch",
        ReconcileWarning::MissingStock { .. } => "missing_stock",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Sku;

    fn product() -> SourceProduct {
        SourceProduct {
            title: "Tee".to_string(),
            base_price: 6.5,
            currency: "USD".to_string(),
            images: vec![],
            axes: vec![],
            skus: vec![],
        }
    }

    #[test]
    fn test_validate_product() {
        assert!(validate_product(&product()).is_ok());

        let mut p = product();
        p.title = "  ".to_string();
        assert!(matches!(validate_product(&p), Err(StageError::Scrape(_))));

        let mut p = product();
        p.base_price = f64::NAN;
        assert!(validate_product(&p).is_err());

        let mut p = product();
        p.skus.push(Sku {
            id: "s1".to_string(),
            values: vec![],
            price: -1.0,
            stock: None,
        });
        assert!(validate_product(&p).is_err());
    }
}
