//! Run sequencing: portal acquisition against one session, post-processing
//! through the retry queue
//!
//! The portal allows exactly one session, so acquisition (navigate, select,
//! run, export, watch) is strictly serial across reports. Everything that does
//! not need the session (transform, load, relocate) is deferred onto the
//! single-worker retry queue, so the next report's acquisition overlaps with
//! the previous report's post-processing.
//!
//! A failed report never aborts the run: its failed phase is recorded in the
//! [`RunSummary`] and the loop continues with the next report. Only failures
//! before any report starts (config, open, authenticate) fail the run itself.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs_utils;
use crate::portal::{PortalDriver, apply_date_params};
use crate::registry::{DateParams, ReportDescriptor, ReportRegistry};
use crate::retry::RetryQueue;
use crate::store::RelationalStore;
use crate::task_queue::{TaskOp, TaskQueue};
use crate::transform::RecordTransformer;
use crate::types::{EntityId, Phase, ReportOutcome, ReportType, RunMode, RunSummary};
use crate::watcher::DownloadWatch;
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Drives one entity's reports through acquisition and post-processing
pub struct EtlOrchestrator {
    entity: EntityId,
    config: Config,
    driver: Arc<dyn PortalDriver>,
    transformer: Arc<dyn RecordTransformer>,
    store: Arc<dyn RelationalStore>,
}

impl EtlOrchestrator {
    /// Build an orchestrator for one entity, validating the configuration
    pub fn new(
        entity: EntityId,
        config: Config,
        driver: Arc<dyn PortalDriver>,
        transformer: Arc<dyn RecordTransformer>,
        store: Arc<dyn RelationalStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            entity,
            config,
            driver,
            transformer,
            store,
        })
    }

    /// Run the selected reports end to end and return the per-report summary
    ///
    /// `overrides` supplies explicit date parameters per report type; reports
    /// without an override use their catalog defaults. Returns `Err` only for
    /// run-level failures (invalid setup, session open/authenticate); a
    /// failing report is recorded in the summary and the run continues.
    pub async fn run(
        &self,
        mode: &RunMode,
        overrides: &HashMap<ReportType, DateParams>,
    ) -> Result<RunSummary> {
        let registry = ReportRegistry::for_entity(self.entity);
        let selected = registry.select(mode);
        info!(
            entity = %self.entity,
            reports = selected.len(),
            "starting run"
        );

        let download_dir = self.config.download.download_dir.clone();
        let archive_dir = self.config.download.archive_dir.clone();
        fs_utils::create_directories(&[&download_dir, &archive_dir]).await?;
        if self.config.download.clear_on_start {
            fs_utils::clear_directory_files(&download_dir).await?;
        }

        let queue = TaskQueue::new(self.config.queue.idle_poll, self.config.queue.task_timeout);
        let recorder = SummaryRecorder::default();
        let entity = self.entity;
        let retry = RetryQueue::new(queue, self.config.queue.max_retries)
            .with_terminal_failure_hook(Arc::new(move |id, label, err| {
                error!(
                    entity = %entity,
                    task_id = id.0,
                    label,
                    error = %err,
                    "post-processing abandoned"
                );
            }));

        // Session open/authenticate failures are fatal: nothing can proceed.
        self.driver.open().await?;
        if let Err(err) = self.driver.authenticate().await {
            // The single session is already held; release it before bailing.
            if let Err(close_err) = self.driver.close().await {
                warn!(error = %close_err, "portal session close failed");
            }
            return Err(err);
        }

        let today = Local::now().date_naive();
        for desc in selected {
            recorder.begin(desc.report_type.clone());
            let params = overrides
                .get(&desc.report_type)
                .cloned()
                .unwrap_or_else(|| desc.default_params(today));
            info!(report = %desc.report_type, params = %params, "acquiring report");

            match self.acquire(desc, &params).await {
                Ok(raw) => self.enqueue_post_processing(&retry, &recorder, desc, &params, raw),
                Err(err) => {
                    let phase = match &err {
                        Error::Watch(_) => Phase::Watch,
                        _ => Phase::Acquisition,
                    };
                    warn!(
                        report = %desc.report_type,
                        phase = %phase,
                        error = %err,
                        "report failed, continuing with next"
                    );
                    recorder.record_failure(&desc.report_type, phase, &err);
                }
            }
        }

        retry.wait_for_completion().await;

        if let Err(err) = self.driver.close().await {
            warn!(error = %err, "portal session close failed");
        }

        let summary = recorder.snapshot(self.entity);
        info!(
            entity = %self.entity,
            reports = summary.outcomes.len(),
            failures = summary.failures().count(),
            "run complete"
        );
        Ok(summary)
    }

    /// Serial, session-bound part of one report: drive the portal, then watch
    /// the download directory until the export lands.
    async fn acquire(&self, desc: &ReportDescriptor, params: &DateParams) -> Result<PathBuf> {
        let driver = self.driver.as_ref();
        driver.navigate(&self.config.portal.reports_section).await?;
        driver.select_report(desc.report_type.as_str()).await?;
        apply_date_params(driver, params).await?;
        driver.run_report().await?;
        driver.export(self.config.portal.export_format).await?;

        let watch = DownloadWatch {
            prefix: desc.watch_prefix().to_string(),
            directory: self.config.download.download_dir.clone(),
            timeout: self.config.watch.timeout,
            poll_interval: self.config.watch.poll_interval,
            final_extensions: self.config.watch.final_extensions.clone(),
            partial_extensions: self.config.watch.partial_extensions.clone(),
        };
        watch.wait().await
    }

    /// Defer transform -> load -> relocate for one acquired export
    ///
    /// Each phase is its own retryable task; a phase enqueues its successor
    /// only on success, so a retried transform can never race its own load.
    fn enqueue_post_processing(
        &self,
        retry: &RetryQueue,
        recorder: &SummaryRecorder,
        desc: &ReportDescriptor,
        params: &DateParams,
        raw: PathBuf,
    ) {
        let report = desc.report_type.clone();
        let archive_dir = self.config.download.archive_dir.clone();
        let processed =
            archive_dir.join(desc.processed_file_name(params, Local::now().naive_local()));
        let archived_raw = archive_dir.join(
            raw.file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "export".into()),
        );

        let relocate_op: TaskOp = {
            let raw = raw.clone();
            Arc::new(move || {
                let from = raw.clone();
                let to = archived_raw.clone();
                Box::pin(async move { fs_utils::move_file(&from, &to).await })
            })
        };
        let relocate_task = with_phase(recorder, &report, Phase::Relocate, relocate_op);

        let load_op: TaskOp = {
            let store = self.store.clone();
            let processed = processed.clone();
            let staging = desc.staging_table.clone();
            let base = desc.base_table.clone();
            Arc::new(move || {
                let store = store.clone();
                let processed = processed.clone();
                let staging = staging.clone();
                let base = base.clone();
                Box::pin(async move {
                    store.ensure_staging_table(&staging, &base).await?;
                    store.bulk_load(&processed, &staging).await?;
                    Ok(())
                })
            })
        };
        let load_task = then_enqueue(
            retry,
            format!("{report}:{}", Phase::Relocate),
            relocate_task,
            with_phase(recorder, &report, Phase::Load, load_op),
        );

        let transform_op: TaskOp = {
            let transformer = self.transformer.clone();
            let store = self.store.clone();
            let raw = raw.clone();
            let base = desc.base_table.clone();
            Arc::new(move || {
                let transformer = transformer.clone();
                let store = store.clone();
                let raw = raw.clone();
                let processed = processed.clone();
                let base = base.clone();
                Box::pin(async move {
                    let schema = store.get_columns(&base).await?;
                    transformer.transform(&raw, &processed, &schema).await
                })
            })
        };
        let transform_task = then_enqueue(
            retry,
            format!("{report}:{}", Phase::Load),
            load_task,
            with_phase(recorder, &report, Phase::Transform, transform_op),
        );

        retry.enqueue(format!("{report}:{}", Phase::Transform), transform_task);
    }
}

/// Wrap an op so failures record the phase in the summary and a later success
/// (after retries) clears it again.
fn with_phase(recorder: &SummaryRecorder, report: &ReportType, phase: Phase, op: TaskOp) -> TaskOp {
    let recorder = recorder.clone();
    let report = report.clone();
    Arc::new(move || {
        let fut = op();
        let recorder = recorder.clone();
        let report = report.clone();
        Box::pin(async move {
            match fut.await {
                Ok(()) => {
                    recorder.clear_failure(&report);
                    Ok(())
                }
                Err(err) => {
                    recorder.record_failure(&report, phase, &err);
                    Err(err)
                }
            }
        })
    })
}

/// Wrap an op so its success enqueues the next phase's task
fn then_enqueue(retry: &RetryQueue, next_label: String, next: TaskOp, op: TaskOp) -> TaskOp {
    let retry = retry.clone();
    Arc::new(move || {
        let fut = op();
        let retry = retry.clone();
        let next_label = next_label.clone();
        let next = next.clone();
        Box::pin(async move {
            fut.await?;
            retry.enqueue(next_label, next);
            Ok(())
        })
    })
}

/// Shared per-run outcome accumulator, in report-start order
#[derive(Clone, Default)]
struct SummaryRecorder {
    outcomes: Arc<Mutex<Vec<ReportOutcome>>>,
}

impl SummaryRecorder {
    fn begin(&self, report: ReportType) {
        let mut outcomes = self.lock();
        if !outcomes.iter().any(|o| o.report_type == report) {
            outcomes.push(ReportOutcome::success(report));
        }
    }

    fn record_failure(&self, report: &ReportType, phase: Phase, err: &Error) {
        let mut outcomes = self.lock();
        if let Some(outcome) = outcomes.iter_mut().find(|o| &o.report_type == report) {
            outcome.failed_phase = Some(phase);
            outcome.error = Some(err.to_string());
        }
    }

    fn clear_failure(&self, report: &ReportType) {
        let mut outcomes = self.lock();
        if let Some(outcome) = outcomes.iter_mut().find(|o| &o.report_type == report) {
            outcome.failed_phase = None;
            outcome.error = None;
        }
    }

    fn snapshot(&self, entity: EntityId) -> RunSummary {
        RunSummary {
            entity: Some(entity),
            outcomes: self.lock().clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReportOutcome>> {
        match self.outcomes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
