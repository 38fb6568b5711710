//! Apply orchestration: replays a frozen working list of steps, locally one
//! by one or as a remote job, and tracks per-step status for the UI.
//!
//! A run moves `Idle -> Running -> {Succeeded, Failed, PartiallyFailed}`.
//! Failed runs can be retried; a retry resumes at the failed step and never
//! resubmits steps that already succeeded. Execution errors are recorded in
//! the [`ApplySnapshot`] rather than returned.

mod backend;
mod translate;

pub use backend::{GridDelta, JobBackend, JobId, JobState, JobStatusReport, SpreadsheetBackend};
pub use translate::StructuralHistory;

use crate::config::AgentConfig;
use crate::error::{ERROR_METRICS, ErrorCode, PatternError, Result};
use crate::logging::apply_run_span;
use crate::model::Step;
use crate::timeline::Timeline;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

pub const ABANDONED_MESSAGE: &str = "apply run abandoned";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApplyMode {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApplyState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
}

impl ApplyState {
    pub fn can_retry(self) -> bool {
        matches!(self, ApplyState::Failed | ApplyState::PartiallyFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Success,
    Error,
}

/// One entry of the working list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyItem {
    pub seq: usize,
    pub step: Step,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The step as submitted, after structural translation (local runs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_step: Option<Step>,
}

impl ApplyItem {
    pub fn preview_label(&self) -> String {
        self.step.preview_label()
    }
}

/// Enabled steps in order, numbered from zero.
pub fn working_list(steps: impl IntoIterator<Item = Step>) -> Vec<ApplyItem> {
    steps
        .into_iter()
        .filter(|step| !step.disabled)
        .enumerate()
        .map(|(seq, step)| ApplyItem {
            seq,
            step,
            status: StepStatus::Pending,
            error_message: None,
            effective_step: None,
        })
        .collect()
}

/// Everything a UI needs to render an apply run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySnapshot {
    pub state: ApplyState,
    pub mode: Option<ApplyMode>,
    pub items: Vec<ApplyItem>,
    pub progress: u8,
    pub apply_error: Option<String>,
    pub apply_failed_index: Option<usize>,
    pub apply_job_error: Option<String>,
    pub job_id: Option<JobId>,
}

impl ApplySnapshot {
    pub fn is_applying(&self) -> bool {
        self.state == ApplyState::Running
    }

    pub fn can_retry(&self) -> bool {
        self.state.can_retry()
    }

    /// Where a retry starts: the failed step, else the first step not yet applied.
    pub fn resume_index(&self) -> Option<usize> {
        self.apply_failed_index.or_else(|| {
            self.items
                .iter()
                .find(|item| item.status != StepStatus::Success)
                .map(|item| item.seq)
        })
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    fn failure_state(&self) -> ApplyState {
        if self.count(StepStatus::Success) > 0 {
            ApplyState::PartiallyFailed
        } else {
            ApplyState::Failed
        }
    }

    fn progress_through(&mut self, completed: usize) {
        let total = self.items.len().max(1);
        self.progress = ((completed.min(total) * 100) / total) as u8;
    }
}

pub struct ApplyOrchestrator {
    spreadsheet: Option<Arc<dyn SpreadsheetBackend>>,
    jobs: Option<Arc<dyn JobBackend>>,
    poll_interval: Duration,
    run: Mutex<ApplySnapshot>,
    cancel: Mutex<CancellationToken>,
    updates: watch::Sender<ApplySnapshot>,
}

impl ApplyOrchestrator {
    pub fn new(poll_interval: Duration) -> Self {
        let (updates, _) = watch::channel(ApplySnapshot::default());
        Self {
            spreadsheet: None,
            jobs: None,
            poll_interval,
            run: Mutex::new(ApplySnapshot::default()),
            cancel: Mutex::new(CancellationToken::new()),
            updates,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.poll_interval())
    }

    pub fn with_spreadsheet_backend(mut self, backend: Arc<dyn SpreadsheetBackend>) -> Self {
        self.spreadsheet = Some(backend);
        self
    }

    pub fn with_job_backend(mut self, backend: Arc<dyn JobBackend>) -> Self {
        self.jobs = Some(backend);
        self
    }

    pub fn snapshot(&self) -> ApplySnapshot {
        self.run.lock().clone()
    }

    pub fn state(&self) -> ApplyState {
        self.run.lock().state
    }

    pub fn is_applying(&self) -> bool {
        self.run.lock().is_applying()
    }

    /// Receiver that sees every status change of every run.
    pub fn subscribe(&self) -> watch::Receiver<ApplySnapshot> {
        self.updates.subscribe()
    }

    /// Token for the current run. Cancelling it abandons the run at the next
    /// step boundary (local) or poll (remote).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub fn abandon(&self) {
        self.cancel.lock().cancel();
    }

    /// Discard the last run's working list and return to `Idle`.
    pub fn reset(&self) -> Result<()> {
        let mut run = self.run.lock();
        if run.is_applying() {
            return Err(PatternError::ApplyInProgress);
        }
        *run = ApplySnapshot::default();
        self.updates.send_replace(run.clone());
        Ok(())
    }

    /// Apply the timeline as it is now. Later timeline edits affect only the next run.
    pub async fn apply(&self, timeline: &Timeline, mode: ApplyMode) -> Result<ApplyState> {
        self.apply_steps(timeline.flatten_enabled(), mode).await
    }

    pub async fn apply_steps(&self, steps: Vec<Step>, mode: ApplyMode) -> Result<ApplyState> {
        self.ensure_backend(mode)?;
        let items = working_list(steps);
        let total = items.len();
        {
            let mut run = self.run.lock();
            if run.is_applying() {
                return Err(PatternError::ApplyInProgress);
            }
            *run = ApplySnapshot {
                state: ApplyState::Running,
                mode: Some(mode),
                items,
                ..ApplySnapshot::default()
            };
            *self.cancel.lock() = CancellationToken::new();
            self.updates.send_replace(run.clone());
        }

        let span = apply_run_span(mode.to_string().as_str(), total);
        async {
            info!(steps = total, "apply run started");
            let state = self.drive(mode, 0).await;
            info!(state = %state, "apply run finished");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Resume a failed run at the failed step, leaving successful steps alone.
    pub async fn retry(&self) -> Result<ApplyState> {
        let (mode, start, total) = {
            let mut run = self.run.lock();
            if run.is_applying() {
                return Err(PatternError::ApplyInProgress);
            }
            if !run.can_retry() {
                return Err(PatternError::NothingToRetry);
            }
            let mode = run.mode.unwrap_or_default();
            self.ensure_backend(mode)?;
            let start = run.resume_index().unwrap_or(run.items.len());
            for item in run.items.iter_mut().skip(start) {
                if item.status != StepStatus::Success {
                    item.status = StepStatus::Pending;
                    item.error_message = None;
                    item.effective_step = None;
                }
            }
            run.state = ApplyState::Running;
            run.apply_error = None;
            run.apply_failed_index = None;
            run.apply_job_error = None;
            run.job_id = None;
            run.progress_through(start);
            *self.cancel.lock() = CancellationToken::new();
            self.updates.send_replace(run.clone());
            (mode, start, run.items.len())
        };

        let span = apply_run_span(mode.to_string().as_str(), total);
        async {
            info!(resume_at = start, "apply retry started");
            let state = self.drive(mode, start).await;
            info!(state = %state, "apply retry finished");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    fn ensure_backend(&self, mode: ApplyMode) -> Result<()> {
        let configured = match mode {
            ApplyMode::Local => self.spreadsheet.is_some(),
            ApplyMode::Remote => self.jobs.is_some(),
        };
        if configured {
            Ok(())
        } else {
            Err(PatternError::validation(
                "apply mode",
                format!("no backend configured for {mode} apply"),
            ))
        }
    }

    async fn drive(&self, mode: ApplyMode, start: usize) -> ApplyState {
        let token = self.cancellation_token();
        let steps: Vec<Step> = self
            .run
            .lock()
            .items
            .iter()
            .map(|item| item.step.clone())
            .collect();

        if start >= steps.len() {
            return self.update(|run| {
                run.state = ApplyState::Succeeded;
                run.progress = 100;
            });
        }

        match (mode, &self.spreadsheet, &self.jobs) {
            (ApplyMode::Local, Some(backend), _) => {
                self.drive_local(backend.as_ref(), &steps, start, &token)
                    .await
            }
            (ApplyMode::Remote, _, Some(jobs)) => {
                self.drive_remote(jobs.as_ref(), &steps, start, &token)
                    .await
            }
            _ => self.fail_job(format!("no backend configured for {mode} apply")),
        }
    }

    async fn drive_local(
        &self,
        backend: &dyn SpreadsheetBackend,
        steps: &[Step],
        start: usize,
        token: &CancellationToken,
    ) -> ApplyState {
        let mut history = StructuralHistory::new();
        for step in &steps[..start] {
            history.record(&step.kind);
        }

        for (seq, step) in steps.iter().enumerate().skip(start) {
            if token.is_cancelled() {
                return self.abandon_run();
            }

            let (effective, delta) = history.translate(step);
            debug!(
                seq,
                kind = step.kind.as_ref(),
                delta_rows = delta.rows,
                delta_cols = delta.cols,
                "applying step"
            );

            match backend.apply_step(&effective, delta).await {
                Ok(()) => {
                    history.record(&effective.kind);
                    self.update(|run| {
                        let item = &mut run.items[seq];
                        item.status = StepStatus::Success;
                        item.effective_step = Some(effective);
                        run.progress_through(seq + 1);
                    });
                }
                Err(error) => {
                    let failure = PatternError::StepExecution {
                        seq,
                        message: error.to_string(),
                    };
                    failure.track(Some("apply_local"));
                    warn!(seq, error = %failure, "step rejected by spreadsheet backend");
                    return self.update(|run| {
                        let item = &mut run.items[seq];
                        item.status = StepStatus::Error;
                        item.error_message = Some(error.to_string());
                        item.effective_step = Some(effective);
                        run.apply_failed_index = Some(seq);
                        run.apply_error = Some(failure.to_string());
                        run.state = run.failure_state();
                    });
                }
            }
        }

        self.update(|run| {
            run.state = ApplyState::Succeeded;
            run.progress = 100;
        })
    }

    async fn drive_remote(
        &self,
        jobs: &dyn JobBackend,
        steps: &[Step],
        start: usize,
        token: &CancellationToken,
    ) -> ApplyState {
        let submitted = &steps[start..];
        let job_id = match jobs.submit_job(submitted).await {
            Ok(job_id) => job_id,
            Err(error) => return self.fail_job(format!("job submission failed: {error}")),
        };
        info!(job_id = %job_id, steps = submitted.len(), "apply job submitted");
        self.update(|run| run.job_id = Some(job_id.clone()));

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return self.abandon_run(),
                _ = interval.tick() => {}
            }

            let report = match jobs.job_status(&job_id).await {
                Ok(report) => report,
                Err(error) => return self.fail_job(format!("job status unavailable: {error}")),
            };
            debug!(
                job_id = %job_id,
                status = %report.status,
                progress = report.progress,
                "polled apply job"
            );

            match report.status {
                JobState::Queued | JobState::Running => {
                    self.update(|run| run.progress = report.progress.min(100));
                }
                JobState::Succeeded => {
                    return self.update(|run| {
                        for item in run.items.iter_mut().skip(start) {
                            item.status = StepStatus::Success;
                        }
                        run.progress = 100;
                        run.state = ApplyState::Succeeded;
                    });
                }
                JobState::Failed => {
                    return self.finish_failed_job(start, submitted.len(), report);
                }
            }
        }
    }

    fn finish_failed_job(
        &self,
        start: usize,
        submitted: usize,
        report: JobStatusReport,
    ) -> ApplyState {
        let message = report
            .error
            .clone()
            .unwrap_or_else(|| "apply job failed".to_string());
        let failed_seq = report
            .failed_index
            .filter(|index| *index < submitted)
            .map(|index| start + index);

        ERROR_METRICS.record_error(&ErrorCode::StepExecutionError, Some("apply_remote"));
        warn!(failed_seq = ?failed_seq, error = %message, "apply job failed");

        self.update(|run| {
            match failed_seq {
                Some(seq) => {
                    for item in run.items.iter_mut().skip(start) {
                        if item.seq < seq {
                            item.status = StepStatus::Success;
                        } else if item.seq == seq {
                            item.status = StepStatus::Error;
                            item.error_message = Some(message.clone());
                        }
                    }
                    run.apply_failed_index = Some(seq);
                    run.progress_through(seq);
                    run.apply_error = Some(
                        PatternError::StepExecution {
                            seq,
                            message: message.clone(),
                        }
                        .to_string(),
                    );
                }
                // Without an index the whole submitted suffix stays pending.
                None => {
                    run.apply_failed_index = None;
                    run.apply_error = Some(message.clone());
                }
            }
            run.state = run.failure_state();
        })
    }

    fn fail_job(&self, message: String) -> ApplyState {
        let error = PatternError::Job(message);
        error.track(Some("apply_remote"));
        warn!(error = %error, "apply job error");
        self.update(|run| {
            run.apply_job_error = Some(error.to_string());
            run.state = run.failure_state();
        })
    }

    fn abandon_run(&self) -> ApplyState {
        info!("apply run abandoned");
        self.update(|run| {
            run.apply_error = Some(ABANDONED_MESSAGE.to_string());
            run.state = run.failure_state();
        })
    }

    fn update(&self, mutate: impl FnOnce(&mut ApplySnapshot)) -> ApplyState {
        let mut run = self.run.lock();
        mutate(&mut *run);
        self.updates.send_replace(run.clone());
        run.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InsertPosition;

    #[test]
    fn working_list_skips_disabled_steps() {
        let steps = vec![
            Step::delete_column(0),
            Step::delete_column(1).disabled(true),
            Step::insert_row(InsertPosition::Before, 0),
        ];
        let disabled_id = steps[1].id.clone();
        let items = working_list(steps);
        assert_eq!(items.len(), 2);
        assert_eq!(items.iter().map(|i| i.seq).collect::<Vec<_>>(), vec![0, 1]);
        assert!(items.iter().all(|i| i.step.id != disabled_id));
        assert!(items.iter().all(|i| i.status == StepStatus::Pending));
    }

    #[test]
    fn resume_index_prefers_the_failed_index() {
        let mut snapshot = ApplySnapshot {
            items: working_list(vec![Step::delete_column(0), Step::delete_column(1)]),
            ..Default::default()
        };
        snapshot.items[0].status = StepStatus::Success;
        assert_eq!(snapshot.resume_index(), Some(1));
        snapshot.apply_failed_index = Some(0);
        assert_eq!(snapshot.resume_index(), Some(0));
    }

    #[test]
    fn failure_state_depends_on_successes() {
        let mut snapshot = ApplySnapshot {
            items: working_list(vec![Step::delete_column(0)]),
            ..Default::default()
        };
        assert_eq!(snapshot.failure_state(), ApplyState::Failed);
        snapshot.items[0].status = StepStatus::Success;
        assert_eq!(snapshot.failure_state(), ApplyState::PartiallyFailed);
    }

    #[tokio::test]
    async fn apply_without_backend_is_rejected_before_running() {
        let orchestrator = ApplyOrchestrator::new(Duration::from_millis(10));
        let err = orchestrator
            .apply_steps(vec![Step::delete_column(0)], ApplyMode::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, PatternError::Validation { .. }));
        assert_eq!(orchestrator.state(), ApplyState::Idle);
    }
}
