#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use pattern_agent::{
    ApplyOrchestrator, GridDelta, ItemId, JobBackend, JobId, JobStatusReport, SpreadsheetBackend,
    Step,
};
use tempfile::{TempDir, tempdir};
use tokio::sync::Notify;

pub const FAST_POLL: Duration = Duration::from_millis(10);

/// Spreadsheet backend that records every call and rejects chosen steps.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<(Step, GridDelta)>>,
    failing_ids: Mutex<HashSet<ItemId>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, id: &ItemId) {
        self.failing_ids.lock().insert(id.clone());
    }

    pub fn heal(&self, id: &ItemId) {
        self.failing_ids.lock().remove(id);
    }

    pub fn calls(&self) -> Vec<(Step, GridDelta)> {
        self.calls.lock().clone()
    }

    pub fn applied_ids(&self) -> Vec<ItemId> {
        self.calls.lock().iter().map(|(step, _)| step.id.clone()).collect()
    }
}

#[async_trait]
impl SpreadsheetBackend for RecordingBackend {
    async fn apply_step(&self, step: &Step, delta: GridDelta) -> Result<()> {
        self.calls.lock().push((step.clone(), delta));
        if self.failing_ids.lock().contains(&step.id) {
            return Err(anyhow!("cell is locked"));
        }
        Ok(())
    }
}

/// Recording backend that holds every call until the test releases it.
#[derive(Default)]
pub struct GatedBackend {
    inner: RecordingBackend,
    entered: Notify,
    release: Notify,
    open: AtomicBool,
}

impl GatedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until a call is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked call finish.
    pub fn release_one(&self) {
        self.release.notify_one();
    }

    /// Stop gating; later calls pass straight through.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn applied_ids(&self) -> Vec<ItemId> {
        self.inner.applied_ids()
    }
}

#[async_trait]
impl SpreadsheetBackend for GatedBackend {
    async fn apply_step(&self, step: &Step, delta: GridDelta) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.apply_step(step, delta).await
    }
}

/// Job backend that hands out scripted status reports in order. The last
/// report repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedJobBackend {
    submissions: Mutex<Vec<Vec<Step>>>,
    script: Mutex<VecDeque<Result<JobStatusReport, String>>>,
    last: Mutex<Option<JobStatusReport>>,
    reject_submit: Mutex<Option<String>>,
    polls: Mutex<usize>,
}

impl ScriptedJobBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, report: JobStatusReport) {
        self.script.lock().push_back(Ok(report));
    }

    pub fn push_error(&self, message: &str) {
        self.script.lock().push_back(Err(message.to_string()));
    }

    pub fn reject_submissions(&self, message: &str) {
        *self.reject_submit.lock() = Some(message.to_string());
    }

    pub fn submissions(&self) -> Vec<Vec<Step>> {
        self.submissions.lock().clone()
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock()
    }
}

#[async_trait]
impl JobBackend for ScriptedJobBackend {
    async fn submit_job(&self, steps: &[Step]) -> Result<JobId> {
        if let Some(message) = self.reject_submit.lock().clone() {
            return Err(anyhow!(message));
        }
        let mut submissions = self.submissions.lock();
        submissions.push(steps.to_vec());
        Ok(JobId(format!("job-{}", submissions.len())))
    }

    async fn job_status(&self, _job_id: &JobId) -> Result<JobStatusReport> {
        *self.polls.lock() += 1;
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(report)) => {
                *self.last.lock() = Some(report.clone());
                Ok(report)
            }
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| anyhow!("no scripted status")),
        }
    }
}

pub fn local_orchestrator(backend: Arc<RecordingBackend>) -> ApplyOrchestrator {
    ApplyOrchestrator::new(FAST_POLL).with_spreadsheet_backend(backend)
}

pub fn remote_orchestrator(jobs: Arc<ScriptedJobBackend>) -> ApplyOrchestrator {
    ApplyOrchestrator::new(FAST_POLL).with_job_backend(jobs)
}

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
