//! Pattern agent: record spreadsheet transformations as a timeline, save
//! them as reusable patterns, and replay them against a spreadsheet backend.

pub mod apply;
pub mod config;
pub mod error;
pub mod formula;
pub mod logging;
pub mod model;
pub mod patterns;
pub mod timeline;

pub use apply::{
    ApplyItem, ApplyMode, ApplyOrchestrator, ApplySnapshot, ApplyState, GridDelta, JobBackend,
    JobId, JobState, JobStatusReport, SpreadsheetBackend, StepStatus, StructuralHistory,
};
pub use config::AgentConfig;
pub use error::{ERROR_METRICS, ErrorCode, ErrorMetrics, PatternError, Result};
pub use formula::{CellCoord, adjust_formula_references, cell_label, column_index_to_label};
pub use logging::{LoggingConfig, init_logging};
pub use model::{
    FormulaDraft, Group, HighlightScope, HighlightTarget, InsertPosition, ItemId, RangeBounds,
    Step, StepKind, TimelineItem,
};
pub use patterns::{Pattern, PatternId, PatternStore};
pub use timeline::{ItemPatch, Timeline};

/// Everything a host needs for one session, wired from the same configuration.
pub struct PatternAgent {
    pub config: AgentConfig,
    pub timeline: Timeline,
    pub patterns: PatternStore,
    pub orchestrator: ApplyOrchestrator,
}

impl PatternAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let patterns = PatternStore::from_config(&config)?;
        tracing::info!(
            apply_mode = %config.apply_mode,
            stored_patterns = patterns.list().len(),
            "pattern agent ready"
        );
        Ok(Self {
            timeline: Timeline::from_config(&config),
            orchestrator: ApplyOrchestrator::from_config(&config),
            patterns,
            config,
        })
    }

    pub fn with_spreadsheet_backend(mut self, backend: std::sync::Arc<dyn SpreadsheetBackend>) -> Self {
        self.orchestrator = self.orchestrator.with_spreadsheet_backend(backend);
        self
    }

    pub fn with_job_backend(mut self, backend: std::sync::Arc<dyn JobBackend>) -> Self {
        self.orchestrator = self.orchestrator.with_job_backend(backend);
        self
    }

    /// Save the whole current timeline as a named pattern.
    pub fn export_timeline(&mut self, name: &str) -> Result<Pattern> {
        let items = self.timeline.snapshot();
        self.patterns.export(name, &items)
    }

    /// Append a stored pattern's items to the timeline under fresh ids.
    pub fn load_pattern(&mut self, id: &PatternId) -> Option<Vec<ItemId>> {
        let pattern = self.patterns.get(id)?;
        Some(self.timeline.load_pattern(pattern))
    }

    /// Apply the current timeline in the configured mode.
    pub async fn apply(&self) -> Result<ApplyState> {
        self.orchestrator
            .apply(&self.timeline, self.config.apply_mode)
            .await
    }
}
