//! Step model: the closed set of spreadsheet mutation intents plus groups.
//!
//! The serialized shape is the storage format for exported patterns: every
//! timeline item carries a `type` discriminator (`GROUP` or one of the step
//! kinds in SCREAMING_SNAKE_CASE) and camelCase field names.

mod preview;

use crate::error::{PatternError, Result};
use crate::formula::{CellCoord, parse_cell_label};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display};

// ============================================================================
// Identifiers
// ============================================================================

/// Stable identifier for a step or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Step payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InsertPosition {
    Before,
    After,
}

impl InsertPosition {
    /// Index at which the new row/column lands.
    pub fn insertion_point(self, index: u32) -> u32 {
        match self {
            InsertPosition::Before => index,
            InsertPosition::After => index.saturating_add(1),
        }
    }
}

/// Inclusive, zero-based rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeBounds {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl RangeBounds {
    pub fn new(start: CellCoord, end: CellCoord) -> Self {
        Self {
            start_row: start.row,
            start_col: start.col,
            end_row: end.row,
            end_col: end.col,
        }
    }

    pub fn start(&self) -> CellCoord {
        CellCoord::new(self.start_row, self.start_col)
    }

    pub fn end(&self) -> CellCoord {
        CellCoord::new(self.end_row, self.end_col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "lowercase")]
pub enum HighlightScope {
    Range,
    Column,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_header: Option<String>,
    pub fallback: RangeBounds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    ApplyFormula {
        target: CellCoord,
        a1: String,
        formula: String,
    },
    InsertRow {
        position: InsertPosition,
        index: u32,
    },
    InsertColumn {
        position: InsertPosition,
        index: u32,
    },
    DeleteColumn {
        index: u32,
    },
    FillSeries {
        source: CellCoord,
        range: RangeBounds,
    },
    SetColumnName {
        column_index: u32,
        to_header: String,
    },
    ApplyHighlight {
        scope: HighlightScope,
        color: String,
        target: HighlightTarget,
    },
}

impl StepKind {
    /// Structural steps move other cells; later formula steps must follow them.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StepKind::InsertRow { .. } | StepKind::InsertColumn { .. } | StepKind::DeleteColumn { .. }
        )
    }
}

// ============================================================================
// Step
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: ItemId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: ItemId::generate(),
            created_at: Utc::now(),
            disabled: false,
            kind,
        }
    }

    pub fn apply_formula(target: CellCoord, formula: impl Into<String>) -> Self {
        Self::new(StepKind::ApplyFormula {
            target,
            a1: crate::formula::cell_label(target),
            formula: formula.into(),
        })
    }

    pub fn insert_row(position: InsertPosition, index: u32) -> Self {
        Self::new(StepKind::InsertRow { position, index })
    }

    pub fn insert_column(position: InsertPosition, index: u32) -> Self {
        Self::new(StepKind::InsertColumn { position, index })
    }

    pub fn delete_column(index: u32) -> Self {
        Self::new(StepKind::DeleteColumn { index })
    }

    pub fn fill_series(source: CellCoord, range: RangeBounds) -> Self {
        Self::new(StepKind::FillSeries { source, range })
    }

    pub fn set_column_name(column_index: u32, to_header: impl Into<String>) -> Self {
        Self::new(StepKind::SetColumnName {
            column_index,
            to_header: to_header.into(),
        })
    }

    pub fn highlight_range(color: impl Into<String>, range: RangeBounds) -> Self {
        Self::new(StepKind::ApplyHighlight {
            scope: HighlightScope::Range,
            color: color.into(),
            target: HighlightTarget {
                by_header: None,
                fallback: range,
            },
        })
    }

    pub fn highlight_column(
        color: impl Into<String>,
        by_header: Option<String>,
        fallback: RangeBounds,
    ) -> Self {
        Self::new(StepKind::ApplyHighlight {
            scope: HighlightScope::Column,
            color: color.into(),
            target: HighlightTarget {
                by_header,
                fallback,
            },
        })
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Same content under a new identity.
    pub fn with_fresh_id(&self) -> Self {
        Self {
            id: ItemId::generate(),
            ..self.clone()
        }
    }
}

// ============================================================================
// Group and timeline items
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupTag {
    #[serde(rename = "GROUP")]
    Group,
}

/// A named, flat bundle of steps shown as a single timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub tag: GroupTag,
    pub name: String,
    pub items: Vec<Step>,
    #[serde(default)]
    pub collapsed: bool,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: impl Into<String>, items: Vec<Step>) -> Self {
        Self {
            id: ItemId::generate(),
            tag: GroupTag::Group,
            name: name.into(),
            items,
            collapsed: false,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position_of(&self, step_id: &ItemId) -> Option<usize> {
        self.items.iter().position(|s| &s.id == step_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimelineItem {
    Group(Group),
    Step(Step),
}

impl TimelineItem {
    pub fn id(&self) -> &ItemId {
        match self {
            TimelineItem::Group(group) => &group.id,
            TimelineItem::Step(step) => &step.id,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            TimelineItem::Group(group) => Some(group),
            TimelineItem::Step(_) => None,
        }
    }

    /// Groups always hold at least one step; anything else came from outside.
    pub fn is_empty_group(&self) -> bool {
        self.as_group().is_some_and(Group::is_empty)
    }

    pub fn step_count(&self) -> usize {
        match self {
            TimelineItem::Group(group) => group.len(),
            TimelineItem::Step(_) => 1,
        }
    }

    /// Constituent steps in order; a step yields itself.
    pub fn steps(&self) -> Box<dyn Iterator<Item = &Step> + '_> {
        match self {
            TimelineItem::Group(group) => Box::new(group.items.iter()),
            TimelineItem::Step(step) => Box::new(std::iter::once(step)),
        }
    }

    pub fn into_steps(self) -> Vec<Step> {
        match self {
            TimelineItem::Group(group) => group.items,
            TimelineItem::Step(step) => vec![step],
        }
    }

    pub fn with_fresh_ids(&self) -> Self {
        match self {
            TimelineItem::Step(step) => TimelineItem::Step(step.with_fresh_id()),
            TimelineItem::Group(group) => TimelineItem::Group(Group {
                id: ItemId::generate(),
                items: group.items.iter().map(Step::with_fresh_id).collect(),
                ..group.clone()
            }),
        }
    }

    pub fn preview_label(&self) -> String {
        match self {
            TimelineItem::Group(group) => group.preview_label(),
            TimelineItem::Step(step) => step.preview_label(),
        }
    }
}

impl From<Step> for TimelineItem {
    fn from(step: Step) -> Self {
        TimelineItem::Step(step)
    }
}

impl From<Group> for TimelineItem {
    fn from(group: Group) -> Self {
        TimelineItem::Group(group)
    }
}

// ============================================================================
// Edit-boundary validation
// ============================================================================

/// Raw user input for a formula step, validated before a [`Step`] exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaDraft {
    pub target: String,
    pub formula: String,
}

impl FormulaDraft {
    pub fn new(target: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            formula: formula.into(),
        }
    }

    pub fn validate(&self) -> Result<(CellCoord, String)> {
        let formula = self.formula.trim();
        if !formula.starts_with('=') {
            return Err(PatternError::validation(
                "formula",
                "formula must start with '='",
            ));
        }
        let target = parse_cell_label(&self.target.to_ascii_uppercase()).map_err(|_| {
            PatternError::validation(
                "target",
                format!("{:?} is not a cell reference like B2", self.target),
            )
        })?;
        Ok((target, formula.to_string()))
    }

    pub fn into_step(self) -> Result<Step> {
        let (target, formula) = self.validate()?;
        Ok(Step::apply_formula(target, formula))
    }
}
