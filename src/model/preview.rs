use super::{Group, HighlightScope, RangeBounds, Step, StepKind};
use crate::formula::{cell_label, column_index_to_label};
use std::borrow::Cow;

impl Step {
    /// One-line description shared by the timeline and the apply progress list.
    pub fn preview_label(&self) -> String {
        match &self.kind {
            StepKind::ApplyFormula { a1, formula, .. } => {
                format!("Formula {a1}: {}", one_line(formula))
            }
            StepKind::InsertRow { position, index } => {
                format!("Insert row {position} {}", u64::from(*index) + 1)
            }
            StepKind::InsertColumn { position, index } => {
                format!("Insert column {position} {}", column_index_to_label(*index))
            }
            StepKind::DeleteColumn { index } => {
                format!("Delete column {}", column_index_to_label(*index))
            }
            StepKind::FillSeries { source, range } => {
                format!("Fill series from {} into {}", cell_label(*source), range_label(range))
            }
            StepKind::SetColumnName {
                column_index,
                to_header,
            } => format!(
                "Rename column {} to {to_header:?}",
                column_index_to_label(*column_index)
            ),
            StepKind::ApplyHighlight {
                scope,
                color,
                target,
            } => match (scope, &target.by_header) {
                (HighlightScope::Column, Some(header)) => {
                    format!("Highlight column {header:?} ({color})")
                }
                (HighlightScope::Column, None) => format!(
                    "Highlight column {} ({color})",
                    column_index_to_label(target.fallback.start_col)
                ),
                (HighlightScope::Range, _) => {
                    format!("Highlight {} ({color})", range_label(&target.fallback))
                }
            },
        }
    }
}

impl Group {
    pub fn preview_label(&self) -> String {
        let noun = if self.items.len() == 1 { "step" } else { "steps" };
        format!("{} ({} {noun})", one_line(&self.name), self.items.len())
    }
}

/// Control characters such as `\n` are shown escaped so a label never wraps.
fn one_line(text: &str) -> Cow<'_, str> {
    if text.chars().any(char::is_control) {
        Cow::Owned(text.escape_debug().to_string())
    } else {
        Cow::Borrowed(text)
    }
}

fn range_label(range: &RangeBounds) -> String {
    format!("{}:{}", cell_label(range.start()), cell_label(range.end()))
}
