use super::backend::GridDelta;
use crate::formula::{CellCoord, adjust_formula_references, cell_label};
use crate::model::{Step, StepKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy)]
struct Shift {
    axis: Axis,
    at: u32,
    amount: i64,
}

/// Structural edits already executed in the current run, in order.
#[derive(Debug, Clone, Default)]
pub struct StructuralHistory {
    shifts: Vec<Shift>,
    net: GridDelta,
}

impl StructuralHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `kind` if it inserts or deletes rows/columns.
    pub fn record(&mut self, kind: &StepKind) {
        let shift = match kind {
            StepKind::InsertRow { position, index } => Shift {
                axis: Axis::Row,
                at: position.insertion_point(*index),
                amount: 1,
            },
            StepKind::InsertColumn { position, index } => Shift {
                axis: Axis::Column,
                at: position.insertion_point(*index),
                amount: 1,
            },
            StepKind::DeleteColumn { index } => Shift {
                axis: Axis::Column,
                at: *index,
                amount: -1,
            },
            _ => return,
        };
        match shift.axis {
            Axis::Row => self.net.rows += shift.amount,
            Axis::Column => self.net.cols += shift.amount,
        }
        self.shifts.push(shift);
    }

    /// Sum of all recorded shifts, regardless of position.
    pub fn net(&self) -> GridDelta {
        self.net
    }

    /// Where a cell recorded before these edits sits now.
    ///
    /// Positions at or after an edit point move by the edit's amount; a
    /// deletion never moves a position below zero.
    pub fn map_cell(&self, coord: CellCoord) -> CellCoord {
        self.shifts.iter().fold(coord, |cell, shift| {
            let (value, other) = match shift.axis {
                Axis::Row => (cell.row, cell.col),
                Axis::Column => (cell.col, cell.row),
            };
            if value < shift.at {
                return cell;
            }
            let moved = (i64::from(value) + shift.amount).clamp(0, i64::from(u32::MAX)) as u32;
            match shift.axis {
                Axis::Row => CellCoord::new(moved, other),
                Axis::Column => CellCoord::new(other, moved),
            }
        })
    }

    pub fn delta_for(&self, coord: CellCoord) -> GridDelta {
        let mapped = self.map_cell(coord);
        GridDelta::new(
            i64::from(mapped.row) - i64::from(coord.row),
            i64::from(mapped.col) - i64::from(coord.col),
        )
    }

    /// The step as it must be executed after the recorded edits.
    pub fn translate(&self, step: &Step) -> (Step, GridDelta) {
        match &step.kind {
            StepKind::ApplyFormula {
                target, formula, ..
            } => {
                let delta = self.delta_for(*target);
                if delta.is_zero() {
                    return (step.clone(), delta);
                }
                let moved = self.map_cell(*target);
                let mut translated = step.clone();
                translated.kind = StepKind::ApplyFormula {
                    target: moved,
                    a1: cell_label(moved),
                    formula: adjust_formula_references(formula, delta.rows, delta.cols),
                };
                (translated, delta)
            }
            _ => (step.clone(), self.net),
        }
    }
}
