//! Cell-reference algebra: A1 labels and formula reference shifting.

pub mod a1;
pub mod shift;

pub use a1::{
    CellCoord, cell_label, column_index_to_label, label_to_column_index, parse_cell_label,
    try_column_index_to_label,
};
pub use shift::adjust_formula_references;
