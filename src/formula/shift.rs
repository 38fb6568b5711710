use super::a1::{label_to_column_index, try_column_index_to_label};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `(start | non-reference char)($?)(column letters)($?)(row digits)`
static CELL_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^A-Za-z0-9_$])(\$?)([A-Z]+)(\$?)([0-9]+)")
        .expect("cell reference pattern is valid")
});

/// Shift every A1 reference inside `formula` by the given row/column deltas.
///
/// Only strings starting with `=` are rewritten. A reference whose shifted
/// position would fall before column A or row 1 is left as written. `$`
/// anchors are kept in the text but shifted like relative references.
pub fn adjust_formula_references(formula: &str, row_delta: i64, col_delta: i64) -> String {
    if !formula.starts_with('=') || (row_delta == 0 && col_delta == 0) {
        return formula.to_string();
    }

    let mut out = String::with_capacity(formula.len() + 4);
    let mut last = 0;
    for caps in CELL_REFERENCE.captures_iter(formula) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if continues_identifier(&formula[whole.end()..]) {
            continue;
        }
        if let Some(shifted) = shift_reference(&caps, row_delta, col_delta) {
            out.push_str(&formula[last..whole.start()]);
            out.push_str(&shifted);
            last = whole.end();
        }
    }
    out.push_str(&formula[last..]);
    out
}

fn shift_reference(caps: &Captures<'_>, row_delta: i64, col_delta: i64) -> Option<String> {
    let prefix = &caps[1];
    let col_anchor = &caps[2];
    let letters = &caps[3];
    let row_anchor = &caps[4];

    let row: i64 = caps[5].parse().ok()?;
    if row < 1 {
        return None;
    }
    let col = i64::from(label_to_column_index(letters).ok()?);

    let new_row = row.checked_add(row_delta)?;
    let new_col = col.checked_add(col_delta)?;
    if new_row < 1 || new_col < 0 {
        return None;
    }
    let new_letters = try_column_index_to_label(new_col).ok()?;
    Some(format!(
        "{prefix}{col_anchor}{new_letters}{row_anchor}{new_row}"
    ))
}

// `LOG10(` or `A1B` are not cell references.
fn continues_identifier(rest: &str) -> bool {
    rest.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '(')
}
