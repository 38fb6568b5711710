use crate::error::{PatternError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based, row-major cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&cell_label(*self))
    }
}

/// Decode column letters (`"A"`, `"AA"`) to a zero-based column index.
pub fn label_to_column_index(label: &str) -> Result<u32> {
    if label.is_empty() || !label.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(PatternError::InvalidReference(format!(
            "column label {label:?} must be uppercase letters"
        )));
    }

    let mut value: u64 = 0;
    for byte in label.bytes() {
        value = value * 26 + u64::from(byte - b'A' + 1);
        if value - 1 > u64::from(u32::MAX) {
            return Err(PatternError::InvalidReference(format!(
                "column label {label:?} is out of range"
            )));
        }
    }
    Ok((value - 1) as u32)
}

/// Encode a zero-based column index as column letters.
pub fn column_index_to_label(index: u32) -> String {
    let mut column = u64::from(index) + 1;
    let mut name = String::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        name.insert(0, (b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    name
}

/// Signed variant of [`column_index_to_label`] for computed indices.
pub fn try_column_index_to_label(index: i64) -> Result<String> {
    let index = u32::try_from(index).map_err(|_| {
        PatternError::InvalidReference(format!("column index {index} is out of range"))
    })?;
    Ok(column_index_to_label(index))
}

pub fn cell_label(coord: CellCoord) -> String {
    format!("{}{}", column_index_to_label(coord.col), u64::from(coord.row) + 1)
}

/// Parse a cell label such as `"B2"` into a zero-based coordinate.
pub fn parse_cell_label(label: &str) -> Result<CellCoord> {
    let trimmed = label.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (letters, digits) = trimmed.split_at(split);

    let col = label_to_column_index(letters)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PatternError::InvalidReference(format!(
            "cell label {label:?} needs a row number"
        )));
    }
    let out_of_range =
        || PatternError::InvalidReference(format!("row in {label:?} is out of range"));
    let row: u64 = digits.parse().map_err(|_| out_of_range())?;
    if row == 0 {
        return Err(PatternError::InvalidReference(format!(
            "row in {label:?} must be at least 1"
        )));
    }
    let row = u32::try_from(row - 1).map_err(|_| out_of_range())?;
    Ok(CellCoord::new(row, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_labels_use_bijective_base_26() {
        assert_eq!(column_index_to_label(0), "A");
        assert_eq!(column_index_to_label(25), "Z");
        assert_eq!(column_index_to_label(26), "AA");
        assert_eq!(column_index_to_label(701), "ZZ");
        assert_eq!(column_index_to_label(702), "AAA");
        assert_eq!(label_to_column_index("AB").unwrap(), 27);
    }

    #[test]
    fn lowercase_and_mixed_labels_are_rejected() {
        assert!(label_to_column_index("a").is_err());
        assert!(label_to_column_index("A1").is_err());
        assert!(label_to_column_index("").is_err());
    }

    #[test]
    fn negative_index_is_invalid() {
        assert!(matches!(
            try_column_index_to_label(-1),
            Err(PatternError::InvalidReference(_))
        ));
        assert_eq!(try_column_index_to_label(2).unwrap(), "C");
    }

    #[test]
    fn cell_labels_round_trip() {
        let coord = parse_cell_label("AB42").unwrap();
        assert_eq!(coord, CellCoord::new(41, 27));
        assert_eq!(cell_label(coord), "AB42");
        assert!(parse_cell_label("B0").is_err());
        assert!(parse_cell_label("B").is_err());
        assert!(parse_cell_label("42").is_err());
    }

    #[test]
    fn largest_coordinates_round_trip() {
        let label = column_index_to_label(u32::MAX);
        assert_eq!(label_to_column_index(&label).unwrap(), u32::MAX);

        let corner = CellCoord::new(u32::MAX, u32::MAX);
        assert_eq!(parse_cell_label(&cell_label(corner)).unwrap(), corner);
        assert!(parse_cell_label("A4294967297").is_err());
    }
}
