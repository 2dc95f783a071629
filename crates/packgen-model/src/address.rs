use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of rows in an Excel worksheet (`1..=1_048_576`).
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;
/// Maximum number of columns in an Excel worksheet (`A..=XFD`).
pub const EXCEL_MAX_COLS: u32 = 16_384;

/// A reference to a single cell within a worksheet.
///
/// Rows and columns are **0-indexed**:
/// - `row = 0` is Excel row `1`
/// - `col = 0` is Excel column `A`
///
/// Ordering is row-major, which matches the order cells appear in worksheet XML.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    /// 0-indexed row.
    pub row: u32,
    /// 0-indexed column.
    pub col: u32,
}

impl CellRef {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Convert to Excel A1 notation (e.g. `A1`, `BC32`).
    pub fn to_a1(self) -> String {
        format!("{}{}", column_name(self.col), self.row + 1)
    }

    /// Parse an Excel A1-style reference (e.g. `C4`, `$B$2`).
    pub fn from_a1(a1: &str) -> Result<Self, AddressError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        let bytes = s.as_bytes();
        let mut idx = usize::from(bytes.first() == Some(&b'$'));

        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(AddressError::MissingColumn(s.to_string()));
        }
        let col = column_index(&s[col_start..idx])
            .ok_or_else(|| AddressError::InvalidColumn(s.to_string()))?;

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }

        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start {
            return Err(AddressError::MissingRow(s.to_string()));
        }
        if idx != bytes.len() {
            return Err(AddressError::TrailingCharacters(s.to_string()));
        }

        let row_1_based: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| AddressError::InvalidRow(s.to_string()))?;
        if row_1_based == 0 || row_1_based > EXCEL_MAX_ROWS {
            return Err(AddressError::InvalidRow(s.to_string()));
        }

        Ok(Self {
            row: row_1_based - 1,
            col,
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for CellRef {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_a1(s)
    }
}

/// A rectangular region within a worksheet.
///
/// The range is inclusive and always normalized so that `start` is the top-left
/// corner and `end` the bottom-right one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl Range {
    /// Construct a new range, normalizing coordinates if needed.
    pub const fn new(a: CellRef, b: CellRef) -> Self {
        let (start_row, end_row) = if a.row <= b.row {
            (a.row, b.row)
        } else {
            (b.row, a.row)
        };
        let (start_col, end_col) = if a.col <= b.col {
            (a.col, b.col)
        } else {
            (b.col, a.col)
        };
        Self {
            start: CellRef::new(start_row, start_col),
            end: CellRef::new(end_row, end_col),
        }
    }

    #[inline]
    pub const fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    /// The top-left cell of the range.
    #[inline]
    pub const fn top_left(&self) -> CellRef {
        self.start
    }

    #[inline]
    pub const fn is_single_cell(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    /// Number of cells covered by the range.
    pub const fn cell_count(&self) -> u64 {
        (self.end.row - self.start.row + 1) as u64 * (self.end.col - self.start.col + 1) as u64
    }

    /// Parse an A1-style range like `C4:E4`, or a single cell like `C4`.
    pub fn from_a1(a1: &str) -> Result<Self, AddressError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }

        match s.split_once(':') {
            None => {
                let cell = CellRef::from_a1(s)?;
                Ok(Range::new(cell, cell))
            }
            Some((a, b)) => Ok(Range::new(CellRef::from_a1(a)?, CellRef::from_a1(b)?)),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for Range {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_a1(s)
    }
}

/// Errors produced while parsing A1 references.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty A1 reference")]
    Empty,
    #[error("missing column in A1 reference `{0}`")]
    MissingColumn(String),
    #[error("missing row in A1 reference `{0}`")]
    MissingRow(String),
    #[error("column out of range in A1 reference `{0}`")]
    InvalidColumn(String),
    #[error("row out of range in A1 reference `{0}`")]
    InvalidRow(String),
    #[error("trailing characters in A1 reference `{0}`")]
    TrailingCharacters(String),
}

/// Column letters for a 0-based column index (`0 -> A`, `26 -> AA`).
pub fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::<u8>::with_capacity(3);
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.iter().rev().map(|b| char::from(*b)).collect()
}

fn column_index(letters: &str) -> Option<u32> {
    let mut col: u32 = 0;
    for b in letters.bytes() {
        let v = u32::from(b.to_ascii_uppercase().checked_sub(b'A')?) + 1;
        if v > 26 {
            return None;
        }
        col = col.checked_mul(26)?.checked_add(v)?;
    }
    (col >= 1 && col <= EXCEL_MAX_COLS).then(|| col - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parses_template_field_cells() {
        assert_eq!(CellRef::from_a1("C4").unwrap(), CellRef::new(3, 2));
        assert_eq!(CellRef::from_a1("$C$8").unwrap(), CellRef::new(7, 2));
        assert_eq!(CellRef::from_a1(" c5 ").unwrap(), CellRef::new(4, 2));
        assert_eq!(CellRef::new(31, 54).to_a1(), "BC32");
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(CellRef::from_a1(""), Err(AddressError::Empty));
        assert!(matches!(
            CellRef::from_a1("44"),
            Err(AddressError::MissingColumn(_))
        ));
        assert!(matches!(CellRef::from_a1("C"), Err(AddressError::MissingRow(_))));
        assert!(matches!(CellRef::from_a1("C0"), Err(AddressError::InvalidRow(_))));
        assert!(matches!(
            CellRef::from_a1("C4x"),
            Err(AddressError::TrailingCharacters(_))
        ));
        assert!(CellRef::from_a1("XFD1048576").is_ok());
        assert!(matches!(
            CellRef::from_a1("XFE1"),
            Err(AddressError::InvalidColumn(_))
        ));
        assert!(matches!(
            CellRef::from_a1("A1048577"),
            Err(AddressError::InvalidRow(_))
        ));
    }

    #[test]
    fn range_parsing_normalizes_corners() {
        let r = Range::from_a1("E6:C4").unwrap();
        assert_eq!(r.top_left(), CellRef::new(3, 2));
        assert_eq!(r.end, CellRef::new(5, 4));
        assert_eq!(r.to_string(), "C4:E6");
        assert_eq!(r.cell_count(), 9);

        let single: Range = "C4".parse().unwrap();
        assert!(single.is_single_cell());
        assert_eq!(single.to_string(), "C4");
    }

    proptest! {
        #[test]
        fn a1_text_parses_back_to_the_same_cell(row in 0u32..EXCEL_MAX_ROWS, col in 0u32..EXCEL_MAX_COLS) {
            let cell = CellRef::new(row, col);
            prop_assert_eq!(CellRef::from_a1(&cell.to_a1()).unwrap(), cell);
        }
    }
}
