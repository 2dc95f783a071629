use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CUSTOMER: &str = "Customer";
pub const PURCHASE_ORDER: &str = "Purchase Order";
pub const DATE: &str = "Date";
pub const DRAWING_NO: &str = "Drawing No.";
pub const SERIAL_NO: &str = "Serial No.";

/// Field -> cell pairs of the standard header block (column C, rows 4 to 8).
pub const STANDARD_FIELDS: [(&str, &str); 5] = [
    (CUSTOMER, "C4"),
    (PURCHASE_ORDER, "C5"),
    (DATE, "C6"),
    (DRAWING_NO, "C7"),
    (SERIAL_NO, "C8"),
];

/// One mapped field and the A1 reference of its target cell on the primary sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldCell {
    pub field: String,
    pub cell: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{0}` is mapped more than once")]
pub struct DuplicateFieldError(pub String);

/// Ordered field -> cell pairs for one document type.
///
/// Cell references are kept as written; they are classified against the template's merge
/// table when a value is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    cells: Vec<FieldCell>,
}

impl FieldMapping {
    pub fn new<I, F, C>(pairs: I) -> Result<Self, DuplicateFieldError>
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<String>,
    {
        let mut cells: Vec<FieldCell> = Vec::new();
        for (field, cell) in pairs {
            let field = field.into();
            if cells.iter().any(|existing| existing.field == field) {
                return Err(DuplicateFieldError(field));
            }
            cells.push(FieldCell {
                field,
                cell: cell.into(),
            });
        }
        Ok(Self { cells })
    }

    /// Customer, Purchase Order, Date, Drawing No. and Serial No. in C4..C8.
    pub fn standard() -> Self {
        Self {
            cells: STANDARD_FIELDS
                .iter()
                .map(|(field, cell)| FieldCell {
                    field: field.to_string(),
                    cell: cell.to_string(),
                })
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldCell> {
        self.cells.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|c| c.field.as_str())
    }

    pub fn cell_for(&self, field: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.cell.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
