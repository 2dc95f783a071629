//! `packgen-model` holds the small spreadsheet vocabulary shared by the packgen crates:
//! A1 cell addressing and merged-region lookup.
//!
//! It deliberately knows nothing about file formats so the catalog can validate cell
//! references at build time without pulling in the XLSX layer.

mod address;
mod merge;

pub use address::{column_name, AddressError, CellRef, Range, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
pub use merge::{MergeMembership, MergedRegions};
