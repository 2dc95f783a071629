//! Part-preserving XLSX access for template instantiation.
//!
//! [`XlsxPackage`] inflates a workbook into memory as a map of part name -> bytes. Reading
//! helpers resolve the workbook part, the sheet list, the primary (active) worksheet, merged
//! regions and cell values. Writing is limited to text patches on a single worksheet via
//! [`XlsxPackage::apply_text_patches`]: the worksheet XML is streamed and only the targeted
//! `<c>` elements change, so styles, drawings, print settings and every untouched part keep
//! their original bytes.

mod cells;
mod merge_cells;
pub mod openxml;
mod package;
mod patch;
mod recalc;
mod shared_strings;
mod sheet_metadata;
mod xstring;
mod zip_util;

pub use cells::read_worksheet_cells;
pub use merge_cells::read_merge_cells_from_worksheet_xml;
pub use package::{
    is_ole_compound_file, WorksheetPartInfo, XlsxError, XlsxPackage, XlsxPackageLimits,
    MAX_XLSX_PACKAGE_PART_BYTES, MAX_XLSX_PACKAGE_TOTAL_BYTES,
};
pub use patch::{patch_worksheet_xml, PatchSummary, WorksheetCellPatches};
pub use shared_strings::SharedStringTable;
pub use sheet_metadata::{
    parse_workbook_sheets, SheetVisibility, WorkbookSheetInfo, WorkbookSheets,
};
