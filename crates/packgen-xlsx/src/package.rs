use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};

use packgen_model::{AddressError, CellRef, MergedRegions};
use thiserror::Error;

use crate::cells::read_worksheet_cells;
use crate::merge_cells::read_merge_cells_from_worksheet_xml;
use crate::openxml::{
    parse_relationships, rels_part_name, resolve_relationship_by_type, resolve_target,
    REL_TYPE_CALC_CHAIN, REL_TYPE_OFFICE_DOCUMENT,
};
use crate::patch::{patch_worksheet_xml, PatchSummary, WorksheetCellPatches};
use crate::shared_strings::SharedStringTable;
use crate::sheet_metadata::{parse_workbook_sheets, SheetVisibility, WorkbookSheets};
use crate::zip_util::{part_names_equivalent, read_entry_limited, InflateBudget};

const REL_TYPE_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Signature of an OLE2 compound document (legacy `.xls` and friends).
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Maximum allowed *inflated* bytes for a single ZIP entry.
///
/// Templates are small; this only guards against ZIP bombs handed in as templates.
pub const MAX_XLSX_PACKAGE_PART_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// Maximum allowed *inflated* bytes across all ZIP entries of a package.
pub const MAX_XLSX_PACKAGE_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

/// Size limits enforced by [`XlsxPackage::from_bytes_limited`].
#[derive(Debug, Clone, Copy)]
pub struct XlsxPackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for XlsxPackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_XLSX_PACKAGE_PART_BYTES,
            max_total_bytes: MAX_XLSX_PACKAGE_TOTAL_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error("invalid sheetId value")]
    InvalidSheetId,
    #[error("invalid merge range `{0}`: {1}")]
    InvalidMergeRef(String, #[source] AddressError),
    #[error("invalid cell reference `{0}`: {1}")]
    InvalidCellRef(String, #[source] AddressError),
    #[error(
        "xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)"
    )]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("legacy binary workbook (.xls) is not an Office Open XML package; re-save it as .xlsx")]
    LegacyBinaryWorkbook,
}

/// Resolved metadata for a workbook sheet and its corresponding worksheet part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksheetPartInfo {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    pub visibility: SheetVisibility,
    /// ZIP entry name for the worksheet XML (e.g. `xl/worksheets/sheet1.xml`).
    pub worksheet_part: String,
}

/// In-memory representation of an XLSX package as a map of part name -> bytes.
///
/// Parts that are never patched are written back byte-for-byte; only the ZIP container is
/// re-packed.
#[derive(Debug, Clone)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

/// True when `bytes` start with the OLE2 compound document signature.
pub fn is_ole_compound_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&OLE_MAGIC)
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, XlsxPackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxPackageLimits) -> Result<Self, XlsxError> {
        if is_ole_compound_file(bytes) {
            return Err(XlsxError::LegacyBinaryWorkbook);
        }

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = BTreeMap::new();
        let mut budget = InflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let declared_size = file.size();
            let buf = read_entry_limited(
                &mut file,
                &name,
                declared_size,
                limits.max_part_bytes,
                &mut budget,
            )?;
            parts.insert(name, buf);
        }

        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.stored_name(name)
            .and_then(|stored| self.parts.get(stored))
            .map(Vec::as_slice)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Replace (or add) a part, keeping the stored spelling of an existing part name.
    pub fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        let key = self
            .stored_name(name)
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string());
        self.parts.insert(key, bytes);
    }

    /// Map a lookup name onto the key the package stores it under.
    ///
    /// Producers in the wild use leading slashes, `\` separators and odd casing; stored names
    /// are kept as-is so untouched entries round-trip unchanged.
    fn stored_name(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.parts.get_key_value(name) {
            return Some(key.as_str());
        }
        self.parts
            .keys()
            .find(|key| part_names_equivalent(key, name))
            .map(String::as_str)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), XlsxError> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        // Some consumers sniff `[Content_Types].xml` as the first entry.
        let ordered = self
            .parts
            .iter()
            .filter(|(name, _)| name.as_str() == CONTENT_TYPES_PART)
            .chain(
                self.parts
                    .iter()
                    .filter(|(name, _)| name.as_str() != CONTENT_TYPES_PART),
            );
        for (name, bytes) in ordered {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    /// Name of the workbook part, as declared by the package's officeDocument relationship.
    pub fn workbook_part(&self) -> Result<String, XlsxError> {
        if let Some(part) = resolve_relationship_by_type(self, "", REL_TYPE_OFFICE_DOCUMENT)? {
            if self.part(&part).is_some() {
                return Ok(part);
            }
        }
        if self.part(DEFAULT_WORKBOOK_PART).is_some() {
            return Ok(DEFAULT_WORKBOOK_PART.to_string());
        }
        Err(XlsxError::MissingPart(DEFAULT_WORKBOOK_PART.to_string()))
    }

    pub fn workbook_sheets(&self) -> Result<WorkbookSheets, XlsxError> {
        let workbook_part = self.workbook_part()?;
        let workbook_xml = self
            .part(&workbook_part)
            .ok_or_else(|| XlsxError::MissingPart(workbook_part.clone()))?;
        parse_workbook_sheets(workbook_xml)
    }

    /// Return the ordered workbook sheets with their resolved worksheet part paths.
    pub fn worksheet_parts(&self) -> Result<Vec<WorksheetPartInfo>, XlsxError> {
        let workbook_part = self.workbook_part()?;
        let sheets = self.workbook_sheets()?.sheets;

        let rels_part = rels_part_name(&workbook_part);
        let rels_bytes = self
            .part(&rels_part)
            .ok_or_else(|| XlsxError::MissingPart(rels_part.clone()))?;
        let rel_by_id: HashMap<String, String> = parse_relationships(rels_bytes)?
            .into_iter()
            .map(|rel| (rel.id, rel.target))
            .collect();

        let mut out = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            let target = rel_by_id.get(&sheet.rel_id).ok_or_else(|| {
                XlsxError::Invalid(format!("missing relationship for {}", sheet.rel_id))
            })?;
            out.push(WorksheetPartInfo {
                worksheet_part: resolve_target(&workbook_part, target),
                name: sheet.name,
                sheet_id: sheet.sheet_id,
                rel_id: sheet.rel_id,
                visibility: sheet.visibility,
            });
        }
        Ok(out)
    }

    /// The sheet Excel shows first when the workbook is opened.
    pub fn primary_worksheet(&self) -> Result<WorksheetPartInfo, XlsxError> {
        let idx = self
            .workbook_sheets()?
            .primary_index()
            .ok_or_else(|| XlsxError::Invalid("workbook declares no sheets".to_string()))?;
        let mut sheets = self.worksheet_parts()?;
        if idx >= sheets.len() {
            return Err(XlsxError::Invalid(format!("sheet index {idx} has no worksheet part")));
        }
        Ok(sheets.swap_remove(idx))
    }

    fn shared_strings_part(&self) -> Result<Option<String>, XlsxError> {
        let workbook_part = self.workbook_part()?;
        let declared = resolve_relationship_by_type(self, &workbook_part, REL_TYPE_SHARED_STRINGS)?;
        Ok(declared.filter(|part| self.part(part).is_some()))
    }

    pub fn shared_strings(&self) -> Result<Option<SharedStringTable>, XlsxError> {
        match self.shared_strings_part()? {
            Some(part) => match self.part(&part) {
                Some(bytes) => Ok(Some(SharedStringTable::parse(bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn worksheet_xml(&self, worksheet_part: &str) -> Result<&[u8], XlsxError> {
        self.part(worksheet_part)
            .ok_or_else(|| XlsxError::MissingPart(worksheet_part.to_string()))
    }

    pub fn merged_regions(&self, worksheet_part: &str) -> Result<MergedRegions, XlsxError> {
        read_merge_cells_from_worksheet_xml(self.worksheet_xml(worksheet_part)?)
    }

    /// Every valued cell of a worksheet, as display text.
    pub fn worksheet_cells(
        &self,
        worksheet_part: &str,
    ) -> Result<BTreeMap<CellRef, String>, XlsxError> {
        let sst = self.shared_strings()?;
        read_worksheet_cells(self.worksheet_xml(worksheet_part)?, sst.as_ref())
    }

    pub fn cell_text(
        &self,
        worksheet_part: &str,
        cell: CellRef,
    ) -> Result<Option<String>, XlsxError> {
        Ok(self.worksheet_cells(worksheet_part)?.remove(&cell))
    }

    /// Write text values into one worksheet.
    ///
    /// Only the worksheet part (plus the shared string table when new strings are appended)
    /// changes. When a patched cell held a formula the calc chain is dropped and the workbook
    /// is flagged for a full recalculation on load.
    pub fn apply_text_patches(
        &mut self,
        worksheet_part: &str,
        patches: &WorksheetCellPatches,
    ) -> Result<PatchSummary, XlsxError> {
        if patches.is_empty() {
            return Ok(PatchSummary::default());
        }

        let sst_part = self.shared_strings_part()?;
        let mut sst = match sst_part.as_deref().and_then(|part| self.part(part)) {
            Some(bytes) => Some(SharedStringTable::parse(bytes)?),
            None => None,
        };

        let (patched, summary) =
            patch_worksheet_xml(self.worksheet_xml(worksheet_part)?, patches, sst.as_mut())?;
        self.set_part(worksheet_part, patched);

        if let (Some(part), Some(table)) = (sst_part, sst) {
            if table.is_dirty() {
                let original = self
                    .part(&part)
                    .ok_or_else(|| XlsxError::MissingPart(part.clone()))?;
                let updated = table.write_appended(original)?;
                self.set_part(&part, updated);
            }
        }

        if !summary.replaced_formulas.is_empty() {
            let workbook_part = self.workbook_part()?;
            let calc_chain = resolve_relationship_by_type(self, &workbook_part, REL_TYPE_CALC_CHAIN)?
                .and_then(|part| self.stored_name(&part).map(str::to_string));
            let workbook_key = self
                .stored_name(&workbook_part)
                .map(str::to_string)
                .unwrap_or(workbook_part);
            crate::recalc::invalidate_calc_chain(
                &mut self.parts,
                &workbook_key,
                calc_chain.as_deref(),
            )?;
        }

        log::debug!(
            "patched {} cell(s) in `{worksheet_part}` ({} formula(s) replaced)",
            patches.len(),
            summary.replaced_formulas.len()
        );
        Ok(summary)
    }
}
