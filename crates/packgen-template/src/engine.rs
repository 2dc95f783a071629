//! Copy-and-fill template instantiation.
//!
//! The template's raw bytes are copied to the destination first, so every part the engine
//! has no model for survives untouched. The copy is then opened, the mapped values are
//! written into its primary sheet, and the result atomically replaces the copy.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use packgen_fs::{atomic_copy, atomic_write, AtomicWriteError};
use packgen_model::{CellRef, MergeMembership, MergedRegions, Range};
use packgen_xlsx::{WorksheetCellPatches, XlsxError, XlsxPackage};
use serde::Serialize;
use thiserror::Error;

use crate::mapping::{FieldCell, FieldMapping};

/// Where a write aimed at a cell reference actually lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellTarget {
    /// The cell is in no merge range (or is the anchor of one).
    Direct(CellRef),
    /// `requested` is a member of `range`; the write goes to its top-left `anchor`.
    Anchor {
        requested: CellRef,
        anchor: CellRef,
        range: Range,
    },
    /// The reference cannot be written: it is malformed, or the merge table is corrupt
    /// around it.
    Unresolved { reason: String },
}

/// Classify `reference` against a sheet's merge table.
pub fn classify(reference: &str, merges: &MergedRegions) -> CellTarget {
    let cell = match CellRef::from_a1(reference) {
        Ok(cell) => cell,
        Err(err) => {
            return CellTarget::Unresolved {
                reason: format!("invalid cell reference: {err}"),
            }
        }
    };
    match merges.membership(cell) {
        MergeMembership::Unmerged | MergeMembership::Anchor(_) => CellTarget::Direct(cell),
        MergeMembership::Member(range) => CellTarget::Anchor {
            requested: cell,
            anchor: range.top_left(),
            range,
        },
        MergeMembership::Conflicting(ranges) => CellTarget::Unresolved {
            reason: format!(
                "covered by overlapping merge ranges {}",
                ranges
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
    }
}

/// Progress of one export.
///
/// `Idle -> Copying -> Opened -> Writing -> Saved`, or `Failed` from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportStage {
    Idle,
    Copying,
    Opened,
    Writing,
    Saved,
    Failed,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportStage::Idle => "idle",
            ExportStage::Copying => "copying",
            ExportStage::Opened => "opened",
            ExportStage::Writing => "writing",
            ExportStage::Saved => "saved",
            ExportStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template file not found: {}", path.display())]
    MissingTemplateFile { path: PathBuf },
    #[error("failed to copy template {} to {}: {source}", template.display(), destination.display())]
    Copy {
        template: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "{} is not a readable spreadsheet (it holds an unmodified copy of the template): {source}",
        destination.display()
    )]
    Open {
        destination: PathBuf,
        #[source]
        source: XlsxError,
    },
    #[error(
        "cannot write field `{field}` to cell `{reference}`: {reason} ({} holds an unmodified copy of the template)",
        destination.display()
    )]
    UnresolvedCell {
        field: String,
        reference: String,
        reason: String,
        destination: PathBuf,
    },
    #[error(
        "failed to save {} (it holds an unmodified copy of the template): {source}",
        destination.display()
    )]
    Save {
        destination: PathBuf,
        #[source]
        source: AtomicWriteError<XlsxError>,
    },
}

impl TemplateError {
    /// The stage the export was in when it failed.
    pub fn stage(&self) -> ExportStage {
        match self {
            TemplateError::MissingTemplateFile { .. } => ExportStage::Idle,
            TemplateError::Copy { .. } => ExportStage::Copying,
            TemplateError::Open { .. } => ExportStage::Opened,
            TemplateError::UnresolvedCell { .. } | TemplateError::Save { .. } => {
                ExportStage::Writing
            }
        }
    }

    /// The destination path, when the failure happened after the template was copied.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            TemplateError::MissingTemplateFile { .. } | TemplateError::Copy { .. } => None,
            TemplateError::Open { destination, .. }
            | TemplateError::UnresolvedCell { destination, .. }
            | TemplateError::Save { destination, .. } => Some(destination),
        }
    }
}

/// One mapped field that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWrite {
    pub field: String,
    /// The reference from the mapping.
    pub requested: CellRef,
    /// The cell that received the value (the merge anchor when redirected).
    pub written: CellRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstantiateReport {
    pub destination: PathBuf,
    /// Name of the sheet the values were written to.
    pub sheet: String,
    pub writes: Vec<FieldWrite>,
}

/// Copy `template` to `destination` and write every mapped value into the copy.
pub fn instantiate(
    template: &Path,
    destination: &Path,
    mapping: &FieldMapping,
    values: &BTreeMap<String, String>,
) -> Result<InstantiateReport, TemplateError> {
    instantiate_with_progress(template, destination, mapping, values, |_| {})
}

/// [`instantiate`], reporting each stage transition to `on_stage`.
pub fn instantiate_with_progress(
    template: &Path,
    destination: &Path,
    mapping: &FieldMapping,
    values: &BTreeMap<String, String>,
    mut on_stage: impl FnMut(ExportStage),
) -> Result<InstantiateReport, TemplateError> {
    on_stage(ExportStage::Idle);
    let result = run(template, destination, mapping, values, &mut on_stage);
    match &result {
        Ok(_) => on_stage(ExportStage::Saved),
        Err(err) => {
            log::debug!("export failed while {}: {err}", err.stage());
            on_stage(ExportStage::Failed);
        }
    }
    result
}

fn run(
    template: &Path,
    destination: &Path,
    mapping: &FieldMapping,
    values: &BTreeMap<String, String>,
    on_stage: &mut impl FnMut(ExportStage),
) -> Result<InstantiateReport, TemplateError> {
    if !template.is_file() {
        return Err(TemplateError::MissingTemplateFile {
            path: template.to_path_buf(),
        });
    }

    on_stage(ExportStage::Copying);
    atomic_copy(template, destination).map_err(|source| TemplateError::Copy {
        template: template.to_path_buf(),
        destination: destination.to_path_buf(),
        source,
    })?;

    let open_err = |source: XlsxError| TemplateError::Open {
        destination: destination.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(destination).map_err(|err| open_err(XlsxError::Io(err)))?;
    let mut package = XlsxPackage::from_bytes(&bytes).map_err(open_err)?;
    let sheet = package.primary_worksheet().map_err(open_err)?;
    let merges = package
        .merged_regions(&sheet.worksheet_part)
        .map_err(open_err)?;
    on_stage(ExportStage::Opened);

    on_stage(ExportStage::Writing);
    let mut patches = WorksheetCellPatches::default();
    let mut writes = Vec::new();
    // Anchor -> field that last wrote it, to report collisions.
    let mut written_by: BTreeMap<CellRef, &str> = BTreeMap::new();
    for FieldCell { field, cell } in mapping.iter() {
        let Some(value) = values.get(field) else {
            continue;
        };
        let (requested, target) = match classify(cell, &merges) {
            CellTarget::Direct(target) => (target, target),
            CellTarget::Anchor {
                requested,
                anchor,
                range,
            } => {
                log::debug!("`{field}`: {cell} is merged into {range}; writing {anchor}");
                (requested, anchor)
            }
            CellTarget::Unresolved { reason } => {
                return Err(TemplateError::UnresolvedCell {
                    field: field.clone(),
                    reference: cell.clone(),
                    reason,
                    destination: destination.to_path_buf(),
                })
            }
        };

        if let Some(previous) = written_by.insert(target, field) {
            log::warn!("`{field}` and `{previous}` both resolve to {target}; `{field}` wins");
        }
        patches.set_text(target, value.clone());
        log::debug!("`{field}` -> {target}");
        writes.push(FieldWrite {
            field: field.clone(),
            requested,
            written: target,
        });
    }

    package
        .apply_text_patches(&sheet.worksheet_part, &patches)
        .map_err(open_err)?;

    atomic_write(destination, |file| package.write_to(file)).map_err(|source| {
        TemplateError::Save {
            destination: destination.to_path_buf(),
            source,
        }
    })?;

    Ok(InstantiateReport {
        destination: destination.to_path_buf(),
        sheet: sheet.name,
        writes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn range(a1: &str) -> Range {
        Range::from_a1(a1).unwrap()
    }

    #[test]
    fn classify_direct_anchor_and_member() {
        let merges: MergedRegions = [range("C4:E4"), range("C6:C7")].into_iter().collect();
        assert_eq!(classify("B4", &merges), CellTarget::Direct(CellRef::new(3, 1)));
        assert_eq!(classify("C4", &merges), CellTarget::Direct(CellRef::new(3, 2)));
        assert_eq!(
            classify("$D$4", &merges),
            CellTarget::Anchor {
                requested: CellRef::new(3, 3),
                anchor: CellRef::new(3, 2),
                range: range("C4:E4"),
            }
        );
        assert_eq!(
            classify("C7", &merges),
            CellTarget::Anchor {
                requested: CellRef::new(6, 2),
                anchor: CellRef::new(5, 2),
                range: range("C6:C7"),
            }
        );
    }

    #[test]
    fn classify_unresolved() {
        let merges: MergedRegions = [range("A1:C3"), range("B2:D4")].into_iter().collect();
        assert!(matches!(classify("C3", &merges), CellTarget::Unresolved { .. }));
        assert!(matches!(classify("4C", &merges), CellTarget::Unresolved { .. }));
        assert!(matches!(classify("", &merges), CellTarget::Unresolved { .. }));
        // Only one of the overlapping ranges covers A1.
        assert_eq!(classify("A1", &merges), CellTarget::Direct(CellRef::new(0, 0)));
    }

    #[test]
    fn missing_template_fails_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.xlsx");
        let mut stages = Vec::new();
        let err = instantiate_with_progress(
            &dir.path().join("missing.xlsx"),
            &dest,
            &FieldMapping::standard(),
            &BTreeMap::new(),
            |stage| stages.push(stage),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::MissingTemplateFile { .. }));
        assert_eq!(err.stage(), ExportStage::Idle);
        assert_eq!(stages, vec![ExportStage::Idle, ExportStage::Failed]);
        assert!(!dest.exists());
    }

    #[test]
    fn corrupt_template_is_an_open_error_naming_the_copy() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("broken.xlsx");
        std::fs::write(&template, b"definitely not a zip").unwrap();
        let dest = dir.path().join("out.xlsx");

        let err = instantiate(&template, &dest, &FieldMapping::standard(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Open { .. }));
        assert_eq!(err.destination(), Some(dest.as_path()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"definitely not a zip");
    }
}
