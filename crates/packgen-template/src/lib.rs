//! Template catalog and instantiation engine.
//!
//! - [`Catalog`]: (document type, equipment) -> template file, plus each document type's
//!   [`FieldMapping`].
//! - [`instantiate`]: copy a template and write mapped values into its primary sheet,
//!   redirecting writes that land on merged cells to the merge anchor.
//! - [`export`]: the boundary used by front ends. Validates an [`ExportRequest`], resolves
//!   the template and reports the result as an [`ExportOutcome`].
//! - [`FormState`]: headless state of the export form.

pub mod catalog;
mod engine;
mod export;
mod form;
pub mod mapping;

pub use catalog::{Catalog, CatalogConfig, CatalogError, DocumentType, TemplateCatalogEntry};
pub use engine::{
    classify, instantiate, instantiate_with_progress, CellTarget, ExportStage, FieldWrite,
    InstantiateReport, TemplateError,
};
pub use export::{export, ExportOutcome, ExportRequest, ValidationError};
pub use form::{format_date, suggested_file_name, FormState, DATE_FORMAT};
pub use mapping::{FieldCell, FieldMapping};
