//! The export boundary: validate a request, resolve its template and run the engine,
//! turning every failure into a message for the user.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::catalog::Catalog;
use crate::engine::{instantiate, InstantiateReport, TemplateError};
use crate::mapping::FieldMapping;

/// One export attempt, built fresh from the form state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub document_type: String,
    pub equipment: String,
    pub values: BTreeMap<String, String>,
}

/// Required fields left empty (after trimming), in mapping order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Please fill in: {}", missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<String>,
}

impl ExportRequest {
    pub fn new(document_type: impl Into<String>, equipment: impl Into<String>) -> Self {
        Self {
            document_type: document_type.into(),
            equipment: equipment.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Check that the equipment and every field of `mapping` are non-empty.
    pub fn validate(&self, mapping: &FieldMapping) -> Result<(), ValidationError> {
        let blank = |s: Option<&str>| s.map_or(true, |s| s.trim().is_empty());

        let mut missing = Vec::new();
        if blank(Some(self.equipment.as_str())) {
            missing.push("Equipment".to_string());
        }
        missing.extend(
            mapping
                .fields()
                .filter(|field| blank(self.values.get(*field).map(String::as_str)))
                .map(str::to_string),
        );

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { missing })
        }
    }
}

#[derive(Debug)]
pub enum ExportOutcome {
    Saved {
        path: PathBuf,
        report: InstantiateReport,
    },
    Failed {
        title: &'static str,
        message: String,
    },
}

impl ExportOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, ExportOutcome::Saved { .. })
    }

    pub fn title(&self) -> &'static str {
        match self {
            ExportOutcome::Saved { .. } => "Success",
            ExportOutcome::Failed { title, .. } => *title,
        }
    }

    /// The text shown to the user.
    pub fn message(&self) -> String {
        match self {
            ExportOutcome::Saved { path, .. } => format!("File saved to: {}", path.display()),
            ExportOutcome::Failed { message, .. } => message.clone(),
        }
    }
}

/// Run one export end to end.
///
/// Validation happens before any file is touched, so a rejected request never creates
/// `destination`.
pub fn export(catalog: &Catalog, request: &ExportRequest, destination: &Path) -> ExportOutcome {
    let outcome = run(catalog, request, destination);
    match &outcome {
        ExportOutcome::Saved { path, .. } => log::info!("saved {}", path.display()),
        ExportOutcome::Failed { title, message } => log::warn!("{title}: {message}"),
    }
    outcome
}

fn run(catalog: &Catalog, request: &ExportRequest, destination: &Path) -> ExportOutcome {
    let failed = |title, message: String| ExportOutcome::Failed { title, message };

    let mapping = match catalog.field_mapping(&request.document_type) {
        Ok(mapping) => mapping,
        Err(err) => return failed("Invalid Selection", err.to_string()),
    };
    if let Err(err) = request.validate(mapping) {
        return failed("Missing Data", err.to_string());
    }
    if destination.as_os_str().is_empty() {
        return failed("No Destination", "Choose where to save the file.".to_string());
    }
    let template = match catalog.resolve(&request.document_type, &request.equipment) {
        Ok(template) => template,
        Err(err) => return failed("Invalid Selection", err.to_string()),
    };

    match instantiate(template, destination, mapping, &request.values) {
        Ok(report) => ExportOutcome::Saved {
            path: destination.to_path_buf(),
            report,
        },
        Err(TemplateError::MissingTemplateFile { path }) => failed(
            "Template Missing",
            format!("Template file not found: {}", path.display()),
        ),
        Err(err) => failed("Export Error", format!("Failed to create file: {err}")),
    }
}
