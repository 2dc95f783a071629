//! Registered document types, their equipment variants and template files.
//!
//! A [`Catalog`] is built once at startup, either from the built-in table or from a JSON
//! configuration file, and is read-only afterwards. Lookups never fall back to a default:
//! an unregistered pair is an error.

use std::path::{Path, PathBuf};

use packgen_model::{AddressError, CellRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapping::{DuplicateFieldError, FieldCell, FieldMapping};

pub const ITP: &str = "ITP";
pub const PACKING_LIST: &str = "Packing List";

pub const DISC_33KV_MANUAL: &str = "33kV Disc Manual + Single E/S Manual";
pub const DISC_72KV_MOTORISED: &str = "72.5kV Disc Motorised + Dual E/S Motorised";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown document type `{0}`")]
    UnknownDocumentType(String),
    #[error("equipment `{equipment}` is not registered for document type `{document_type}`")]
    UnknownEquipment {
        document_type: String,
        equipment: String,
    },
    #[error("catalog registers no document types")]
    Empty,
    #[error("document type `{0}` is registered more than once")]
    DuplicateDocumentType(String),
    #[error("document type `{0}` has no equipment variants")]
    NoEquipment(String),
    #[error("equipment `{equipment}` is registered more than once for `{document_type}`")]
    DuplicateEquipment {
        document_type: String,
        equipment: String,
    },
    #[error("document type `{document_type}`: {source}")]
    DuplicateField {
        document_type: String,
        #[source]
        source: DuplicateFieldError,
    },
    #[error("document type `{document_type}`: field `{field}` maps to invalid cell `{cell}`: {source}")]
    InvalidCellReference {
        document_type: String,
        field: String,
        cell: String,
        #[source]
        source: AddressError,
    },
    #[error("failed to read catalog config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One (document type, equipment) -> template registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCatalogEntry {
    pub equipment: String,
    pub template: PathBuf,
}

/// A document type with its field mapping and templates, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentType {
    pub name: String,
    pub field_mapping: FieldMapping,
    pub templates: Vec<TemplateCatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    document_types: Vec<DocumentType>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate keys, empty equipment lists and cell references
    /// that do not parse.
    pub fn new(document_types: Vec<DocumentType>) -> Result<Self, CatalogError> {
        if document_types.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (idx, doc) in document_types.iter().enumerate() {
            if document_types[..idx].iter().any(|d| d.name == doc.name) {
                return Err(CatalogError::DuplicateDocumentType(doc.name.clone()));
            }
            if doc.templates.is_empty() {
                return Err(CatalogError::NoEquipment(doc.name.clone()));
            }
            for (t_idx, entry) in doc.templates.iter().enumerate() {
                if doc.templates[..t_idx]
                    .iter()
                    .any(|e| e.equipment == entry.equipment)
                {
                    return Err(CatalogError::DuplicateEquipment {
                        document_type: doc.name.clone(),
                        equipment: entry.equipment.clone(),
                    });
                }
            }
            for FieldCell { field, cell } in doc.field_mapping.iter() {
                CellRef::from_a1(cell).map_err(|source| CatalogError::InvalidCellReference {
                    document_type: doc.name.clone(),
                    field: field.clone(),
                    cell: cell.clone(),
                    source,
                })?;
            }
        }
        Ok(Self { document_types })
    }

    /// The shipped table: ITP and Packing List, each with the two switchgear variants, all
    /// using the standard header mapping. Template files are looked up in `templates_dir`.
    pub fn builtin(templates_dir: impl AsRef<Path>) -> Self {
        let dir = templates_dir.as_ref();
        let entry = |equipment: &str, file: &str| TemplateCatalogEntry {
            equipment: equipment.to_string(),
            template: dir.join(file),
        };
        Self {
            document_types: vec![
                DocumentType {
                    name: ITP.to_string(),
                    field_mapping: FieldMapping::standard(),
                    templates: vec![
                        entry(DISC_33KV_MANUAL, "ITP LIST -Template.xls"),
                        entry(DISC_72KV_MOTORISED, "ITP LIST -Template.xls"),
                    ],
                },
                DocumentType {
                    name: PACKING_LIST.to_string(),
                    field_mapping: FieldMapping::standard(),
                    templates: vec![
                        entry(
                            DISC_72KV_MOTORISED,
                            "PACKING LIST - Disc 72.5kV Motor Dual ES Motor.xlsx",
                        ),
                        entry(
                            DISC_33KV_MANUAL,
                            "PACKING LIST - Disc 33kV Manual Single ES Manual.xlsx",
                        ),
                    ],
                },
            ],
        }
    }

    /// Load a JSON [`CatalogConfig`]; relative template paths resolve against the file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CatalogConfig =
            serde_json::from_str(&text).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_config(config, packgen_fs::parent_dir_or_dot(path))
    }

    pub fn from_config(config: CatalogConfig, base_dir: &Path) -> Result<Self, CatalogError> {
        let mut document_types = Vec::with_capacity(config.document_types.len());
        for doc in config.document_types {
            let field_mapping = match doc.fields {
                Some(fields) => FieldMapping::new(fields.into_iter().map(|c| (c.field, c.cell)))
                    .map_err(|source| CatalogError::DuplicateField {
                        document_type: doc.name.clone(),
                        source,
                    })?,
                None => FieldMapping::standard(),
            };
            let templates = doc
                .templates
                .into_iter()
                .map(|t| TemplateCatalogEntry {
                    equipment: t.equipment,
                    template: base_dir.join(t.path),
                })
                .collect();
            document_types.push(DocumentType {
                name: doc.name,
                field_mapping,
                templates,
            });
        }
        Self::new(document_types)
    }

    pub fn document_types(&self) -> impl Iterator<Item = &str> {
        self.document_types.iter().map(|d| d.name.as_str())
    }

    fn document_type(&self, name: &str) -> Result<&DocumentType, CatalogError> {
        self.document_types
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CatalogError::UnknownDocumentType(name.to_string()))
    }

    /// Equipment variants offered for `document_type`, in registration order.
    pub fn options_for(&self, document_type: &str) -> Result<Vec<&str>, CatalogError> {
        Ok(self
            .document_type(document_type)?
            .templates
            .iter()
            .map(|e| e.equipment.as_str())
            .collect())
    }

    pub fn field_mapping(&self, document_type: &str) -> Result<&FieldMapping, CatalogError> {
        Ok(&self.document_type(document_type)?.field_mapping)
    }

    pub fn resolve(&self, document_type: &str, equipment: &str) -> Result<&Path, CatalogError> {
        self.document_type(document_type)?
            .templates
            .iter()
            .find(|e| e.equipment == equipment)
            .map(|e| e.template.as_path())
            .ok_or_else(|| CatalogError::UnknownEquipment {
                document_type: document_type.to_string(),
                equipment: equipment.to_string(),
            })
    }

    /// Every registered (document type, equipment, template) triple.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &Path)> {
        self.document_types.iter().flat_map(|d| {
            d.templates
                .iter()
                .map(move |e| (d.name.as_str(), e.equipment.as_str(), e.template.as_path()))
        })
    }
}

/// On-disk catalog description.
///
/// ```json
/// {
///   "document_types": [
///     {
///       "name": "Packing List",
///       "templates": [
///         { "equipment": "33kV Disc Manual + Single E/S Manual", "path": "pl-33kv.xlsx" }
///       ]
///     }
///   ]
/// }
/// ```
///
/// `fields` is optional and defaults to the standard header mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    pub document_types: Vec<DocumentTypeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentTypeConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldCell>>,
    pub templates: Vec<TemplateConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    pub equipment: String,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_table_matches_shipped_templates() {
        let catalog = Catalog::builtin("/templates");
        assert_eq!(catalog.document_types().collect::<Vec<_>>(), vec![ITP, PACKING_LIST]);
        assert_eq!(
            catalog.options_for(PACKING_LIST).unwrap(),
            vec![DISC_72KV_MOTORISED, DISC_33KV_MANUAL]
        );
        assert_eq!(
            catalog.resolve(PACKING_LIST, DISC_33KV_MANUAL).unwrap(),
            Path::new("/templates/PACKING LIST - Disc 33kV Manual Single ES Manual.xlsx")
        );
        assert_eq!(
            catalog.resolve(ITP, DISC_72KV_MOTORISED).unwrap(),
            catalog.resolve(ITP, DISC_33KV_MANUAL).unwrap()
        );
        assert_eq!(catalog.field_mapping(ITP).unwrap(), &FieldMapping::standard());

        // The built-in table passes the same checks as a configured one.
        let rebuilt = Catalog::new(catalog.document_types.clone()).unwrap();
        assert_eq!(rebuilt, catalog);
    }

    #[test]
    fn unknown_keys_fail_loudly() {
        let catalog = Catalog::builtin(".");
        assert!(matches!(
            catalog.resolve("Invoice", DISC_33KV_MANUAL),
            Err(CatalogError::UnknownDocumentType(t)) if t == "Invoice"
        ));
        assert!(matches!(
            catalog.resolve(PACKING_LIST, "11kV Breaker"),
            Err(CatalogError::UnknownEquipment { .. })
        ));
        assert!(catalog.options_for("Invoice").is_err());
    }

    #[test]
    fn config_paths_resolve_against_base_dir() {
        let config: CatalogConfig = serde_json::from_str(
            r#"{"document_types":[{"name":"Packing List","fields":[{"field":"Customer","cell":"B2"}],"templates":[{"equipment":"A","path":"a.xlsx"},{"equipment":"B","path":"/abs/b.xlsx"}]}]}"#,
        )
        .unwrap();
        let catalog = Catalog::from_config(config, Path::new("/cfg")).unwrap();
        assert_eq!(catalog.resolve(PACKING_LIST, "A").unwrap(), Path::new("/cfg/a.xlsx"));
        assert_eq!(catalog.resolve(PACKING_LIST, "B").unwrap(), Path::new("/abs/b.xlsx"));
        assert_eq!(catalog.field_mapping(PACKING_LIST).unwrap().cell_for("Customer"), Some("B2"));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let build = |json: &str| {
            let config: CatalogConfig = serde_json::from_str(json).unwrap();
            Catalog::from_config(config, Path::new("."))
        };

        assert!(matches!(
            build(r#"{"document_types":[]}"#),
            Err(CatalogError::Empty)
        ));
        assert!(matches!(
            build(r#"{"document_types":[{"name":"X","templates":[]}]}"#),
            Err(CatalogError::NoEquipment(_))
        ));
        assert!(matches!(
            build(r#"{"document_types":[{"name":"X","templates":[{"equipment":"A","path":"a"}]},{"name":"X","templates":[{"equipment":"A","path":"a"}]}]}"#),
            Err(CatalogError::DuplicateDocumentType(_))
        ));
        assert!(matches!(
            build(r#"{"document_types":[{"name":"X","templates":[{"equipment":"A","path":"a"},{"equipment":"A","path":"b"}]}]}"#),
            Err(CatalogError::DuplicateEquipment { .. })
        ));
        assert!(matches!(
            build(r#"{"document_types":[{"name":"X","fields":[{"field":"F","cell":"C4"},{"field":"F","cell":"C5"}],"templates":[{"equipment":"A","path":"a"}]}]}"#),
            Err(CatalogError::DuplicateField { .. })
        ));
        assert!(matches!(
            build(r#"{"document_types":[{"name":"X","fields":[{"field":"F","cell":"4C"}],"templates":[{"equipment":"A","path":"a"}]}]}"#),
            Err(CatalogError::InvalidCellReference { .. })
        ));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Catalog::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
        assert!(err.to_string().contains("catalog.json"));
    }
}
