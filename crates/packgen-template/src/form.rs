use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::catalog::{Catalog, CatalogError, PACKING_LIST};
use crate::export::ExportRequest;
use crate::mapping::DATE;

/// Day/month/year, e.g. `31/12/2024`. Written into the output verbatim.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `{document type, spaces as _}_{first word of equipment}_{YYYYMMDD}.xlsx`
pub fn suggested_file_name(document_type: &str, equipment: &str, today: NaiveDate) -> String {
    format!(
        "{}_{}_{}.xlsx",
        document_type.replace(' ', "_"),
        equipment.split_whitespace().next().unwrap_or_default(),
        today.format("%Y%m%d")
    )
}

/// Selections and text fields of the export form.
///
/// The equipment list is a pure function of the document type
/// ([`Catalog::options_for`]); changing the type re-validates the current equipment.
#[derive(Debug, Clone)]
pub struct FormState<'a> {
    catalog: &'a Catalog,
    document_type: String,
    equipment: String,
    fields: BTreeMap<String, String>,
}

impl<'a> FormState<'a> {
    /// "Packing List" when registered (else the first type), its first equipment option,
    /// and today's date in the date field.
    pub fn new(catalog: &'a Catalog, today: NaiveDate) -> Self {
        let document_type = catalog
            .document_types()
            .find(|t| *t == PACKING_LIST)
            .or_else(|| catalog.document_types().next())
            .unwrap_or_default()
            .to_string();
        let equipment = first_option(catalog, &document_type);
        let fields = BTreeMap::from([(DATE.to_string(), format_date(today))]);
        Self {
            catalog,
            document_type,
            equipment,
            fields,
        }
    }

    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    pub fn equipment(&self) -> &str {
        &self.equipment
    }

    /// Equipment offered for the current document type.
    pub fn equipment_options(&self) -> Vec<&'a str> {
        self.catalog
            .options_for(&self.document_type)
            .unwrap_or_default()
    }

    /// Switch document type, keeping the equipment when the new type offers it and
    /// otherwise resetting to the first option.
    pub fn set_document_type(&mut self, document_type: &str) -> Result<(), CatalogError> {
        let options = self.catalog.options_for(document_type)?;
        if !options.contains(&self.equipment.as_str()) {
            self.equipment = options.first().copied().unwrap_or_default().to_string();
        }
        self.document_type = document_type.to_string();
        Ok(())
    }

    pub fn set_equipment(&mut self, equipment: &str) -> Result<(), CatalogError> {
        self.catalog.resolve(&self.document_type, equipment)?;
        self.equipment = equipment.to_string();
        Ok(())
    }

    pub fn set_field(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn field(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or_default()
    }

    /// Build the request for the current type's mapped fields, substituting today's date
    /// for a blank date.
    pub fn to_request(&self, today: NaiveDate) -> ExportRequest {
        let mut request = ExportRequest::new(&self.document_type, &self.equipment);
        if let Ok(mapping) = self.catalog.field_mapping(&self.document_type) {
            for field in mapping.fields() {
                let value = match self.field(field) {
                    v if field == DATE && v.trim().is_empty() => format_date(today),
                    v => v.to_string(),
                };
                request.values.insert(field.to_string(), value);
            }
        }
        request
    }

    pub fn suggested_file_name(&self, today: NaiveDate) -> String {
        suggested_file_name(&self.document_type, &self.equipment, today)
    }
}

fn first_option(catalog: &Catalog, document_type: &str) -> String {
    catalog
        .options_for(document_type)
        .ok()
        .and_then(|options| options.first().map(|o| o.to_string()))
        .unwrap_or_default()
}
