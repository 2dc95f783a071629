use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::openxml::local_name;
use crate::XlsxError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

/// One `<sheet>` entry of `xl/workbook.xml`, in tab order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheetInfo {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    pub visibility: SheetVisibility,
}

/// Sheet list plus the view state needed to pick the primary sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheets {
    pub sheets: Vec<WorkbookSheetInfo>,
    /// `bookViews/workbookView[0]/@activeTab`, if declared.
    pub active_tab: Option<usize>,
}

impl WorkbookSheets {
    /// Index of the sheet Excel shows on open.
    ///
    /// Falls back to the first sheet when no `activeTab` is declared or when it points past
    /// the end of the sheet list.
    pub fn primary_index(&self) -> Option<usize> {
        if self.sheets.is_empty() {
            return None;
        }
        match self.active_tab {
            Some(idx) if idx < self.sheets.len() => Some(idx),
            _ => Some(0),
        }
    }
}

pub fn parse_workbook_sheets(workbook_xml: &[u8]) -> Result<WorkbookSheets, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    let mut active_tab = None;
    let mut seen_view = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) => match local_name(e.name().as_ref()) {
                b"sheet" => sheets.push(parse_sheet_element(&e)?),
                b"workbookView" if !seen_view => {
                    seen_view = true;
                    active_tab = parse_active_tab(&e)?;
                }
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    Ok(WorkbookSheets { sheets, active_tab })
}

fn parse_active_tab(e: &BytesStart<'_>) -> Result<Option<usize>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"activeTab" {
            let v = attr.unescape_value()?;
            return Ok(v.trim().parse::<usize>().ok());
        }
    }
    Ok(None)
}

fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheetInfo, XlsxError> {
    let mut name: Option<String> = None;
    let mut sheet_id: Option<u32> = None;
    let mut rel_id: Option<String> = None;
    let mut visibility = SheetVisibility::Visible;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            b"sheetId" => {
                let v = attr.unescape_value()?;
                sheet_id = Some(v.parse::<u32>().map_err(|_| XlsxError::InvalidSheetId)?);
            }
            b"state" => {
                visibility = match attr.unescape_value()?.as_ref() {
                    "hidden" => SheetVisibility::Hidden,
                    "veryHidden" => SheetVisibility::VeryHidden,
                    _ => SheetVisibility::Visible,
                };
            }
            // `r:id`, whatever prefix the producer bound the relationships namespace to.
            _ if local_name(key) == b"id" => rel_id = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }

    Ok(WorkbookSheetInfo {
        name: name.ok_or(XlsxError::MissingAttr("name"))?,
        sheet_id: sheet_id.ok_or(XlsxError::MissingAttr("sheetId"))?,
        rel_id: rel_id.ok_or(XlsxError::MissingAttr("r:id"))?,
        visibility,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <bookViews><workbookView xWindow="0" yWindow="0" activeTab="1"/></bookViews>
  <sheets>
    <sheet name="Cover" sheetId="1" r:id="rId1"/>
    <sheet name="Packing List" sheetId="2" state="hidden" r:id="rId2"/>
  </sheets>
</workbook>"#;

    #[test]
    fn parses_sheets_and_active_tab() {
        let parsed = parse_workbook_sheets(WORKBOOK.as_bytes()).expect("parse");
        assert_eq!(parsed.active_tab, Some(1));
        assert_eq!(parsed.primary_index(), Some(1));
        assert_eq!(
            parsed.sheets[1],
            WorkbookSheetInfo {
                name: "Packing List".to_string(),
                sheet_id: 2,
                rel_id: "rId2".to_string(),
                visibility: SheetVisibility::Hidden,
            }
        );
    }

    #[test]
    fn primary_sheet_defaults_to_first() {
        let xml = WORKBOOK.replace(r#" activeTab="1""#, "");
        let parsed = parse_workbook_sheets(xml.as_bytes()).expect("parse");
        assert_eq!(parsed.active_tab, None);
        assert_eq!(parsed.primary_index(), Some(0));

        let xml = WORKBOOK.replace(r#"activeTab="1""#, r#"activeTab="7""#);
        let parsed = parse_workbook_sheets(xml.as_bytes()).expect("parse");
        assert_eq!(parsed.primary_index(), Some(0));
    }

    #[test]
    fn sheet_without_relationship_id_is_rejected() {
        let xml = WORKBOOK.replace(r#" r:id="rId1""#, "");
        let err = parse_workbook_sheets(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, XlsxError::MissingAttr("r:id")));
    }
}
