//! Part-preserving text patches for a single worksheet.
//!
//! The worksheet XML is streamed event by event and re-emitted unchanged, except for the
//! `<c>` elements that are being overwritten (and the `<row>`/`<c>` elements that have to be
//! created because the template never declared them). Rows and cells are kept in ascending
//! order, as SpreadsheetML requires.

use std::collections::BTreeMap;

use packgen_model::CellRef;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::shared_strings::{needs_space_preserve, SharedStringTable};
use crate::xstring;
use crate::XlsxError;

/// Text values to write into one worksheet, keyed by cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorksheetCellPatches {
    // Row-major ordering matches the order cells must appear in `<sheetData>`.
    cells: BTreeMap<CellRef, String>,
}

impl WorksheetCellPatches {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Set the text for `cell`, returning the text previously queued for it.
    pub fn set_text(&mut self, cell: CellRef, text: impl Into<String>) -> Option<String> {
        self.cells.insert(cell, text.into())
    }

    pub fn get(&self, cell: CellRef) -> Option<&str> {
        self.cells.get(&cell).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellRef, &str)> {
        self.cells.iter().map(|(cell, text)| (*cell, text.as_str()))
    }

    /// Patches grouped by 1-based row number, each row sorted by column.
    fn by_row(&self) -> BTreeMap<u32, Vec<(u32, &str)>> {
        let mut out: BTreeMap<u32, Vec<(u32, &str)>> = BTreeMap::new();
        for (cell, text) in &self.cells {
            out.entry(cell.row + 1)
                .or_default()
                .push((cell.col, text.as_str()));
        }
        out
    }
}

/// What a worksheet patch changed besides the patched values themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    /// Patched cells that held a formula before being overwritten.
    pub replaced_formulas: Vec<CellRef>,
}

/// Existing attributes of a `<c>` element that survive a patch.
#[derive(Debug, Default)]
struct ExistingCell {
    ty: Option<String>,
    style: Option<String>,
}

struct SheetPatcher<'a, 'b> {
    rows: BTreeMap<u32, Vec<(u32, &'a str)>>,
    /// Row numbers still waiting to be written, ascending.
    pending_rows: Vec<u32>,
    next_pending: usize,
    shared_strings: Option<&'b mut SharedStringTable>,
    summary: PatchSummary,
}

/// Apply `patches` to worksheet XML, returning the rewritten part.
///
/// When `shared_strings` is provided new text is stored in the shared string table (unless
/// the existing cell used inline storage); otherwise inline strings are written.
pub fn patch_worksheet_xml(
    original: &[u8],
    patches: &WorksheetCellPatches,
    shared_strings: Option<&mut SharedStringTable>,
) -> Result<(Vec<u8>, PatchSummary), XlsxError> {
    let rows = patches.by_row();
    let mut patcher = SheetPatcher {
        pending_rows: rows.keys().copied().collect(),
        rows,
        next_pending: 0,
        shared_strings,
        summary: PatchSummary::default(),
    };

    let mut reader = Reader::from_reader(original);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(original.len() + patches.len() * 64));

    let mut buf = Vec::new();
    let mut saw_sheet_data = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                writer.write_event(Event::Start(e.into_owned()))?;
                patcher.patch_sheet_data(&mut reader, &mut writer)?;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                if patcher.has_pending_rows() {
                    // `<sheetData/>` becomes `<sheetData>...</sheetData>`.
                    let start = e.into_owned();
                    let end = start.to_end().into_owned();
                    writer.write_event(Event::Start(start))?;
                    patcher.flush_rows_before(u32::MAX, &mut writer)?;
                    writer.write_event(Event::End(end))?;
                } else {
                    writer.write_event(Event::Empty(e.into_owned()))?;
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"worksheet" => {
                if !saw_sheet_data && patcher.has_pending_rows() {
                    let tag = prefixed(e.name().as_ref(), "sheetData");
                    writer.write_event(Event::Start(BytesStart::new(tag.as_str())))?;
                    patcher.flush_rows_before(u32::MAX, &mut writer)?;
                    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
                writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok((writer.into_inner(), patcher.summary))
}

impl<'a, 'b> SheetPatcher<'a, 'b> {
    fn has_pending_rows(&self) -> bool {
        self.next_pending < self.pending_rows.len()
    }

    /// Write brand-new rows for every pending row number below `row_num`.
    fn flush_rows_before(
        &mut self,
        row_num: u32,
        writer: &mut Writer<Vec<u8>>,
    ) -> Result<(), XlsxError> {
        while let Some(&row) = self.pending_rows.get(self.next_pending) {
            if row >= row_num {
                break;
            }
            self.next_pending += 1;
            let cells = self.rows.remove(&row).unwrap_or_default();
            let mut start = BytesStart::new("row");
            start.push_attribute(("r", row.to_string().as_str()));
            writer.write_event(Event::Start(start))?;
            for (col, text) in cells {
                self.write_cell(writer, CellRef::new(row - 1, col), text, None)?;
            }
            writer.write_event(Event::End(BytesEnd::new("row")))?;
        }
        Ok(())
    }

    /// Take the patches for an existing row, if any are queued for it.
    fn take_row(&mut self, row_num: u32) -> Option<Vec<(u32, &'a str)>> {
        if self.pending_rows.get(self.next_pending) == Some(&row_num) {
            self.next_pending += 1;
        }
        self.rows.remove(&row_num)
    }

    fn patch_sheet_data<R: std::io::BufRead>(
        &mut self,
        reader: &mut Reader<R>,
        writer: &mut Writer<Vec<u8>>,
    ) -> Result<(), XlsxError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if local_name(e.name().as_ref()) == b"row" => {
                    let row_start = e.into_owned();
                    let Some(row_num) = parse_row_number(&row_start)? else {
                        writer.write_event(Event::Start(row_start))?;
                        continue;
                    };
                    self.flush_rows_before(row_num, writer)?;
                    writer.write_event(Event::Start(row_start))?;
                    if let Some(cells) = self.take_row(row_num) {
                        self.patch_row(reader, writer, row_num, &cells)?;
                    }
                }
                Event::Empty(e) if local_name(e.name().as_ref()) == b"row" => {
                    let row_empty = e.into_owned();
                    let Some(row_num) = parse_row_number(&row_empty)? else {
                        writer.write_event(Event::Empty(row_empty))?;
                        continue;
                    };
                    self.flush_rows_before(row_num, writer)?;
                    match self.take_row(row_num) {
                        Some(cells) => {
                            // `<row/>` becomes `<row>...</row>`, keeping its attributes.
                            let end = row_empty.to_end().into_owned();
                            writer.write_event(Event::Start(row_empty))?;
                            for (col, text) in cells {
                                self.write_cell(writer, CellRef::new(row_num - 1, col), text, None)?;
                            }
                            writer.write_event(Event::End(end))?;
                        }
                        None => writer.write_event(Event::Empty(row_empty))?,
                    }
                }
                Event::End(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                    self.flush_rows_before(u32::MAX, writer)?;
                    writer.write_event(Event::End(e.into_owned()))?;
                    break;
                }
                Event::Eof => {
                    return Err(XlsxError::Invalid(
                        "unexpected EOF while patching sheetData".to_string(),
                    ))
                }
                ev => writer.write_event(ev.into_owned())?,
            }
        }
        Ok(())
    }

    /// Stream one existing row, replacing patched cells and inserting missing ones in column
    /// order. Consumes the row's end tag.
    fn patch_row<R: std::io::BufRead>(
        &mut self,
        reader: &mut Reader<R>,
        writer: &mut Writer<Vec<u8>>,
        row_num: u32,
        cells: &[(u32, &'a str)],
    ) -> Result<(), XlsxError> {
        let mut buf = Vec::new();
        let mut idx = 0usize;

        loop {
            buf.clear();
            let event = reader.read_event_into(&mut buf)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) if local_name(e.name().as_ref()) == b"c" => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let cell_el = e.to_owned();
                    let Some((cell, existing)) = parse_cell_attrs(&cell_el)? else {
                        writer.write_event(event.into_owned())?;
                        continue;
                    };
                    if cell.row + 1 != row_num {
                        // Mismatched cell refs are preserved unchanged.
                        writer.write_event(event.into_owned())?;
                        continue;
                    }

                    while let Some(&(col, text)) = cells.get(idx) {
                        if col >= cell.col {
                            break;
                        }
                        self.write_cell(writer, CellRef::new(row_num - 1, col), text, None)?;
                        idx += 1;
                    }

                    match cells.get(idx) {
                        Some(&(col, text)) if col == cell.col => {
                            idx += 1;
                            if !is_empty && skip_cell_body(reader)? {
                                self.summary.replaced_formulas.push(cell);
                            }
                            self.write_cell(writer, cell, text, Some(&existing))?;
                        }
                        _ => writer.write_event(event.into_owned())?,
                    }
                }
                Event::End(ref e) if local_name(e.name().as_ref()) == b"row" => {
                    for &(col, text) in &cells[idx.min(cells.len())..] {
                        self.write_cell(writer, CellRef::new(row_num - 1, col), text, None)?;
                    }
                    writer.write_event(event.into_owned())?;
                    break;
                }
                Event::Eof => {
                    return Err(XlsxError::Invalid(
                        "unexpected EOF while patching row".to_string(),
                    ))
                }
                _ => writer.write_event(event.into_owned())?,
            }
        }
        Ok(())
    }

    fn write_cell(
        &mut self,
        writer: &mut Writer<Vec<u8>>,
        cell: CellRef,
        text: &str,
        existing: Option<&ExistingCell>,
    ) -> Result<(), XlsxError> {
        let existing_ty = existing.and_then(|c| c.ty.as_deref());
        let style = existing
            .and_then(|c| c.style.as_deref())
            .filter(|s| s.trim() != "0");

        let mut out = String::with_capacity(text.len() + 48);
        out.push_str(r#"<c r=""#);
        out.push_str(&cell.to_a1());
        out.push('"');
        if let Some(s) = style {
            out.push_str(&format!(r#" s="{}""#, escape_attr(s)));
        }

        // Keep the template's storage form when it had one; otherwise prefer the shared
        // string table when the package has one.
        match (existing_ty, self.shared_strings.as_deref_mut()) {
            (Some("str"), _) => {
                out.push_str(r#" t="str"><v>"#);
                out.push_str(&escape_text(&xstring::encode(text)));
                out.push_str("</v></c>");
            }
            (Some("inlineStr"), _) | (_, None) => {
                out.push_str(r#" t="inlineStr"><is><t"#);
                if needs_space_preserve(text) {
                    out.push_str(r#" xml:space="preserve""#);
                }
                out.push('>');
                out.push_str(&escape_text(&xstring::encode(text)));
                out.push_str("</t></is></c>");
            }
            (_, Some(table)) => {
                let idx = table.get_or_append(text);
                out.push_str(&format!(r#" t="s"><v>{idx}</v></c>"#));
            }
        }

        writer.get_mut().extend_from_slice(out.as_bytes());
        Ok(())
    }
}

/// Skip the children of a `<c>` element whose start tag was just read, returning whether
/// it held a formula.
fn skip_cell_body<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<bool, XlsxError> {
    let mut buf = Vec::new();
    let mut had_formula = false;
    let mut depth = 1usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if depth == 1 && local_name(e.name().as_ref()) == b"f" {
                    had_formula = true;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 1 && local_name(e.name().as_ref()) == b"f" {
                    had_formula = true;
                }
            }
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while skipping patched cell".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(had_formula)
}

fn parse_row_number(row: &BytesStart<'_>) -> Result<Option<u32>, XlsxError> {
    for attr in row.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"r" {
            return Ok(attr.unescape_value()?.trim().parse::<u32>().ok());
        }
    }
    Ok(None)
}

fn parse_cell_attrs(cell: &BytesStart<'_>) -> Result<Option<(CellRef, ExistingCell)>, XlsxError> {
    let mut r = None;
    let mut existing = ExistingCell::default();
    for attr in cell.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match local_name(attr.key.as_ref()) {
            b"r" => r = Some(value),
            b"t" => existing.ty = Some(value),
            b"s" => existing.style = Some(value),
            _ => {}
        }
    }
    Ok(r
        .and_then(|r| CellRef::from_a1(&r).ok())
        .map(|cell| (cell, existing)))
}

fn prefixed(container: &[u8], local: &str) -> String {
    match std::str::from_utf8(container)
        .ok()
        .and_then(|n| n.rsplit_once(':'))
    {
        Some((prefix, _)) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell(a1: &str) -> CellRef {
        CellRef::from_a1(a1).unwrap()
    }

    fn patch(xml: &str, cells: &[(&str, &str)], sst: Option<&mut SharedStringTable>) -> String {
        let mut patches = WorksheetCellPatches::default();
        for (a1, text) in cells {
            patches.set_text(cell(a1), *text);
        }
        let (out, _) = patch_worksheet_xml(xml.as_bytes(), &patches, sst).expect("patch");
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn replaces_existing_cell_and_keeps_style() {
        let xml = r#"<worksheet><sheetData><row r="4" spans="2:3"><c r="B4" t="s" s="2"><v>0</v></c><c r="C4" s="5"/></row></sheetData></worksheet>"#;
        let out = patch(xml, &[("C4", "Acme & Co")], None);
        assert_eq!(
            out,
            r#"<worksheet><sheetData><row r="4" spans="2:3"><c r="B4" t="s" s="2"><v>0</v></c><c r="C4" s="5" t="inlineStr"><is><t>Acme &amp; Co</t></is></c></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn inserts_missing_cells_and_rows_in_order() {
        let xml = r#"<worksheet><sheetData><row r="4"><c r="B4"><v>1</v></c><c r="E4"><v>2</v></c></row><row r="9"><c r="A9"><v>3</v></c></row></sheetData></worksheet>"#;
        let out = patch(xml, &[("C4", "x"), ("F4", "y"), ("C6", "z"), ("C12", "w")], None);
        assert_eq!(
            out,
            concat!(
                r#"<worksheet><sheetData>"#,
                r#"<row r="4"><c r="B4"><v>1</v></c><c r="C4" t="inlineStr"><is><t>x</t></is></c><c r="E4"><v>2</v></c><c r="F4" t="inlineStr"><is><t>y</t></is></c></row>"#,
                r#"<row r="6"><c r="C6" t="inlineStr"><is><t>z</t></is></c></row>"#,
                r#"<row r="9"><c r="A9"><v>3</v></c></row>"#,
                r#"<row r="12"><c r="C12" t="inlineStr"><is><t>w</t></is></c></row>"#,
                r#"</sheetData></worksheet>"#
            )
        );
    }

    #[test]
    fn expands_empty_sheet_data_and_empty_rows() {
        let out = patch(r#"<worksheet><sheetData/></worksheet>"#, &[("C4", "a")], None);
        assert_eq!(
            out,
            r#"<worksheet><sheetData><row r="4"><c r="C4" t="inlineStr"><is><t>a</t></is></c></row></sheetData></worksheet>"#
        );

        let out = patch(
            r#"<worksheet><sheetData><row r="4" ht="20" customHeight="1"/></sheetData></worksheet>"#,
            &[("C4", "a")],
            None,
        );
        assert_eq!(
            out,
            r#"<worksheet><sheetData><row r="4" ht="20" customHeight="1"><c r="C4" t="inlineStr"><is><t>a</t></is></c></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn uses_shared_strings_when_available() {
        let mut sst = SharedStringTable::parse(br#"<sst><si><t>Acme</t></si></sst>"#).unwrap();
        let xml = r#"<worksheet><sheetData><row r="4"><c r="C4"/></row><row r="5"><c r="C5" t="inlineStr"><is><t>old</t></is></c></row></sheetData></worksheet>"#;
        let out = patch(xml, &[("C4", "Acme"), ("C5", "PO-1"), ("C6", "new")], Some(&mut sst));
        assert!(out.contains(r#"<c r="C4" t="s"><v>0</v></c>"#), "{out}");
        assert!(
            out.contains(r#"<c r="C5" t="inlineStr"><is><t>PO-1</t></is></c>"#),
            "{out}"
        );
        assert!(out.contains(r#"<c r="C6" t="s"><v>1</v></c>"#), "{out}");
        assert_eq!(sst.len(), 2);
    }

    #[test]
    fn reports_replaced_formulas() {
        let xml = r#"<worksheet><sheetData><row r="6"><c r="C6" t="str"><f>TEXT(TODAY(),"dd/mm/yyyy")</f><v>01/01/2024</v></c></row></sheetData></worksheet>"#;
        let mut patches = WorksheetCellPatches::default();
        patches.set_text(cell("C6"), "31/12/2024");
        let (out, summary) = patch_worksheet_xml(xml.as_bytes(), &patches, None).unwrap();
        assert_eq!(summary.replaced_formulas, vec![cell("C6")]);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<worksheet><sheetData><row r="6"><c r="C6" t="str"><v>31/12/2024</v></c></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn control_characters_are_written_as_xstring_escapes() {
        let xml = r#"<worksheet><sheetData><row r="4"><c r="C4"/><c r="D4" t="str"><v>old</v></c></row></sheetData></worksheet>"#;
        let value = "A\u{1}B\r\nC";
        let out = patch(xml, &[("C4", value), ("D4", value)], None);
        assert!(
            out.contains("<c r=\"C4\" t=\"inlineStr\"><is><t>A_x0001_B_x000D_\nC</t></is></c>"),
            "{out}"
        );
        assert!(out.contains("<c r=\"D4\" t=\"str\"><v>A_x0001_B_x000D_\nC</v></c>"), "{out}");
        assert!(!out.contains(['\u{1}', '\r']), "{out}");

        let cells = crate::read_worksheet_cells(out.as_bytes(), None).unwrap();
        assert_eq!(cells.get(&cell("C4")).map(String::as_str), Some(value));
        assert_eq!(cells.get(&cell("D4")).map(String::as_str), Some(value));
    }

    #[test]
    fn untouched_content_is_reemitted_verbatim() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\n  <sheetViews><sheetView workbookViewId=\"0\"/></sheetViews>\n  <sheetData>\n    <row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c></row>\n  </sheetData>\n  <mergeCells count=\"1\"><mergeCell ref=\"C4:E4\"/></mergeCells>\n</worksheet>";
        let out = patch(xml, &[("C4", "v")], None);
        assert_eq!(
            out,
            xml.replace(
                "  </sheetData>",
                "  <row r=\"4\"><c r=\"C4\" t=\"inlineStr\"><is><t>v</t></is></c></row></sheetData>"
            )
        );
    }
}
