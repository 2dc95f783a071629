//! Read-only access to worksheet cell values.

use std::collections::BTreeMap;

use packgen_model::CellRef;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::openxml::local_name;
use crate::shared_strings::SharedStringTable;
use crate::xstring;
use crate::XlsxError;

/// Read every cell that carries a value, keyed by position.
///
/// Values are returned as text the way they are stored: shared and inline strings are
/// resolved to their display text, every other type (numbers, booleans, errors, formula
/// string results) is the raw `<v>` content. Style-only cells are omitted.
pub fn read_worksheet_cells(
    xml: &[u8],
    shared_strings: Option<&SharedStringTable>,
) -> Result<BTreeMap<CellRef, String>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut out = BTreeMap::new();
    let mut buf = Vec::new();
    // Rows and cells may omit `r`; positions then follow the previous element.
    let mut row: u32 = 0;
    let mut next_col: u32 = 0;
    let mut seen_row = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"row" => {
                row = match attr(&e, b"r")?.and_then(|r| r.parse::<u32>().ok()) {
                    Some(r) if r > 0 => r - 1,
                    _ if seen_row => row + 1,
                    _ => 0,
                };
                seen_row = true;
                next_col = 0;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => {
                let cell = cell_position(&e, row, next_col)?;
                next_col = cell.col + 1;
            }
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => {
                let cell = cell_position(&e, row, next_col)?;
                next_col = cell.col + 1;
                let ty = attr(&e, b"t")?;
                if let Some(value) = read_cell_value(&mut reader, ty.as_deref(), shared_strings)? {
                    out.insert(cell, value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn cell_position(e: &BytesStart<'_>, row: u32, next_col: u32) -> Result<CellRef, XlsxError> {
    match attr(e, b"r")? {
        Some(r) => CellRef::from_a1(&r).map_err(|err| XlsxError::InvalidCellRef(r, err)),
        None => Ok(CellRef::new(row, next_col)),
    }
}

fn read_cell_value(
    reader: &mut Reader<&[u8]>,
    ty: Option<&str>,
    shared_strings: Option<&SharedStringTable>,
) -> Result<Option<String>, XlsxError> {
    let mut buf = Vec::new();
    let mut v: Option<String> = None;
    let mut inline: Option<String> = None;
    let mut in_v = false;
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"v" => {
                    in_v = true;
                    v.get_or_insert_with(String::new);
                }
                b"is" => {
                    inline.get_or_insert_with(String::new);
                }
                b"rPh" => in_phonetic = true,
                b"t" => in_t = true,
                _ => {}
            },
            Event::Text(e) => {
                let text = e.unescape()?;
                if in_v {
                    v.get_or_insert_with(String::new).push_str(&text);
                } else if in_t && !in_phonetic {
                    inline.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"v" => in_v = false,
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"c" => break,
                _ => {}
            },
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF inside worksheet <c>".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    match ty {
        Some("inlineStr") => Ok(inline.map(|t| xstring::decode(&t).into_owned())),
        Some("str") => Ok(v.map(|t| xstring::decode(&t).into_owned())),
        Some("s") => {
            let Some(v) = v else { return Ok(None) };
            let idx: usize = v
                .trim()
                .parse()
                .map_err(|_| XlsxError::Invalid(format!("invalid shared string index `{v}`")))?;
            shared_strings
                .and_then(|table| table.get(idx))
                .map(|text| Some(text.to_string()))
                .ok_or_else(|| {
                    XlsxError::Invalid(format!("shared string index {idx} is out of range"))
                })
        }
        _ => Ok(v),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell(a1: &str) -> CellRef {
        CellRef::from_a1(a1).unwrap()
    }

    #[test]
    fn reads_every_storage_form() {
        let sst = SharedStringTable::parse(
            br#"<sst><si><t>Customer</t></si><si><t>Acme</t></si></sst>"#,
        )
        .unwrap();
        let xml = br#"<worksheet><sheetData>
<row r="4"><c r="B4" t="s"><v>0</v></c><c r="C4" t="s"><v>1</v></c><c r="D4" s="3"/></row>
<row r="5"><c r="C5" t="inlineStr"><is><t xml:space="preserve">PO &amp; 100 </t></is></c><c r="E5"><v>42.5</v></c></row>
<row r="6"><c r="C6" t="str"><f>TODAY()</f><v>01/01/2025</v></c><c r="D6" t="b"><v>1</v></c></row>
</sheetData></worksheet>"#;

        let cells = read_worksheet_cells(xml, Some(&sst)).unwrap();
        assert_eq!(cells.get(&cell("B4")).map(String::as_str), Some("Customer"));
        assert_eq!(cells.get(&cell("C4")).map(String::as_str), Some("Acme"));
        assert_eq!(cells.get(&cell("D4")), None);
        assert_eq!(cells.get(&cell("C5")).map(String::as_str), Some("PO & 100 "));
        assert_eq!(cells.get(&cell("E5")).map(String::as_str), Some("42.5"));
        assert_eq!(cells.get(&cell("C6")).map(String::as_str), Some("01/01/2025"));
        assert_eq!(cells.get(&cell("D6")).map(String::as_str), Some("1"));
        assert_eq!(cells.len(), 6);
    }

    #[test]
    fn implicit_positions_follow_previous_elements() {
        let xml = br#"<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row><row><c r="C2"><v>3</v></c><c><v>4</v></c></row></sheetData></worksheet>"#;
        let cells = read_worksheet_cells(xml, None).unwrap();
        let got: Vec<_> = cells.iter().map(|(c, v)| (c.to_a1(), v.as_str())).collect();
        assert_eq!(
            got,
            vec![
                ("A1".to_string(), "1"),
                ("B1".to_string(), "2"),
                ("C2".to_string(), "3"),
                ("D2".to_string(), "4"),
            ]
        );
    }

    #[test]
    fn out_of_range_shared_string_index_is_an_error() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>9</v></c></row></sheetData></worksheet>"#;
        assert!(read_worksheet_cells(xml, None).is_err());
    }
}
