//! Shared string table (`xl/sharedStrings.xml`) access with append-only updates.
//!
//! Existing `<si>` entries are never re-serialized: rich runs, phonetic hints and extension
//! data of a template survive untouched. New plain strings are appended before `</sst>`.

use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::xstring;
use crate::XlsxError;

#[derive(Debug, Default, Clone)]
pub struct SharedStringTable {
    /// Display text of every entry, in index order.
    texts: Vec<String>,
    /// Plain (run-free) entries, for reuse when a written value already exists.
    plain_index: HashMap<String, u32>,
    appended: Vec<String>,
}

impl SharedStringTable {
    pub fn parse(xml: &[u8]) -> Result<Self, XlsxError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(false);

        let mut table = Self::default();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if local_name(e.name().as_ref()) == b"si" => {
                    let (text, has_runs) = read_si(&mut reader)?;
                    let idx = table.texts.len() as u32;
                    if !has_runs {
                        table.plain_index.entry(text.clone()).or_insert(idx);
                    }
                    table.texts.push(text);
                }
                Event::Empty(e) if local_name(e.name().as_ref()) == b"si" => {
                    table.texts.push(String::new());
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Display text of entry `idx` (rich runs concatenated, phonetic runs skipped).
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.texts.get(idx).map(String::as_str)
    }

    /// Index of a plain entry equal to `text`, appending one when none exists.
    pub fn get_or_append(&mut self, text: &str) -> u32 {
        if let Some(idx) = self.plain_index.get(text) {
            return *idx;
        }
        let idx = self.texts.len() as u32;
        self.texts.push(text.to_string());
        self.plain_index.insert(text.to_string(), idx);
        self.appended.push(text.to_string());
        idx
    }

    /// True when [`Self::get_or_append`] added entries since parsing.
    pub fn is_dirty(&self) -> bool {
        !self.appended.is_empty()
    }

    /// Rewrite `original` with the appended entries inserted before `</sst>`.
    ///
    /// `uniqueCount` is set to the new entry count; `count` (total references, advisory for
    /// Excel) is bumped by the number of appended entries.
    pub fn write_appended(&self, original: &[u8]) -> Result<Vec<u8>, XlsxError> {
        let mut reader = Reader::from_reader(original);
        reader.config_mut().trim_text(false);
        let mut writer = Writer::new(Vec::with_capacity(
            original.len() + self.appended.iter().map(|s| s.len() + 32).sum::<usize>(),
        ));

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if local_name(e.name().as_ref()) == b"sst" => {
                    writer.write_event(Event::Start(self.updated_sst_start(&e)?))?;
                }
                Event::Empty(e) if local_name(e.name().as_ref()) == b"sst" => {
                    // `<sst/>` becomes `<sst>...</sst>`.
                    let start = self.updated_sst_start(&e)?;
                    let end = start.to_end().into_owned();
                    let prefix = name_prefix(start.name().as_ref());
                    writer.write_event(Event::Start(start))?;
                    self.write_entries(&mut writer, prefix.as_deref())?;
                    writer.write_event(Event::End(end))?;
                }
                Event::End(e) if local_name(e.name().as_ref()) == b"sst" => {
                    let prefix = name_prefix(e.name().as_ref());
                    self.write_entries(&mut writer, prefix.as_deref())?;
                    writer.write_event(Event::End(e.into_owned()))?;
                }
                Event::Eof => break,
                ev => writer.write_event(ev.into_owned())?,
            }
            buf.clear();
        }
        Ok(writer.into_inner())
    }

    fn updated_sst_start(&self, e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
        let name = String::from_utf8(e.name().as_ref().to_vec())?;
        let mut start = BytesStart::new(name);
        let unique = self.texts.len().to_string();
        let mut saw_unique = false;
        for attr in e.attributes() {
            let attr = attr?;
            let key = attr.key.as_ref();
            match local_name(key) {
                b"uniqueCount" => {
                    saw_unique = true;
                    start.push_attribute((key, unique.as_bytes()));
                }
                b"count" => {
                    let old: usize = attr.unescape_value()?.trim().parse().unwrap_or(0);
                    let count = (old + self.appended.len()).to_string();
                    start.push_attribute((key, count.as_bytes()));
                }
                _ => start.push_attribute(attr),
            }
        }
        if !saw_unique {
            start.push_attribute(("uniqueCount", unique.as_str()));
        }
        Ok(start)
    }

    fn write_entries(
        &self,
        writer: &mut Writer<Vec<u8>>,
        prefix: Option<&str>,
    ) -> Result<(), XlsxError> {
        let tag = |local: &str| match prefix {
            Some(p) => format!("{p}:{local}"),
            None => local.to_string(),
        };
        let (si, t) = (tag("si"), tag("t"));
        for text in &self.appended {
            writer.write_event(Event::Start(BytesStart::new(si.as_str())))?;
            let mut t_start = BytesStart::new(t.as_str());
            if needs_space_preserve(text) {
                t_start.push_attribute(("xml:space", "preserve"));
            }
            writer.write_event(Event::Start(t_start))?;
            writer.write_event(Event::Text(BytesText::new(&xstring::encode(text))))?;
            writer.write_event(Event::End(BytesEnd::new(t.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(si.as_str())))?;
        }
        Ok(())
    }
}

fn name_prefix(qname: &[u8]) -> Option<String> {
    std::str::from_utf8(qname)
        .ok()
        .and_then(|n| n.rsplit_once(':'))
        .map(|(p, _)| p.to_string())
}

/// Read one `<si>` entry, returning its display text and whether it carries rich runs.
fn read_si(reader: &mut Reader<&[u8]>) -> Result<(String, bool), XlsxError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut has_runs = false;
    let mut in_t = false;
    // Depth of an ignored subtree (`<rPh>`, `<phoneticPr>`, extensions).
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(_) if skip_depth > 0 => skip_depth -= 1,
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"t" => in_t = true,
                b"r" => has_runs = true,
                _ => skip_depth = 1,
            },
            Event::Text(e) if in_t && skip_depth == 0 => {
                text.push_str(&xstring::decode(&e.unescape()?))
            }
            Event::CData(e) if in_t && skip_depth == 0 => {
                text.push_str(std::str::from_utf8(e.as_ref()).map_err(|err| {
                    XlsxError::Invalid(format!("sharedStrings.xml CDATA is not UTF-8: {err}"))
                })?)
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"t" => in_t = false,
                b"si" => break,
                _ => {}
            },
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF inside sharedStrings.xml <si>".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok((text, has_runs))
}

pub(crate) fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="5" uniqueCount="3"><si><t>Customer</t></si><si><r><rPr><b/></rPr><t>Packing</t></r><r><t xml:space="preserve"> List</t></r></si><si><t>A &amp; B</t><rPh sb="0" eb="1"><t>ignored</t></rPh></si></sst>"#;

    #[test]
    fn parses_plain_rich_and_phonetic_entries() {
        let table = SharedStringTable::parse(SST.as_bytes()).expect("parse");
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("Customer"));
        assert_eq!(table.get(1), Some("Packing List"));
        assert_eq!(table.get(2), Some("A & B"));
    }

    #[test]
    fn reuses_plain_entries_but_not_rich_ones() {
        let mut table = SharedStringTable::parse(SST.as_bytes()).expect("parse");
        assert_eq!(table.get_or_append("Customer"), 0);
        assert!(!table.is_dirty());
        assert_eq!(table.get_or_append("Packing List"), 3);
        assert_eq!(table.get_or_append("Packing List"), 3);
        assert!(table.is_dirty());
    }

    #[test]
    fn appended_entries_keep_existing_bytes() {
        let mut table = SharedStringTable::parse(SST.as_bytes()).expect("parse");
        table.get_or_append("Acme <Ltd>");
        table.get_or_append(" padded ");

        let out = String::from_utf8(table.write_appended(SST.as_bytes()).unwrap()).unwrap();
        assert!(out.contains(r#"count="7" uniqueCount="5""#), "{out}");
        assert!(out.contains(
            r#"<si><r><rPr><b/></rPr><t>Packing</t></r><r><t xml:space="preserve"> List</t></r></si>"#
        ));
        assert!(out.ends_with(
            r#"<si><t>Acme &lt;Ltd&gt;</t></si><si><t xml:space="preserve"> padded </t></si></sst>"#
        ));

        let reparsed = SharedStringTable::parse(out.as_bytes()).unwrap();
        assert_eq!(reparsed.len(), 5);
        assert_eq!(reparsed.get(3), Some("Acme <Ltd>"));
        assert_eq!(reparsed.get(4), Some(" padded "));
    }

    #[test]
    fn appended_control_characters_round_trip_through_xstring_escapes() {
        let xml = r#"<sst><si><t>literal _x005F_x0041_</t></si></sst>"#;
        let mut table = SharedStringTable::parse(xml.as_bytes()).unwrap();
        assert_eq!(table.get(0), Some("literal _x0041_"));
        assert_eq!(table.get_or_append("literal _x0041_"), 0);

        let value = "A\u{1}B\r\nC";
        assert_eq!(table.get_or_append(value), 1);
        let out = String::from_utf8(table.write_appended(xml.as_bytes()).unwrap()).unwrap();
        assert!(out.ends_with("<si><t>A_x0001_B_x000D_\nC</t></si></sst>"), "{out}");
        assert!(!out.contains(['\u{1}', '\r']), "{out}");

        let reparsed = SharedStringTable::parse(out.as_bytes()).unwrap();
        assert_eq!(reparsed.get(1), Some(value));
    }

    #[test]
    fn empty_table_element_is_expanded() {
        let xml = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"/>"#;
        let mut table = SharedStringTable::parse(xml.as_bytes()).unwrap();
        assert_eq!(table.get_or_append("PO-100"), 0);
        let out = String::from_utf8(table.write_appended(xml.as_bytes()).unwrap()).unwrap();
        assert_eq!(
            out,
            r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" uniqueCount="1"><si><t>PO-100</t></si></sst>"#
        );
    }
}
